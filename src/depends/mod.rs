//! Dependency Materializer
//!
//! - **DependencyMaterializer**: rebuilds and queries the dependency index
//! - **collaborators**: traits for the algorithm catalog, group engine,
//!   parameter transformer and time-series catalog, plus store-backed defaults

pub mod collaborators;
mod materializer;

#[cfg(test)]
pub(crate) mod test_support;

pub use collaborators::{
    AlgorithmSource, Collaborators, GroupExpander, GroupSource, IdentityTransform,
    KeyNameResolver, MembershipGroupExpander, NoAlgorithmCatalog, ParmTransformer,
    TimeSeriesResolver, TransformOutcome,
};
pub use materializer::DependencyMaterializer;
