//! Collaborator interfaces consulted during materialization
//!
//! The algorithm catalog, the group engine, the parameter transformer and
//! the time-series catalog live outside this crate. The materializer only
//! sees them through these traits.

use crate::error::DependsResult;
use crate::model::{Algorithm, AlgorithmId, CompParm, GroupId, TimeSeriesIdentifier, TsGroup, TsKey};
use crate::store::{groups, Store};
use std::sync::Arc;

/// Read-only algorithm catalog
pub trait AlgorithmSource: Send + Sync {
    fn load_algorithm(&self, id: AlgorithmId) -> DependsResult<Option<Algorithm>>;
}

/// Loads group definitions; `None` means the group no longer exists
pub trait GroupSource: Send + Sync {
    fn load_group(&self, id: GroupId) -> DependsResult<Option<TsGroup>>;
}

/// Turns a group selector into a concrete member list
pub trait GroupExpander: Send + Sync {
    fn expand_group(&self, group: &TsGroup) -> DependsResult<Vec<TsKey>>;
}

/// Result of adapting one group member to one parameter role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    Resolved(TsKey),
    /// No series exists for this member and role
    NotFound,
    /// The member cannot be combined with the role
    Invalid(String),
}

/// Adapts a generic group member into the series a parameter role needs
pub trait ParmTransformer: Send + Sync {
    fn transform(&self, member: TsKey, parm: &CompParm) -> TransformOutcome;
}

/// Time-series catalog lookup; `None` marks a dangling key
pub trait TimeSeriesResolver: Send + Sync {
    fn resolve(&self, key: TsKey) -> DependsResult<Option<TimeSeriesIdentifier>>;
}

/// Collaborators handed to a [`DependencyMaterializer`](super::DependencyMaterializer)
#[derive(Clone)]
pub struct Collaborators {
    pub algorithms: Arc<dyn AlgorithmSource>,
    pub groups: Arc<dyn GroupSource>,
    pub expander: Arc<dyn GroupExpander>,
    pub transformer: Arc<dyn ParmTransformer>,
    pub resolver: Arc<dyn TimeSeriesResolver>,
}

impl Collaborators {
    /// Collaborators backed only by the store itself
    ///
    /// No algorithm catalog (parameters must carry their own type code),
    /// groups expand to their explicit membership rows, members are used
    /// as-is and series are named by their key.
    pub fn standalone(store: Arc<Store>) -> Self {
        let membership = Arc::new(MembershipGroupExpander::new(store));
        Self {
            algorithms: Arc::new(NoAlgorithmCatalog),
            groups: membership.clone(),
            expander: membership,
            transformer: Arc::new(IdentityTransform),
            resolver: Arc::new(KeyNameResolver),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Algorithm source that knows no algorithms
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAlgorithmCatalog;

impl AlgorithmSource for NoAlgorithmCatalog {
    fn load_algorithm(&self, _id: AlgorithmId) -> DependsResult<Option<Algorithm>> {
        Ok(None)
    }
}

/// Uses each group member unchanged for every parameter role
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl ParmTransformer for IdentityTransform {
    fn transform(&self, member: TsKey, _parm: &CompParm) -> TransformOutcome {
        TransformOutcome::Resolved(member)
    }
}

/// Names every key by its number; nothing dangles
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyNameResolver;

impl TimeSeriesResolver for KeyNameResolver {
    fn resolve(&self, key: TsKey) -> DependsResult<Option<TimeSeriesIdentifier>> {
        Ok(Some(TimeSeriesIdentifier::new(key, key.to_string())))
    }
}

/// Groups defined purely by `tsdb_group_member_ts` rows
///
/// A group exists while it has at least one explicit member.
#[derive(Debug, Clone)]
pub struct MembershipGroupExpander {
    store: Arc<Store>,
}

impl MembershipGroupExpander {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl GroupExpander for MembershipGroupExpander {
    fn expand_group(&self, group: &TsGroup) -> DependsResult<Vec<TsKey>> {
        self.store.read(|conn| groups::members(conn, group.id))
    }
}

impl GroupSource for MembershipGroupExpander {
    fn load_group(&self, id: GroupId) -> DependsResult<Option<TsGroup>> {
        let members = self.store.read(|conn| groups::members(conn, id))?;
        if members.is_empty() {
            return Ok(None);
        }
        // Unnamed: membership rows carry no group name. Members are read
        // again by `expand_group` on every pass.
        Ok(Some(TsGroup::new(id, "")))
    }
}
