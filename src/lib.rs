//! # compdeps
//!
//! Dependency tracking and change notification for a computation-processing
//! pipeline: which computations must be reconsidered when data arrives for a
//! time series, and which time series each computation currently depends on.
//!
//! ## Features
//!
//! - **Object cache**: dual-key (id + unique name) TTL cache for reference data
//! - **Dependency index**: materialized `(time series, computation)` rows,
//!   rebuilt per computation in one transaction
//! - **Notification queue**: durable, oldest-first hand-off of change events
//! - **Updater**: consumer that turns change events into index maintenance
//!
//! ## Modules
//!
//! - [`cache`]: generic object cache and the shared reference caches
//! - [`depends`]: dependency materializer and its collaborator traits
//! - [`notify`]: change notification queue
//! - [`store`]: SQLite persistence
//! - [`updater`]: queue consumer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use compdeps::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Store::open("depends.db")?);
//!     let materializer = DependencyMaterializer::new(
//!         store.clone(),
//!         ReferenceCaches::default(),
//!         Collaborators::standalone(store.clone()),
//!     );
//!
//!     let comp = Computation::new(CompId(1), "stage-to-flow")
//!         .parm(CompParm::input("stage").bound_to(TsKey(100)))
//!         .parm(CompParm::output("flow"));
//!     materializer.materialize(&comp)?;
//!
//!     let affected = materializer.computations_affected_by(&[TsKey(100)], None)?;
//!     println!("{} computation(s) to run", affected.len());
//!
//!     let queue = NotifyQueue::new(store);
//!     queue.enqueue(EventType::CompModified, 1)?;
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod depends;
pub mod error;
pub mod model;
pub mod notify;
pub mod store;
pub mod updater;

// Re-export top-level types for convenience
pub use cache::{CacheObject, CacheValidator, ObjectCache, ReferenceCaches};

pub use config::{
    CacheConfig, Config, ConfigError, LoggingConfig, StoreConfig, UpdaterConfig,
};

pub use depends::{
    AlgorithmSource, Collaborators, DependencyMaterializer, GroupExpander, GroupSource,
    ParmTransformer, TimeSeriesResolver, TransformOutcome,
};

pub use error::{DependsError, DependsResult};

pub use model::{
    AlgoParm, Algorithm, AlgorithmId, AppId, CompId, CompParm, Computation, DependsRecord,
    GroupId, ParmDirection, TimeSeriesIdentifier, TsGroup, TsKey,
};

pub use notify::{ChangeNotification, EventType, NotifyQueue};

pub use store::{MergeReport, RemovalReport, Store};

pub use updater::{ComputationSource, DependsUpdater, UpdaterStats};
