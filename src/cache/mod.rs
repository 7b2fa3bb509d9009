//! Reference-object caching
//!
//! - **ObjectCache**: generic dual-key (surrogate key + unique name) TTL cache
//! - **ReferenceCaches**: the algorithm and group caches the materializer shares
//!
//! Caches are constructed explicitly and passed to whoever needs them, so
//! tests get fresh, isolated instances.

mod object_cache;

pub use object_cache::{CacheObject, CacheValidator, ObjectCache};

use crate::config::CacheConfig;
use crate::model::{Algorithm, TsGroup};
use std::sync::Arc;
use std::time::Duration;

/// Caches of slowly-changing reference data used during materialization
#[derive(Debug, Clone)]
pub struct ReferenceCaches {
    pub algorithms: Arc<ObjectCache<Algorithm>>,
    pub groups: Arc<ObjectCache<TsGroup>>,
}

impl ReferenceCaches {
    pub fn new(config: &CacheConfig) -> Self {
        fn make<T: CacheObject>(case_sensitive: bool, secs: u64) -> ObjectCache<T> {
            let max_age = Duration::from_secs(secs);
            if case_sensitive {
                ObjectCache::case_sensitive(max_age)
            } else {
                ObjectCache::new(max_age)
            }
        }

        let case_sensitive = config.case_sensitive_names;
        Self {
            algorithms: Arc::new(make(case_sensitive, config.algorithm_max_age_secs)),
            groups: Arc::new(make(case_sensitive, config.group_max_age_secs)),
        }
    }

    /// Drop every cached object
    pub fn close(&self) {
        self.algorithms.close();
        self.groups.close();
    }
}

impl Default for ReferenceCaches {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
