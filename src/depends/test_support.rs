//! In-memory collaborators for tests

use super::collaborators::{
    AlgorithmSource, Collaborators, GroupExpander, GroupSource, ParmTransformer,
    TimeSeriesResolver, TransformOutcome,
};
use crate::error::{DependsError, DependsResult};
use crate::model::{Algorithm, AlgorithmId, CompParm, GroupId, TimeSeriesIdentifier, TsGroup, TsKey};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One fake standing in for every external catalog
#[derive(Default)]
pub(crate) struct FakeCatalog {
    pub algorithms: Mutex<HashMap<AlgorithmId, Algorithm>>,
    pub groups: Mutex<HashMap<GroupId, Vec<TsKey>>>,
    pub series: Mutex<HashMap<TsKey, String>>,
    /// Members the transformer reports as not found
    pub not_found: Mutex<HashSet<TsKey>>,
    /// Members the transformer rejects as invalid
    pub invalid: Mutex<HashSet<TsKey>>,
    /// Keys whose resolution fails with a collaborator error
    pub broken: Mutex<HashSet<TsKey>>,
    pub algorithm_loads: AtomicUsize,
    pub expansions: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_algorithm(&self, algorithm: Algorithm) {
        self.algorithms.lock().insert(algorithm.id, algorithm);
    }

    pub fn add_group(&self, id: GroupId, members: &[TsKey]) {
        self.groups.lock().insert(id, members.to_vec());
    }

    pub fn drop_group(&self, id: GroupId) {
        self.groups.lock().remove(&id);
    }

    pub fn add_series(&self, key: TsKey, name: &str) {
        self.series.lock().insert(key, name.to_string());
    }

    pub fn algorithm_loads(&self) -> usize {
        self.algorithm_loads.load(Ordering::SeqCst)
    }

    pub fn expansions(&self) -> usize {
        self.expansions.load(Ordering::SeqCst)
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            algorithms: self.clone(),
            groups: self.clone(),
            expander: self.clone(),
            transformer: self.clone(),
            resolver: self.clone(),
        }
    }
}

impl AlgorithmSource for FakeCatalog {
    fn load_algorithm(&self, id: AlgorithmId) -> DependsResult<Option<Algorithm>> {
        self.algorithm_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.algorithms.lock().get(&id).cloned())
    }
}

impl GroupSource for FakeCatalog {
    fn load_group(&self, id: GroupId) -> DependsResult<Option<TsGroup>> {
        Ok(self
            .groups
            .lock()
            .contains_key(&id)
            .then(|| TsGroup::new(id, format!("group-{}", id))))
    }
}

impl GroupExpander for FakeCatalog {
    fn expand_group(&self, group: &TsGroup) -> DependsResult<Vec<TsKey>> {
        self.expansions.fetch_add(1, Ordering::SeqCst);
        Ok(self.groups.lock().get(&group.id).cloned().unwrap_or_default())
    }
}

impl ParmTransformer for FakeCatalog {
    fn transform(&self, member: TsKey, parm: &CompParm) -> TransformOutcome {
        if self.not_found.lock().contains(&member) {
            TransformOutcome::NotFound
        } else if self.invalid.lock().contains(&member) {
            TransformOutcome::Invalid(format!("{} cannot fill role {}", member, parm.role_name))
        } else {
            TransformOutcome::Resolved(member)
        }
    }
}

impl TimeSeriesResolver for FakeCatalog {
    fn resolve(&self, key: TsKey) -> DependsResult<Option<TimeSeriesIdentifier>> {
        if self.broken.lock().contains(&key) {
            return Err(DependsError::collaborator(
                "time series catalog",
                key,
                "connection reset",
            ));
        }
        Ok(self
            .series
            .lock()
            .get(&key)
            .map(|name| TimeSeriesIdentifier::new(key, name.clone())))
    }
}
