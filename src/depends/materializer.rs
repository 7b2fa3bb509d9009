//! Dependency Materializer
//!
//! Rebuilds the `(time series, computation)` rows of one computation from
//! its current definition, and answers forward and reverse lookups against
//! the index.
//!
//! A rebuild always replaces the computation's whole row set: the new set is
//! computed first, outside any transaction, then the old rows are deleted
//! and the new ones inserted in a single transaction. A computation is never
//! visible with an empty set because of a failed rebuild.

use super::collaborators::{Collaborators, TransformOutcome};
use crate::cache::ReferenceCaches;
use crate::error::DependsResult;
use crate::model::{
    Algorithm, AppId, CompId, Computation, DependsRecord, GroupId, TimeSeriesIdentifier, TsGroup,
    TsKey,
};
use crate::store::{depends, DependsTable, MergeReport, RemovalReport, Store};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Maintains the dependency index for a set of computations
#[derive(Debug, Clone)]
pub struct DependencyMaterializer {
    store: Arc<Store>,
    caches: ReferenceCaches,
    collaborators: Collaborators,
}

impl DependencyMaterializer {
    pub fn new(store: Arc<Store>, caches: ReferenceCaches, collaborators: Collaborators) -> Self {
        Self {
            store,
            caches,
            collaborators,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn caches(&self) -> &ReferenceCaches {
        &self.caches
    }

    /// Whether a computation should have rows at all
    ///
    /// Disabled computations are invisible to forward lookups, and timed
    /// computations are started by a clock rather than by their inputs.
    pub fn is_triggerable(comp: &Computation) -> bool {
        comp.enabled && !comp.is_timed()
    }

    /// Rebuild the index rows of one computation; returns the row count
    ///
    /// Callers must not rebuild the same computation from two threads at once.
    pub fn materialize(&self, comp: &Computation) -> DependsResult<usize> {
        if !Self::is_triggerable(comp) {
            let removed = self
                .store
                .transaction(|tx| depends::delete_for_computation(tx, comp.id))?;
            debug!(
                "Computation {} is disabled or timed, removed {} dependencies",
                comp.id, removed
            );
            return Ok(0);
        }

        let keys = self.dependencies_of(comp)?;
        let records: Vec<DependsRecord> = keys
            .into_iter()
            .map(|key| DependsRecord::new(key, comp.id))
            .collect();

        self.store.transaction(|tx| {
            depends::delete_for_computation(tx, comp.id)?;
            depends::insert_records(tx, DependsTable::Active, &records)
        })?;

        debug!(
            "Materialized computation {} '{}': {} dependencies",
            comp.id,
            comp.name,
            records.len()
        );
        Ok(records.len())
    }

    /// Every time series that can trigger `comp`, deduplicated
    ///
    /// Candidates that the transformer cannot resolve are skipped one by
    /// one; only collaborator and storage failures abort the pass.
    pub fn dependencies_of(&self, comp: &Computation) -> DependsResult<BTreeSet<TsKey>> {
        let algorithm = self.algorithm_for(comp)?;
        let group = match comp.group_id {
            Some(group_id) => self.load_group(group_id)?,
            None => None,
        };

        // Expanded at most once per pass, and only if some input needs it
        let mut members: Option<Vec<TsKey>> = None;
        let mut keys = BTreeSet::new();

        for parm in &comp.parms {
            if !parm.is_input(algorithm.as_deref()) {
                continue;
            }

            if let Some(key) = parm.ts_key {
                keys.insert(key);
                continue;
            }

            let group = match &group {
                Some(group) => group,
                None => {
                    trace!(
                        "Computation {} role '{}' has no binding and no group",
                        comp.id,
                        parm.role_name
                    );
                    continue;
                }
            };

            if members.is_none() {
                members = Some(self.expand(group)?);
            }

            for member in members.iter().flatten() {
                match self.collaborators.transformer.transform(*member, parm) {
                    TransformOutcome::Resolved(key) => {
                        keys.insert(key);
                    }
                    TransformOutcome::NotFound => trace!(
                        "No series for member {} in role '{}' of computation {}",
                        member,
                        parm.role_name,
                        comp.id
                    ),
                    TransformOutcome::Invalid(reason) => trace!(
                        "Skipping member {} for computation {}: {}",
                        member,
                        comp.id,
                        reason
                    ),
                }
            }
        }

        Ok(keys)
    }

    fn algorithm_for(&self, comp: &Computation) -> DependsResult<Option<Arc<Algorithm>>> {
        if let Some(algorithm) = &comp.algorithm {
            return Ok(Some(algorithm.clone()));
        }
        let id = match comp.algorithm_id {
            Some(id) => id,
            None => return Ok(None),
        };

        if let Some(algorithm) = self.caches.algorithms.get_by_key(id) {
            return Ok(Some(algorithm));
        }
        match self.collaborators.algorithms.load_algorithm(id)? {
            Some(algorithm) => Ok(Some(self.caches.algorithms.put(algorithm))),
            None => {
                warn!(
                    "Computation {} references unknown algorithm {}",
                    comp.id, id
                );
                Ok(None)
            }
        }
    }

    /// A group from the cache, loading it on a miss; `None` if it no longer exists
    pub fn load_group(&self, group_id: GroupId) -> DependsResult<Option<Arc<TsGroup>>> {
        if let Some(group) = self.caches.groups.get_by_key(group_id) {
            return Ok(Some(group));
        }
        match self.collaborators.groups.load_group(group_id)? {
            Some(group) => Ok(Some(self.caches.groups.put(group))),
            None => {
                warn!("Group {} no longer exists", group_id);
                Ok(None)
            }
        }
    }

    fn expand(&self, group: &TsGroup) -> DependsResult<Vec<TsKey>> {
        if let Some(members) = group.expanded_list() {
            return Ok(members.to_vec());
        }
        let members = self.collaborators.expander.expand_group(group)?;
        trace!("Expanded group {} to {} members", group.id, members.len());
        Ok(members)
    }

    /// Drop a deleted time series everywhere, atomically
    pub fn remove_time_series(&self, ts_key: TsKey) -> DependsResult<RemovalReport> {
        let report = self.store.remove_time_series(ts_key)?;
        for group_id in &report.groups {
            self.invalidate_group(*group_id);
        }
        info!(
            "Removed time series {}: {} dependencies, {} computations disabled, {} group memberships",
            ts_key,
            report.index_rows,
            report.disabled.len(),
            report.memberships
        );
        Ok(report)
    }

    /// Time series that trigger a computation
    ///
    /// Keys the catalog no longer knows are logged and left out.
    pub fn triggers_for(&self, comp_id: CompId) -> DependsResult<Vec<TimeSeriesIdentifier>> {
        let keys = self
            .store
            .read(|conn| depends::ts_keys_for(conn, comp_id))?;

        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            match self.collaborators.resolver.resolve(key) {
                Ok(Some(identifier)) => found.push(identifier),
                Ok(None) => warn!(
                    "Computation {} depends on time series {} which no longer exists",
                    comp_id, key
                ),
                Err(e) => error!(
                    "Cannot resolve time series {} for computation {}: {}",
                    key, comp_id, e
                ),
            }
        }
        Ok(found)
    }

    /// Computations triggered by any of `ts_keys`, ascending
    pub fn computations_affected_by(
        &self,
        ts_keys: &[TsKey],
        app_id: Option<AppId>,
    ) -> DependsResult<Vec<CompId>> {
        if ts_keys.is_empty() {
            return Ok(Vec::new());
        }
        let found = self
            .store
            .read(|conn| depends::comp_ids_for(conn, ts_keys, app_id))?;
        Ok(found.into_iter().collect())
    }

    /// Remove every row of a computation, e.g. after it was deleted
    pub fn forget_computation(&self, comp_id: CompId) -> DependsResult<usize> {
        self.store
            .transaction(|tx| depends::delete_for_computation(tx, comp_id))
    }

    /// Evict a group so the next pass reloads and re-expands it
    pub fn invalidate_group(&self, group_id: GroupId) {
        self.caches.groups.remove(group_id);
    }

    /// Rebuild the whole index from `comps`
    ///
    /// Every dependency set is computed first and staged in the scratchpad;
    /// the merge then only touches rows that actually changed.
    pub fn full_evaluation(&self, comps: &[Computation]) -> DependsResult<MergeReport> {
        let mut records = Vec::new();
        for comp in comps.iter().filter(|c| Self::is_triggerable(c)) {
            let keys = self.dependencies_of(comp)?;
            records.extend(keys.into_iter().map(|key| DependsRecord::new(key, comp.id)));
        }

        let report = self.store.transaction(|tx| {
            depends::clear_scratchpad(tx)?;
            depends::insert_records(tx, DependsTable::Scratchpad, &records)?;
            let report = depends::merge_scratchpad(tx)?;
            depends::clear_scratchpad(tx)?;
            Ok(report)
        })?;

        info!(
            "Full evaluation of {} computations: {} rows removed, {} added",
            comps.len(),
            report.deleted,
            report.inserted
        );
        Ok(report)
    }
}
