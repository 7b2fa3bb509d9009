//! Maintenance consumer for the notification queue
//!
//! Pops notifications oldest-first and reacts by re-materializing the
//! computations each event can affect. One bad event never blocks the
//! queue: its failure is logged and counted, and the next one is taken.

use crate::config::UpdaterConfig;
use crate::depends::DependencyMaterializer;
use crate::error::{DependsError, DependsResult};
use crate::model::{CompId, Computation, GroupId, TsKey};
use crate::notify::{ChangeNotification, EventType, NotifyQueue};
use crate::store::depends;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the updater reads computation definitions from
pub trait ComputationSource: Send + Sync {
    fn load_computation(&self, id: CompId) -> DependsResult<Option<Computation>>;

    fn enabled_computations(&self) -> DependsResult<Vec<Computation>>;

    /// Computations scoped by a group, enabled or not
    fn computations_using_group(&self, group_id: GroupId) -> DependsResult<Vec<Computation>>;

    /// Persist `enabled = false`
    fn disable_computation(&self, id: CompId) -> DependsResult<()>;
}

/// Counters since the updater was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdaterStats {
    pub done: u64,
    pub errors: u64,
}

/// Turns queued notifications into index maintenance
pub struct DependsUpdater {
    materializer: DependencyMaterializer,
    queue: NotifyQueue,
    computations: Arc<dyn ComputationSource>,
    done: AtomicU64,
    errors: AtomicU64,
}

impl DependsUpdater {
    pub fn new(
        materializer: DependencyMaterializer,
        queue: NotifyQueue,
        computations: Arc<dyn ComputationSource>,
    ) -> Self {
        Self {
            materializer,
            queue,
            computations,
            done: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> UpdaterStats {
        UpdaterStats {
            done: self.done.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Pop and handle one notification
    ///
    /// Returns `None` when the queue is empty. Only queue failures are
    /// returned as errors; a failing event is counted and dropped.
    pub fn process_next(&self) -> DependsResult<Option<ChangeNotification>> {
        let record = match self.queue.dequeue_oldest()? {
            Some(record) => record,
            None => return Ok(None),
        };

        match self.handle(&record) {
            Ok(()) => {
                self.done.fetch_add(1, Ordering::Relaxed);
                debug!("Processed notification {}", record);
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Notification {} failed: {}", record, e);
            }
        }
        Ok(Some(record))
    }

    /// Handle up to `max` notifications; returns how many were taken
    pub fn drain(&self, max: usize) -> DependsResult<usize> {
        let mut taken = 0;
        while taken < max {
            if self.process_next()?.is_none() {
                break;
            }
            taken += 1;
        }
        Ok(taken)
    }

    /// Optionally rebuild everything, then empty the queue in batches
    pub fn catch_up(&self, config: &UpdaterConfig) -> DependsResult<UpdaterStats> {
        if config.full_eval_on_startup {
            self.full_evaluation()?;
        }

        let batch = config.batch_size.max(1);
        loop {
            let taken = self.drain(batch)?;
            if taken < batch {
                break;
            }
        }

        let stats = self.stats();
        info!(
            "Queue drained: {} done, {} failed",
            stats.done, stats.errors
        );
        Ok(stats)
    }

    fn handle(&self, record: &ChangeNotification) -> DependsResult<()> {
        let key = record.target_key;
        match record.event_type {
            EventType::CompModified => self.computation_modified(CompId(key)),
            EventType::TsDeleted => self.materializer.remove_time_series(TsKey(key)).map(|_| ()),
            EventType::TsCreated => self.time_series_created(TsKey(key)),
            EventType::TsModified => {
                let ts_key = TsKey(key);
                self.materializer
                    .store()
                    .transaction(|tx| depends::delete_for_time_series(tx, ts_key))?;
                self.time_series_created(ts_key)
            }
            EventType::GroupModified => self.group_modified(GroupId(key)),
            EventType::FullEval => self.full_evaluation().map(|_| ()),
            EventType::TsCodeChanged | EventType::Unknown(_) => Err(DependsError::Corruption(
                format!("unsupported event type {}", record.event_type),
            )),
        }
    }

    fn computation_modified(&self, comp_id: CompId) -> DependsResult<()> {
        match self.computations.load_computation(comp_id)? {
            Some(comp) => self.materializer.materialize(&comp).map(|_| ()),
            None => {
                let removed = self.materializer.forget_computation(comp_id)?;
                info!(
                    "Computation {} was deleted, removed {} dependencies",
                    comp_id, removed
                );
                Ok(())
            }
        }
    }

    /// A new series can only reach computations bound to it directly or
    /// scoped by a group
    fn time_series_created(&self, ts_key: TsKey) -> DependsResult<()> {
        let candidates: Vec<Computation> = self
            .computations
            .enabled_computations()?
            .into_iter()
            .filter(|c| c.group_id.is_some() || c.bound_keys().any(|k| k == ts_key))
            .collect();

        // Group expansions may now include the new series
        let groups: BTreeSet<GroupId> = candidates.iter().filter_map(|c| c.group_id).collect();
        for group_id in groups {
            self.materializer.invalidate_group(group_id);
        }

        for comp in &candidates {
            self.materializer.materialize(comp)?;
        }
        debug!(
            "Time series {} created, re-evaluated {} computations",
            ts_key,
            candidates.len()
        );
        Ok(())
    }

    fn group_modified(&self, group_id: GroupId) -> DependsResult<()> {
        self.materializer.invalidate_group(group_id);
        let comps = self.computations.computations_using_group(group_id)?;

        if self.materializer.load_group(group_id)?.is_none() {
            for comp in &comps {
                if comp.enabled {
                    self.computations.disable_computation(comp.id)?;
                }
                self.materializer.forget_computation(comp.id)?;
            }
            warn!(
                "Group {} was deleted, disabled {} computations using it",
                group_id,
                comps.len()
            );
            return Ok(());
        }

        for comp in &comps {
            self.materializer.materialize(comp)?;
        }
        debug!(
            "Group {} modified, re-evaluated {} computations",
            group_id,
            comps.len()
        );
        Ok(())
    }

    fn full_evaluation(&self) -> DependsResult<depends::MergeReport> {
        let comps = self.computations.enabled_computations()?;
        self.materializer.full_evaluation(&comps)
    }
}

impl std::fmt::Debug for DependsUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependsUpdater")
            .field("stats", &self.stats())
            .finish()
    }
}
