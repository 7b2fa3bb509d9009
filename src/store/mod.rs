//! Dependency Store - SQLite persistence for the index and the queue
//!
//! - **Store**: one connection, scoped transactions, round-trip accounting
//! - **depends**: dependency index and scratchpad statements
//! - **computations**: computation definition rows
//! - **groups**: group-membership extension rows
//!
//! Every multi-statement operation runs through [`Store::transaction`]:
//! commit on `Ok`, roll back on `Err`.

pub mod computations;
pub mod depends;
pub mod groups;
mod schema;

pub use depends::{DependsTable, MergeReport};

use crate::config::StoreConfig;
use crate::error::DependsResult;
use crate::model::{CompId, GroupId, TsKey};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Transaction};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// What `remove_time_series` changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    /// Dependency rows that referenced the series
    pub index_rows: usize,
    /// Computations disabled because they were bound directly to the series
    pub disabled: Vec<CompId>,
    /// Group-membership rows removed
    pub memberships: usize,
    /// Groups that listed the series as a member
    pub groups: Vec<GroupId>,
}

/// SQLite-backed store shared by the materializer and the queue
pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    round_trips: AtomicU64,
}

impl Store {
    /// Create or open a store file
    pub fn open(path: impl AsRef<Path>) -> DependsResult<Self> {
        Self::open_with_timeout(path, Duration::from_millis(5000))
    }

    /// Open the store described by the configuration
    pub fn from_config(config: &StoreConfig) -> DependsResult<Self> {
        Self::open_with_timeout(config.resolved_path(), Duration::from_millis(config.busy_timeout_ms))
    }

    fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> DependsResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        schema::create(&conn)?;

        tracing::debug!("Opened dependency store at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
            round_trips: AtomicU64::new(0),
        })
    }

    /// Create a private in-memory store
    pub fn open_in_memory() -> DependsResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            round_trips: AtomicU64::new(0),
        })
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run read-only or single-statement work against the connection
    pub fn read<T, F>(&self, f: F) -> DependsResult<T>
    where
        F: FnOnce(&Connection) -> DependsResult<T>,
    {
        let conn = self.conn.lock();
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        f(&conn)
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`
    pub fn transaction<T, F>(&self, f: F) -> DependsResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> DependsResult<T>,
    {
        let mut conn = self.conn.lock();
        self.round_trips.fetch_add(1, Ordering::Relaxed);

        let tx = conn.transaction()?;
        // Dropping `tx` on the error path rolls it back
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Number of `read`/`transaction` calls issued so far
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Drop a time series from the index, disable computations bound to it
    /// directly and remove it from group membership, all or nothing
    pub fn remove_time_series(&self, ts_key: TsKey) -> DependsResult<RemovalReport> {
        self.transaction(|tx| {
            let index_rows = depends::delete_for_time_series(tx, ts_key)?;
            let disabled = computations::disable_for_direct_input(tx, ts_key)?;
            for comp_id in &disabled {
                depends::delete_for_computation(tx, *comp_id)?;
            }
            let containing = groups::groups_containing(tx, ts_key)?;
            let memberships = groups::remove_time_series(tx, ts_key)?;

            Ok(RemovalReport {
                index_rows,
                disabled,
                memberships,
                groups: containing,
            })
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("round_trips", &self.round_trips())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DependsError;
    use crate::model::{CompParm, Computation, DependsRecord};
    use tempfile::tempdir;

    #[test]
    fn test_store_creation() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("deps").join("depends.db")).unwrap();
        assert!(store.path().unwrap().exists());

        let count = store.read(|conn| depends::count(conn, DependsTable::Active)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();

        let res: DependsResult<()> = store.transaction(|tx| {
            depends::insert_records(
                tx,
                DependsTable::Active,
                &[DependsRecord::new(TsKey(1), CompId(1))],
            )?;
            Err(DependsError::Corruption("forced".to_string()))
        });
        assert!(res.is_err());

        let count = store.read(|conn| depends::count(conn, DependsTable::Active)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_commits() {
        let store = Store::open_in_memory().unwrap();
        store
            .transaction(|tx| {
                depends::insert_records(
                    tx,
                    DependsTable::Active,
                    &[DependsRecord::new(TsKey(1), CompId(1))],
                )
            })
            .unwrap();

        let count = store.read(|conn| depends::count(conn, DependsTable::Active)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_round_trips_counted() {
        let store = Store::open_in_memory().unwrap();
        let before = store.round_trips();
        store.read(|_| Ok(())).unwrap();
        store.transaction(|_| Ok(())).unwrap();
        assert_eq!(store.round_trips(), before + 2);
    }

    #[test]
    fn test_remove_time_series() {
        let store = Store::open_in_memory().unwrap();

        let direct = Computation::new(CompId(1), "direct")
            .parm(CompParm::input("input").bound_to(TsKey(10)))
            .parm(CompParm::input("other").bound_to(TsKey(11)));
        let grouped = Computation::new(CompId(2), "grouped")
            .group(GroupId(5))
            .parm(CompParm::input("input"));

        store
            .transaction(|tx| {
                computations::save(tx, &direct)?;
                computations::save(tx, &grouped)?;
                groups::add_member(tx, GroupId(5), TsKey(10))?;
                groups::add_member(tx, GroupId(5), TsKey(12))?;
                depends::insert_records(
                    tx,
                    DependsTable::Active,
                    &[
                        DependsRecord::new(TsKey(10), CompId(1)),
                        DependsRecord::new(TsKey(11), CompId(1)),
                        DependsRecord::new(TsKey(10), CompId(2)),
                        DependsRecord::new(TsKey(12), CompId(2)),
                    ],
                )
            })
            .unwrap();

        let report = store.remove_time_series(TsKey(10)).unwrap();
        assert_eq!(report.index_rows, 2);
        assert_eq!(report.disabled, vec![CompId(1)]);
        assert_eq!(report.memberships, 1);
        assert_eq!(report.groups, vec![GroupId(5)]);

        store
            .read(|conn| {
                // The disabled computation keeps no rows at all
                assert!(depends::ts_keys_for(conn, CompId(1))?.is_empty());
                // The group computation only lost the removed series
                assert_eq!(depends::ts_keys_for(conn, CompId(2))?, vec![TsKey(12)]);
                assert_eq!(computations::is_enabled(conn, CompId(1))?, Some(false));
                assert_eq!(computations::is_enabled(conn, CompId(2))?, Some(true));
                assert_eq!(groups::members(conn, GroupId(5))?, vec![TsKey(12)]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_remove_time_series_is_atomic() {
        let store = Store::open_in_memory().unwrap();
        let direct = Computation::new(CompId(1), "direct")
            .parm(CompParm::input("input").bound_to(TsKey(10)));

        store
            .transaction(|tx| {
                computations::save(tx, &direct)?;
                groups::add_member(tx, GroupId(5), TsKey(10))?;
                depends::insert_records(
                    tx,
                    DependsTable::Active,
                    &[
                        DependsRecord::new(TsKey(10), CompId(1)),
                        DependsRecord::new(TsKey(10), CompId(2)),
                    ],
                )
            })
            .unwrap();

        // The membership step runs last; make it fail
        store
            .read(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_member_delete BEFORE DELETE ON tsdb_group_member_ts
                     BEGIN SELECT RAISE(ABORT, 'membership locked'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        assert!(store.remove_time_series(TsKey(10)).is_err());

        store
            .read(|conn| {
                assert_eq!(depends::count(conn, DependsTable::Active)?, 2);
                assert_eq!(computations::is_enabled(conn, CompId(1))?, Some(true));
                assert_eq!(groups::members(conn, GroupId(5))?, vec![TsKey(10)]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("depends.db");

        {
            let store = Store::open(&path).unwrap();
            store
                .transaction(|tx| {
                    depends::insert_records(
                        tx,
                        DependsTable::Active,
                        &[DependsRecord::new(TsKey(3), CompId(4))],
                    )
                })
                .unwrap();
        }

        {
            let store = Store::open(&path).unwrap();
            let keys = store.read(|conn| depends::ts_keys_for(conn, CompId(4))).unwrap();
            assert_eq!(keys, vec![TsKey(3)]);
        }
    }
}
