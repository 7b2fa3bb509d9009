//! Table layout of the dependency store
//!
//! Column names follow the computation-processing database the index lives in:
//! `cp_comp_depends` is the dependency index, `cp_depends_notify` the
//! notification queue.

use crate::error::{DependsResult, StorageContext};
use rusqlite::Connection;

pub(crate) const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cp_computation (
        computation_id INTEGER PRIMARY KEY,
        computation_name TEXT NOT NULL,
        algorithm_id INTEGER,
        enabled INTEGER NOT NULL DEFAULT 1,
        loading_application_id INTEGER,
        group_id INTEGER,
        timed_comp_interval TEXT,
        date_time_loaded INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_computation_group ON cp_computation(group_id);

    CREATE TABLE IF NOT EXISTS cp_comp_ts_parm (
        computation_id INTEGER NOT NULL,
        parm_order INTEGER NOT NULL,
        algo_role_name TEXT NOT NULL,
        parm_type TEXT,
        ts_id INTEGER,
        PRIMARY KEY (computation_id, algo_role_name)
    );

    CREATE INDEX IF NOT EXISTS idx_comp_ts_parm_ts ON cp_comp_ts_parm(ts_id);

    CREATE TABLE IF NOT EXISTS cp_comp_depends (
        ts_id INTEGER NOT NULL,
        computation_id INTEGER NOT NULL,
        PRIMARY KEY (ts_id, computation_id)
    );

    CREATE INDEX IF NOT EXISTS idx_comp_depends_comp ON cp_comp_depends(computation_id);

    CREATE TABLE IF NOT EXISTS cp_comp_depends_scratchpad (
        ts_id INTEGER NOT NULL,
        computation_id INTEGER NOT NULL,
        PRIMARY KEY (ts_id, computation_id)
    );

    CREATE TABLE IF NOT EXISTS cp_depends_notify (
        record_num INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        key INTEGER NOT NULL,
        date_time_loaded INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_depends_notify_time
        ON cp_depends_notify(date_time_loaded, record_num);

    CREATE TABLE IF NOT EXISTS tsdb_group_member_ts (
        group_id INTEGER NOT NULL,
        ts_id INTEGER NOT NULL,
        PRIMARY KEY (group_id, ts_id)
    );

    CREATE INDEX IF NOT EXISTS idx_group_member_ts ON tsdb_group_member_ts(ts_id);
";

/// Create every table and index; safe to run against an existing store
pub(crate) fn create(conn: &Connection) -> DependsResult<()> {
    conn.execute_batch(SCHEMA).during("create schema", "dependency store")
}
