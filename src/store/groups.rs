//! Group-membership extension rows
//!
//! `tsdb_group_member_ts` lists time series added to a group explicitly.
//! Criteria-based membership belongs to the group engine and is not stored here.

use crate::error::{DependsResult, StorageContext};
use crate::model::{GroupId, TsKey};
use rusqlite::{params, Connection};

/// Add an explicit member; returns false if it was already present
pub fn add_member(conn: &Connection, group_id: GroupId, ts_key: TsKey) -> DependsResult<bool> {
    let added = conn
        .execute(
            "INSERT OR IGNORE INTO tsdb_group_member_ts (group_id, ts_id) VALUES (?, ?)",
            params![group_id, ts_key],
        )
        .during("add group member", format!("group {}", group_id))?;
    Ok(added > 0)
}

pub fn members(conn: &Connection, group_id: GroupId) -> DependsResult<Vec<TsKey>> {
    let target = format!("group {}", group_id);
    let mut stmt = conn
        .prepare_cached("SELECT ts_id FROM tsdb_group_member_ts WHERE group_id = ? ORDER BY ts_id")
        .during("prepare member query", &target)?;
    let rows = stmt
        .query_map(params![group_id], |row| row.get::<_, TsKey>(0))
        .during("read group members", &target)?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .during("read group members", &target)
}

/// Groups listing `ts_key` as an explicit member
pub fn groups_containing(conn: &Connection, ts_key: TsKey) -> DependsResult<Vec<GroupId>> {
    let target = format!("time series {}", ts_key);
    let mut stmt = conn
        .prepare_cached("SELECT group_id FROM tsdb_group_member_ts WHERE ts_id = ? ORDER BY group_id")
        .during("prepare membership query", &target)?;
    let rows = stmt
        .query_map(params![ts_key], |row| row.get::<_, GroupId>(0))
        .during("read memberships", &target)?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .during("read memberships", &target)
}

/// Drop a time series from every group
pub fn remove_time_series(conn: &Connection, ts_key: TsKey) -> DependsResult<usize> {
    conn.execute(
        "DELETE FROM tsdb_group_member_ts WHERE ts_id = ?",
        params![ts_key],
    )
    .during("remove group memberships", format!("time series {}", ts_key))
}
