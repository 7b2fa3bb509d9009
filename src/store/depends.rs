//! Dependency index statements
//!
//! `cp_comp_depends` holds one `(ts_id, computation_id)` row per dependency.
//! `cp_comp_depends_scratchpad` has the same shape and is used to stage a
//! full re-evaluation before merging it into the active table.
//!
//! Every function takes a `&Connection` so it can run inside a caller's
//! transaction.

use crate::error::{DependsResult, StorageContext};
use crate::model::{AppId, CompId, DependsRecord, TsKey};
use rusqlite::{params, params_from_iter, Connection};
use std::collections::BTreeSet;

/// Maximum number of keys bound into one `IN (...)` list
const IN_LIST_CHUNK: usize = 500;

/// Which dependency table a statement targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependsTable {
    Active,
    Scratchpad,
}

impl DependsTable {
    fn name(self) -> &'static str {
        match self {
            DependsTable::Active => "cp_comp_depends",
            DependsTable::Scratchpad => "cp_comp_depends_scratchpad",
        }
    }
}

/// Rows changed by a scratchpad merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub deleted: usize,
    pub inserted: usize,
}

/// Remove every row for a computation from both tables
pub fn delete_for_computation(conn: &Connection, comp_id: CompId) -> DependsResult<usize> {
    let deleted = conn
        .execute(
            "DELETE FROM cp_comp_depends WHERE computation_id = ?",
            params![comp_id],
        )
        .during("delete dependencies", format!("computation {}", comp_id))?;
    conn.execute(
        "DELETE FROM cp_comp_depends_scratchpad WHERE computation_id = ?",
        params![comp_id],
    )
    .during("delete scratchpad dependencies", format!("computation {}", comp_id))?;
    Ok(deleted)
}

/// Remove every row for a time series from both tables
pub fn delete_for_time_series(conn: &Connection, ts_key: TsKey) -> DependsResult<usize> {
    let deleted = conn
        .execute("DELETE FROM cp_comp_depends WHERE ts_id = ?", params![ts_key])
        .during("delete dependencies", format!("time series {}", ts_key))?;
    conn.execute(
        "DELETE FROM cp_comp_depends_scratchpad WHERE ts_id = ?",
        params![ts_key],
    )
    .during("delete scratchpad dependencies", format!("time series {}", ts_key))?;
    Ok(deleted)
}

/// Insert records, ignoring pairs that are already present
pub fn insert_records(
    conn: &Connection,
    table: DependsTable,
    records: &[DependsRecord],
) -> DependsResult<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "INSERT OR IGNORE INTO {} (ts_id, computation_id) VALUES (?, ?)",
        table.name()
    );
    let mut stmt = conn
        .prepare_cached(&sql)
        .during("prepare dependency insert", table.name())?;

    let mut inserted = 0;
    for record in records {
        inserted += stmt
            .execute(params![record.ts_key, record.comp_id])
            .during("insert dependency", format!("computation {}", record.comp_id))?;
    }
    Ok(inserted)
}

/// Time series a computation depends on, ascending
pub fn ts_keys_for(conn: &Connection, comp_id: CompId) -> DependsResult<Vec<TsKey>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT ts_id FROM cp_comp_depends WHERE computation_id = ? ORDER BY ts_id",
        )
        .during("prepare trigger lookup", format!("computation {}", comp_id))?;

    let rows = stmt
        .query_map(params![comp_id], |row| row.get::<_, TsKey>(0))
        .during("read triggers", format!("computation {}", comp_id))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .during("read triggers", format!("computation {}", comp_id))
}

/// Computations depending on any of `ts_keys`, optionally limited to one
/// owning application
///
/// Callers must not pass an empty slice; the result would be empty anyway.
pub fn comp_ids_for(
    conn: &Connection,
    ts_keys: &[TsKey],
    app_id: Option<AppId>,
) -> DependsResult<BTreeSet<CompId>> {
    let mut found = BTreeSet::new();

    for chunk in ts_keys.chunks(IN_LIST_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let mut values: Vec<i64> = chunk.iter().map(|k| k.value()).collect();

        let sql = match app_id {
            Some(app) => {
                values.push(app.value());
                format!(
                    "SELECT DISTINCT d.computation_id FROM cp_comp_depends d
                     JOIN cp_computation c ON c.computation_id = d.computation_id
                     WHERE d.ts_id IN ({}) AND c.loading_application_id = ?",
                    placeholders
                )
            }
            None => format!(
                "SELECT DISTINCT computation_id FROM cp_comp_depends WHERE ts_id IN ({})",
                placeholders
            ),
        };

        let target = format!("{} time series", chunk.len());
        let mut stmt = conn
            .prepare(&sql)
            .during("prepare affected-computation lookup", &target)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| row.get::<_, CompId>(0))
            .during("read affected computations", &target)?;
        for row in rows {
            found.insert(row.during("read affected computations", &target)?);
        }
    }

    Ok(found)
}

/// Every row of a table, ordered by computation then time series
pub fn all_records(conn: &Connection, table: DependsTable) -> DependsResult<Vec<DependsRecord>> {
    let sql = format!(
        "SELECT ts_id, computation_id FROM {} ORDER BY computation_id, ts_id",
        table.name()
    );
    let mut stmt = conn.prepare(&sql).during("prepare dependency scan", table.name())?;
    let rows = stmt
        .query_map([], |row| Ok(DependsRecord::new(row.get(0)?, row.get(1)?)))
        .during("scan dependencies", table.name())?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .during("scan dependencies", table.name())
}

pub fn count(conn: &Connection, table: DependsTable) -> DependsResult<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.name());
    let n: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .during("count dependencies", table.name())?;
    Ok(n as u64)
}

pub fn clear_scratchpad(conn: &Connection) -> DependsResult<usize> {
    conn.execute("DELETE FROM cp_comp_depends_scratchpad", [])
        .during("clear scratchpad", "cp_comp_depends_scratchpad")
}

/// Make the active table equal to the scratchpad
///
/// Rows present in both are left untouched, so computations whose
/// dependencies did not change never disappear from forward lookups.
pub fn merge_scratchpad(conn: &Connection) -> DependsResult<MergeReport> {
    let deleted = conn
        .execute(
            "DELETE FROM cp_comp_depends
             WHERE (ts_id, computation_id) IN (
                 SELECT ts_id, computation_id FROM cp_comp_depends
                 EXCEPT
                 SELECT ts_id, computation_id FROM cp_comp_depends_scratchpad
             )",
            [],
        )
        .during("merge scratchpad (delete)", "cp_comp_depends")?;

    let inserted = conn
        .execute(
            "INSERT INTO cp_comp_depends (ts_id, computation_id)
             SELECT ts_id, computation_id FROM cp_comp_depends_scratchpad
             EXCEPT
             SELECT ts_id, computation_id FROM cp_comp_depends",
            [],
        )
        .during("merge scratchpad (insert)", "cp_comp_depends")?;

    Ok(MergeReport { deleted, inserted })
}
