//! Computation definition rows
//!
//! `cp_computation` holds one row per computation, `cp_comp_ts_parm` its
//! parameters in declaration order. The dependency index only needs the
//! enabled flag, the owning application and direct bindings, but the full
//! definition is kept so the updater can re-materialize from storage.

use crate::error::{DependsResult, StorageContext};
use crate::model::{CompId, CompParm, Computation, GroupId, TsKey};
use crate::store::Store;
use crate::updater::ComputationSource;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Params, Row};

const COMP_COLUMNS: &str = "computation_id, computation_name, algorithm_id, enabled, \
                            loading_application_id, group_id, timed_comp_interval";

fn comp_from_row(row: &Row<'_>) -> rusqlite::Result<Computation> {
    Ok(Computation {
        id: row.get(0)?,
        name: row.get(1)?,
        algorithm_id: row.get(2)?,
        enabled: row.get(3)?,
        algorithm: None,
        app_id: row.get(4)?,
        group_id: row.get(5)?,
        timed_interval: row.get(6)?,
        parms: Vec::new(),
    })
}

fn load_parms(conn: &Connection, comp_id: CompId) -> DependsResult<Vec<CompParm>> {
    let target = format!("computation {}", comp_id);
    let mut stmt = conn
        .prepare_cached(
            "SELECT algo_role_name, parm_type, ts_id FROM cp_comp_ts_parm
             WHERE computation_id = ? ORDER BY parm_order",
        )
        .during("prepare parameter query", &target)?;
    let rows = stmt
        .query_map(params![comp_id], |row| {
            Ok(CompParm {
                role_name: row.get(0)?,
                parm_type: row.get(1)?,
                ts_key: row.get(2)?,
            })
        })
        .during("read parameters", &target)?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .during("read parameters", &target)
}

fn query<P: Params>(
    conn: &Connection,
    filter: &str,
    params: P,
    target: &str,
) -> DependsResult<Vec<Computation>> {
    let sql = format!(
        "SELECT {} FROM cp_computation {} ORDER BY computation_id",
        COMP_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql).during("prepare computation query", target)?;
    let rows = stmt
        .query_map(params, comp_from_row)
        .during("read computations", target)?;
    let mut comps = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .during("read computations", target)?;

    for comp in &mut comps {
        comp.parms = load_parms(conn, comp.id)?;
    }
    Ok(comps)
}

/// Insert or replace a computation and its parameters
pub fn save(conn: &Connection, comp: &Computation) -> DependsResult<()> {
    let target = format!("computation {}", comp.id);

    conn.execute(
        "INSERT INTO cp_computation (
             computation_id, computation_name, algorithm_id, enabled,
             loading_application_id, group_id, timed_comp_interval, date_time_loaded
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(computation_id) DO UPDATE SET
             computation_name = excluded.computation_name,
             algorithm_id = excluded.algorithm_id,
             enabled = excluded.enabled,
             loading_application_id = excluded.loading_application_id,
             group_id = excluded.group_id,
             timed_comp_interval = excluded.timed_comp_interval,
             date_time_loaded = excluded.date_time_loaded",
        params![
            comp.id,
            comp.name,
            comp.algorithm_id,
            comp.enabled,
            comp.app_id,
            comp.group_id,
            comp.timed_interval,
            Utc::now().timestamp_millis(),
        ],
    )
    .during("save computation", &target)?;

    conn.execute(
        "DELETE FROM cp_comp_ts_parm WHERE computation_id = ?",
        params![comp.id],
    )
    .during("replace parameters", &target)?;

    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO cp_comp_ts_parm (computation_id, parm_order, algo_role_name, parm_type, ts_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .during("prepare parameter insert", &target)?;
    for (order, parm) in comp.parms.iter().enumerate() {
        stmt.execute(params![
            comp.id,
            order as i64,
            parm.role_name,
            parm.parm_type,
            parm.ts_key
        ])
        .during("save parameter", &target)?;
    }

    Ok(())
}

pub fn load(conn: &Connection, comp_id: CompId) -> DependsResult<Option<Computation>> {
    let target = format!("computation {}", comp_id);
    let sql = format!(
        "SELECT {} FROM cp_computation WHERE computation_id = ?",
        COMP_COLUMNS
    );
    let comp = conn
        .query_row(&sql, params![comp_id], comp_from_row)
        .optional()
        .during("load computation", &target)?;

    match comp {
        Some(mut comp) => {
            comp.parms = load_parms(conn, comp_id)?;
            Ok(Some(comp))
        }
        None => Ok(None),
    }
}

/// Remove a computation and its parameters
pub fn delete(conn: &Connection, comp_id: CompId) -> DependsResult<bool> {
    let target = format!("computation {}", comp_id);
    conn.execute(
        "DELETE FROM cp_comp_ts_parm WHERE computation_id = ?",
        params![comp_id],
    )
    .during("delete parameters", &target)?;
    let deleted = conn
        .execute(
            "DELETE FROM cp_computation WHERE computation_id = ?",
            params![comp_id],
        )
        .during("delete computation", &target)?;
    Ok(deleted > 0)
}

pub fn enabled(conn: &Connection) -> DependsResult<Vec<Computation>> {
    query(conn, "WHERE enabled = 1", [], "enabled computations")
}

/// Computations scoped by a group, enabled or not
pub fn using_group(conn: &Connection, group_id: GroupId) -> DependsResult<Vec<Computation>> {
    query(
        conn,
        "WHERE group_id = ?",
        params![group_id],
        &format!("group {}", group_id),
    )
}

/// Enabled computations with a parameter bound directly to `ts_key`
pub fn bound_to(conn: &Connection, ts_key: TsKey) -> DependsResult<Vec<CompId>> {
    let target = format!("time series {}", ts_key);
    let mut stmt = conn
        .prepare_cached(
            "SELECT DISTINCT c.computation_id FROM cp_computation c
             JOIN cp_comp_ts_parm p ON p.computation_id = c.computation_id
             WHERE c.enabled = 1 AND p.ts_id = ?
             ORDER BY c.computation_id",
        )
        .during("prepare binding lookup", &target)?;
    let rows = stmt
        .query_map(params![ts_key], |row| row.get::<_, CompId>(0))
        .during("read bound computations", &target)?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .during("read bound computations", &target)
}

/// Set the enabled flag; returns whether the computation exists
pub fn set_enabled(conn: &Connection, comp_id: CompId, enabled: bool) -> DependsResult<bool> {
    let changed = conn
        .execute(
            "UPDATE cp_computation SET enabled = ?, date_time_loaded = ? WHERE computation_id = ?",
            params![enabled, Utc::now().timestamp_millis(), comp_id],
        )
        .during("update enabled flag", format!("computation {}", comp_id))?;
    Ok(changed > 0)
}

pub fn is_enabled(conn: &Connection, comp_id: CompId) -> DependsResult<Option<bool>> {
    conn.query_row(
        "SELECT enabled FROM cp_computation WHERE computation_id = ?",
        params![comp_id],
        |row| row.get(0),
    )
    .optional()
    .during("read enabled flag", format!("computation {}", comp_id))
}

/// Disable every enabled computation bound directly to `ts_key`
pub fn disable_for_direct_input(conn: &Connection, ts_key: TsKey) -> DependsResult<Vec<CompId>> {
    let ids = bound_to(conn, ts_key)?;
    for comp_id in &ids {
        set_enabled(conn, *comp_id, false)?;
    }
    if !ids.is_empty() {
        tracing::info!(
            "Disabled {} computation(s) bound to removed time series {}",
            ids.len(),
            ts_key
        );
    }
    Ok(ids)
}

impl ComputationSource for Store {
    fn load_computation(&self, comp_id: CompId) -> DependsResult<Option<Computation>> {
        self.read(|conn| load(conn, comp_id))
    }

    fn enabled_computations(&self) -> DependsResult<Vec<Computation>> {
        self.read(|conn| enabled(conn))
    }

    fn computations_using_group(&self, group_id: GroupId) -> DependsResult<Vec<Computation>> {
        self.read(|conn| using_group(conn, group_id))
    }

    fn disable_computation(&self, comp_id: CompId) -> DependsResult<()> {
        self.transaction(|tx| set_enabled(tx, comp_id, false).map(|_| ()))
    }
}
