//! Connection bootstrap for persistence units.
//!
//! # Responsibility
//! - Open SQLite connections for a unit's store.
//! - Configure pragmas and install spatial SQL functions.
//!
//! # Invariants
//! - Returned connections honour the unit's `foreign_keys` and busy timeout.
//! - Returned connections have the spatial functions registered.

use super::spatial::register_spatial_functions;
use crate::config::PersistenceUnit;
use crate::error::{DaoError, DaoResult};
use log::{error, info};
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Opens a configured connection to `unit`'s store.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_connection(unit: &PersistenceUnit) -> DaoResult<Connection> {
    let started_at = Instant::now();
    info!(
        "event=db_open module=db status=start unit={} target={}",
        unit.name,
        unit.connection_target()
    );

    let result = Connection::open(unit.connection_target())
        .and_then(|conn| bootstrap_connection(&conn, unit).map(|()| conn));

    match result {
        Ok(conn) => {
            info!(
                "event=db_open module=db status=ok unit={} duration_ms={}",
                unit.name,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error unit={} duration_ms={} error_code=db_open_failed error={}",
                unit.name,
                started_at.elapsed().as_millis(),
                err
            );
            Err(DaoError::store("open_connection", err))
        }
    }
}

/// Runs the unit's bootstrap DDL inside one transaction.
pub fn run_bootstrap_sql(conn: &mut Connection, unit: &PersistenceUnit) -> DaoResult<()> {
    if unit.bootstrap_sql.is_empty() {
        return Ok(());
    }
    let apply = |conn: &mut Connection| -> rusqlite::Result<()> {
        let tx = conn.transaction()?;
        for sql in &unit.bootstrap_sql {
            tx.execute_batch(sql)?;
        }
        tx.commit()
    };
    apply(conn).map_err(|err| DaoError::store("bootstrap_sql", err))?;
    info!(
        "event=db_bootstrap module=db status=ok unit={} statements={}",
        unit.name,
        unit.bootstrap_sql.len()
    );
    Ok(())
}

fn bootstrap_connection(conn: &Connection, unit: &PersistenceUnit) -> rusqlite::Result<()> {
    let foreign_keys = if unit.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(Duration::from_millis(unit.busy_timeout_ms))?;
    register_spatial_functions(conn)?;
    Ok(())
}
