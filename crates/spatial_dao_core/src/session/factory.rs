//! Process-wide session factory cache.
//!
//! # Responsibility
//! - Resolve a persistence unit to one factory per process.
//! - Run the unit's bootstrap DDL exactly once, when its factory is created.
//!
//! # Invariants
//! - Two threads racing on the same unit get the same factory.
//! - An in-memory unit's database lives while its factory (or any session
//!   opened from it) lives.

use crate::config::{persistence_unit, PersistenceUnit, StoreLocation};
use crate::db::{open_connection, run_bootstrap_sql};
use crate::error::DaoResult;
use log::info;
use once_cell::sync::Lazy;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

static FACTORIES: Lazy<Mutex<HashMap<String, Arc<SessionFactory>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Opens session connections for one persistence unit.
pub struct SessionFactory {
    unit: PersistenceUnit,
    // Keeps a memdb database alive between sessions.
    _anchor: Option<Mutex<Connection>>,
}

impl SessionFactory {
    /// Returns the cached factory for `unit_name`, creating it on first use.
    ///
    /// The cache lock is held across create-if-absent, so bootstrap DDL never
    /// runs twice for one unit.
    pub fn for_unit(unit_name: &str) -> DaoResult<Arc<SessionFactory>> {
        let mut factories = FACTORIES.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(factory) = factories.get(unit_name) {
            return Ok(Arc::clone(factory));
        }

        let factory = Arc::new(Self::create(persistence_unit(unit_name)?)?);
        factories.insert(unit_name.to_string(), Arc::clone(&factory));
        Ok(factory)
    }

    fn create(unit: PersistenceUnit) -> DaoResult<Self> {
        let mut conn = open_connection(&unit)?;
        run_bootstrap_sql(&mut conn, &unit)?;
        let anchor = match unit.store {
            StoreLocation::Memory => Some(Mutex::new(conn)),
            StoreLocation::File { .. } => None,
        };
        info!(
            "event=factory_create module=session status=ok unit={}",
            unit.name
        );
        Ok(Self {
            unit,
            _anchor: anchor,
        })
    }

    pub fn unit(&self) -> &PersistenceUnit {
        &self.unit
    }

    pub(crate) fn open_session_connection(&self) -> DaoResult<Connection> {
        open_connection(&self.unit)
    }
}

/// Drops every cached factory and returns how many were dropped.
///
/// Sessions already open keep working on their own connection; the next
/// session for a dropped unit creates a fresh factory. Callers must not race
/// this against threads opening sessions they expect to share state with.
pub fn close_factories() -> usize {
    let mut factories = FACTORIES.lock().unwrap_or_else(PoisonError::into_inner);
    let closed = factories.len();
    factories.clear();
    info!("event=factories_close module=session status=ok closed={closed}");
    closed
}

/// Whether a factory for `unit_name` is currently cached.
pub fn has_factory(unit_name: &str) -> bool {
    FACTORIES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(unit_name)
}
