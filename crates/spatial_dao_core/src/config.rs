//! Persistence-unit configuration and process-wide registry.
//!
//! # Responsibility
//! - Describe where a persistence unit's store lives and how to bootstrap it.
//! - Keep registered units available to the session factory by name.
//!
//! # Invariants
//! - Unit names match `[A-Za-z0-9_.-]+`.
//! - Re-registering a name replaces the previous definition; factories
//!   already created for that name keep the old one until
//!   [`crate::session::close_factories`].

use crate::error::{DaoError, DaoResult};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

static UNIT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid unit name regex"));

static UNITS: Lazy<RwLock<HashMap<String, PersistenceUnit>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Where a unit's SQLite store lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreLocation {
    File { path: PathBuf },
    /// Named in-memory database on the `memdb` VFS; lives while its factory
    /// lives. Connections share it with ordinary locking, so the busy timeout
    /// applies.
    Memory,
}

/// Connection settings for one persistence unit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersistenceUnit {
    pub name: String,
    pub store: StoreLocation,
    /// DDL run once when the unit's factory is created.
    #[serde(default)]
    pub bootstrap_sql: Vec<String>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
}

#[derive(Debug, Deserialize)]
struct PersistenceDocument {
    persistence_units: Vec<PersistenceUnit>,
}

impl PersistenceUnit {
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name, StoreLocation::Memory)
    }

    pub fn file(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::new(
            name,
            StoreLocation::File {
                path: path.as_ref().to_path_buf(),
            },
        )
    }

    fn new(name: impl Into<String>, store: StoreLocation) -> Self {
        Self {
            name: name.into(),
            store,
            bootstrap_sql: Vec::new(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
        }
    }

    pub fn with_bootstrap_sql(mut self, sql: impl Into<String>) -> Self {
        self.bootstrap_sql.push(sql.into());
        self
    }

    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// Connection string passed to SQLite.
    pub(crate) fn connection_target(&self) -> String {
        match &self.store {
            StoreLocation::File { path } => path.display().to_string(),
            StoreLocation::Memory => format!("file:/{}?vfs=memdb", self.name),
        }
    }

    fn validate(&self) -> DaoResult<()> {
        if !UNIT_NAME_RE.is_match(&self.name) {
            return Err(DaoError::factory(
                &self.name,
                "unit name must match [A-Za-z0-9_.-]+",
            ));
        }
        Ok(())
    }
}

/// Registers (or replaces) a persistence unit definition.
pub fn register_persistence_unit(unit: PersistenceUnit) -> DaoResult<()> {
    unit.validate()?;
    info!(
        "event=unit_register module=config status=ok unit={} store={:?}",
        unit.name, unit.store
    );
    UNITS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(unit.name.clone(), unit);
    Ok(())
}

/// Loads `{ "persistence_units": [...] }` from a JSON file and registers
/// every unit in it. Returns the registered unit names in file order.
pub fn load_persistence_units(path: impl AsRef<Path>) -> DaoResult<Vec<String>> {
    let path = path.as_ref();
    let source = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|err| DaoError::factory(&source, format!("cannot read config: {err}")))?;
    let document: PersistenceDocument = serde_json::from_str(&text)
        .map_err(|err| DaoError::factory(&source, format!("invalid config: {err}")))?;

    let mut names = Vec::with_capacity(document.persistence_units.len());
    for unit in document.persistence_units {
        names.push(unit.name.clone());
        register_persistence_unit(unit)?;
    }
    Ok(names)
}

/// Returns the registered definition for `name`.
pub fn persistence_unit(name: &str) -> DaoResult<PersistenceUnit> {
    UNITS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
        .ok_or_else(|| DaoError::factory(name, "no such persistence unit is registered"))
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_foreign_keys() -> bool {
    true
}
