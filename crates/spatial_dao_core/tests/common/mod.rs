#![allow(dead_code)]

use rusqlite::types::Value;
use rusqlite::Row;
use spatial_dao_core::{
    register_persistence_unit, Entity, Geometry, IdStrategy, PersistenceUnit,
};
use std::path::Path;
use uuid::Uuid;

pub const SRID: i32 = 4326;

const SCHEMA: &str = "
    CREATE TABLE accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        login TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL
    );
    CREATE TABLE places (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        location TEXT NOT NULL
    );
    CREATE TABLE tags (
        code TEXT PRIMARY KEY,
        label TEXT NOT NULL
    );
";

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: Option<i64>,
    pub login: String,
    pub password: String,
}

impl Account {
    pub fn random() -> Self {
        Self {
            id: None,
            login: random_string(),
            password: random_string(),
        }
    }
}

impl Entity for Account {
    type Id = i64;
    const TABLE: &'static str = "accounts";
    const COLUMNS: &'static [&'static str] = &["login", "password"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.login.clone()),
            Value::Text(self.password.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            login: row.get("login")?,
            password: row.get("password")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub id: Option<i64>,
    pub name: String,
    pub location: Geometry,
}

impl Place {
    pub fn new(name: &str, location: Geometry) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            location,
        }
    }
}

impl Entity for Place {
    type Id = i64;
    const TABLE: &'static str = "places";
    const COLUMNS: &'static [&'static str] = &["name", "location"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![Value::Text(self.name.clone()), Value::from(&self.location)]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            location: row.get("location")?,
        })
    }
}

/// Entity whose identity is assigned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub code: Option<String>,
    pub label: String,
}

impl Entity for Tag {
    type Id = String;
    const TABLE: &'static str = "tags";
    const ID_COLUMN: &'static str = "code";
    const COLUMNS: &'static [&'static str] = &["label"];
    const ID_STRATEGY: IdStrategy = IdStrategy::Assigned;

    fn id(&self) -> Option<String> {
        self.code.clone()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.code = id;
    }

    fn column_values(&self) -> Vec<Value> {
        vec![Value::Text(self.label.clone())]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            code: row.get("code")?,
            label: row.get("label")?,
        })
    }
}

pub fn random_string() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Registers a fresh in-memory unit with the test schema.
pub fn memory_unit() -> String {
    let name = format!("test-{}", random_string());
    register_persistence_unit(PersistenceUnit::in_memory(&name).with_bootstrap_sql(SCHEMA))
        .unwrap();
    name
}

/// Registers a fresh file-backed unit with the test schema under `dir`.
pub fn file_unit(dir: &Path) -> String {
    let name = format!("file-{}", random_string());
    let unit = PersistenceUnit::file(&name, dir.join(format!("{name}.db")))
        .with_bootstrap_sql(SCHEMA);
    register_persistence_unit(unit).unwrap();
    name
}
