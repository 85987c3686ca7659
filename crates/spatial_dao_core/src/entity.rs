//! Entity mapping contract.
//!
//! # Responsibility
//! - Describe how a caller-defined record maps onto one table.
//! - Give the DAO identity access without runtime reflection.
//!
//! # Invariants
//! - `COLUMNS` lists every non-identity column; `column_values` returns one
//!   value per entry, in the same order.
//! - `from_row` reads columns by name, so select-list order is free.

use crate::error::{DaoError, DaoResult};
use rusqlite::types::{FromSql, ToSql, ToSqlOutput, Value};
use rusqlite::Row;
use std::fmt::Debug;
use std::hash::Hash;

/// Identity attribute type.
pub trait EntityId: Clone + Eq + Hash + Debug + ToSql + FromSql + 'static {}

impl<T> EntityId for T where T: Clone + Eq + Hash + Debug + ToSql + FromSql + 'static {}

/// Who assigns the identity of a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// The store assigns it on insert; callers must leave it unset.
    Generated,
    /// Callers assign it before persisting.
    Assigned,
}

/// A persisted, identity-bearing record type.
pub trait Entity: Clone + 'static {
    type Id: EntityId;

    const TABLE: &'static str;
    const ID_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str];
    const ID_STRATEGY: IdStrategy = IdStrategy::Generated;

    fn id(&self) -> Option<Self::Id>;
    fn set_id(&mut self, id: Option<Self::Id>);
    fn column_values(&self) -> Vec<Value>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Type-erased table shape used by query composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMeta {
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [&'static str],
}

impl EntityMeta {
    pub fn of<E: Entity>() -> Self {
        Self {
            table: E::TABLE,
            id_column: E::ID_COLUMN,
            columns: E::COLUMNS,
        }
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        name == self.id_column || self.columns.contains(&name)
    }

    /// `id, col_a, col_b, ...`
    pub fn select_list(&self) -> String {
        std::iter::once(self.id_column)
            .chain(self.columns.iter().copied())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub(crate) fn id_label<I: Debug>(id: &I) -> String {
    format!("{id:?}")
}

/// Owned SQL value of an identity, for composing criteria over it.
pub(crate) fn id_value<I: ToSql>(id: &I) -> DaoResult<Value> {
    match id.to_sql().map_err(|err| DaoError::store("bind_identity", err))? {
        ToSqlOutput::Borrowed(value) => Ok(value.into()),
        ToSqlOutput::Owned(value) => Ok(value),
        other => Err(DaoError::query(format!(
            "identity binds to an unsupported value: {other:?}"
        ))),
    }
}

pub(crate) fn insert_statement<E: Entity>(with_id: bool) -> String {
    let mut columns = Vec::with_capacity(E::COLUMNS.len() + 1);
    if with_id {
        columns.push(E::ID_COLUMN);
    }
    columns.extend_from_slice(E::COLUMNS);
    let returning = if with_id {
        String::new()
    } else {
        format!(" RETURNING {}", E::ID_COLUMN)
    };
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES{returning}", E::TABLE);
    }
    let placeholders = (1..=columns.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders}){returning}",
        E::TABLE,
        columns.join(", ")
    )
}

/// `UPDATE t SET a = ?1, b = ?2 WHERE id = ?3`; the identity binds last.
pub(crate) fn update_statement<E: Entity>() -> String {
    let assignments = E::COLUMNS
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE {} = ?{}",
        E::TABLE,
        E::ID_COLUMN,
        E::COLUMNS.len() + 1
    )
}

pub(crate) fn select_by_id_statement<E: Entity>() -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        EntityMeta::of::<E>().select_list(),
        E::TABLE,
        E::ID_COLUMN
    )
}

pub(crate) fn delete_by_id_statement<E: Entity>() -> String {
    format!("DELETE FROM {} WHERE {} = ?1", E::TABLE, E::ID_COLUMN)
}
