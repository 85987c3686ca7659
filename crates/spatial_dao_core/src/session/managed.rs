//! Per-session identity map of managed entities.
//!
//! # Invariants
//! - At most one managed state per (entity type, identity).
//! - A dirty entry holds a pending update that the next flush writes.

use crate::entity::{id_label, update_statement, Entity};
use crate::error::{DaoError, DaoResult};
use rusqlite::{Connection, ToSql};
use std::any::Any;
use std::collections::HashMap;

/// Type-erased view over one entity type's managed entries.
pub(crate) trait ManagedStore {
    /// Writes pending updates; returns how many rows were written.
    fn flush(&mut self, conn: &Connection) -> DaoResult<usize>;
    fn dirty_count(&self) -> usize;
    fn len(&self) -> usize;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Managed<E> {
    state: E,
    dirty: bool,
}

pub(crate) struct TypedStore<E: Entity> {
    entries: HashMap<E::Id, Managed<E>>,
}

impl<E: Entity> TypedStore<E> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, id: &E::Id) -> Option<&E> {
        self.entries.get(id).map(|entry| &entry.state)
    }

    pub(crate) fn contains(&self, id: &E::Id) -> bool {
        self.entries.contains_key(id)
    }

    /// Manages `entity` as an exact image of its row.
    pub(crate) fn attach(&mut self, entity: E) {
        if let Some(id) = entity.id() {
            self.entries.insert(
                id,
                Managed {
                    state: entity,
                    dirty: false,
                },
            );
        }
    }

    /// Manages `entity` with a pending update.
    pub(crate) fn attach_dirty(&mut self, entity: E) {
        if let Some(id) = entity.id() {
            self.entries.insert(
                id,
                Managed {
                    state: entity,
                    dirty: true,
                },
            );
        }
    }

    /// Registers a freshly loaded row. An already managed instance wins over
    /// the loaded one, so repeated reads in a session return the same state.
    pub(crate) fn register_loaded(&mut self, loaded: E) -> E {
        let Some(id) = loaded.id() else {
            return loaded;
        };
        self.entries
            .entry(id)
            .or_insert(Managed {
                state: loaded,
                dirty: false,
            })
            .state
            .clone()
    }

    pub(crate) fn detach(&mut self, id: &E::Id) {
        self.entries.remove(id);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<E: Entity> ManagedStore for TypedStore<E> {
    fn flush(&mut self, conn: &Connection) -> DaoResult<usize> {
        if E::COLUMNS.is_empty() {
            self.entries.values_mut().for_each(|entry| entry.dirty = false);
            return Ok(0);
        }
        let sql = update_statement::<E>();
        let mut written = 0;
        for (id, entry) in self.entries.iter_mut().filter(|(_, entry)| entry.dirty) {
            let values = entry.state.column_values();
            let mut params: Vec<&dyn ToSql> =
                values.iter().map(|value| value as &dyn ToSql).collect();
            params.push(id);
            let changed = conn
                .execute(&sql, params.as_slice())
                .map_err(|err| DaoError::store("flush", err))?;
            if changed == 0 {
                return Err(DaoError::EntityNotFound {
                    entity: E::TABLE,
                    id: id_label(id),
                }
                .logged());
            }
            entry.dirty = false;
            written += 1;
        }
        Ok(written)
    }

    fn dirty_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.dirty).count()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
