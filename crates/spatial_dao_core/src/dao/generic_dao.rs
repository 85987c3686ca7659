//! Entity-generic DAO over the session layer.

use crate::criteria::{restrictions, CriteriaOptions, CriteriaQuery, Criterion, Projection};
use crate::entity::{
    delete_by_id_statement, id_label, id_value, insert_statement, select_by_id_statement, Entity,
    EntityMeta, IdStrategy,
};
use crate::error::{DaoError, DaoResult};
use crate::geometry::GeometryError;
use crate::session::{self, with_session, Session, TypedStore};
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params, ToSql};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

const BATCH_SAVEPOINT: &str = "dao_batch";
// Stays well below SQLite's bound-parameter limit.
const MAX_IN_PARAMS: usize = 500;

/// CRUD and query contract for one entity type.
pub trait Dao<E: Entity> {
    /// Inserts a new entity and makes it managed. Generated identities are
    /// written back into `entity`.
    fn persist(&self, entity: &mut E) -> DaoResult<()>;
    /// Inserts all entities or none of them. A no-op for an empty slice.
    fn persist_many(&self, entities: &mut [E]) -> DaoResult<()>;
    /// Copies `entity` into the session; the update is written on the next
    /// flush, commit or query. Returns the managed state.
    fn merge(&self, entity: &E) -> DaoResult<E>;
    fn merge_many(&self, entities: &[E]) -> DaoResult<Vec<E>>;
    /// Deletes a managed entity.
    fn remove(&self, entity: &E) -> DaoResult<()>;
    fn remove_many(&self, entities: &[E]) -> DaoResult<()>;
    /// Deletes every row of the entity's table. Returns the deleted count.
    fn remove_all(&self) -> DaoResult<usize>;
    fn find(&self, id: &E::Id) -> DaoResult<Option<E>>;
    /// Like [`Dao::find`], additionally requiring `attribute = value` for
    /// every property.
    fn find_with_properties(
        &self,
        id: &E::Id,
        properties: &BTreeMap<String, Value>,
    ) -> DaoResult<Option<E>>;
    /// One slot per requested identity, in input order; `None` marks a
    /// missing row.
    fn find_many(&self, ids: &[E::Id]) -> DaoResult<Vec<Option<E>>>;
    fn find_all(&self) -> DaoResult<Vec<E>>;
    fn find_all_with(&self, options: &CriteriaOptions) -> DaoResult<Vec<E>>;
    fn find_by_criteria(&self, conditions: &[Criterion]) -> DaoResult<Vec<E>>;
    fn find_by_criteria_with(
        &self,
        conditions: &[Criterion],
        options: &CriteriaOptions,
    ) -> DaoResult<Vec<E>>;
    /// Tuples of the projected attributes, in projection order.
    fn project_by_criteria(
        &self,
        conditions: &[Criterion],
        projection: &Projection,
        options: &CriteriaOptions,
    ) -> DaoResult<Vec<Vec<Value>>>;
    /// `None` for no match; `NonUniqueResult` for more than one.
    fn find_unique_by_criteria(&self, conditions: &[Criterion]) -> DaoResult<Option<E>>;
    fn count(&self) -> DaoResult<u64>;
    fn count_by_criteria(&self, conditions: &[Criterion]) -> DaoResult<u64>;
    /// Discards local changes to a managed entity and reloads it.
    fn refresh(&self, entity: &mut E) -> DaoResult<()>;
    fn flush(&self) -> DaoResult<usize>;
    /// Detaches every managed entity of the session.
    fn clear(&self) -> DaoResult<()>;
    /// Runs `SELECT <entity columns> <query>`; `query` starts at `FROM`.
    fn execute_entity_query(&self, query: &str, params: &[Value]) -> DaoResult<Vec<E>>;
    fn execute_sql(&self, sql: &str, params: &[Value]) -> DaoResult<Vec<Vec<Value>>>;
    fn execute_sql_update(&self, sql: &str, params: &[Value]) -> DaoResult<usize>;
    /// Closes this thread's session for the DAO's unit.
    fn close(&self) -> DaoResult<()>;
}

/// [`Dao`] implementation for any entity, bound to one persistence unit.
///
/// The value holds no session itself, so one instance can be shared across
/// threads; each thread works in its own session.
pub struct GenericSpatialDao<E: Entity> {
    unit: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> GenericSpatialDao<E> {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            _entity: PhantomData,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn begin_transaction(&self) -> DaoResult<()> {
        session::begin_transaction(&self.unit)
    }

    pub fn commit(&self) -> DaoResult<()> {
        session::commit(&self.unit)
    }

    pub fn rollback(&self) -> DaoResult<()> {
        session::rollback(&self.unit)
    }

    fn session<T>(&self, f: impl FnOnce(&mut Session) -> DaoResult<T>) -> DaoResult<T> {
        with_session(&self.unit, f)
    }

    fn load(&self, statement_of: impl FnOnce() -> DaoResult<CriteriaQuery>) -> DaoResult<Vec<E>> {
        let statement = statement_of()?.select_statement()?;
        self.session(|session| {
            session.flush_pending()?;
            let (conn, store) = session.parts::<E>()?;
            let loaded = query_entities::<E, _>(
                conn,
                "find_by_criteria",
                &statement.sql,
                params_from_iter(statement.params.iter()),
            )?;
            debug!(
                "event=dao_query module=dao status=ok entity={} rows={}",
                E::TABLE,
                loaded.len()
            );
            Ok(register_all(store, loaded))
        })
    }
}

impl<E: Entity> Clone for GenericSpatialDao<E> {
    fn clone(&self) -> Self {
        Self::new(self.unit.clone())
    }
}

impl<E: Entity> Display for GenericSpatialDao<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GenericSpatialDao<{}>@{}", E::TABLE, self.unit)
    }
}

impl<E: Entity> Dao<E> for GenericSpatialDao<E> {
    fn persist(&self, entity: &mut E) -> DaoResult<()> {
        self.persist_many(std::slice::from_mut(entity))
    }

    fn persist_many(&self, entities: &mut [E]) -> DaoResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        self.session(|session| {
            session.begin_transaction()?;
            let (conn, store) = session.parts::<E>()?;
            let mut generated = Vec::new();
            let inserted = in_savepoint(conn, || {
                for (index, entity) in entities.iter_mut().enumerate() {
                    if insert_entity(conn, entity)? {
                        generated.push(index);
                    }
                }
                Ok(())
            });
            if let Err(err) = inserted {
                for index in generated {
                    entities[index].set_id(None);
                }
                return Err(err);
            }
            for entity in entities.iter() {
                store.attach(entity.clone());
            }
            info!(
                "event=dao_persist module=dao status=ok entity={} rows={}",
                E::TABLE,
                entities.len()
            );
            Ok(())
        })
    }

    fn merge(&self, entity: &E) -> DaoResult<E> {
        let mut merged = self.merge_many(std::slice::from_ref(entity))?;
        merged
            .pop()
            .ok_or_else(|| DaoError::query("merge produced no managed instance"))
    }

    fn merge_many(&self, entities: &[E]) -> DaoResult<Vec<E>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        self.session(|session| {
            session.begin_transaction()?;
            let (conn, store) = session.parts::<E>()?;
            let reconciled = in_savepoint(conn, || {
                entities
                    .iter()
                    .map(|entity| reconcile(conn, store, entity))
                    .collect::<DaoResult<Vec<_>>>()
            })?;

            let mut merged = Vec::with_capacity(reconciled.len());
            for (entity, pending) in reconciled {
                if pending {
                    store.attach_dirty(entity.clone());
                } else {
                    store.attach(entity.clone());
                }
                merged.push(entity);
            }
            info!(
                "event=dao_merge module=dao status=ok entity={} rows={}",
                E::TABLE,
                merged.len()
            );
            Ok(merged)
        })
    }

    fn remove(&self, entity: &E) -> DaoResult<()> {
        self.remove_many(std::slice::from_ref(entity))
    }

    fn remove_many(&self, entities: &[E]) -> DaoResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        self.session(|session| {
            session.begin_transaction()?;
            let (conn, store) = session.parts::<E>()?;
            let ids = entities
                .iter()
                .map(|entity| managed_id(store, entity))
                .collect::<DaoResult<Vec<_>>>()?;
            let sql = delete_by_id_statement::<E>();
            in_savepoint(conn, || {
                for id in &ids {
                    let changed = conn
                        .execute(&sql, params![id])
                        .map_err(|err| DaoError::store("remove", err))?;
                    if changed == 0 {
                        return Err(not_found::<E>(id));
                    }
                }
                Ok(())
            })?;
            for id in &ids {
                store.detach(id);
            }
            info!(
                "event=dao_remove module=dao status=ok entity={} rows={}",
                E::TABLE,
                ids.len()
            );
            Ok(())
        })
    }

    fn remove_all(&self) -> DaoResult<usize> {
        self.session(|session| {
            session.begin_transaction()?;
            let (conn, store) = session.parts::<E>()?;
            let removed = conn
                .execute(&format!("DELETE FROM {}", E::TABLE), [])
                .map_err(|err| DaoError::store("remove_all", err))?;
            store.clear();
            info!(
                "event=dao_remove_all module=dao status=ok entity={} rows={removed}",
                E::TABLE
            );
            Ok(removed)
        })
    }

    fn find(&self, id: &E::Id) -> DaoResult<Option<E>> {
        self.session(|session| {
            session.flush_pending()?;
            let (conn, store) = session.parts::<E>()?;
            if let Some(managed) = store.get(id) {
                return Ok(Some(managed.clone()));
            }
            let loaded = query_entities::<E, _>(
                conn,
                "find",
                &select_by_id_statement::<E>(),
                params![id],
            )?;
            Ok(loaded
                .into_iter()
                .next()
                .map(|entity| store.register_loaded(entity)))
        })
    }

    fn find_with_properties(
        &self,
        id: &E::Id,
        properties: &BTreeMap<String, Value>,
    ) -> DaoResult<Option<E>> {
        let found = self.load(|| {
            let mut query =
                CriteriaQuery::for_entity::<E>().add(restrictions::eq(E::ID_COLUMN, id_value(id)?));
            for (attribute, value) in properties {
                query = query.add(restrictions::eq(attribute, value.clone()));
            }
            Ok(query)
        })?;
        Ok(found.into_iter().next())
    }

    fn find_many(&self, ids: &[E::Id]) -> DaoResult<Vec<Option<E>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.session(|session| {
            session.flush_pending()?;
            let (conn, store) = session.parts::<E>()?;
            let missing = ids
                .iter()
                .filter(|id| !store.contains(id))
                .map(id_value)
                .collect::<DaoResult<Vec<_>>>()?;

            for chunk in missing.chunks(MAX_IN_PARAMS) {
                let statement = CriteriaQuery::for_entity::<E>()
                    .add(restrictions::in_values(E::ID_COLUMN, chunk.iter().cloned()))
                    .select_statement()?;
                let loaded = query_entities::<E, _>(
                    conn,
                    "find_many",
                    &statement.sql,
                    params_from_iter(statement.params.iter()),
                )?;
                register_all(store, loaded);
            }
            Ok(ids.iter().map(|id| store.get(id).cloned()).collect())
        })
    }

    fn find_all(&self) -> DaoResult<Vec<E>> {
        self.find_all_with(&CriteriaOptions::default())
    }

    fn find_all_with(&self, options: &CriteriaOptions) -> DaoResult<Vec<E>> {
        self.find_by_criteria_with(&[], options)
    }

    fn find_by_criteria(&self, conditions: &[Criterion]) -> DaoResult<Vec<E>> {
        self.find_by_criteria_with(conditions, &CriteriaOptions::default())
    }

    fn find_by_criteria_with(
        &self,
        conditions: &[Criterion],
        options: &CriteriaOptions,
    ) -> DaoResult<Vec<E>> {
        self.load(|| {
            Ok(CriteriaQuery::for_entity::<E>()
                .add_all(conditions.iter().cloned())
                .with_options(options.clone()))
        })
    }

    fn project_by_criteria(
        &self,
        conditions: &[Criterion],
        projection: &Projection,
        options: &CriteriaOptions,
    ) -> DaoResult<Vec<Vec<Value>>> {
        let statement = CriteriaQuery::for_entity::<E>()
            .add_all(conditions.iter().cloned())
            .with_projection(projection.clone())
            .with_options(options.clone())
            .select_statement()?;
        self.session(|session| {
            session.flush_pending()?;
            query_values(
                session.connection(),
                "project_by_criteria",
                &statement.sql,
                params_from_iter(statement.params.iter()),
            )
        })
    }

    fn find_unique_by_criteria(&self, conditions: &[Criterion]) -> DaoResult<Option<E>> {
        let statement = CriteriaQuery::for_entity::<E>()
            .add_all(conditions.iter().cloned())
            .select_statement()?;
        self.session(|session| {
            session.flush_pending()?;
            let (conn, store) = session.parts::<E>()?;
            let mut loaded = query_entities::<E, _>(
                conn,
                "find_unique_by_criteria",
                &statement.sql,
                params_from_iter(statement.params.iter()),
            )?;
            if loaded.len() > 1 {
                return Err(DaoError::NonUniqueResult {
                    entity: E::TABLE,
                    count: loaded.len(),
                }
                .logged());
            }
            Ok(loaded.pop().map(|entity| store.register_loaded(entity)))
        })
    }

    fn count(&self) -> DaoResult<u64> {
        self.count_by_criteria(&[])
    }

    fn count_by_criteria(&self, conditions: &[Criterion]) -> DaoResult<u64> {
        let statement = CriteriaQuery::for_entity::<E>()
            .add_all(conditions.iter().cloned())
            .count_statement()?;
        self.session(|session| {
            session.flush_pending()?;
            let count: i64 = session
                .connection()
                .query_row(
                    &statement.sql,
                    params_from_iter(statement.params.iter()),
                    |row| row.get(0),
                )
                .map_err(|err| DaoError::store("count", err))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    fn refresh(&self, entity: &mut E) -> DaoResult<()> {
        self.session(|session| {
            let (conn, store) = session.parts::<E>()?;
            let id = managed_id(store, entity)?;
            let reloaded = query_entities::<E, _>(
                conn,
                "refresh",
                &select_by_id_statement::<E>(),
                params![&id],
            )?;
            let Some(reloaded) = reloaded.into_iter().next() else {
                store.detach(&id);
                return Err(not_found::<E>(&id));
            };
            store.attach(reloaded.clone());
            *entity = reloaded;
            Ok(())
        })
    }

    fn flush(&self) -> DaoResult<usize> {
        self.session(Session::flush)
    }

    fn clear(&self) -> DaoResult<()> {
        self.session(|session| {
            session.clear();
            Ok(())
        })
    }

    fn execute_entity_query(&self, query: &str, params: &[Value]) -> DaoResult<Vec<E>> {
        let query = query.trim();
        let starts_at_from = query
            .split_whitespace()
            .next()
            .is_some_and(|head| head.eq_ignore_ascii_case("FROM"));
        if !starts_at_from {
            return Err(DaoError::query(format!(
                "entity query must start with `FROM`, got `{query}`"
            )));
        }
        let sql = format!("SELECT {} {query}", EntityMeta::of::<E>().select_list());
        self.session(|session| {
            session.flush_pending()?;
            let (conn, store) = session.parts::<E>()?;
            let loaded = query_entities::<E, _>(
                conn,
                "execute_entity_query",
                &sql,
                params_from_iter(params.iter()),
            )?;
            Ok(register_all(store, loaded))
        })
    }

    fn execute_sql(&self, sql: &str, params: &[Value]) -> DaoResult<Vec<Vec<Value>>> {
        self.session(|session| {
            session.flush_pending()?;
            query_values(
                session.connection(),
                "execute_sql",
                sql,
                params_from_iter(params.iter()),
            )
        })
    }

    fn execute_sql_update(&self, sql: &str, params: &[Value]) -> DaoResult<usize> {
        self.session(|session| {
            session.flush_pending()?;
            session.begin_transaction()?;
            let changed = session
                .connection()
                .execute(sql, params_from_iter(params.iter()))
                .map_err(|err| DaoError::store("execute_sql_update", err))?;
            info!(
                "event=dao_sql_update module=dao status=ok unit={} rows={changed}",
                session.unit()
            );
            Ok(changed)
        })
    }

    fn close(&self) -> DaoResult<()> {
        session::close(&self.unit)
    }
}

/// Inserts one entity. Returns whether the store generated its identity.
fn insert_entity<E: Entity>(conn: &Connection, entity: &mut E) -> DaoResult<bool> {
    let values = entity.column_values();
    match (E::ID_STRATEGY, entity.id()) {
        (IdStrategy::Generated, Some(id)) => Err(DaoError::IdentityAssigned {
            entity: E::TABLE,
            id: id_label(&id),
        }
        .logged()),
        (IdStrategy::Generated, None) => {
            let id = conn
                .query_row(
                    &insert_statement::<E>(false),
                    params_from_iter(values.iter()),
                    |row| row.get::<_, E::Id>(0),
                )
                .map_err(|err| DaoError::store("persist", err))?;
            entity.set_id(Some(id));
            Ok(true)
        }
        (IdStrategy::Assigned, None) => {
            Err(DaoError::MissingIdentity { entity: E::TABLE }.logged())
        }
        (IdStrategy::Assigned, Some(id)) => {
            let mut bound: Vec<&dyn ToSql> = Vec::with_capacity(values.len() + 1);
            bound.push(&id);
            bound.extend(values.iter().map(|value| value as &dyn ToSql));
            conn.execute(&insert_statement::<E>(true), bound.as_slice())
                .map_err(|err| DaoError::store("persist", err))?;
            Ok(false)
        }
    }
}

/// Decides how `entity` enters the session: `(state, pending_update)`.
///
/// Unknown generated-identity rows are an error; unknown assigned-identity
/// rows and identity-less entities are inserted.
fn reconcile<E: Entity>(
    conn: &Connection,
    store: &TypedStore<E>,
    entity: &E,
) -> DaoResult<(E, bool)> {
    let Some(id) = entity.id() else {
        let mut inserted = entity.clone();
        insert_entity(conn, &mut inserted)?;
        return Ok((inserted, false));
    };
    if store.contains(&id) || row_exists::<E>(conn, &id)? {
        return Ok((entity.clone(), true));
    }
    match E::ID_STRATEGY {
        IdStrategy::Assigned => {
            let mut inserted = entity.clone();
            insert_entity(conn, &mut inserted)?;
            Ok((inserted, false))
        }
        IdStrategy::Generated => Err(not_found::<E>(&id)),
    }
}

fn row_exists<E: Entity>(conn: &Connection, id: &E::Id) -> DaoResult<bool> {
    conn.query_row(
        &format!("SELECT 1 FROM {} WHERE {} = ?1", E::TABLE, E::ID_COLUMN),
        params![id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|err| DaoError::store("merge", err))
}

fn managed_id<E: Entity>(store: &TypedStore<E>, entity: &E) -> DaoResult<E::Id> {
    let id = entity
        .id()
        .ok_or_else(|| DaoError::MissingIdentity { entity: E::TABLE }.logged())?;
    if !store.contains(&id) {
        return Err(DaoError::StaleState {
            entity: E::TABLE,
            id: id_label(&id),
        }
        .logged());
    }
    Ok(id)
}

fn not_found<E: Entity>(id: &E::Id) -> DaoError {
    DaoError::EntityNotFound {
        entity: E::TABLE,
        id: id_label(id),
    }
    .logged()
}

fn register_all<E: Entity>(store: &mut TypedStore<E>, loaded: Vec<E>) -> Vec<E> {
    loaded
        .into_iter()
        .map(|entity| store.register_loaded(entity))
        .collect()
}

fn in_savepoint<T>(conn: &Connection, apply: impl FnOnce() -> DaoResult<T>) -> DaoResult<T> {
    conn.execute_batch(&format!("SAVEPOINT {BATCH_SAVEPOINT}"))
        .map_err(|err| DaoError::store("savepoint", err))?;
    match apply() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {BATCH_SAVEPOINT}"))
                .map_err(|err| DaoError::store("savepoint_release", err))?;
            Ok(value)
        }
        Err(err) => {
            let undo = format!("ROLLBACK TO {BATCH_SAVEPOINT}; RELEASE {BATCH_SAVEPOINT}");
            if let Err(undo_err) = conn.execute_batch(&undo) {
                warn!(
                    "event=savepoint_rollback module=dao status=error error={undo_err}"
                );
            }
            Err(err)
        }
    }
}

fn query_entities<E: Entity, P: Params>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: P,
) -> DaoResult<Vec<E>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|err| DaoError::store(operation, err))?;
    let rows = stmt
        .query_map(params, E::from_row)
        .map_err(|err| DaoError::store(operation, err))?;
    let entities = rows
        .collect::<rusqlite::Result<Vec<E>>>()
        .map_err(|err| read_error(operation, err))?;
    Ok(entities)
}

fn query_values<P: Params>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: P,
) -> DaoResult<Vec<Vec<Value>>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|err| DaoError::store(operation, err))?;
    let width = stmt.column_count();
    let rows = stmt
        .query_map(params, |row| {
            (0..width)
                .map(|index| row.get::<_, Value>(index))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .map_err(|err| DaoError::store(operation, err))?;
    let values = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|err| DaoError::store(operation, err))?;
    Ok(values)
}

/// Geometry columns that fail decoding surface as geometry errors.
fn read_error(operation: &'static str, err: rusqlite::Error) -> DaoError {
    if let rusqlite::Error::FromSqlConversionFailure(_, _, cause) = &err {
        if let Some(geometry_err) = cause.downcast_ref::<GeometryError>() {
            return DaoError::Geometry(geometry_err.clone()).logged();
        }
    }
    DaoError::store(operation, err)
}
