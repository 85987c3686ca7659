//! Per-thread sessions and transactions.
//!
//! # Responsibility
//! - Keep at most one session per (thread, persistence unit), opened lazily.
//! - Drive the transaction lifecycle and the session's identity map.
//!
//! # Invariants
//! - Session state is thread-local; only factory creation takes a lock.
//! - A session runs at most one transaction at a time.
//! - Closing a session rolls back a transaction the caller left open.

use super::factory::SessionFactory;
use super::managed::{ManagedStore, TypedStore};
use crate::entity::Entity;
use crate::error::{DaoError, DaoResult};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

thread_local! {
    static SESSIONS: RefCell<HashMap<String, Session>> = RefCell::new(HashMap::new());
}

/// Transaction lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// One unit of work against a persistence unit's store.
pub struct Session {
    id: Uuid,
    factory: Arc<SessionFactory>,
    conn: Connection,
    state: TransactionState,
    managed: HashMap<TypeId, Box<dyn ManagedStore>>,
}

impl Session {
    fn open(unit_name: &str) -> DaoResult<Self> {
        let factory = SessionFactory::for_unit(unit_name)?;
        let conn = factory.open_session_connection()?;
        let session = Self {
            id: Uuid::new_v4(),
            factory,
            conn,
            state: TransactionState::NotStarted,
            managed: HashMap::new(),
        };
        info!(
            "event=session_open module=session status=ok unit={} session_id={}",
            unit_name, session.id
        );
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unit(&self) -> &str {
        &self.factory.unit().name
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Reports `RolledBack` when the store aborted the transaction on its own.
    pub fn transaction_state(&self) -> TransactionState {
        if self.state == TransactionState::Active && self.conn.is_autocommit() {
            TransactionState::RolledBack
        } else {
            self.state
        }
    }

    pub fn is_transaction_active(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Begins a transaction unless one is already active.
    pub fn begin_transaction(&mut self) -> DaoResult<()> {
        if self.is_transaction_active() {
            return Ok(());
        }
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| DaoError::store("begin_transaction", err))?;
        self.state = TransactionState::Active;
        debug!(
            "event=tx_begin module=session status=ok unit={} session_id={}",
            self.unit(),
            self.id
        );
        Ok(())
    }

    /// Flushes pending changes, then commits. A no-op without an active
    /// transaction and nothing pending.
    pub fn commit(&mut self) -> DaoResult<()> {
        self.flush_pending()?;
        if !self.is_transaction_active() {
            return Ok(());
        }
        self.conn
            .execute_batch("COMMIT")
            .map_err(|err| DaoError::store("commit", err))?;
        self.state = TransactionState::Committed;
        debug!(
            "event=tx_commit module=session status=ok unit={} session_id={}",
            self.unit(),
            self.id
        );
        Ok(())
    }

    /// Rolls back the active transaction and detaches every managed entity,
    /// since their state may no longer match the store.
    pub fn rollback(&mut self) -> DaoResult<()> {
        self.clear();
        if !self.is_transaction_active() {
            return Ok(());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|err| DaoError::store("rollback", err))?;
        self.state = TransactionState::RolledBack;
        debug!(
            "event=tx_rollback module=session status=ok unit={} session_id={}",
            self.unit(),
            self.id
        );
        Ok(())
    }

    /// Writes every pending update inside the current transaction, beginning
    /// one if needed. Returns the number of rows written.
    pub fn flush(&mut self) -> DaoResult<usize> {
        self.begin_transaction()?;
        let mut written = 0;
        for store in self.managed.values_mut() {
            written += store.flush(&self.conn)?;
        }
        if written > 0 {
            debug!(
                "event=session_flush module=session status=ok unit={} rows={written}",
                self.factory.unit().name
            );
        }
        Ok(written)
    }

    /// Flushes only when something is pending, so read paths stay out of
    /// transactions.
    pub(crate) fn flush_pending(&mut self) -> DaoResult<usize> {
        if self.pending_count() == 0 {
            return Ok(0);
        }
        self.flush()
    }

    /// Detaches every managed entity and discards their pending updates.
    pub fn clear(&mut self) {
        self.managed.clear();
    }

    pub fn managed_count(&self) -> usize {
        self.managed.values().map(|store| store.len()).sum()
    }

    pub fn pending_count(&self) -> usize {
        self.managed.values().map(|store| store.dirty_count()).sum()
    }

    /// The connection and the identity map for `E`, borrowed together.
    pub(crate) fn parts<E: Entity>(&mut self) -> DaoResult<(&Connection, &mut TypedStore<E>)> {
        let store = self
            .managed
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(TypedStore::<E>::new()) as Box<dyn ManagedStore>)
            .as_any_mut()
            .downcast_mut::<TypedStore<E>>()
            .ok_or_else(|| {
                DaoError::query(format!(
                    "identity map entry does not hold `{}`",
                    std::any::type_name::<E>()
                ))
            })?;
        Ok((&self.conn, store))
    }

    fn close(mut self) -> DaoResult<()> {
        if self.is_transaction_active() {
            warn!(
                "event=session_close module=session status=rollback unit={} session_id={} reason=transaction_left_open",
                self.unit(),
                self.id
            );
            self.rollback()?;
        }
        let unit = self.unit().to_string();
        let id = self.id;
        self.conn
            .close()
            .map_err(|(_, err)| DaoError::store("close_session", err))?;
        info!("event=session_close module=session status=ok unit={unit} session_id={id}");
        Ok(())
    }
}

/// Runs `f` against this thread's session for `unit`, opening it on first use.
///
/// # Errors
/// - `DaoError::Factory` when the unit cannot be resolved or opened, or when
///   called re-entrantly from inside another `with_session` closure.
pub fn with_session<T>(
    unit: &str,
    f: impl FnOnce(&mut Session) -> DaoResult<T>,
) -> DaoResult<T> {
    SESSIONS.with(|sessions| {
        let mut sessions = sessions
            .try_borrow_mut()
            .map_err(|_| DaoError::factory(unit, "session is already borrowed on this thread"))?;
        let session = match sessions.entry(unit.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Session::open(unit)?),
        };
        f(session)
    })
}

pub fn begin_transaction(unit: &str) -> DaoResult<()> {
    with_session(unit, Session::begin_transaction)
}

pub fn commit(unit: &str) -> DaoResult<()> {
    with_session(unit, Session::commit)
}

pub fn rollback(unit: &str) -> DaoResult<()> {
    with_session(unit, Session::rollback)
}

/// Closes this thread's session for `unit`; a no-op when none is open.
pub fn close(unit: &str) -> DaoResult<()> {
    let session = SESSIONS.with(|sessions| {
        sessions
            .try_borrow_mut()
            .map(|mut sessions| sessions.remove(unit))
            .map_err(|_| DaoError::factory(unit, "session is already borrowed on this thread"))
    })?;
    match session {
        Some(session) => session.close(),
        None => Ok(()),
    }
}

/// Teardown variant of [`close`]: failures are already logged, so they are
/// dropped here.
pub fn close_quietly(unit: &str) {
    if let Err(err) = close(unit) {
        error!(
            "event=session_close module=session status=error unit={unit} error_code=close_suppressed error={err}"
        );
    }
}

/// Whether this thread has an open session for `unit`.
pub fn has_session(unit: &str) -> bool {
    SESSIONS.with(|sessions| {
        sessions
            .try_borrow()
            .map(|sessions| sessions.contains_key(unit))
            .unwrap_or(true)
    })
}

/// Transaction state of this thread's session for `unit`, if one is open.
pub fn transaction_state(unit: &str) -> Option<TransactionState> {
    SESSIONS.with(|sessions| {
        sessions
            .try_borrow()
            .ok()
            .and_then(|sessions| sessions.get(unit).map(Session::transaction_state))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{register_persistence_unit, PersistenceUnit};
    use rusqlite::types::Value;
    use rusqlite::Row;

    #[derive(Clone)]
    struct Tick {
        id: Option<i64>,
        n: i64,
    }

    impl Entity for Tick {
        type Id = i64;
        const TABLE: &'static str = "ticks";
        const COLUMNS: &'static [&'static str] = &["n"];

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: Option<i64>) {
            self.id = id;
        }

        fn column_values(&self) -> Vec<Value> {
            vec![Value::Integer(self.n)]
        }

        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                n: row.get("n")?,
            })
        }
    }

    fn unit(name: &str) -> String {
        register_persistence_unit(
            PersistenceUnit::in_memory(name)
                .with_bootstrap_sql("CREATE TABLE ticks (id INTEGER PRIMARY KEY, n INTEGER);"),
        )
        .unwrap();
        name.to_string()
    }

    fn tick_count(unit: &str) -> i64 {
        with_session(unit, |session| {
            session
                .connection()
                .query_row("SELECT COUNT(*) FROM ticks", [], |row| row.get(0))
                .map_err(|err| DaoError::store("count", err))
        })
        .unwrap()
    }

    #[test]
    fn session_is_reused_within_a_thread() {
        let unit = unit("manager-reuse");
        let first = with_session(&unit, |session| Ok(session.id())).unwrap();
        let second = with_session(&unit, |session| Ok(session.id())).unwrap();
        assert_eq!(first, second);
        assert!(has_session(&unit));

        close(&unit).unwrap();
        assert!(!has_session(&unit));
        let third = with_session(&unit, |session| Ok(session.id())).unwrap();
        assert_ne!(first, third);
        close(&unit).unwrap();
    }

    #[test]
    fn transaction_lifecycle_is_tracked() {
        let unit = unit("manager-lifecycle");
        with_session(&unit, |session| {
            assert_eq!(session.transaction_state(), TransactionState::NotStarted);
            Ok(())
        })
        .unwrap();

        begin_transaction(&unit).unwrap();
        assert_eq!(transaction_state(&unit), Some(TransactionState::Active));
        commit(&unit).unwrap();
        assert_eq!(transaction_state(&unit), Some(TransactionState::Committed));

        begin_transaction(&unit).unwrap();
        rollback(&unit).unwrap();
        assert_eq!(transaction_state(&unit), Some(TransactionState::RolledBack));
        close(&unit).unwrap();
        assert_eq!(transaction_state(&unit), None);
    }

    #[test]
    fn close_rolls_back_open_transaction() {
        let unit = unit("manager-close-rollback");
        with_session(&unit, |session| {
            session.begin_transaction()?;
            session
                .connection()
                .execute("INSERT INTO ticks (n) VALUES (1)", [])
                .map_err(|err| DaoError::store("insert", err))?;
            Ok(())
        })
        .unwrap();
        close(&unit).unwrap();
        assert_eq!(tick_count(&unit), 0);
        close(&unit).unwrap();
    }

    #[test]
    fn identity_map_is_kept_per_entity_type() {
        let unit = unit("manager-typed-store");
        with_session(&unit, |session| {
            let (_, store) = session.parts::<Tick>()?;
            store.attach(Tick { id: Some(7), n: 1 });
            Ok(())
        })
        .unwrap();

        let managed = with_session(&unit, |session| {
            let (_, store) = session.parts::<Tick>()?;
            Ok(store.get(&7).map(|tick| tick.n))
        })
        .unwrap();
        assert_eq!(managed, Some(1));
        with_session(&unit, |session| {
            assert_eq!(session.managed_count(), 1);
            Ok(())
        })
        .unwrap();
        close(&unit).unwrap();
    }

    #[test]
    fn nested_session_use_is_rejected() {
        let unit = unit("manager-nested");
        let err = with_session(&unit, |_| with_session(&unit, |_| Ok(()))).unwrap_err();
        assert!(matches!(err, DaoError::Factory { .. }));
        close_quietly(&unit);
        close_quietly(&unit);
    }
}
