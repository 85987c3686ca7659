//! Session management.
//!
//! # Responsibility
//! - Map (thread, persistence unit) to one live session.
//! - Own the process-wide factory cache and each session's identity map.

mod factory;
mod managed;
mod manager;

pub use factory::{close_factories, has_factory, SessionFactory};
pub use manager::{
    begin_transaction, close, close_quietly, commit, has_session, rollback, transaction_state,
    with_session, Session, TransactionState,
};

pub(crate) use managed::TypedStore;
