//! Generic data access facade.
//!
//! # Responsibility
//! - Offer CRUD, criteria and raw-query operations for any [`crate::Entity`].
//! - Route every call through this thread's session for the DAO's unit.
//!
//! # Invariants
//! - Mutating operations run inside a transaction, begun on demand; commit
//!   and rollback stay with the caller.
//! - Pending managed updates reach the store before any query reads it.
//! - Batch writes either fully apply or leave the store untouched.

pub mod generic_dao;
