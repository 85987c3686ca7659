//! SQLite store bootstrap.
//!
//! # Responsibility
//! - Open and configure connections for a persistence unit.
//! - Install the spatial SQL functions criteria queries rely on.
//!
//! # Invariants
//! - Bootstrap DDL runs once per factory, never per session.

mod open;
pub mod spatial;

pub use open::{open_connection, run_bootstrap_sql};
