//! DAO-level error taxonomy.
//!
//! # Invariants
//! - Store failures are wrapped, never swallowed; the engine error stays
//!   reachable through `Error::source`.
//! - Errors are logged once, where they are created (see [`DaoError::logged`]).

use crate::geometry::GeometryError;
use log::error;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DaoResult<T> = Result<T, DaoError>;

#[derive(Debug)]
pub enum DaoError {
    /// The store rejected or failed an operation (constraint violation,
    /// malformed SQL, lock timeout, ...).
    Store {
        operation: &'static str,
        source: rusqlite::Error,
    },
    /// A persistence unit could not be resolved, configured or opened.
    Factory { unit: String, message: String },
    /// A store-generated identity was supplied by the caller on persist.
    IdentityAssigned { entity: &'static str, id: String },
    /// A caller-assigned identity is required but was not supplied.
    MissingIdentity { entity: &'static str },
    /// A unique query matched more than one row.
    NonUniqueResult { entity: &'static str, count: usize },
    /// The entity is not managed by the current session.
    StaleState { entity: &'static str, id: String },
    /// The entity's row no longer exists in the store.
    EntityNotFound { entity: &'static str, id: String },
    /// The query could not be composed (unknown attribute, bad pagination).
    Query { message: String },
    Geometry(GeometryError),
}

impl DaoError {
    pub(crate) fn store(operation: &'static str, source: rusqlite::Error) -> Self {
        Self::Store { operation, source }.logged()
    }

    pub(crate) fn factory(unit: &str, message: impl Into<String>) -> Self {
        Self::Factory {
            unit: unit.to_string(),
            message: message.into(),
        }
        .logged()
    }

    pub(crate) fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
        .logged()
    }

    pub(crate) fn logged(self) -> Self {
        error!("event=dao_error module=dao status=error kind={} error={self}", self.kind());
        self
    }

    /// Stable short name of the error class, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store { .. } => "store",
            Self::Factory { .. } => "factory",
            Self::IdentityAssigned { .. } => "identity_assigned",
            Self::MissingIdentity { .. } => "missing_identity",
            Self::NonUniqueResult { .. } => "non_unique_result",
            Self::StaleState { .. } => "stale_state",
            Self::EntityNotFound { .. } => "entity_not_found",
            Self::Query { .. } => "query",
            Self::Geometry(_) => "geometry",
        }
    }
}

impl Display for DaoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store { operation, source } => write!(f, "{operation} failed: {source}"),
            Self::Factory { unit, message } => {
                write!(f, "failed to load persistence unit `{unit}`: {message}")
            }
            Self::IdentityAssigned { entity, id } => write!(
                f,
                "{entity}: identity {id} is store-generated and cannot be assigned on persist"
            ),
            Self::MissingIdentity { entity } => {
                write!(f, "{entity}: identity must be assigned before persist")
            }
            Self::NonUniqueResult { entity, count } => {
                write!(f, "{entity}: expected at most one result, found {count}")
            }
            Self::StaleState { entity, id } => {
                write!(f, "{entity} {id} is not managed by the current session")
            }
            Self::EntityNotFound { entity, id } => write!(f, "{entity} {id} not found"),
            Self::Query { message } => write!(f, "invalid query: {message}"),
            Self::Geometry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DaoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store { source, .. } => Some(source),
            Self::Geometry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GeometryError> for DaoError {
    fn from(value: GeometryError) -> Self {
        Self::Geometry(value)
    }
}
