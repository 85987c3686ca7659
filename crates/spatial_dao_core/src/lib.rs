//! Generic spatial data access over SQLite.
//! Entities, validated geometries and criteria queries share one session
//! per thread and persistence unit.

pub mod config;
pub mod criteria;
pub mod dao;
pub mod db;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod session;

pub use config::{
    load_persistence_units, persistence_unit, register_persistence_unit, PersistenceUnit,
    StoreLocation,
};
pub use criteria::{
    restrictions, spatial, Comparison, CriteriaOptions, CriteriaQuery, Criterion, Direction,
    Order, Projection, SpatialRelation, SqlStatement,
};
pub use dao::generic_dao::{Dao, GenericSpatialDao};
pub use entity::{Entity, EntityId, EntityMeta, IdStrategy};
pub use error::{DaoError, DaoResult};
pub use geometry::{Geometry, GeometryError, GeometryKind, GeometryResult, Srid};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use session::{close_factories, Session, SessionFactory, TransactionState};

/// Returns the crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
