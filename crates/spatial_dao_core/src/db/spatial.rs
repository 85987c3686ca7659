//! Spatial SQL functions installed on every session connection.
//!
//! # Responsibility
//! - Give SQLite native spatial predicates over EWKT columns, so criteria can
//!   push spatial relations down to the store.
//!
//! # Invariants
//! - `NULL` in, `NULL` out.
//! - Arguments with different SRIDs fail the statement.
//! - Arguments are decoded through the geometry validity gate.

use crate::geometry::{Geometry, GeometryError};
use geo::{Distance, Euclidean, Relate};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::Connection;

type Relation = fn(&geo::relate::IntersectionMatrix) -> bool;

const RELATIONS: &[(&str, Relation)] = &[
    ("ST_Within", geo::relate::IntersectionMatrix::is_within),
    ("ST_Contains", geo::relate::IntersectionMatrix::is_contains),
    ("ST_Intersects", geo::relate::IntersectionMatrix::is_intersects),
    ("ST_Disjoint", geo::relate::IntersectionMatrix::is_disjoint),
    ("ST_Equals", geo::relate::IntersectionMatrix::is_equal_topo),
];

/// Registers `ST_Within`, `ST_Contains`, `ST_Intersects`, `ST_Disjoint`,
/// `ST_Equals` (2 args) and `ST_DWithin` (3 args).
pub fn register_spatial_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    for &(name, relation) in RELATIONS {
        conn.create_scalar_function(name, 2, flags, move |ctx| {
            let Some((left, right)) = geometry_pair(ctx)? else {
                return Ok(None);
            };
            Ok(Some(relation(&left.shape().relate(right.shape()))))
        })?;
    }
    conn.create_scalar_function("ST_DWithin", 3, flags, |ctx| {
        let Some((left, right)) = geometry_pair(ctx)? else {
            return Ok(None);
        };
        let Some(max_distance) = ctx.get::<Option<f64>>(2)? else {
            return Ok(None);
        };
        Ok(Some(
            Euclidean.distance(left.shape(), right.shape()) <= max_distance,
        ))
    })?;
    Ok(())
}

fn geometry_pair(ctx: &Context<'_>) -> rusqlite::Result<Option<(Geometry, Geometry)>> {
    let (Some(left), Some(right)) = (geometry_arg(ctx, 0)?, geometry_arg(ctx, 1)?) else {
        return Ok(None);
    };
    if left.srid() != right.srid() {
        return Err(user_error(GeometryError::SridMismatch {
            expected: left.srid(),
            found: right.srid(),
        }));
    }
    Ok(Some((left, right)))
}

fn geometry_arg(ctx: &Context<'_>, index: usize) -> rusqlite::Result<Option<Geometry>> {
    ctx.get::<Option<String>>(index)?
        .map(|text| Geometry::from_ewkt(&text).map_err(user_error))
        .transpose()
}

fn user_error(err: GeometryError) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(err))
}
