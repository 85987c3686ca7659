//! Validated, SRID-tagged geometry values.
//!
//! # Responsibility
//! - Define the single geometry value type that crosses the DAO boundary.
//! - Build, validate and transform geometries (see [`builder`], [`transform`]).
//! - Encode geometries for the store as EWKT text (`SRID=<n>;<wkt>`).
//!
//! # Invariants
//! - A [`Geometry`] handed out by this module is non-empty and valid.
//! - Geometry values are immutable; transformations return new values.
//! - Decoding from the store goes through the same validity gate as
//!   construction.

pub mod builder;
mod error;
pub mod random;
pub mod transform;

pub use builder::{
    check_geometry, check_srids, create_coordinate, create_geometry, create_geometry_collection,
    create_line_string, create_multi_line_string, create_multi_point, create_multi_polygon,
    create_point, create_polygon, geometry_collection, line_string, multi_line_string,
    multi_point, multi_polygon, point, point_from_coord,
};
pub use error::{GeometryError, GeometryResult};
pub use random::{generate_long_lat_point, generate_long_lat_points, random_point};
pub use transform::{change_scale, change_scale_centroid_based, round_geometry};

use geo::CoordsIter;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use std::fmt::{Display, Formatter};
use wkt::ToWkt;

/// Spatial reference identifier. `0` means "not set".
pub type Srid = i32;

const EWKT_SRID_PREFIX: &str = "SRID=";

/// Type tag of a [`Geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::MultiPoint => "MultiPoint",
            Self::LineString => "LineString",
            Self::MultiLineString => "MultiLineString",
            Self::Polygon => "Polygon",
            Self::MultiPolygon => "MultiPolygon",
            Self::GeometryCollection => "GeometryCollection",
        }
    }

    fn of(shape: &geo::Geometry<f64>) -> Self {
        match shape {
            geo::Geometry::Point(_) => Self::Point,
            geo::Geometry::MultiPoint(_) => Self::MultiPoint,
            geo::Geometry::Line(_) | geo::Geometry::LineString(_) => Self::LineString,
            geo::Geometry::MultiLineString(_) => Self::MultiLineString,
            geo::Geometry::Polygon(_) | geo::Geometry::Rect(_) | geo::Geometry::Triangle(_) => {
                Self::Polygon
            }
            geo::Geometry::MultiPolygon(_) => Self::MultiPolygon,
            geo::Geometry::GeometryCollection(_) => Self::GeometryCollection,
        }
    }
}

impl Display for GeometryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A planar geometry plus the SRID it is expressed in.
///
/// Only the builder functions in this module create values of this type, so
/// holding a `Geometry` means it already passed [`check_geometry`].
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    shape: geo::Geometry<f64>,
    srid: Srid,
}

impl Geometry {
    /// Wraps a shape without validating it. Callers must run the validity gate.
    pub(crate) fn from_parts(shape: geo::Geometry<f64>, srid: Srid) -> Self {
        Self { shape, srid }
    }

    pub fn kind(&self) -> GeometryKind {
        GeometryKind::of(&self.shape)
    }

    pub fn srid(&self) -> Srid {
        self.srid
    }

    /// Borrows the underlying `geo` shape for read-only algorithms.
    pub fn shape(&self) -> &geo::Geometry<f64> {
        &self.shape
    }

    pub fn into_shape(self) -> geo::Geometry<f64> {
        self.shape
    }

    /// Returns every coordinate as an `(x, y)` pair in storage order.
    pub fn coords(&self) -> Vec<(f64, f64)> {
        self.shape.coords_iter().map(|coord| coord.x_y()).collect()
    }

    pub fn num_coords(&self) -> usize {
        self.shape.coords_count()
    }

    /// Returns the `(x, y)` of a point geometry, `None` for other kinds.
    pub fn as_xy(&self) -> Option<(f64, f64)> {
        match &self.shape {
            geo::Geometry::Point(point) => Some(point.x_y()),
            _ => None,
        }
    }

    pub fn to_wkt(&self) -> String {
        self.shape.wkt_string()
    }

    /// Encodes the geometry as `SRID=<n>;<wkt>`.
    pub fn to_ewkt(&self) -> String {
        format!("{EWKT_SRID_PREFIX}{};{}", self.srid, self.to_wkt())
    }

    /// Decodes `SRID=<n>;<wkt>` (or bare WKT, which yields SRID 0) and runs
    /// the validity gate.
    pub fn from_ewkt(text: &str) -> GeometryResult<Self> {
        let (srid, wkt) = split_ewkt(text)?;
        create_geometry(wkt, srid)
    }
}

impl Display for Geometry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_ewkt())
    }
}

impl ToSql for Geometry {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::Text(self.to_ewkt())))
    }
}

impl FromSql for Geometry {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::from_ewkt(text).map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

impl From<&Geometry> for Value {
    fn from(value: &Geometry) -> Self {
        Value::Text(value.to_ewkt())
    }
}

impl From<Geometry> for Value {
    fn from(value: Geometry) -> Self {
        Value::from(&value)
    }
}

pub(crate) fn split_ewkt(text: &str) -> GeometryResult<(Srid, &str)> {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix(EWKT_SRID_PREFIX) else {
        return Ok((0, trimmed));
    };
    let (srid_text, wkt) = rest.split_once(';').ok_or_else(|| GeometryError::Parse {
        input: text.to_string(),
        diagnostic: "missing `;` after SRID".to_string(),
    })?;
    let srid = srid_text
        .trim()
        .parse::<Srid>()
        .map_err(|err| GeometryError::Parse {
            input: text.to_string(),
            diagnostic: format!("invalid SRID `{srid_text}`: {err}"),
        })?;
    Ok((srid, wkt.trim()))
}

#[cfg(test)]
mod tests {
    use super::{create_geometry, split_ewkt, Geometry, GeometryError, GeometryKind};

    #[test]
    fn ewkt_roundtrip_keeps_srid_and_shape() {
        let polygon = create_geometry("POLYGON((0 0, 0 1, 1 1, 1 0, 0 0))", 3857).unwrap();
        let decoded = Geometry::from_ewkt(&polygon.to_ewkt()).unwrap();
        assert_eq!(decoded, polygon);
        assert_eq!(decoded.kind(), GeometryKind::Polygon);
    }

    #[test]
    fn bare_wkt_decodes_with_zero_srid() {
        let (srid, wkt) = split_ewkt("POINT(1 2)").unwrap();
        assert_eq!(srid, 0);
        assert_eq!(wkt, "POINT(1 2)");
    }

    #[test]
    fn malformed_srid_prefix_is_a_parse_error() {
        let err = split_ewkt("SRID=abc;POINT(1 2)").unwrap_err();
        assert!(matches!(err, GeometryError::Parse { .. }));

        let err = split_ewkt("SRID=4326 POINT(1 2)").unwrap_err();
        assert!(matches!(err, GeometryError::Parse { .. }));
    }

    #[test]
    fn as_xy_only_answers_for_points() {
        let point = create_geometry("POINT(3 4)", 4326).unwrap();
        assert_eq!(point.as_xy(), Some((3.0, 4.0)));

        let line = create_geometry("LINESTRING(0 0, 1 1)", 4326).unwrap();
        assert_eq!(line.as_xy(), None);
        assert_eq!(line.coords(), vec![(0.0, 0.0), (1.0, 1.0)]);
    }
}
