//! Geometry construction from WKT, coordinates and sub-geometries.
//!
//! # Responsibility
//! - Be the only path by which geometry values are created.
//! - Stamp the SRID before validating, so diagnostics carry it.
//!
//! # Invariants
//! - Every constructor runs the validity gate ([`check_geometry`]) exactly once
//!   before returning.
//! - Aggregate constructors run [`check_srids`] before building anything.

use super::{Geometry, GeometryError, GeometryKind, GeometryResult, Srid};
use geo::{Area, Coord, CoordsIter, Validation};
use log::{debug, error};
use wkt::TryFromWkt;

/// Parses WKT, stamps `srid` and validates the result.
pub fn create_geometry(wkt: &str, srid: Srid) -> GeometryResult<Geometry> {
    debug!("event=geometry_build module=geometry status=start source=wkt srid={srid}");
    let shape = geo::Geometry::<f64>::try_from_wkt_str(wkt).map_err(|err| {
        fail(GeometryError::Parse {
            input: wkt.to_string(),
            diagnostic: err.to_string(),
        })
    })?;
    finish_parsed(Geometry::from_parts(shape, srid), wkt)
}

pub fn create_point(wkt: &str, srid: Srid) -> GeometryResult<Geometry> {
    expect_kind(create_geometry(wkt, srid)?, GeometryKind::Point)
}

pub fn create_line_string(wkt: &str, srid: Srid) -> GeometryResult<Geometry> {
    expect_kind(create_geometry(wkt, srid)?, GeometryKind::LineString)
}

pub fn create_polygon(wkt: &str, srid: Srid) -> GeometryResult<Geometry> {
    expect_kind(create_geometry(wkt, srid)?, GeometryKind::Polygon)
}

pub fn create_multi_point(wkt: &str, srid: Srid) -> GeometryResult<Geometry> {
    expect_kind(create_geometry(wkt, srid)?, GeometryKind::MultiPoint)
}

pub fn create_multi_line_string(wkt: &str, srid: Srid) -> GeometryResult<Geometry> {
    expect_kind(create_geometry(wkt, srid)?, GeometryKind::MultiLineString)
}

pub fn create_multi_polygon(wkt: &str, srid: Srid) -> GeometryResult<Geometry> {
    expect_kind(create_geometry(wkt, srid)?, GeometryKind::MultiPolygon)
}

pub fn create_geometry_collection(wkt: &str, srid: Srid) -> GeometryResult<Geometry> {
    expect_kind(create_geometry(wkt, srid)?, GeometryKind::GeometryCollection)
}

pub fn create_coordinate(x: f64, y: f64) -> Coord<f64> {
    Coord { x, y }
}

pub fn point(x: f64, y: f64, srid: Srid) -> GeometryResult<Geometry> {
    point_from_coord(create_coordinate(x, y), srid)
}

pub fn point_from_coord(coord: Coord<f64>, srid: Srid) -> GeometryResult<Geometry> {
    debug!(
        "event=geometry_build module=geometry status=start source=coord x={} y={} srid={srid}",
        coord.x, coord.y
    );
    finish(Geometry::from_parts(geo::Point::from(coord).into(), srid))
}

/// Builds a line string through `coords` in order.
pub fn line_string(coords: &[Coord<f64>], srid: Srid) -> GeometryResult<Geometry> {
    debug!(
        "event=geometry_build module=geometry status=start source=coords count={} srid={srid}",
        coords.len()
    );
    let line = geo::LineString::new(coords.to_vec());
    finish(Geometry::from_parts(line.into(), srid))
}

/// Aggregates point geometries into a multi-point with their shared SRID.
pub fn multi_point(points: &[Geometry]) -> GeometryResult<Geometry> {
    let srid = check_srids(points)?;
    let members = points
        .iter()
        .map(|geometry| match geometry.shape() {
            geo::Geometry::Point(point) => Ok(*point),
            _ => Err(unexpected(GeometryKind::Point, geometry)),
        })
        .collect::<GeometryResult<Vec<_>>>()?;
    finish(Geometry::from_parts(geo::MultiPoint(members).into(), srid))
}

/// Aggregates line strings into a multi-line with their shared SRID.
pub fn multi_line_string(lines: &[Geometry]) -> GeometryResult<Geometry> {
    let srid = check_srids(lines)?;
    let members = lines
        .iter()
        .map(|geometry| match geometry.shape() {
            geo::Geometry::LineString(line) => Ok(line.clone()),
            geo::Geometry::Line(line) => Ok(geo::LineString::from(*line)),
            _ => Err(unexpected(GeometryKind::LineString, geometry)),
        })
        .collect::<GeometryResult<Vec<_>>>()?;
    finish(Geometry::from_parts(
        geo::MultiLineString(members).into(),
        srid,
    ))
}

/// Aggregates polygons into a multi-polygon with their shared SRID.
pub fn multi_polygon(polygons: &[Geometry]) -> GeometryResult<Geometry> {
    let srid = check_srids(polygons)?;
    let members = polygons
        .iter()
        .map(|geometry| match geometry.shape() {
            geo::Geometry::Polygon(polygon) => Ok(polygon.clone()),
            _ => Err(unexpected(GeometryKind::Polygon, geometry)),
        })
        .collect::<GeometryResult<Vec<_>>>()?;
    finish(Geometry::from_parts(geo::MultiPolygon(members).into(), srid))
}

/// Aggregates geometries of any kind into a collection with their shared SRID.
pub fn geometry_collection(geometries: &[Geometry]) -> GeometryResult<Geometry> {
    let srid = check_srids(geometries)?;
    let members = geometries
        .iter()
        .map(|geometry| geometry.shape().clone())
        .collect::<Vec<_>>();
    finish(Geometry::from_parts(
        geo::Geometry::GeometryCollection(geo::GeometryCollection::new_from(members)),
        srid,
    ))
}

/// The single validity gate: empty or topologically invalid geometries fail.
///
/// Absent geometries cannot be expressed with `&Geometry`; optional geometry
/// attributes are checked by their owner before reaching this gate.
pub fn check_geometry(geometry: &Geometry) -> GeometryResult<()> {
    gate(geometry, None)
}

// `input` is the caller's text, reported instead of re-rendering the shape.
fn gate(geometry: &Geometry, input: Option<&str>) -> GeometryResult<()> {
    let shape = geometry.shape();
    if shape.coords_count() == 0 {
        return Err(fail(GeometryError::Empty {
            geometry: describe(geometry, input),
        }));
    }
    if let Some(diagnostic) = empty_component(shape) {
        return Err(fail(GeometryError::Invalid {
            geometry: describe(geometry, input),
            diagnostic: diagnostic.to_string(),
        }));
    }
    shape.check_validation().map_err(|err| {
        fail(GeometryError::Invalid {
            geometry: describe(geometry, input),
            diagnostic: err.to_string(),
        })
    })?;
    if let Some(diagnostic) = collapsed_component(shape) {
        return Err(fail(GeometryError::Invalid {
            geometry: describe(geometry, input),
            diagnostic: diagnostic.to_string(),
        }));
    }
    Ok(())
}

// The WKT writer cannot render empty components; those fall back to Debug.
fn describe(geometry: &Geometry, input: Option<&str>) -> String {
    match input {
        Some(text) => text.to_string(),
        None if geometry.num_coords() == 0 || empty_component(geometry.shape()).is_some() => {
            format!("SRID={};{:?}", geometry.srid(), geometry.shape())
        }
        None => geometry.to_ewkt(),
    }
}

// Empty members nested inside a non-empty shape.
fn empty_component(shape: &geo::Geometry<f64>) -> Option<&'static str> {
    match shape {
        geo::Geometry::LineString(line) if line.0.is_empty() => Some("line string is empty"),
        geo::Geometry::Polygon(polygon) if has_empty_ring(polygon) => {
            Some("polygon has an empty ring")
        }
        geo::Geometry::MultiPoint(points) if points.0.is_empty() => Some("multi point is empty"),
        geo::Geometry::MultiLineString(lines)
            if lines.0.is_empty() || lines.iter().any(|line| line.0.is_empty()) =>
        {
            Some("multi line string has an empty member")
        }
        geo::Geometry::MultiPolygon(polygons)
            if polygons.0.is_empty() || polygons.iter().any(has_empty_ring) =>
        {
            Some("multi polygon has an empty member")
        }
        geo::Geometry::GeometryCollection(members) if members.0.is_empty() => {
            Some("geometry collection is empty")
        }
        geo::Geometry::GeometryCollection(members) => members.iter().find_map(empty_component),
        _ => None,
    }
}

fn has_empty_ring(polygon: &geo::Polygon<f64>) -> bool {
    polygon.exterior().0.is_empty() || polygon.interiors().iter().any(|ring| ring.0.is_empty())
}

// Collapsed components: areal parts with zero area, linear parts with a
// single distinct vertex.
fn collapsed_component(shape: &geo::Geometry<f64>) -> Option<&'static str> {
    match shape {
        geo::Geometry::Polygon(polygon) if polygon.unsigned_area() == 0.0 => {
            Some("polygon has zero area")
        }
        geo::Geometry::MultiPolygon(polygons)
            if polygons.iter().any(|polygon| polygon.unsigned_area() == 0.0) =>
        {
            Some("polygon has zero area")
        }
        geo::Geometry::LineString(line) if !has_distinct_vertices(line) => {
            Some("line string has fewer than 2 distinct points")
        }
        geo::Geometry::MultiLineString(lines)
            if lines.iter().any(|line| !has_distinct_vertices(line)) =>
        {
            Some("line string has fewer than 2 distinct points")
        }
        geo::Geometry::GeometryCollection(members) => {
            members.iter().find_map(collapsed_component)
        }
        _ => None,
    }
}

fn has_distinct_vertices(line: &geo::LineString<f64>) -> bool {
    line.0
        .first()
        .is_some_and(|first| line.0.iter().any(|coord| coord != first))
}

/// Returns the SRID shared by all `geometries`.
///
/// # Errors
/// - `NoGeometries` for an empty slice.
/// - `MissingSrid` when the first geometry carries SRID 0.
/// - `SridMismatch` on the first geometry with a different SRID.
pub fn check_srids(geometries: &[Geometry]) -> GeometryResult<Srid> {
    let Some(first) = geometries.first() else {
        return Err(fail(GeometryError::NoGeometries));
    };
    let srid = first.srid();
    if srid == 0 {
        return Err(fail(GeometryError::MissingSrid {
            geometry: first.to_wkt(),
        }));
    }
    if let Some(other) = geometries.iter().find(|geometry| geometry.srid() != srid) {
        return Err(fail(GeometryError::SridMismatch {
            expected: srid,
            found: other.srid(),
        }));
    }
    Ok(srid)
}

pub(crate) fn finish(geometry: Geometry) -> GeometryResult<Geometry> {
    finish_checked(geometry, None)
}

fn finish_parsed(geometry: Geometry, wkt: &str) -> GeometryResult<Geometry> {
    finish_checked(geometry, Some(wkt))
}

fn finish_checked(geometry: Geometry, input: Option<&str>) -> GeometryResult<Geometry> {
    gate(&geometry, input)?;
    debug!(
        "event=geometry_build module=geometry status=ok kind={} srid={} coords={}",
        geometry.kind(),
        geometry.srid(),
        geometry.num_coords()
    );
    Ok(geometry)
}

fn expect_kind(geometry: Geometry, expected: GeometryKind) -> GeometryResult<Geometry> {
    if geometry.kind() == expected {
        return Ok(geometry);
    }
    Err(unexpected(expected, &geometry))
}

fn unexpected(expected: GeometryKind, found: &Geometry) -> GeometryError {
    fail(GeometryError::UnexpectedKind {
        expected,
        found: found.kind(),
        geometry: found.to_ewkt(),
    })
}

fn fail(err: GeometryError) -> GeometryError {
    error!("event=geometry_check module=geometry status=error error={err}");
    err
}
