//! Coordinate transformations over validated geometries.
//!
//! # Invariants
//! - The input geometry is never touched; each transform maps a copy.
//! - Results keep the input SRID and pass the validity gate again, so a
//!   transform that collapses or self-intersects the shape fails instead of
//!   returning an invalid value.

use super::builder::finish;
use super::{Geometry, GeometryError, GeometryResult};
use geo::{Centroid, Coord, MapCoords};
use log::{error, info, warn};

/// Scales every coordinate about the origin.
pub fn change_scale(geometry: &Geometry, factor: f64) -> GeometryResult<Geometry> {
    info!("event=geometry_transform module=geometry status=start op=change_scale factor={factor}");
    let scaled = geometry.shape().map_coords(move |coord| Coord {
        x: coord.x * factor,
        y: coord.y * factor,
    });
    finish(Geometry::from_parts(scaled, geometry.srid()))
}

/// Scales every coordinate about the geometry centroid.
pub fn change_scale_centroid_based(geometry: &Geometry, factor: f64) -> GeometryResult<Geometry> {
    info!(
        "event=geometry_transform module=geometry status=start op=change_scale_centroid factor={factor}"
    );
    let Some(centroid) = geometry.shape().centroid() else {
        let err = GeometryError::Empty {
            geometry: geometry.to_ewkt(),
        };
        error!("event=geometry_transform module=geometry status=error error={err}");
        return Err(err);
    };
    let (cx, cy) = centroid.x_y();
    let scaled = geometry.shape().map_coords(move |coord| Coord {
        x: (coord.x - cx) * factor + cx,
        y: (coord.y - cy) * factor + cy,
    });
    finish(Geometry::from_parts(scaled, geometry.srid()))
}

/// Rounds every coordinate component to at most `max_fraction_digits`
/// fractional digits.
///
/// Rounding goes through fixed-point decimal formatting, which does not
/// depend on locale and breaks exact ties to even. Few fraction digits can
/// collapse vertices and produce an invalid shape; that case fails.
pub fn round_geometry(geometry: &Geometry, max_fraction_digits: usize) -> GeometryResult<Geometry> {
    info!(
        "event=geometry_transform module=geometry status=start op=round digits={max_fraction_digits}"
    );
    if max_fraction_digits < 1 {
        warn!("event=geometry_transform module=geometry status=warn op=round message=max_fraction_digits_below_1");
    }
    let rounded = geometry
        .shape()
        .try_map_coords(move |coord| -> GeometryResult<Coord<f64>> {
            Ok(Coord {
                x: round_component(coord.x, max_fraction_digits)?,
                y: round_component(coord.y, max_fraction_digits)?,
            })
        })?;
    finish(Geometry::from_parts(rounded, geometry.srid()))
}

fn round_component(value: f64, digits: usize) -> GeometryResult<f64> {
    let formatted = format!("{value:.digits$}");
    formatted
        .parse::<f64>()
        .map_err(|err| GeometryError::Parse {
            input: formatted.clone(),
            diagnostic: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{create_geometry, create_polygon, point, GeometryKind};

    const SQUARE: &str = "POLYGON((1 1, 1 3, 3 3, 3 1, 1 1))";

    fn assert_close(actual: (f64, f64), expected: (f64, f64)) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-9 && (actual.1 - expected.1).abs() < 1e-9,
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn scale_by_one_is_identity() {
        let square = create_polygon(SQUARE, 4326).unwrap();
        let scaled = change_scale(&square, 1.0).unwrap();
        assert_eq!(scaled, square);
    }

    #[test]
    fn scale_about_origin_multiplies_coordinates() {
        let square = create_polygon(SQUARE, 4326).unwrap();
        let scaled = change_scale(&square, 2.0).unwrap();
        assert_eq!(scaled.coords()[0], (2.0, 2.0));
        assert_eq!(scaled.coords()[2], (6.0, 6.0));
        assert_eq!(scaled.srid(), 4326);
        // Input untouched.
        assert_eq!(square.coords()[2], (3.0, 3.0));
    }

    #[test]
    fn centroid_based_scale_keeps_centroid() {
        let square = create_polygon(SQUARE, 4326).unwrap();
        let scaled = change_scale_centroid_based(&square, 3.0).unwrap();
        assert_close(scaled.coords()[0], (-1.0, -1.0));
        assert_close(scaled.coords()[2], (5.0, 5.0));
        assert_close(scaled.shape().centroid().unwrap().x_y(), (2.0, 2.0));
    }

    #[test]
    fn scale_by_zero_collapses_polygon_and_fails() {
        let square = create_polygon(SQUARE, 4326).unwrap();
        assert!(change_scale(&square, 0.0).is_err());
        assert!(change_scale_centroid_based(&square, 0.0).is_err());
    }

    #[test]
    fn rounding_truncates_fraction_digits() {
        let geometry = point(1.23456, -9.87654, 4326).unwrap();
        let rounded = round_geometry(&geometry, 2).unwrap();
        assert_eq!(rounded.as_xy(), Some((1.23, -9.88)));
        assert_eq!(rounded.kind(), GeometryKind::Point);
    }

    #[test]
    fn rounding_is_idempotent() {
        let geometry = create_geometry(
            "LINESTRING(0.123456 10.987654, 45.000049 -12.3449999, 179.99999 89.5)",
            4326,
        )
        .unwrap();
        for digits in 1..6 {
            let once = round_geometry(&geometry, digits).unwrap();
            let twice = round_geometry(&once, digits).unwrap();
            assert_eq!(once, twice, "digits={digits}");
        }
    }

    #[test]
    fn rounding_that_collapses_a_polygon_fails() {
        let sliver = create_polygon("POLYGON((0 0, 0.001 0, 0.001 0.001, 0 0.001, 0 0))", 4326)
            .unwrap();
        assert!(round_geometry(&sliver, 1).is_err());
    }
}
