//! Random point generators for fixtures and tests.

use super::{point, Geometry, GeometryResult, Srid};
use log::debug;
use rand::Rng;

const MIN_LONGITUDE: f64 = -180.0;
const MAX_LONGITUDE: f64 = 180.0;
const MIN_LATITUDE: f64 = -90.0;
const MAX_LATITUDE: f64 = 90.0;

/// Returns a point uniformly distributed over `[-180, 180] x [-90, 90]`.
pub fn generate_long_lat_point(srid: Srid) -> GeometryResult<Geometry> {
    debug!("event=geometry_random module=geometry status=start count=1 srid={srid}");
    random_point(MIN_LONGITUDE, MAX_LONGITUDE, MIN_LATITUDE, MAX_LATITUDE, srid)
}

pub fn generate_long_lat_points(count: usize, srid: Srid) -> GeometryResult<Vec<Geometry>> {
    debug!("event=geometry_random module=geometry status=start count={count} srid={srid}");
    (0..count)
        .map(|_| random_point(MIN_LONGITUDE, MAX_LONGITUDE, MIN_LATITUDE, MAX_LATITUDE, srid))
        .collect()
}

/// Returns a point uniformly distributed over the given box. Bounds may be
/// passed in either order.
pub fn random_point(
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
    srid: Srid,
) -> GeometryResult<Geometry> {
    let mut rng = rand::thread_rng();
    let x = rng.gen_range(min_x.min(max_x)..=min_x.max(max_x));
    let y = rng.gen_range(min_y.min(max_y)..=min_y.max(max_y));
    point(x, y, srid)
}
