//! Geometry construction and validation errors.

use super::{GeometryKind, Srid};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type GeometryResult<T> = Result<T, GeometryError>;

/// Failure raised by any geometry construction, validation or transformation.
///
/// Every variant keeps the offending input (usually as WKT text) so callers
/// can report it without holding on to the rejected value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// Input text could not be parsed as WKT/EWKT.
    Parse { input: String, diagnostic: String },
    /// Geometry has no coordinates.
    Empty { geometry: String },
    /// Geometry fails planar validity rules.
    Invalid { geometry: String, diagnostic: String },
    /// Geometry parsed fine but is not of the requested kind.
    UnexpectedKind {
        expected: GeometryKind,
        found: GeometryKind,
        geometry: String,
    },
    /// Aggregate construction was given no sub-geometries.
    NoGeometries,
    /// Aggregate construction was given a sub-geometry with SRID 0.
    MissingSrid { geometry: String },
    /// Aggregate construction was given sub-geometries with different SRIDs.
    SridMismatch { expected: Srid, found: Srid },
}

impl Display for GeometryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse { input, diagnostic } => {
                write!(f, "cannot parse geometry `{input}`: {diagnostic}")
            }
            Self::Empty { geometry } => write!(f, "invalid geometry: `{geometry}` is empty"),
            Self::Invalid {
                geometry,
                diagnostic,
            } => write!(f, "invalid geometry: `{geometry}`: {diagnostic}"),
            Self::UnexpectedKind {
                expected,
                found,
                geometry,
            } => write!(f, "expected {expected} geometry, found {found} `{geometry}`"),
            Self::NoGeometries => write!(f, "no geometries passed"),
            Self::MissingSrid { geometry } => write!(f, "missing SRID in geometry `{geometry}`"),
            Self::SridMismatch { expected, found } => {
                write!(f, "different SRID found in geometry: {found} (expected {expected})")
            }
        }
    }
}

impl Error for GeometryError {}
