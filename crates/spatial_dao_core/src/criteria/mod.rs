//! Criteria query composition.
//!
//! # Responsibility
//! - Describe filters, projections, ordering and pagination for one entity
//!   type as plain values.
//! - Compose them into one parameterized SQL statement (see [`CriteriaQuery`]).
//!
//! # Invariants
//! - Conditions are ANDed in caller order; nothing is reordered or merged.
//! - Spatial conditions pass their geometry through as a bound parameter; the
//!   store evaluates the relation.
//! - Pagination is zero-indexed: `first_result` is the number of rows skipped.

mod query;

pub use query::{CriteriaQuery, SqlStatement};

use crate::geometry::Geometry;
use rusqlite::types::Value;

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Spatial relations evaluated natively by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialRelation {
    Within,
    Contains,
    Intersects,
    Disjoint,
    Equals,
}

impl SpatialRelation {
    /// Name of the SQL function evaluating the relation.
    pub fn sql_function(self) -> &'static str {
        match self {
            Self::Within => "ST_Within",
            Self::Contains => "ST_Contains",
            Self::Intersects => "ST_Intersects",
            Self::Disjoint => "ST_Disjoint",
            Self::Equals => "ST_Equals",
        }
    }
}

/// One filter condition over an entity's attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Compare {
        attribute: String,
        op: Comparison,
        value: Value,
    },
    Like {
        attribute: String,
        pattern: String,
    },
    IsNull {
        attribute: String,
    },
    IsNotNull {
        attribute: String,
    },
    In {
        attribute: String,
        values: Vec<Value>,
    },
    Between {
        attribute: String,
        low: Value,
        high: Value,
    },
    And(Vec<Criterion>),
    Or(Vec<Criterion>),
    Not(Box<Criterion>),
    /// `attribute <relation> geometry`, e.g. "location within area".
    Spatial {
        relation: SpatialRelation,
        attribute: String,
        geometry: Geometry,
    },
    DWithin {
        attribute: String,
        geometry: Geometry,
        distance: f64,
    },
    /// Raw SQL condition with positional `?` parameters. Not checked.
    Sql {
        fragment: String,
        params: Vec<Value>,
    },
}

/// Constructors for attribute restrictions.
pub mod restrictions {
    use super::{Comparison, Criterion};
    use rusqlite::types::Value;

    fn compare(attribute: &str, op: Comparison, value: impl Into<Value>) -> Criterion {
        Criterion::Compare {
            attribute: attribute.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: &str, value: impl Into<Value>) -> Criterion {
        compare(attribute, Comparison::Eq, value)
    }

    pub fn ne(attribute: &str, value: impl Into<Value>) -> Criterion {
        compare(attribute, Comparison::Ne, value)
    }

    pub fn lt(attribute: &str, value: impl Into<Value>) -> Criterion {
        compare(attribute, Comparison::Lt, value)
    }

    pub fn le(attribute: &str, value: impl Into<Value>) -> Criterion {
        compare(attribute, Comparison::Le, value)
    }

    pub fn gt(attribute: &str, value: impl Into<Value>) -> Criterion {
        compare(attribute, Comparison::Gt, value)
    }

    pub fn ge(attribute: &str, value: impl Into<Value>) -> Criterion {
        compare(attribute, Comparison::Ge, value)
    }

    /// SQL `LIKE`; `%` and `_` are the wildcards.
    pub fn like(attribute: &str, pattern: impl Into<String>) -> Criterion {
        Criterion::Like {
            attribute: attribute.to_string(),
            pattern: pattern.into(),
        }
    }

    pub fn is_null(attribute: &str) -> Criterion {
        Criterion::IsNull {
            attribute: attribute.to_string(),
        }
    }

    pub fn is_not_null(attribute: &str) -> Criterion {
        Criterion::IsNotNull {
            attribute: attribute.to_string(),
        }
    }

    /// Matches nothing when `values` is empty.
    pub fn in_values<V: Into<Value>>(
        attribute: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Criterion {
        Criterion::In {
            attribute: attribute.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Inclusive on both ends.
    pub fn between(attribute: &str, low: impl Into<Value>, high: impl Into<Value>) -> Criterion {
        Criterion::Between {
            attribute: attribute.to_string(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn and(criteria: impl IntoIterator<Item = Criterion>) -> Criterion {
        Criterion::And(criteria.into_iter().collect())
    }

    pub fn or(criteria: impl IntoIterator<Item = Criterion>) -> Criterion {
        Criterion::Or(criteria.into_iter().collect())
    }

    pub fn not(criterion: Criterion) -> Criterion {
        Criterion::Not(Box::new(criterion))
    }

    pub fn sql(fragment: impl Into<String>, params: Vec<Value>) -> Criterion {
        Criterion::Sql {
            fragment: fragment.into(),
            params,
        }
    }
}

/// Constructors for spatial restrictions.
pub mod spatial {
    use super::{Criterion, SpatialRelation};
    use crate::geometry::Geometry;

    fn relation(relation: SpatialRelation, attribute: &str, geometry: &Geometry) -> Criterion {
        Criterion::Spatial {
            relation,
            attribute: attribute.to_string(),
            geometry: geometry.clone(),
        }
    }

    pub fn within(attribute: &str, geometry: &Geometry) -> Criterion {
        relation(SpatialRelation::Within, attribute, geometry)
    }

    pub fn contains(attribute: &str, geometry: &Geometry) -> Criterion {
        relation(SpatialRelation::Contains, attribute, geometry)
    }

    pub fn intersects(attribute: &str, geometry: &Geometry) -> Criterion {
        relation(SpatialRelation::Intersects, attribute, geometry)
    }

    pub fn disjoint(attribute: &str, geometry: &Geometry) -> Criterion {
        relation(SpatialRelation::Disjoint, attribute, geometry)
    }

    pub fn spatial_eq(attribute: &str, geometry: &Geometry) -> Criterion {
        relation(SpatialRelation::Equals, attribute, geometry)
    }

    /// Planar distance in the geometry's own units.
    pub fn dwithin(attribute: &str, geometry: &Geometry, distance: f64) -> Criterion {
        Criterion::DWithin {
            attribute: attribute.to_string(),
            geometry: geometry.clone(),
            distance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One ordering clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub attribute: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(attribute: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(attribute: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
            direction: Direction::Desc,
        }
    }
}

/// Pagination and ordering for list queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriteriaOptions {
    /// Rows skipped before the first returned row.
    pub first_result: usize,
    /// `None` means unbounded. `Some(0)` is rejected.
    pub max_results: Option<usize>,
    /// Applied in order; identity ascending always breaks remaining ties.
    pub orders: Vec<Order>,
}

impl CriteriaOptions {
    pub fn page(first_result: usize, max_results: usize) -> Self {
        Self {
            first_result,
            max_results: Some(max_results),
            orders: Vec::new(),
        }
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }
}

/// Column selection for tuple queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Columns(Vec<String>),
    Distinct(Vec<String>),
}

impl Projection {
    pub fn columns(columns: &[&str]) -> Self {
        Self::Columns(columns.iter().map(|column| column.to_string()).collect())
    }

    pub fn distinct(columns: &[&str]) -> Self {
        Self::Distinct(columns.iter().map(|column| column.to_string()).collect())
    }

    pub(crate) fn attributes(&self) -> &[String] {
        match self {
            Self::Columns(columns) | Self::Distinct(columns) => columns,
        }
    }

    pub(crate) fn is_distinct(&self) -> bool {
        matches!(self, Self::Distinct(_))
    }
}
