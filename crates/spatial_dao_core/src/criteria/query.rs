//! Criteria to SQL composition.

use super::{Criterion, CriteriaOptions, Projection};
use crate::entity::{Entity, EntityMeta};
use crate::error::{DaoError, DaoResult};
use rusqlite::types::Value;

/// A composed statement with positional `?` parameters in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Filters, projection and options for one entity table.
#[derive(Debug, Clone)]
pub struct CriteriaQuery {
    meta: EntityMeta,
    conditions: Vec<Criterion>,
    projection: Option<Projection>,
    options: CriteriaOptions,
}

impl CriteriaQuery {
    pub fn new(meta: EntityMeta) -> Self {
        Self {
            meta,
            conditions: Vec::new(),
            projection: None,
            options: CriteriaOptions::default(),
        }
    }

    pub fn for_entity<E: Entity>() -> Self {
        Self::new(EntityMeta::of::<E>())
    }

    pub fn add(mut self, criterion: Criterion) -> Self {
        self.conditions.push(criterion);
        self
    }

    pub fn add_all(mut self, criteria: impl IntoIterator<Item = Criterion>) -> Self {
        self.conditions.extend(criteria);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_options(mut self, options: CriteriaOptions) -> Self {
        self.options = options;
        self
    }

    /// `SELECT ... FROM ... [WHERE ...] ORDER BY ... [LIMIT ? [OFFSET ?]]`.
    ///
    /// # Errors
    /// - `DaoError::Query` for unknown attributes, an empty projection,
    ///   `max_results == Some(0)` or a negative/non-finite distance.
    pub fn select_statement(&self) -> DaoResult<SqlStatement> {
        if self.options.max_results == Some(0) {
            return Err(DaoError::query("max_results must be greater than zero"));
        }

        let select_list = match &self.projection {
            None => self.meta.select_list(),
            Some(projection) => {
                let columns = self.projected_columns(projection)?;
                let distinct = if projection.is_distinct() {
                    "DISTINCT "
                } else {
                    ""
                };
                format!("{distinct}{}", columns.join(", "))
            }
        };

        let mut sql = format!("SELECT {select_list} FROM {}", self.meta.table);
        let mut params = Vec::new();
        self.push_where(&mut sql, &mut params)?;
        self.push_order_by(&mut sql)?;
        self.push_pagination(&mut sql, &mut params);
        Ok(SqlStatement { sql, params })
    }

    /// `SELECT COUNT(*)` over the same filters; pagination and ordering do
    /// not apply.
    pub fn count_statement(&self) -> DaoResult<SqlStatement> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.meta.table);
        let mut params = Vec::new();
        self.push_where(&mut sql, &mut params)?;
        Ok(SqlStatement { sql, params })
    }

    fn column<'a>(&self, attribute: &'a str) -> DaoResult<&'a str> {
        if self.meta.has_attribute(attribute) {
            Ok(attribute)
        } else {
            Err(DaoError::query(format!(
                "unknown attribute `{attribute}` on `{}`",
                self.meta.table
            )))
        }
    }

    fn projected_columns<'a>(&self, projection: &'a Projection) -> DaoResult<Vec<&'a str>> {
        let attributes = projection.attributes();
        if attributes.is_empty() {
            return Err(DaoError::query("projection needs at least one attribute"));
        }
        attributes
            .iter()
            .map(|attribute| self.column(attribute))
            .collect()
    }

    fn push_where(&self, sql: &mut String, params: &mut Vec<Value>) -> DaoResult<()> {
        if self.conditions.is_empty() {
            return Ok(());
        }
        let clauses = self
            .conditions
            .iter()
            .map(|criterion| self.render(criterion, params))
            .collect::<DaoResult<Vec<_>>>()?;
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
        Ok(())
    }

    fn render(&self, criterion: &Criterion, params: &mut Vec<Value>) -> DaoResult<String> {
        let clause = match criterion {
            Criterion::Compare {
                attribute,
                op,
                value,
            } => {
                params.push(value.clone());
                format!("{} {} ?", self.column(attribute)?, op.as_sql())
            }
            Criterion::Like { attribute, pattern } => {
                params.push(Value::Text(pattern.clone()));
                format!("{} LIKE ?", self.column(attribute)?)
            }
            Criterion::IsNull { attribute } => format!("{} IS NULL", self.column(attribute)?),
            Criterion::IsNotNull { attribute } => {
                format!("{} IS NOT NULL", self.column(attribute)?)
            }
            Criterion::In { attribute, values } => {
                let column = self.column(attribute)?;
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                params.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(", ");
                format!("{column} IN ({placeholders})")
            }
            Criterion::Between {
                attribute,
                low,
                high,
            } => {
                params.push(low.clone());
                params.push(high.clone());
                format!("{} BETWEEN ? AND ?", self.column(attribute)?)
            }
            Criterion::And(criteria) => self.render_group(criteria, " AND ", "1 = 1", params)?,
            Criterion::Or(criteria) => self.render_group(criteria, " OR ", "1 = 0", params)?,
            Criterion::Not(inner) => format!("NOT ({})", self.render(inner, params)?),
            Criterion::Spatial {
                relation,
                attribute,
                geometry,
            } => {
                let column = self.column(attribute)?;
                params.push(Value::from(geometry));
                format!("{}({column}, ?)", relation.sql_function())
            }
            Criterion::DWithin {
                attribute,
                geometry,
                distance,
            } => {
                let column = self.column(attribute)?;
                if !distance.is_finite() || *distance < 0.0 {
                    return Err(DaoError::query(format!(
                        "distance must be a non-negative number, got {distance}"
                    )));
                }
                params.push(Value::from(geometry));
                params.push(Value::Real(*distance));
                format!("ST_DWithin({column}, ?, ?)")
            }
            Criterion::Sql { fragment, params: bound } => {
                params.extend(bound.iter().cloned());
                format!("({fragment})")
            }
        };
        Ok(clause)
    }

    fn render_group(
        &self,
        criteria: &[Criterion],
        separator: &str,
        when_empty: &str,
        params: &mut Vec<Value>,
    ) -> DaoResult<String> {
        if criteria.is_empty() {
            return Ok(when_empty.to_string());
        }
        let parts = criteria
            .iter()
            .map(|criterion| self.render(criterion, params))
            .collect::<DaoResult<Vec<_>>>()?;
        Ok(format!("({})", parts.join(separator)))
    }

    fn push_order_by(&self, sql: &mut String) -> DaoResult<()> {
        let mut terms = Vec::with_capacity(self.options.orders.len() + 1);
        let mut ordered = Vec::with_capacity(self.options.orders.len());
        for order in &self.options.orders {
            let column = self.column(&order.attribute)?;
            terms.push(format!("{column} {}", order.direction.as_sql()));
            ordered.push(column);
        }

        // Remaining ties: identity for entity rows, projected columns for tuples.
        let tiebreak = match &self.projection {
            None => vec![self.meta.id_column],
            Some(projection) => self.projected_columns(projection)?,
        };
        for column in tiebreak {
            if !ordered.contains(&column) {
                terms.push(format!("{column} ASC"));
            }
        }

        if !terms.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        Ok(())
    }

    fn push_pagination(&self, sql: &mut String, params: &mut Vec<Value>) {
        let offset = to_sql_integer(self.options.first_result);
        match self.options.max_results {
            Some(limit) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(to_sql_integer(limit)));
                if offset > 0 {
                    sql.push_str(" OFFSET ?");
                    params.push(Value::Integer(offset));
                }
            }
            None if offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(Value::Integer(offset));
            }
            None => {}
        }
    }
}

fn to_sql_integer(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
