//! Scan query synthesis.
//!
//! Builds the ordered range scan a reader streams from a tablet. The first
//! query of a chunk is bounded by the chunk itself; a restarted query replaces
//! the lower bound with "strictly after the last delivered row" so the stream
//! resumes without duplicates or gaps.

use std::cmp::Ordering;

use crate::chunk::Chunk;
use crate::error::TableError;
use crate::table::TableDescriptor;
use crate::value::{Row, Value};

/// Lower bound of a scan over the primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerBound {
    Unbounded,
    /// First key column `>=` the value (chunk start).
    AtLeast(Value),
    /// Key tuple strictly greater than the resume row's key.
    After(Row),
}

/// The key range a [`ScanQuery`] selects, in a form that can be evaluated
/// without a SQL engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBounds {
    pub lower: LowerBound,
    /// Exclusive upper bound on the first key column.
    pub upper: Option<Value>,
}

impl ScanBounds {
    /// Whether a row with primary key `key` is selected by the scan.
    pub fn contains(&self, key: &[Value]) -> bool {
        let lower_ok = match &self.lower {
            LowerBound::Unbounded => true,
            LowerBound::AtLeast(start) => key.first().is_some_and(|k| k >= start),
            LowerBound::After(resume) => tuple_greater_than(key, resume),
        };
        let upper_ok = match &self.upper {
            None => true,
            Some(end) => key.first().is_some_and(|k| k < end),
        };
        lower_ok && upper_ok
    }
}

/// SQL text of a scan plus the bounds it encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanQuery {
    pub table: String,
    pub sql: String,
    pub bounds: ScanBounds,
}

impl ScanQuery {
    /// Build the scan over `chunk`, resuming after `last_row` when given.
    ///
    /// `last_row` may be a full row or just its primary-key prefix.
    pub fn generate(
        table: &TableDescriptor,
        chunk: &Chunk,
        last_row: Option<&[Value]>,
    ) -> Result<Self, TableError> {
        let pk = &table.primary_key_columns;
        let needs_key = last_row.is_some() || !chunk.is_full();
        if needs_key && pk.is_empty() {
            return Err(TableError::MissingPrimaryKey(table.name.clone()));
        }

        let mut sql = format!(
            "SELECT {} FROM {}",
            escape_all(&table.columns).join(", "),
            escape_id(&table.name)
        );

        let mut clauses = Vec::new();

        let lower = match last_row {
            None if chunk.start.is_null() => LowerBound::Unbounded,
            None => {
                clauses.push(format!(
                    "{} >= {}",
                    escape_id(&pk[0]),
                    chunk.start.to_sql_literal()
                ));
                LowerBound::AtLeast(chunk.start.clone())
            }
            // last_row < end always holds because every earlier query carried
            // the end bound, so the resumed range cannot be inverted.
            Some(row) => {
                if row.len() < pk.len() {
                    return Err(TableError::ResumeRowTooShort {
                        table: table.name.clone(),
                        expected: pk.len(),
                        actual: row.len(),
                    });
                }
                let key = table.primary_key_row(row);
                clauses.extend(greater_than_tuple_where_clause(pk, &key)?);
                LowerBound::After(key)
            }
        };

        let upper = if chunk.end.is_null() {
            None
        } else {
            clauses.push(format!(
                "{} < {}",
                escape_id(&pk[0]),
                chunk.end.to_sql_literal()
            ));
            Some(chunk.end.clone())
        };

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if !pk.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&escape_all(pk).join(", "));
        }

        Ok(Self {
            table: table.name.clone(),
            sql,
            bounds: ScanBounds { lower, upper },
        })
    }
}

/// Build the clauses for `(columns) > (row)`.
///
/// One column: `a > 1`. Several columns: `a >= 1 AND (a, b) > (1, 2)`. The
/// extra leading-column clause lets the planner use a range scan on the
/// primary key index instead of evaluating the row comparison over the whole
/// table. Extra values in `row` beyond `columns` are ignored.
pub fn greater_than_tuple_where_clause(
    columns: &[String],
    row: &[Value],
) -> Result<Vec<String>, TableError> {
    if columns.is_empty() || row.len() < columns.len() {
        return Err(TableError::TupleArity {
            columns: columns.len(),
            values: row.len(),
        });
    }
    let mut clauses = Vec::with_capacity(2);

    if columns.len() == 1 {
        clauses.push(format!(
            "{} > {}",
            escape_id(&columns[0]),
            row[0].to_sql_literal()
        ));
        return Ok(clauses);
    }

    clauses.push(format!(
        "{} >= {}",
        escape_id(&columns[0]),
        row[0].to_sql_literal()
    ));

    let values = row[..columns.len()]
        .iter()
        .map(Value::to_sql_literal)
        .collect::<Vec<_>>()
        .join(", ");
    clauses.push(format!(
        "({}) > ({})",
        escape_all(columns).join(", "),
        values
    ));

    Ok(clauses)
}

/// Row comparison `(a1, ..., an) > (b1, ..., bn)` over the columns of `b`:
/// true iff `a1 > b1`, or `a1 = b1` and the remainder compares greater.
pub fn tuple_greater_than(a: &[Value], b: &[Value]) -> bool {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }
    false
}

pub fn escape_id(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn escape_all(names: &[String]) -> Vec<String> {
    names.iter().map(|n| escape_id(n)).collect()
}
