//! Table descriptors shared read-only by every reader scanning a table.

use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::value::{Row, Value};

/// Column layout of a scanned table.
///
/// Readers assume `columns` starts with the primary-key columns in key order;
/// [`TableDescriptor::reorder_columns_primary_key_first`] establishes that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub primary_key_columns: Vec<String>,
}

impl TableDescriptor {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        primary_key_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key_columns,
        }
    }

    /// Move the primary-key columns to the front of `columns`, in key order.
    /// The relative order of the remaining columns is kept.
    pub fn reorder_columns_primary_key_first(&mut self) {
        let rest: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !self.primary_key_columns.contains(c))
            .cloned()
            .collect();
        let mut columns = self.primary_key_columns.clone();
        columns.extend(rest);
        self.columns = columns;
    }

    /// Check the invariants readers rely on.
    pub fn validate(&self) -> Result<(), TableError> {
        if self.name.is_empty() {
            return Err(TableError::EmptyName);
        }
        if self.columns.is_empty() {
            return Err(TableError::NoColumns(self.name.clone()));
        }
        for (i, pk) in self.primary_key_columns.iter().enumerate() {
            if !self.columns.contains(pk) {
                return Err(TableError::UnknownPrimaryKeyColumn {
                    table: self.name.clone(),
                    column: pk.clone(),
                });
            }
            if self.columns.get(i) != Some(pk) {
                return Err(TableError::PrimaryKeyNotFirst {
                    table: self.name.clone(),
                    column: pk.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key_columns.is_empty()
    }

    /// Project a row onto its primary-key values.
    ///
    /// Relies on the primary-key-first column order, so this is a prefix slice.
    pub fn primary_key_values<'a>(&self, row: &'a [Value]) -> &'a [Value] {
        let n = self.primary_key_columns.len().min(row.len());
        &row[..n]
    }

    /// The primary-key prefix of `row` as an owned row.
    pub fn primary_key_row(&self, row: &[Value]) -> Row {
        self.primary_key_values(row).to_vec()
    }
}
