//! Typed errors for the core crate.

use thiserror::Error;

/// A table descriptor that readers cannot scan in key order.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("table name cannot be empty")]
    EmptyName,

    #[error("table '{0}' has no columns")]
    NoColumns(String),

    #[error("primary key column '{column}' is not a column of table '{table}'")]
    UnknownPrimaryKeyColumn { table: String, column: String },

    #[error("primary key column '{column}' of table '{table}' is not ordered first; reorder columns primary key first")]
    PrimaryKeyNotFirst { table: String, column: String },

    #[error("table '{0}' has no primary key; only full unordered scans are possible")]
    MissingPrimaryKey(String),

    #[error("resume row for table '{table}' has {actual} values, primary key needs {expected}")]
    ResumeRowTooShort {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("tuple comparison needs at least one column and a value per column ({columns} columns, {values} values)")]
    TupleArity { columns: usize, values: usize },
}
