//! shardscan core - values, key ranges and scan query synthesis
//!
//! This crate holds the pure building blocks of a resumable chunked scan:
//! ordered values, the `[start, end)` chunk a reader is assigned, the table
//! descriptor and the SQL synthesizer that resumes strictly after a row.

pub mod chunk;
pub mod error;
pub mod query;
pub mod table;
pub mod value;

pub use chunk::Chunk;
pub use error::TableError;
pub use query::{greater_than_tuple_where_clause, tuple_greater_than, LowerBound, ScanBounds, ScanQuery};
pub use table::TableDescriptor;
pub use value::{Row, Value};
