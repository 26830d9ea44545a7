//! Tablet connections and the resumable chunk reader.
//!
//! [`ResumableReader`] streams one primary-key chunk of a table from a shard
//! and survives broken streams by resuming after the last delivered row,
//! failing over between the tablets a [`TabletProvider`] offers.
//!
//! Backends:
//! - [`PgDialer`]: tablets are PostgreSQL servers.
//! - [`MemoryDialer`]: tablets are in-process tables.

pub mod context;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod postgres;
pub mod provider;
pub mod reader;
pub mod retry;
pub mod session;
pub mod tablet;

pub use context::{ContextError, ScanContext};
pub use error::ReaderError;
pub use memory::{MemoryDialer, MemoryStore};
pub use metrics::ReaderMetrics;
pub use postgres::PgDialer;
pub use provider::StaticTabletProvider;
pub use reader::{ReaderOptions, ReaderState, ResumableReader};
pub use retry::{AttemptOutcome, RestartStep, RetryConfig};
pub use session::Session;
pub use tablet::{
    Dialer, Field, ResultBatch, ResultStream, Tablet, TabletConn, TabletProvider, TabletType,
    Target,
};
