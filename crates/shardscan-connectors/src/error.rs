//! Typed errors for tablet sessions and the resumable reader.

use std::time::Duration;

use shardscan_core::TableError;
use thiserror::Error;

use crate::context::ContextError;

/// Errors surfaced by [`Session`](crate::session::Session) and
/// [`ResumableReader`](crate::reader::ResumableReader).
///
/// Transient failures are absorbed by the retry protocol; callers only see
/// them wrapped in one of the terminal variants.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The provider had no tablet to hand out.
    #[error("failed to get tablet for streaming query")]
    GetTablet(#[source] anyhow::Error),

    /// Dialing the tablet failed. Points at a dialer misconfiguration.
    #[error("failed to dial tablet={tablet}")]
    Dial {
        tablet: String,
        #[source]
        source: anyhow::Error,
    },

    /// The streaming query could not be started or its fields not read.
    #[error("tablet={tablet}: cannot read fields for query '{query}'")]
    StartStream {
        tablet: String,
        query: String,
        #[source]
        source: anyhow::Error,
    },

    /// An open stream failed mid-way.
    #[error("tablet={tablet}: failed to read next rows from streaming query")]
    Recv {
        tablet: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    /// Neither the first connection attempt nor its single retry succeeded.
    #[error("failed to initialize tablet connection: retryable {retryable}")]
    Connect {
        retryable: bool,
        #[source]
        source: Box<ReaderError>,
    },

    /// The same-tablet restart failed and further retries are disabled.
    #[error("{provider}: first retry to restart the streaming query on the same tablet failed; not allowed to keep retrying")]
    RetriesNotAllowed {
        provider: String,
        #[source]
        source: Box<ReaderError>,
    },

    /// The retry budget (or the caller's deadline) elapsed.
    #[error("{provider}: failed to restart the streaming connection after retrying for {budget:?}")]
    RetryDeadlineExceeded {
        provider: String,
        budget: Duration,
        #[source]
        source: Box<ReaderError>,
    },

    /// The caller cancelled while the reader was retrying.
    #[error("{provider}: interrupted while trying to restart the streaming connection ({elapsed:?} elapsed so far)")]
    Interrupted {
        provider: String,
        elapsed: Duration,
        #[source]
        source: Box<ReaderError>,
    },

    /// The caller's context finished while waiting on the stream.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A transactional scan was requested from a dialer without transactions.
    #[error("transactional streaming (transaction {tx_id}) is not supported by this dialer")]
    TransactionsUnsupported { tx_id: i64 },

    #[error("reader is closed")]
    Closed,

    #[error("reader failed earlier; create a new reader to resume")]
    Failed,
}

impl ReaderError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReaderError::GetTablet(_) | ReaderError::StartStream { .. } | ReaderError::Recv { .. }
        )
    }

    /// The reader gave up on its data source: retry budget spent or retries
    /// disabled.
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(
            self,
            ReaderError::RetriesNotAllowed { .. }
                | ReaderError::RetryDeadlineExceeded { .. }
                | ReaderError::Context(ContextError::DeadlineExceeded)
        )
    }

    /// The caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ReaderError::Interrupted { .. } | ReaderError::Context(ContextError::Cancelled)
        )
    }
}
