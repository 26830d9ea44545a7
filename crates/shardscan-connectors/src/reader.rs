//! Resumable chunked streaming reader.
//!
//! Streams every row of a chunk from a tablet in primary-key order. When the
//! stream breaks, the reader regenerates its query to start strictly after
//! the last row it handed out and restarts it: first on the same tablet, then
//! on whichever tablet the provider offers next, until the retry budget runs
//! out. Rows are never delivered twice and never skipped, except rows written
//! into an already scanned part of the key range after the scan passed it.

use std::sync::Arc;
use std::time::Instant;

use shardscan_core::{Chunk, Row, ScanQuery, TableDescriptor};
use tracing::{debug, error, info};

use crate::context::{ContextError, ScanContext};
use crate::error::ReaderError;
use crate::metrics::ReaderMetrics;
use crate::retry::{AttemptOutcome, RestartStep, RetryConfig};
use crate::session::Session;
use crate::tablet::{Dialer, Field, ResultBatch, Tablet, TabletProvider};

/// Construction-time settings of a [`ResumableReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// When false the reader gives up after the single same-tablet restart.
    /// Use false for tablets that may go away for good (offline sources).
    pub allow_multiple_retries: bool,
    /// Run the scan inside this transaction.
    pub tx_id: Option<i64>,
    pub retry: RetryConfig,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            allow_multiple_retries: true,
            tx_id: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Lifecycle of a reader. `Connecting` and `Retrying` only last for the
/// duration of [`ResumableReader::new`] and [`ResumableReader::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Connecting,
    Streaming,
    Retrying,
    Failed,
    Closed,
}

pub struct ResumableReader {
    ctx: ScanContext,
    provider: Arc<dyn TabletProvider>,
    dialer: Arc<dyn Dialer>,
    table: Arc<TableDescriptor>,
    chunk: Chunk,
    options: ReaderOptions,
    metrics: ReaderMetrics,
    query: ScanQuery,
    session: Option<Session>,
    state: ReaderState,
    /// Last row handed to the caller; restarts resume strictly after it.
    last_row: Option<Row>,
}

impl ResumableReader {
    /// Create a reader for `chunk` of `table` and start streaming.
    ///
    /// The first connection is retried exactly once on a retryable error,
    /// independent of the retry budget. `table.columns` must be ordered
    /// primary key first.
    pub async fn new(
        ctx: ScanContext,
        provider: Arc<dyn TabletProvider>,
        dialer: Arc<dyn Dialer>,
        table: Arc<TableDescriptor>,
        chunk: Chunk,
        options: ReaderOptions,
        metrics: ReaderMetrics,
    ) -> Result<Self, ReaderError> {
        table.validate()?;
        if let Some(tx_id) = options.tx_id {
            if !dialer.supports_transactions() {
                return Err(ReaderError::TransactionsUnsupported { tx_id });
            }
        }
        let query = ScanQuery::generate(&table, &chunk, None)?;

        let mut reader = Self {
            ctx,
            provider,
            dialer,
            table,
            chunk,
            options,
            metrics,
            query,
            session: None,
            state: ReaderState::Connecting,
            last_row: None,
        };

        if let Err(e) = reader.try_to_connect().await {
            reader.close().await;
            return Err(e);
        }
        reader.state = ReaderState::Streaming;
        Ok(reader)
    }

    async fn try_to_connect(&mut self) -> Result<(), ReaderError> {
        let ctx = self.ctx.clone();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.connect_once(&ctx).await {
                Ok(()) => return Ok(()),
                Err(e @ ReaderError::Context(_)) => return Err(e),
                Err(e) => e,
            };

            let retryable = err.is_retryable();
            if !retryable || attempt > 1 {
                return Err(ReaderError::Connect {
                    retryable,
                    source: Box::new(err),
                });
            }
            self.metrics.retries.inc();
            info!(
                "table={} chunk={}: retrying after error: {}",
                self.table.name, self.chunk, err
            );
        }
    }

    async fn connect_once(&mut self, ctx: &ScanContext) -> Result<(), ReaderError> {
        self.open_session().await?;
        self.start_stream(ctx).await
    }

    /// Replace the current session with one on a freshly provided tablet.
    /// The old tablet is returned to the provider first.
    async fn open_session(&mut self) -> Result<(), ReaderError> {
        if let Some(mut old) = self.session.take() {
            old.close().await;
        }
        let session = Session::open(Arc::clone(&self.provider), self.dialer.as_ref()).await?;
        self.session = Some(session);
        Ok(())
    }

    /// (Re)start the streaming query on the current session, resuming after
    /// `last_row` if any row was delivered.
    async fn start_stream(&mut self, ctx: &ScanContext) -> Result<(), ReaderError> {
        self.query = ScanQuery::generate(&self.table, &self.chunk, self.last_row.as_deref())?;

        let Some(session) = self.session.as_mut() else {
            return Err(ReaderError::Closed);
        };
        session
            .start(ctx, &self.query, self.options.tx_id, &self.metrics)
            .await?;

        debug!(
            "tablet={} table={} chunk={}: Starting to stream rows using query '{}'",
            session.alias(),
            self.table.name,
            self.chunk,
            self.query.sql
        );
        Ok(())
    }

    /// Next batch of rows, `Ok(None)` once the chunk is exhausted.
    ///
    /// A failed receive transparently runs the restart protocol. Any error
    /// returned here is terminal for the reader.
    pub async fn next(&mut self) -> Result<Option<ResultBatch>, ReaderError> {
        match self.state {
            ReaderState::Streaming => {}
            ReaderState::Failed | ReaderState::Connecting | ReaderState::Retrying => {
                return Err(ReaderError::Failed)
            }
            ReaderState::Closed => return Err(ReaderError::Closed),
        }

        let result = self.recv_or_restart().await;
        match result {
            Ok(Some(batch)) => {
                self.state = ReaderState::Streaming;
                if let Some(row) = batch.rows.last() {
                    self.last_row = Some(row.clone());
                }
                Ok(Some(batch))
            }
            Ok(None) => {
                self.state = ReaderState::Streaming;
                Ok(None)
            }
            Err(e) => {
                self.state = ReaderState::Failed;
                Err(e)
            }
        }
    }

    async fn recv_or_restart(&mut self) -> Result<Option<ResultBatch>, ReaderError> {
        let Some(session) = self.session.as_mut() else {
            return Err(ReaderError::Closed);
        };

        let err = match session.recv(&self.ctx).await {
            Ok(result) => return Ok(result),
            // The caller gave up; restarting cannot help.
            Err(e @ ReaderError::Context(_)) => return Err(e),
            Err(e) => e,
        };

        let alias = session.alias();
        self.metrics.stream_failed(&alias);
        debug!(
            "tablet={} table={} chunk={}: Failed to read next rows from active streaming query. Trying to restart stream on the same tablet. Original Error: {}",
            alias, self.table.name, self.chunk, err
        );
        self.next_with_retries().await
    }

    async fn next_with_retries(&mut self) -> Result<Option<ResultBatch>, ReaderError> {
        self.state = ReaderState::Retrying;
        let retry_ctx = self.ctx.with_timeout(self.options.retry.retry_budget);
        let started = Instant::now();

        // Attempt 1 was the failed receive.
        let mut attempt: u32 = 1;
        loop {
            attempt += 1;

            let err = match self.restart_attempt(&retry_ctx, attempt).await {
                AttemptOutcome::Succeeded(result) => {
                    let alias = self.tablet_alias();
                    debug!(
                        "tablet={} table={} chunk={}: Successfully restarted streaming query with query '{}' after {:.1} seconds.",
                        alias,
                        self.table.name,
                        self.chunk,
                        self.query.sql,
                        started.elapsed().as_secs_f64()
                    );
                    match RestartStep::for_attempt(attempt) {
                        RestartStep::SameTablet => self.metrics.restarted_same_tablet(&alias),
                        RestartStep::Failover => self.metrics.restarted_different_tablet(),
                    }
                    return Ok(result);
                }
                AttemptOutcome::FatalFailure(err) => {
                    error!(
                        "tablet={} table={} chunk={}: Failed to restart streaming query (attempt {}) with query '{}' and stopped due to a non-retryable error: {}",
                        self.tablet_alias(),
                        self.table.name,
                        self.chunk,
                        attempt,
                        self.query.sql,
                        err
                    );
                    return Err(err);
                }
                AttemptOutcome::RetryableFailure(err) => err,
            };

            if attempt == 2 && !self.options.allow_multiple_retries {
                return Err(ReaderError::RetriesNotAllowed {
                    provider: self.provider.description(),
                    source: Box::new(err),
                });
            }

            self.metrics.retries.inc();
            if let Some(tablet) = self.tablet() {
                self.metrics.stream_failed(&tablet.alias);
            }

            if let Some(ctx_err) = retry_ctx.err() {
                return Err(self.retry_context_error(ctx_err, started, err));
            }

            debug!(
                "tablet={} table={} chunk={}: Failed to restart streaming query (attempt {}) with query '{}'. Retrying to restart stream on a different tablet (for up to {:.1} minutes). Next retry is in {:.1} seconds. Error: {}",
                self.tablet_alias(),
                self.table.name,
                self.chunk,
                attempt,
                self.query.sql,
                retry_ctx.remaining().unwrap_or_default().as_secs_f64() / 60.0,
                self.options.retry.backoff_interval.as_secs_f64(),
                err
            );

            if let Err(ctx_err) = retry_ctx.sleep(self.options.retry.backoff_interval).await {
                return Err(self.retry_context_error(ctx_err, started, err));
            }
        }
    }

    /// One attempt: fail over if the attempt calls for it, restart the
    /// stream and receive its first batch.
    async fn restart_attempt(
        &mut self,
        ctx: &ScanContext,
        attempt: u32,
    ) -> AttemptOutcome<Option<ResultBatch>> {
        if RestartStep::for_attempt(attempt) == RestartStep::Failover {
            if let Err(err) = self.open_session().await {
                return AttemptOutcome::from_error(err);
            }
        }

        if let Err(err) = self.start_stream(ctx).await {
            return match err {
                // Reported by the caller loop once the flag is checked.
                ReaderError::Context(_) => AttemptOutcome::RetryableFailure(err),
                err => AttemptOutcome::from_error(err),
            };
        }

        let Some(session) = self.session.as_mut() else {
            return AttemptOutcome::FatalFailure(ReaderError::Closed);
        };
        match session.recv(ctx).await {
            Ok(result) => AttemptOutcome::Succeeded(result),
            // Receive failures are always worth another attempt. An expired
            // retry context is reported by the caller loop.
            Err(err) => AttemptOutcome::RetryableFailure(err),
        }
    }

    fn retry_context_error(
        &self,
        ctx_err: ContextError,
        started: Instant,
        last: ReaderError,
    ) -> ReaderError {
        let provider = self.provider.description();
        match ctx_err {
            ContextError::DeadlineExceeded => ReaderError::RetryDeadlineExceeded {
                provider,
                budget: self.options.retry.retry_budget,
                source: Box::new(last),
            },
            ContextError::Cancelled => ReaderError::Interrupted {
                provider,
                elapsed: started.elapsed(),
                source: Box::new(last),
            },
        }
    }

    /// Field metadata of the current stream.
    pub fn fields(&self) -> &[Field] {
        self.session.as_ref().map(Session::fields).unwrap_or(&[])
    }

    /// SQL of the current (or last) streaming query.
    pub fn query(&self) -> &str {
        &self.query.sql
    }

    pub fn last_row(&self) -> Option<&[shardscan_core::Value]> {
        self.last_row.as_deref()
    }

    pub fn tablet(&self) -> Option<&Tablet> {
        self.session.as_ref().and_then(Session::tablet)
    }

    fn tablet_alias(&self) -> String {
        self.session
            .as_ref()
            .map(Session::alias)
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Close the connection and return the tablet. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.state = ReaderState::Closed;
    }
}
