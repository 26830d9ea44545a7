//! One connection to one tablet plus the streaming query open on it.

use std::sync::Arc;

use shardscan_core::ScanQuery;
use tracing::debug;

use crate::context::ScanContext;
use crate::error::ReaderError;
use crate::metrics::ReaderMetrics;
use crate::tablet::{Dialer, Field, ResultBatch, ResultStream, Tablet, TabletConn, TabletProvider};

/// Owned exclusively by one reader and replaced on every failover.
pub struct Session {
    provider: Arc<dyn TabletProvider>,
    tablet: Option<Tablet>,
    conn: Option<Box<dyn TabletConn>>,
    stream: Option<Box<dyn ResultStream>>,
    fields: Vec<Field>,
    /// Rows that arrived together with the field metadata.
    pending: Option<ResultBatch>,
    exhausted: bool,
}

impl Session {
    /// Get a tablet from `provider` and dial it.
    ///
    /// A provider failure is retryable; a dial failure is not, and the tablet
    /// is returned to the provider before the error is reported.
    pub async fn open(
        provider: Arc<dyn TabletProvider>,
        dialer: &dyn Dialer,
    ) -> Result<Self, ReaderError> {
        let tablet = provider
            .get_tablet()
            .await
            .map_err(ReaderError::GetTablet)?;

        let conn = match dialer.dial(&tablet).await {
            Ok(conn) => conn,
            Err(e) => {
                let alias = tablet.alias.clone();
                provider.return_tablet(tablet).await;
                return Err(ReaderError::Dial {
                    tablet: alias,
                    source: e,
                });
            }
        };

        Ok(Self {
            provider,
            tablet: Some(tablet),
            conn: Some(conn),
            stream: None,
            fields: Vec::new(),
            pending: None,
            exhausted: false,
        })
    }

    /// Start `query` and block until its field metadata arrives.
    ///
    /// Failures are retryable except when `ctx` finishes first, which is
    /// reported as [`ReaderError::Context`]. A stream already open on this
    /// session is dropped first.
    pub async fn start(
        &mut self,
        ctx: &ScanContext,
        query: &ScanQuery,
        tx_id: Option<i64>,
        metrics: &ReaderMetrics,
    ) -> Result<(), ReaderError> {
        self.stream = None;
        self.fields.clear();
        self.pending = None;
        self.exhausted = false;

        let alias = self.alias();
        let start_err = |source: anyhow::Error| ReaderError::StartStream {
            tablet: alias.clone(),
            query: query.sql.clone(),
            source,
        };

        let (Some(conn), Some(tablet)) = (self.conn.as_ref(), self.tablet.as_ref()) else {
            return Err(start_err(anyhow::anyhow!("session has no open connection")));
        };
        let target = tablet.target();

        let mut stream = ctx
            .run(conn.stream_execute(&target, query, tx_id))
            .await?
            .map_err(&start_err)?;

        let first = ctx.run(stream.recv()).await?.map_err(&start_err)?;

        match first {
            Some(batch) => {
                self.fields = batch.fields;
                if !batch.rows.is_empty() {
                    self.pending = Some(ResultBatch::from_rows(batch.rows));
                }
            }
            None => self.exhausted = true,
        }
        self.stream = Some(stream);

        metrics.stream_started(&alias);
        debug!(
            "tablet={} target={} table={}: streaming query started",
            alias, target, query.table
        );
        Ok(())
    }

    /// Receive the next batch, `Ok(None)` at end of stream.
    ///
    /// If `ctx` finishes first the error is [`ReaderError::Context`].
    pub async fn recv(&mut self, ctx: &ScanContext) -> Result<Option<ResultBatch>, ReaderError> {
        if let Some(batch) = self.pending.take() {
            return Ok(Some(batch));
        }
        if self.exhausted {
            return Ok(None);
        }
        let alias = self.alias();
        let Some(stream) = self.stream.as_mut() else {
            return Err(ReaderError::Recv {
                tablet: alias,
                source: anyhow::anyhow!("no streaming query is open"),
            });
        };

        match ctx.run(stream.recv()).await? {
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(source) => Err(ReaderError::Recv {
                tablet: alias,
                source,
            }),
        }
    }

    /// Close the connection and return the tablet to the provider. Safe to
    /// call more than once.
    pub async fn close(&mut self) {
        self.stream = None;
        self.pending = None;
        if let Some(conn) = self.conn.take() {
            conn.close().await;
            if let Some(tablet) = self.tablet.take() {
                debug!("tablet={}: returning tablet to provider", tablet.alias);
                self.provider.return_tablet(tablet).await;
            }
        }
    }

    pub fn tablet(&self) -> Option<&Tablet> {
        self.tablet.as_ref()
    }

    /// Alias of the session's tablet, `unknown` once closed.
    pub fn alias(&self) -> String {
        self.tablet
            .as_ref()
            .map(|t| t.alias.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }
}
