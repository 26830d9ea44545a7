//! Worker configuration from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};
use shardscan_connectors::{ReaderOptions, RetryConfig, Tablet};
use shardscan_core::{Chunk, TableDescriptor, Value};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Every tablet the worker may read from, across all shards.
    pub tablets: Vec<Tablet>,
    /// Columns ordered primary key first.
    pub table: TableDescriptor,
    pub chunk: Chunk,
    pub retry: RetryConfig,
    pub allow_multiple_retries: bool,
    pub pg_batch_size: usize,
    pub metrics_port: u16,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let tablets: Vec<Tablet> = serde_json::from_str(
            &std::env::var("SCAN_TABLETS").context("SCAN_TABLETS is not set")?,
        )
        .context("Invalid SCAN_TABLETS")?;

        let mut table = TableDescriptor::new(
            std::env::var("SCAN_TABLE").context("SCAN_TABLE is not set")?,
            split_list(&std::env::var("SCAN_COLUMNS").context("SCAN_COLUMNS is not set")?),
            split_list(&std::env::var("SCAN_PRIMARY_KEY").unwrap_or_default()),
        );
        if let Some(pk) = table
            .primary_key_columns
            .iter()
            .find(|pk| !table.columns.contains(*pk))
        {
            anyhow::bail!("Invalid SCAN_PRIMARY_KEY: column '{}' is not in SCAN_COLUMNS", pk);
        }
        table.reorder_columns_primary_key_first();
        table.validate().context("Invalid scan table")?;

        Ok(Self {
            worker_id: std::env::var("WORKER_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            tablets,
            table,
            chunk: Chunk {
                start: json_value("SCAN_CHUNK_START")?,
                end: json_value("SCAN_CHUNK_END")?,
            },
            retry: RetryConfig::new(
                Duration::from_secs(
                    std::env::var("RETRY_BUDGET_SECS")
                        .unwrap_or_else(|_| "7200".to_string())
                        .parse()
                        .context("Invalid RETRY_BUDGET_SECS")?,
                ),
                Duration::from_secs(
                    std::env::var("RETRY_BACKOFF_SECS")
                        .unwrap_or_else(|_| "30".to_string())
                        .parse()
                        .context("Invalid RETRY_BACKOFF_SECS")?,
                ),
            ),
            allow_multiple_retries: std::env::var("ALLOW_MULTIPLE_RETRIES")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid ALLOW_MULTIPLE_RETRIES")?,
            pg_batch_size: std::env::var("PG_BATCH_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid PG_BATCH_SIZE")?,
            metrics_port: std::env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .context("Invalid METRICS_PORT")?,
        })
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            allow_multiple_retries: self.allow_multiple_retries,
            tx_id: None,
            retry: self.retry,
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// JSON-encoded chunk bound; unset means unbounded.
fn json_value(key: &str) -> Result<Value> {
    match std::env::var(key) {
        Ok(raw) => serde_json::from_str(&raw).with_context(|| format!("Invalid {}", key)),
        Err(_) => Ok(Value::Null),
    }
}
