//! PostgreSQL tablet connections.
//!
//! Each tablet address is a Postgres connection string. A streaming query is
//! prepared first so its fields are known even for an empty chunk, then rows
//! are fetched as a stream on a background task and handed out in batches.
//! Row-value comparison `(a, b) > (x, y)` is lexicographic in Postgres, which
//! is what resumed scans rely on.

use async_trait::async_trait;
use futures::StreamExt;
use shardscan_core::{Row, ScanQuery, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Row as _, Statement, TypeInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::tablet::{Dialer, Field, ResultBatch, ResultStream, Tablet, TabletConn, Target};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Dials tablets whose `address` is a Postgres connection string.
#[derive(Debug, Clone)]
pub struct PgDialer {
    batch_size: usize,
    max_connections: u32,
}

impl PgDialer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_connections: 2,
        }
    }
}

impl Default for PgDialer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

#[async_trait]
impl Dialer for PgDialer {
    async fn dial(&self, tablet: &Tablet) -> anyhow::Result<Box<dyn TabletConn>> {
        // Lazy: only a malformed address fails here. Unreachable servers
        // surface when the stream starts, where they are retried.
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_lazy(&tablet.address)?;
        Ok(Box::new(PgTabletConn {
            alias: tablet.alias.clone(),
            pool,
            batch_size: self.batch_size,
        }))
    }

    fn supports_transactions(&self) -> bool {
        false
    }
}

pub struct PgTabletConn {
    alias: String,
    pool: PgPool,
    batch_size: usize,
}

#[async_trait]
impl TabletConn for PgTabletConn {
    async fn stream_execute(
        &self,
        target: &Target,
        query: &ScanQuery,
        tx_id: Option<i64>,
    ) -> anyhow::Result<Box<dyn ResultStream>> {
        if let Some(tx_id) = tx_id {
            anyhow::bail!(
                "tablet={}: transactional streaming (transaction {}) is not supported by the postgres dialer",
                self.alias,
                tx_id
            );
        }

        let statement = (&self.pool).prepare(query.sql.as_str()).await?;
        let fields: Vec<Field> = statement
            .columns()
            .iter()
            .map(|c| Field {
                name: c.name().to_string(),
                type_name: c.type_info().name().to_string(),
            })
            .collect();
        if let Some(field) = fields.iter().find(|f| !is_supported_type(&f.type_name)) {
            anyhow::bail!(
                "tablet={}: column '{}' of table '{}' has unsupported type {}",
                self.alias,
                field.name,
                query.table,
                field.type_name
            );
        }

        debug!("tablet={} target={}: streaming query '{}'", self.alias, target, query.sql);

        let (tx, rx) = mpsc::channel(2);
        let pool = self.pool.clone();
        let sql = query.sql.clone();
        let batch_size = self.batch_size;
        let handle = tokio::spawn(async move {
            let mut rows = sqlx::query(&sql).fetch(&pool);
            let mut batch = Vec::with_capacity(batch_size);
            while let Some(item) = rows.next().await {
                let row = match item.map_err(anyhow::Error::from).and_then(|r| decode_row(&r)) {
                    Ok(row) => row,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                batch.push(row);
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if tx.send(Ok(full)).await.is_err() {
                        return;
                    }
                }
            }
            if !batch.is_empty() {
                let _ = tx.send(Ok(batch)).await;
            }
        });

        Ok(Box::new(PgResultStream {
            fields: Some(fields),
            rx,
            handle,
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct PgResultStream {
    fields: Option<Vec<Field>>,
    rx: mpsc::Receiver<anyhow::Result<Vec<Row>>>,
    handle: JoinHandle<()>,
}

#[async_trait]
impl ResultStream for PgResultStream {
    async fn recv(&mut self) -> anyhow::Result<Option<ResultBatch>> {
        if let Some(fields) = self.fields.take() {
            return Ok(Some(ResultBatch::from_fields(fields)));
        }
        match self.rx.recv().await {
            Some(Ok(rows)) => Ok(Some(ResultBatch::from_rows(rows))),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

impl Drop for PgResultStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn decode_row(row: &PgRow) -> anyhow::Result<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| decode_value(row, i, col.type_info().name()))
        .collect()
}

fn decode_value(row: &PgRow, i: usize, type_name: &str) -> anyhow::Result<Value> {
    let value: Value = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(i)?.map(|v| Value::Int(v as i64)).into(),
        "INT4" => row.try_get::<Option<i32>, _>(i)?.map(|v| Value::Int(v as i64)).into(),
        "INT8" => row.try_get::<Option<i64>, _>(i)?.into(),
        "BOOL" => row.try_get::<Option<bool>, _>(i)?.into(),
        "FLOAT4" => row.try_get::<Option<f32>, _>(i)?.map(|v| Value::Float(v as f64)).into(),
        "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.into(),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<Option<String>, _>(i)?.into(),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(i)?.into(),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(i)?
            .map(|u| u.to_string())
            .into(),
        other => anyhow::bail!("column {} has unsupported type {}", i, other),
    };
    Ok(value)
}

/// Whether rows with a column of this Postgres type can be streamed.
pub fn is_supported_type(type_name: &str) -> bool {
    matches!(
        type_name,
        "INT2" | "INT4" | "INT8" | "BOOL" | "FLOAT4" | "FLOAT8" | "TEXT" | "VARCHAR" | "BPCHAR"
            | "NAME" | "BYTEA" | "UUID"
    )
}
