//! In-memory tablets.
//!
//! Serves scans from rows held in process, evaluating the query's
//! [`ScanBounds`](shardscan_core::ScanBounds) instead of its SQL. Every stream
//! reads a snapshot taken when it starts, so plain and transactional streams
//! behave alike.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use shardscan_core::{Row, ScanQuery, TableDescriptor};

use crate::tablet::{Dialer, Field, ResultBatch, ResultStream, Tablet, TabletConn, Target};

struct MemoryTable {
    descriptor: TableDescriptor,
    rows: Vec<Row>,
}

/// Tables keyed by tablet alias, then table name.
#[derive(Default)]
pub struct MemoryStore {
    tablets: RwLock<HashMap<String, HashMap<String, MemoryTable>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) `descriptor.name` on tablet `alias`.
    pub fn insert_table(&self, alias: &str, descriptor: TableDescriptor, rows: Vec<Row>) {
        let mut tablets = self.tablets.write().unwrap_or_else(PoisonError::into_inner);
        tablets.entry(alias.to_string()).or_default().insert(
            descriptor.name.clone(),
            MemoryTable { descriptor, rows },
        );
    }

    /// Append a row to an existing table. Returns false if the table is unknown.
    pub fn insert_row(&self, alias: &str, table: &str, row: Row) -> bool {
        let mut tablets = self.tablets.write().unwrap_or_else(PoisonError::into_inner);
        match tablets.get_mut(alias).and_then(|t| t.get_mut(table)) {
            Some(t) => {
                t.rows.push(row);
                true
            }
            None => false,
        }
    }

    pub fn has_tablet(&self, alias: &str) -> bool {
        self.tablets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(alias)
    }

    /// Rows selected by `query` on tablet `alias`, in primary-key order.
    fn scan(&self, alias: &str, query: &ScanQuery) -> anyhow::Result<(Vec<Field>, Vec<Row>)> {
        let tablets = self.tablets.read().unwrap_or_else(PoisonError::into_inner);
        let table = tablets
            .get(alias)
            .and_then(|t| t.get(&query.table))
            .ok_or_else(|| anyhow::anyhow!("tablet={}: table '{}' not found", alias, query.table))?;

        let td = &table.descriptor;
        let mut rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|row| query.bounds.contains(td.primary_key_values(row)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| td.primary_key_values(a).cmp(td.primary_key_values(b)));

        let fields = td
            .columns
            .iter()
            .map(|c| Field {
                name: c.clone(),
                type_name: "VALUE".to_string(),
            })
            .collect();
        Ok((fields, rows))
    }
}

/// Dials tablets held by a [`MemoryStore`].
pub struct MemoryDialer {
    store: Arc<MemoryStore>,
    batch_size: usize,
}

impl MemoryDialer {
    pub fn new(store: Arc<MemoryStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, tablet: &Tablet) -> anyhow::Result<Box<dyn TabletConn>> {
        if !self.store.has_tablet(&tablet.alias) {
            anyhow::bail!("no in-memory tablet '{}'", tablet.alias);
        }
        Ok(Box::new(MemoryConn {
            store: Arc::clone(&self.store),
            alias: tablet.alias.clone(),
            batch_size: self.batch_size,
        }))
    }
}

struct MemoryConn {
    store: Arc<MemoryStore>,
    alias: String,
    batch_size: usize,
}

#[async_trait]
impl TabletConn for MemoryConn {
    async fn stream_execute(
        &self,
        _target: &Target,
        query: &ScanQuery,
        _tx_id: Option<i64>,
    ) -> anyhow::Result<Box<dyn ResultStream>> {
        let (fields, rows) = self.store.scan(&self.alias, query)?;
        let batches = rows
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect::<VecDeque<_>>();
        Ok(Box::new(MemoryStream {
            fields: Some(fields),
            batches,
        }))
    }

    async fn close(&self) {}
}

struct MemoryStream {
    fields: Option<Vec<Field>>,
    batches: VecDeque<Vec<Row>>,
}

#[async_trait]
impl ResultStream for MemoryStream {
    async fn recv(&mut self) -> anyhow::Result<Option<ResultBatch>> {
        if let Some(fields) = self.fields.take() {
            return Ok(Some(ResultBatch::from_fields(fields)));
        }
        Ok(self.batches.pop_front().map(ResultBatch::from_rows))
    }
}
