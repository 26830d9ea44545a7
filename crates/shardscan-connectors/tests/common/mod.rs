//! Fault injection over the in-memory backend.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shardscan_connectors::{
    Dialer, MemoryDialer, MemoryStore, ResultBatch, ResultStream, StaticTabletProvider, Tablet,
    TabletConn, TabletProvider, TabletType, Target,
};
use shardscan_core::{ScanQuery, TableDescriptor, Value};

/// How one streaming query started through a [`FlakyDialer`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPlan {
    Healthy,
    /// Deliver the fields and `n` row batches, then fail.
    FailAfterBatches(usize),
    /// Fail to start.
    FailStart,
    /// Deliver the fields, then hang on every receive.
    Hang,
}

/// Wraps [`MemoryDialer`], applying queued [`StreamPlan`]s to successive
/// streaming queries (then `fallback`) and recording every query started.
pub struct FlakyDialer {
    inner: MemoryDialer,
    state: Arc<FlakyState>,
}

pub struct FlakyState {
    plans: Mutex<VecDeque<StreamPlan>>,
    fallback: Mutex<StreamPlan>,
    started: Mutex<Vec<(String, String)>>,
    dial_failures: Mutex<Vec<String>>,
    transactions: AtomicBool,
}

impl FlakyDialer {
    pub fn new(store: Arc<MemoryStore>, batch_size: usize, plans: Vec<StreamPlan>) -> Self {
        Self {
            inner: MemoryDialer::new(store, batch_size),
            state: Arc::new(FlakyState {
                plans: Mutex::new(plans.into()),
                fallback: Mutex::new(StreamPlan::Healthy),
                started: Mutex::new(Vec::new()),
                dial_failures: Mutex::new(Vec::new()),
                transactions: AtomicBool::new(true),
            }),
        }
    }

    /// Plan for every stream once the queued plans are used up.
    pub fn with_fallback(self, plan: StreamPlan) -> Self {
        *self.state.fallback.lock().unwrap() = plan;
        self
    }

    /// Make dialing `alias` fail.
    pub fn fail_dial(self, alias: &str) -> Self {
        self.state.dial_failures.lock().unwrap().push(alias.to_string());
        self
    }

    /// Report no transaction support.
    pub fn without_transactions(self) -> Self {
        self.state.transactions.store(false, Ordering::SeqCst);
        self
    }

    /// `(tablet alias, sql)` of every streaming query started so far.
    pub fn started(&self) -> Vec<(String, String)> {
        self.state.started.lock().unwrap().clone()
    }

    pub fn started_tablets(&self) -> Vec<String> {
        self.started().into_iter().map(|(alias, _)| alias).collect()
    }

    pub fn started_queries(&self) -> Vec<String> {
        self.started().into_iter().map(|(_, sql)| sql).collect()
    }
}

#[async_trait]
impl Dialer for FlakyDialer {
    async fn dial(&self, tablet: &Tablet) -> anyhow::Result<Box<dyn TabletConn>> {
        if self.state.dial_failures.lock().unwrap().contains(&tablet.alias) {
            anyhow::bail!("dialer misconfigured for tablet {}", tablet.alias);
        }
        let inner = self.inner.dial(tablet).await?;
        Ok(Box::new(FlakyConn {
            inner,
            alias: tablet.alias.clone(),
            state: Arc::clone(&self.state),
        }))
    }

    fn supports_transactions(&self) -> bool {
        self.state.transactions.load(Ordering::SeqCst)
    }
}

struct FlakyConn {
    inner: Box<dyn TabletConn>,
    alias: String,
    state: Arc<FlakyState>,
}

#[async_trait]
impl TabletConn for FlakyConn {
    async fn stream_execute(
        &self,
        target: &Target,
        query: &ScanQuery,
        tx_id: Option<i64>,
    ) -> anyhow::Result<Box<dyn ResultStream>> {
        self.state
            .started
            .lock()
            .unwrap()
            .push((self.alias.clone(), query.sql.clone()));

        let plan = self
            .state
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| *self.state.fallback.lock().unwrap());

        if plan == StreamPlan::FailStart {
            anyhow::bail!("tablet {} is not serving", self.alias);
        }
        let inner = self.inner.stream_execute(target, query, tx_id).await?;
        Ok(Box::new(FlakyStream {
            inner,
            plan,
            fields_sent: false,
            batches_sent: 0,
        }))
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

struct FlakyStream {
    inner: Box<dyn ResultStream>,
    plan: StreamPlan,
    fields_sent: bool,
    batches_sent: usize,
}

#[async_trait]
impl ResultStream for FlakyStream {
    async fn recv(&mut self) -> anyhow::Result<Option<ResultBatch>> {
        if self.fields_sent {
            match self.plan {
                StreamPlan::FailAfterBatches(n) if self.batches_sent >= n => {
                    anyhow::bail!("connection reset by peer")
                }
                StreamPlan::Hang => std::future::pending::<()>().await,
                _ => {}
            }
        }
        let batch = self.inner.recv().await?;
        if self.fields_sent {
            self.batches_sent += 1;
        }
        self.fields_sent = true;
        Ok(batch)
    }
}

/// Provider whose first `failures` calls to `get_tablet` fail.
pub struct FlakyProvider {
    inner: StaticTabletProvider,
    failures: AtomicUsize,
}

impl FlakyProvider {
    pub fn new(inner: StaticTabletProvider, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }

    pub fn in_use(&self, alias: &str) -> usize {
        self.inner.in_use(alias)
    }
}

#[async_trait]
impl TabletProvider for FlakyProvider {
    async fn get_tablet(&self) -> anyhow::Result<Tablet> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("no healthy tablet yet");
        }
        self.inner.get_tablet().await
    }

    async fn return_tablet(&self, tablet: Tablet) {
        self.inner.return_tablet(tablet).await;
    }

    fn description(&self) -> String {
        self.inner.description()
    }
}

pub fn tablet(alias: &str) -> Tablet {
    Tablet {
        alias: alias.to_string(),
        keyspace: "commerce".to_string(),
        shard: "0".to_string(),
        tablet_type: TabletType::Rdonly,
        address: String::new(),
    }
}

pub fn items_table() -> TableDescriptor {
    TableDescriptor::new(
        "items",
        vec!["key".to_string(), "payload".to_string()],
        vec!["key".to_string()],
    )
}

/// `items` with keys `0..100` on every tablet in `aliases`.
pub fn items_store(aliases: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for alias in aliases {
        let rows = (0..100i64)
            .map(|k| vec![Value::Int(k), Value::from(format!("item-{}", k))])
            .collect();
        store.insert_table(alias, items_table(), rows);
    }
    store
}

pub fn provider(aliases: &[&str]) -> Arc<StaticTabletProvider> {
    Arc::new(StaticTabletProvider::new(
        "shard commerce/0 (rdonly)",
        aliases.iter().map(|a| tablet(a)).collect(),
    ))
}

pub fn keys(batch: &ResultBatch) -> Vec<i64> {
    batch
        .rows
        .iter()
        .map(|r| match r[0] {
            Value::Int(k) => k,
            ref other => panic!("unexpected key {other:?}"),
        })
        .collect()
}

pub fn fast_retry() -> shardscan_connectors::RetryConfig {
    shardscan_connectors::RetryConfig::new(Duration::from_millis(300), Duration::from_millis(10))
}
