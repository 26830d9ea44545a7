//! Runs one operation per shard concurrently and gathers the results.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use shardscan_connectors::{
    Dialer, ReaderMetrics, ReaderOptions, ResumableReader, ScanContext, StaticTabletProvider,
    Tablet, TabletProvider,
};
use shardscan_core::{Chunk, Row, TableDescriptor};
use tracing::{info, warn};

/// Results of [`for_all_shards`], keyed by shard.
#[derive(Debug)]
pub struct ShardOutput<R> {
    pub responses: HashMap<String, R>,
    /// The first failure recorded; other shards still ran to completion.
    pub first_error: Option<anyhow::Error>,
}

impl<R> Default for ShardOutput<R> {
    fn default() -> Self {
        Self {
            responses: HashMap::new(),
            first_error: None,
        }
    }
}

impl<R> ShardOutput<R> {
    fn record(&mut self, shard: String, result: anyhow::Result<R>) {
        match result {
            Ok(r) => {
                self.responses.insert(shard, r);
            }
            Err(e) => {
                warn!("shard={}: {:#}", shard, e);
                if self.first_error.is_none() {
                    self.first_error = Some(e.context(format!("shard {}", shard)));
                }
            }
        }
    }
}

/// Run `f` for every shard on its own task and wait for all of them.
pub async fn for_all_shards<R, F, Fut>(shards: Vec<String>, f: F) -> ShardOutput<R>
where
    R: Send + 'static,
    F: Fn(String) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    let output = Arc::new(Mutex::new(ShardOutput::default()));

    let mut handles = Vec::with_capacity(shards.len());
    for shard in shards {
        let f = f.clone();
        let output = Arc::clone(&output);
        let name = shard.clone();
        let handle = tokio::spawn(async move {
            let result = f(shard.clone()).await;
            output
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(shard, result);
        });
        handles.push((name, handle));
    }

    for (shard, handle) in handles {
        if let Err(e) = handle.await {
            output
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(shard, Err(anyhow::anyhow!("shard task failed: {}", e)));
        }
    }

    let mut guard = output.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *guard)
}

/// What one shard's reader delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShardScanSummary {
    pub rows: u64,
    pub batches: u64,
    /// Primary key of the last row delivered.
    pub last_key: Option<Row>,
}

/// Everything a shard scan needs besides its tablets.
pub struct ScanJob {
    pub ctx: ScanContext,
    pub dialer: Arc<dyn Dialer>,
    pub table: Arc<TableDescriptor>,
    pub chunk: Chunk,
    pub options: ReaderOptions,
    pub metrics: ReaderMetrics,
}

/// One provider per `keyspace/shard` found in `tablets`.
pub fn providers_by_shard(tablets: &[Tablet]) -> BTreeMap<String, Arc<dyn TabletProvider>> {
    let mut shards = BTreeMap::new();
    for t in tablets {
        let key = format!("{}/{}", t.keyspace, t.shard);
        shards.entry(key).or_insert_with(|| {
            Arc::new(StaticTabletProvider::for_shard(&t.keyspace, &t.shard, tablets))
                as Arc<dyn TabletProvider>
        });
    }
    shards
}

/// Scan `job.chunk` on every shard in `providers`.
pub async fn scan_shards(
    job: Arc<ScanJob>,
    providers: BTreeMap<String, Arc<dyn TabletProvider>>,
) -> ShardOutput<ShardScanSummary> {
    let shards = providers.keys().cloned().collect();
    let providers = Arc::new(providers);
    for_all_shards(shards, move |shard| {
        let job = Arc::clone(&job);
        let provider = providers.get(&shard).cloned();
        async move {
            let provider =
                provider.ok_or_else(|| anyhow::anyhow!("no tablet provider for shard {}", shard))?;
            scan_shard(&job, provider).await
        }
    })
    .await
}

async fn scan_shard(
    job: &ScanJob,
    provider: Arc<dyn TabletProvider>,
) -> anyhow::Result<ShardScanSummary> {
    let description = provider.description();
    let mut reader = ResumableReader::new(
        job.ctx.clone(),
        provider,
        Arc::clone(&job.dialer),
        Arc::clone(&job.table),
        job.chunk.clone(),
        job.options,
        job.metrics.clone(),
    )
    .await?;

    let mut summary = ShardScanSummary::default();
    let result = loop {
        match reader.next().await {
            Ok(Some(batch)) => {
                summary.batches += 1;
                summary.rows += batch.rows.len() as u64;
                if let Some(row) = batch.rows.last() {
                    summary.last_key = Some(job.table.primary_key_row(row));
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    reader.close().await;
    result?;

    info!(
        "{} table={} chunk={}: scanned {} rows in {} batches",
        description, job.table.name, job.chunk, summary.rows, summary.batches
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardscan_connectors::{MemoryDialer, MemoryStore, TabletType};
    use shardscan_core::Value;

    fn tablet(alias: &str, shard: &str) -> Tablet {
        Tablet {
            alias: alias.to_string(),
            keyspace: "commerce".to_string(),
            shard: shard.to_string(),
            tablet_type: TabletType::Rdonly,
            address: String::new(),
        }
    }

    fn table() -> TableDescriptor {
        TableDescriptor::new(
            "items",
            vec!["id".to_string(), "name".to_string()],
            vec!["id".to_string()],
        )
    }

    fn rows(ids: impl Iterator<Item = i64>) -> Vec<Row> {
        ids.map(|id| vec![Value::Int(id), Value::Null]).collect()
    }

    #[tokio::test]
    async fn test_for_all_shards_collects_every_response() {
        let shards = vec!["-80".to_string(), "80-".to_string()];
        let out = for_all_shards(shards, |shard| async move { Ok(shard.len()) }).await;
        assert!(out.first_error.is_none());
        assert_eq!(out.responses.len(), 2);
        assert_eq!(out.responses["-80"], 3);
    }

    #[tokio::test]
    async fn test_for_all_shards_failure_does_not_stop_others() {
        let shards = vec!["-40".to_string(), "40-80".to_string(), "80-".to_string()];
        let out = for_all_shards(shards, |shard| async move {
            if shard == "40-80" {
                anyhow::bail!("tablet unreachable");
            }
            Ok(())
        })
        .await;
        assert_eq!(out.responses.len(), 2);
        assert!(!out.responses.contains_key("40-80"));
        let err = out.first_error.unwrap();
        assert!(format!("{:#}", err).contains("shard 40-80"));
        assert!(format!("{:#}", err).contains("tablet unreachable"));
    }

    #[tokio::test]
    async fn test_for_all_shards_records_panics() {
        let out: ShardOutput<()> = for_all_shards(vec!["0".to_string()], |shard| async move {
            if shard == "0" {
                panic!("boom");
            }
            Ok(())
        })
        .await;
        assert!(out.responses.is_empty());
        assert!(out.first_error.is_some());
    }

    #[test]
    fn test_providers_by_shard() {
        let tablets = vec![
            tablet("zone1-1", "-80"),
            tablet("zone1-2", "80-"),
            tablet("zone2-1", "-80"),
        ];
        let providers = providers_by_shard(&tablets);
        let keys: Vec<_> = providers.keys().cloned().collect();
        assert_eq!(keys, vec!["commerce/-80", "commerce/80-"]);
        assert_eq!(
            providers["commerce/-80"].description(),
            "shard commerce/-80 (rdonly)"
        );
    }

    #[tokio::test]
    async fn test_scan_shards_summaries() {
        let store = Arc::new(MemoryStore::new());
        store.insert_table("zone1-1", table(), rows(0..40));
        store.insert_table("zone1-2", table(), rows(40..100));
        let tablets = vec![tablet("zone1-1", "-80"), tablet("zone1-2", "80-")];

        let job = Arc::new(ScanJob {
            ctx: ScanContext::new(),
            dialer: Arc::new(MemoryDialer::new(store, 8)),
            table: Arc::new(table()),
            chunk: Chunk::new(10, 60),
            options: ReaderOptions::default(),
            metrics: ReaderMetrics::new(),
        });

        let out = scan_shards(job, providers_by_shard(&tablets)).await;
        assert!(out.first_error.is_none());

        let low = &out.responses["commerce/-80"];
        assert_eq!(low.rows, 30);
        assert_eq!(low.batches, 4);
        assert_eq!(low.last_key, Some(vec![Value::Int(39)]));

        let high = &out.responses["commerce/80-"];
        assert_eq!(high.rows, 20);
        assert_eq!(high.last_key, Some(vec![Value::Int(59)]));
    }

    #[tokio::test]
    async fn test_scan_shards_reports_failed_shard() {
        let store = Arc::new(MemoryStore::new());
        store.insert_table("zone1-1", table(), rows(0..10));
        // zone1-2 is unknown to the store, so dialing it fails
        let tablets = vec![tablet("zone1-1", "-80"), tablet("zone1-2", "80-")];

        let job = Arc::new(ScanJob {
            ctx: ScanContext::new(),
            dialer: Arc::new(MemoryDialer::new(store, 8)),
            table: Arc::new(table()),
            chunk: Chunk::full(),
            options: ReaderOptions::default(),
            metrics: ReaderMetrics::new(),
        });

        let out = scan_shards(job, providers_by_shard(&tablets)).await;
        assert_eq!(out.responses["commerce/-80"].rows, 10);
        assert!(!out.responses.contains_key("commerce/80-"));
        let err = out.first_error.unwrap();
        assert!(format!("{:#}", err).contains("commerce/80-"));
    }
}
