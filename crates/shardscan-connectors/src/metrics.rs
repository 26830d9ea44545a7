//! Prometheus counters for streaming queries, retries and failovers.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TabletLabel(pub String);

impl prometheus_client::encoding::EncodeLabelSet for TabletLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("tablet", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Counters shared by every reader of a process. Cloning shares the
/// underlying counters.
#[derive(Clone)]
pub struct ReaderMetrics {
    pub retries: Counter,
    pub streaming_queries_started: Family<TabletLabel, Counter>,
    pub streaming_query_errors: Family<TabletLabel, Counter>,
    pub restarts_same_tablet: Family<TabletLabel, Counter>,
    pub restarts_different_tablet: Counter,
    pub registry: Arc<Registry>,
}

impl ReaderMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let retries = Counter::default();
        registry.register(
            "shardscan_reader_retries",
            "Retries of tablet connections and streaming queries",
            retries.clone(),
        );

        let streaming_queries_started = Family::<TabletLabel, Counter>::default();
        registry.register(
            "shardscan_streaming_queries_started",
            "Streaming queries started per tablet",
            streaming_queries_started.clone(),
        );

        let streaming_query_errors = Family::<TabletLabel, Counter>::default();
        registry.register(
            "shardscan_streaming_query_errors",
            "Streaming queries that failed per tablet",
            streaming_query_errors.clone(),
        );

        let restarts_same_tablet = Family::<TabletLabel, Counter>::default();
        registry.register(
            "shardscan_streaming_query_restarts_same_tablet",
            "Streaming queries successfully restarted on the same tablet",
            restarts_same_tablet.clone(),
        );

        let restarts_different_tablet = Counter::default();
        registry.register(
            "shardscan_streaming_query_restarts_different_tablet",
            "Streaming queries successfully restarted after failing over to a different tablet",
            restarts_different_tablet.clone(),
        );

        Self {
            retries,
            streaming_queries_started,
            streaming_query_errors,
            restarts_same_tablet,
            restarts_different_tablet,
            registry: Arc::new(registry),
        }
    }

    pub fn stream_started(&self, tablet: &str) {
        self.streaming_queries_started
            .get_or_create(&TabletLabel(tablet.to_string()))
            .inc();
    }

    pub fn stream_failed(&self, tablet: &str) {
        self.streaming_query_errors
            .get_or_create(&TabletLabel(tablet.to_string()))
            .inc();
    }

    pub fn restarted_same_tablet(&self, tablet: &str) {
        self.restarts_same_tablet
            .get_or_create(&TabletLabel(tablet.to_string()))
            .inc();
    }

    pub fn restarted_different_tablet(&self) {
        self.restarts_different_tablet.inc();
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for ReaderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_tablet_label() {
        let metrics = ReaderMetrics::new();
        metrics.stream_started("zone1-101");
        metrics.stream_started("zone1-101");
        metrics.restarted_different_tablet();

        let text = metrics.encode().unwrap();
        assert!(text.contains("shardscan_streaming_queries_started_total{tablet=\"zone1-101\"} 2"));
        assert!(text.contains("shardscan_streaming_query_restarts_different_tablet_total 1"));
    }

    #[test]
    fn test_restart_counters() {
        let metrics = ReaderMetrics::new();
        metrics.restarted_same_tablet("zone1-101");
        metrics.restarted_different_tablet();
        metrics.restarted_different_tablet();

        assert_eq!(
            metrics
                .restarts_same_tablet
                .get_or_create(&TabletLabel("zone1-101".to_string()))
                .get(),
            1
        );
        assert_eq!(metrics.restarts_different_tablet.get(), 2);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = ReaderMetrics::new();
        let other = metrics.clone();
        other.retries.inc();
        assert_eq!(metrics.retries.get(), 1);
    }
}
