//! Tablet handles and the capabilities a reader consumes.
//!
//! A reader never discovers tablets or speaks a wire protocol itself. It asks
//! a [`TabletProvider`] for a tablet, a [`Dialer`] for a connection to it, and
//! pulls [`ResultBatch`]es off the [`ResultStream`] the connection opens.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shardscan_core::{Row, ScanQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabletType {
    Primary,
    #[default]
    Replica,
    Rdonly,
}

impl fmt::Display for TabletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabletType::Primary => f.write_str("PRIMARY"),
            TabletType::Replica => f.write_str("REPLICA"),
            TabletType::Rdonly => f.write_str("RDONLY"),
        }
    }
}

/// A storage-node process serving one replica of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablet {
    /// Unique identity, e.g. `zone1-0000000101`.
    pub alias: String,
    pub keyspace: String,
    pub shard: String,
    #[serde(default)]
    pub tablet_type: TabletType,
    /// Connection string handed to the dialer.
    pub address: String,
}

impl Tablet {
    pub fn target(&self) -> Target {
        Target {
            keyspace: self.keyspace.clone(),
            shard: self.shard.clone(),
            tablet_type: self.tablet_type,
        }
    }
}

/// What a streaming query is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub keyspace: String,
    pub shard: String,
    pub tablet_type: TabletType,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.keyspace, self.shard, self.tablet_type)
    }
}

/// Column metadata of a result stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub type_name: String,
}

/// One message of a result stream. Only the first batch of a stream carries
/// `fields`; later batches carry rows only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultBatch {
    pub fields: Vec<Field>,
    pub rows: Vec<Row>,
}

impl ResultBatch {
    pub fn from_fields(fields: Vec<Field>) -> Self {
        Self {
            fields,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            fields: Vec::new(),
            rows,
        }
    }
}

/// Source of tablets for one shard.
///
/// Shared by every reader scanning the shard, so implementations must be safe
/// for concurrent `get_tablet`/`return_tablet` calls.
#[async_trait]
pub trait TabletProvider: Send + Sync {
    /// A tablet to run the next streaming query against. Errors are treated as
    /// transient (no healthy tablet yet, topology lagging).
    async fn get_tablet(&self) -> anyhow::Result<Tablet>;

    /// Hand a tablet back once its connection is closed.
    async fn return_tablet(&self, tablet: Tablet);

    /// Human-readable description used in error messages.
    fn description(&self) -> String;
}

/// Opens connections to tablets.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Errors are treated as configuration defects and are not retried.
    async fn dial(&self, tablet: &Tablet) -> anyhow::Result<Box<dyn TabletConn>>;

    /// Whether connections from this dialer can stream inside a transaction.
    fn supports_transactions(&self) -> bool {
        true
    }
}

/// A live connection to one tablet.
#[async_trait]
pub trait TabletConn: Send + Sync {
    /// Start an ordered streaming scan. With `tx_id` the scan runs inside that
    /// transaction.
    async fn stream_execute(
        &self,
        target: &Target,
        query: &ScanQuery,
        tx_id: Option<i64>,
    ) -> anyhow::Result<Box<dyn ResultStream>>;

    async fn close(&self);
}

/// Results of one streaming query.
#[async_trait]
pub trait ResultStream: Send {
    /// Next batch, `Ok(None)` at end of stream.
    async fn recv(&mut self) -> anyhow::Result<Option<ResultBatch>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tablet_type_defaults_to_replica() {
        let tablet: Tablet = serde_json::from_str(
            r#"{"alias": "zone1-101", "keyspace": "commerce", "shard": "-80", "address": "postgres://db/commerce"}"#,
        )
        .unwrap();
        assert_eq!(tablet.tablet_type, TabletType::Replica);
    }

    #[test]
    fn test_target_display() {
        let tablet: Tablet = serde_json::from_str(
            r#"{"alias": "zone1-101", "keyspace": "commerce", "shard": "-80", "tablet_type": "rdonly", "address": ""}"#,
        )
        .unwrap();
        assert_eq!(tablet.target().to_string(), "commerce/-80 (RDONLY)");
    }
}
