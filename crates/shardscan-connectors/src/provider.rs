//! Tablet provider over a fixed list of tablets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::tablet::{Tablet, TabletProvider};

/// Hands out the tablets of one shard in round-robin order.
///
/// Consecutive `get_tablet` calls rotate through the list, so a reader that
/// fails over lands on the next tablet. Handed-out tablets are counted until
/// they come back.
pub struct StaticTabletProvider {
    description: String,
    tablets: Vec<Tablet>,
    next: AtomicUsize,
    in_use: Mutex<HashMap<String, usize>>,
}

impl StaticTabletProvider {
    pub fn new(description: impl Into<String>, tablets: Vec<Tablet>) -> Self {
        Self {
            description: description.into(),
            tablets,
            next: AtomicUsize::new(0),
            in_use: Mutex::new(HashMap::new()),
        }
    }

    /// Provider for every tablet of `keyspace/shard` in `tablets`.
    pub fn for_shard(keyspace: &str, shard: &str, tablets: &[Tablet]) -> Self {
        let selected = tablets
            .iter()
            .filter(|t| t.keyspace == keyspace && t.shard == shard)
            .cloned()
            .collect::<Vec<_>>();
        let tablet_type = selected
            .first()
            .map(|t| t.tablet_type.to_string().to_lowercase())
            .unwrap_or_else(|| "any".to_string());
        Self::new(format!("shard {}/{} ({})", keyspace, shard, tablet_type), selected)
    }

    /// Number of handed-out copies of `alias` not yet returned.
    pub fn in_use(&self, alias: &str) -> usize {
        self.in_use
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .copied()
            .unwrap_or(0)
    }

    pub fn tablets(&self) -> &[Tablet] {
        &self.tablets
    }
}

#[async_trait]
impl TabletProvider for StaticTabletProvider {
    async fn get_tablet(&self) -> anyhow::Result<Tablet> {
        if self.tablets.is_empty() {
            anyhow::bail!("{}: no tablets available", self.description);
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.tablets.len();
        let tablet = self.tablets[i].clone();
        *self
            .in_use
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tablet.alias.clone())
            .or_default() += 1;
        debug!("{}: handing out tablet={}", self.description, tablet.alias);
        Ok(tablet)
    }

    async fn return_tablet(&self, tablet: Tablet) {
        let mut in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(n) = in_use.get_mut(&tablet.alias) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                in_use.remove(&tablet.alias);
            }
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}
