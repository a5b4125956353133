//! Symbol→ticker table with a stable positional index.
//!
//! Grounded in the sibling example repo's `OrderBookManager`
//! (`Arc<RwLock<HashMap<...>>>`) for the single-writer/many-reader shape:
//! ticker broadcast reads vastly outnumber the upsert writes from the
//! ticker supervisor.

use std::collections::HashMap;
use tokio::sync::RwLock;

/// One row of the 24hr ticker table, keyed by `symbol`.
#[derive(Debug, Clone)]
pub struct TickerEntry {
    pub symbol: String,
    pub last_price: String,
    pub price_change_percent: String,
}

#[derive(Default)]
struct Inner {
    entries: Vec<TickerEntry>,
    index_by_symbol: HashMap<String, usize>,
}

/// Invariant: once assigned, a symbol's positional index never changes.
/// Consumers may treat `ticker_update.index` as a stable broadcast hint.
pub struct TickerCache {
    inner: RwLock<Inner>,
}

impl TickerCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Inserts or updates `entry`, returning its positional index. The index
    /// is assigned once, at first insertion, and never reused or reassigned.
    pub async fn upsert(&self, entry: TickerEntry) -> usize {
        let mut inner = self.inner.write().await;
        if let Some(&index) = inner.index_by_symbol.get(&entry.symbol) {
            inner.entries[index] = entry;
            index
        } else {
            let index = inner.entries.len();
            inner.index_by_symbol.insert(entry.symbol.clone(), index);
            inner.entries.push(entry);
            index
        }
    }

    pub async fn get(&self, symbol: &str) -> Option<TickerEntry> {
        let inner = self.inner.read().await;
        inner
            .index_by_symbol
            .get(symbol)
            .map(|&i| inner.entries[i].clone())
    }

    pub async fn snapshot(&self) -> Vec<TickerEntry> {
        self.inner.read().await.entries.clone()
    }
}

impl Default for TickerCache {
    fn default() -> Self {
        Self::new()
    }
}
