//! Incremental order-book state from snapshot + diff stream.
//!
//! Keeps `BTreeMap<Decimal, Decimal>` for bids/asks to get correct numeric
//! ordering and exact zero-quantity detection. Prices sort numerically,
//! not lexicographically, and a level with quantity `"0.00000000"` is
//! evicted rather than kept at face value.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

/// A single snapshot response: `lastUpdateId` plus full bid/ask levels.
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
}

/// A single `depthUpdate` stream frame.
pub struct DepthUpdate {
    pub final_update_id: u64,
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
}

/// Reverse ordering so the natural `BTreeMap` iteration order is descending
/// by price, exactly what bids need for `formatted()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reverse(Decimal);

impl PartialOrd for Reverse {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reverse {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.0.cmp(&self.0)
    }
}

/// Per-channel order book, attached to detail channels.
///
/// Invariant: after a valid snapshot + update sequence, `last_update_id` is
/// monotonically increasing, and levels that reach zero quantity are
/// evicted rather than retained at zero.
pub struct DepthCache {
    last_update_id: u64,
    bids: BTreeMap<Reverse, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl DepthCache {
    pub fn new() -> Self {
        Self {
            last_update_id: 0,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Replaces bids/asks wholesale with the snapshot's entries (qty > 0
    /// only) and sets `last_update_id`.
    pub fn snapshot(&mut self, snapshot: DepthSnapshot) {
        self.last_update_id = snapshot.last_update_id;
        self.bids.clear();
        self.asks.clear();

        for (price, qty) in snapshot.bids {
            if let (Ok(p), Ok(q)) = (Decimal::from_str(&price), Decimal::from_str(&qty)) {
                if q > Decimal::ZERO {
                    self.bids.insert(Reverse(p), q);
                }
            }
        }
        for (price, qty) in snapshot.asks {
            if let (Ok(p), Ok(q)) = (Decimal::from_str(&price), Decimal::from_str(&qty)) {
                if q > Decimal::ZERO {
                    self.asks.insert(p, q);
                }
            }
        }
    }

    /// Applies an incremental update. Drops the frame if it is stale
    /// (`final_update_id <= last_update_id`); otherwise upserts each level,
    /// evicting zero-quantity entries, and advances `last_update_id`.
    pub fn update(&mut self, update: DepthUpdate) {
        if update.final_update_id <= self.last_update_id {
            return;
        }

        for (price, qty) in update.bids {
            if let (Ok(p), Ok(q)) = (Decimal::from_str(&price), Decimal::from_str(&qty)) {
                if q == Decimal::ZERO {
                    self.bids.remove(&Reverse(p));
                } else {
                    self.bids.insert(Reverse(p), q);
                }
            }
        }
        for (price, qty) in update.asks {
            if let (Ok(p), Ok(q)) = (Decimal::from_str(&price), Decimal::from_str(&qty)) {
                if q == Decimal::ZERO {
                    self.asks.remove(&p);
                } else {
                    self.asks.insert(p, q);
                }
            }
        }

        self.last_update_id = update.final_update_id;
    }

    /// Returns bids sorted descending by price, asks ascending, both as the
    /// exchange's own decimal-string precision (not re-formatted).
    pub fn formatted(&self) -> (Vec<(String, String)>, Vec<(String, String)>) {
        let bids = self
            .bids
            .iter()
            .map(|(Reverse(price), qty)| (price.to_string(), qty.to_string()))
            .collect();
        let asks = self
            .asks
            .iter()
            .map(|(price, qty)| (price.to_string(), qty.to_string()))
            .collect();
        (bids, asks)
    }
}

impl Default for DepthCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(p, q)| (p.to_string(), q.to_string()))
            .collect()
    }

    #[test]
    fn snapshot_drops_zero_quantity_entries() {
        let mut cache = DepthCache::new();
        cache.snapshot(DepthSnapshot {
            last_update_id: 10,
            bids: entries(&[("100.0", "1.0"), ("99.0", "0.0")]),
            asks: entries(&[("101.0", "2.0")]),
        });
        let (bids, _) = cache.formatted();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].0, "100.0");
    }

    #[test]
    fn update_dropped_when_stale() {
        let mut cache = DepthCache::new();
        cache.snapshot(DepthSnapshot {
            last_update_id: 10,
            bids: entries(&[("100.0", "1.0")]),
            asks: vec![],
        });
        cache.update(DepthUpdate {
            final_update_id: 10,
            bids: entries(&[("100.0", "5.0")]),
            asks: vec![],
        });
        let (bids, _) = cache.formatted();
        assert_eq!(bids[0].1, "1.0");
        assert_eq!(cache.last_update_id(), 10);
    }

    #[test]
    fn update_advances_and_evicts_zero_qty() {
        let mut cache = DepthCache::new();
        cache.snapshot(DepthSnapshot {
            last_update_id: 10,
            bids: entries(&[("100.0", "1.0")]),
            asks: vec![],
        });
        cache.update(DepthUpdate {
            final_update_id: 11,
            bids: entries(&[("100.0", "0"), ("99.5", "3.0")]),
            asks: vec![],
        });
        let (bids, _) = cache.formatted();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].0, "99.5");
        assert_eq!(cache.last_update_id(), 11);
    }

    #[test]
    fn formatted_sorts_numerically_not_lexicographically() {
        let mut cache = DepthCache::new();
        cache.snapshot(DepthSnapshot {
            last_update_id: 1,
            bids: entries(&[("9.0", "1"), ("10.0", "1"), ("100.0", "1")]),
            asks: entries(&[("9.0", "1"), ("10.0", "1"), ("100.0", "1")]),
        });
        let (bids, asks) = cache.formatted();
        // Descending bids
        assert_eq!(
            bids.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
            vec!["100.0", "10.0", "9.0"]
        );
        // Ascending asks
        assert_eq!(
            asks.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
            vec!["9.0", "10.0", "100.0"]
        );
    }

    #[test]
    fn last_update_id_monotonic_across_updates() {
        let mut cache = DepthCache::new();
        cache.snapshot(DepthSnapshot {
            last_update_id: 5,
            bids: vec![],
            asks: vec![],
        });
        cache.update(DepthUpdate {
            final_update_id: 6,
            bids: vec![],
            asks: vec![],
        });
        cache.update(DepthUpdate {
            final_update_id: 7,
            bids: vec![],
            asks: vec![],
        });
        assert_eq!(cache.last_update_id(), 7);
    }
}
