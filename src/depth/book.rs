use std::collections::{BTreeMap, VecDeque};

use log::{error, info};
use rust_decimal::Decimal;

use crate::models::{DepthSnapshot, DepthUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthStatus {
    /// Held until a snapshot arrives.
    Queued,
    Applied,
    /// Older than the book or not yet bridging the snapshot.
    Skipped,
    /// Sequence broken; the book was cleared and needs a new snapshot.
    Gap { missing: i64 },
}

/// Local order book kept in sync from a snapshot plus diff updates.
#[derive(Debug, Clone)]
pub struct DepthBook {
    limit: usize,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: i64,
    snapshot_set: bool,
    first_update_processed: bool,
    queue: VecDeque<DepthUpdate>,
}

impl DepthBook {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            snapshot_set: false,
            first_update_processed: false,
            queue: VecDeque::new(),
        }
    }

    pub fn last_update_id(&self) -> i64 {
        self.last_update_id
    }

    pub fn is_synced(&self) -> bool {
        self.snapshot_set
    }

    /// Bids from best (highest) to worst.
    pub fn bids(&self) -> impl Iterator<Item = (&Decimal, &Decimal)> {
        self.bids.iter().rev()
    }

    /// Asks from best (lowest) to worst.
    pub fn asks(&self) -> impl Iterator<Item = (&Decimal, &Decimal)> {
        self.asks.iter()
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Replaces the book and replays updates received in the meantime.
    /// Returns the status of the last replayed update, if any.
    pub fn set_snapshot(&mut self, snapshot: &DepthSnapshot) -> Option<DepthStatus> {
        self.bids.clear();
        self.asks.clear();
        self.apply_levels(&snapshot.bids, true);
        self.apply_levels(&snapshot.asks, false);

        self.last_update_id = snapshot.last_update_id;
        self.snapshot_set = true;
        self.first_update_processed = false;
        info!("Depth: snapshot set");

        let mut status = None;
        while let Some(update) = self.queue.pop_front() {
            let result = self.update(update);
            status = Some(result);
            if matches!(result, DepthStatus::Gap { .. }) {
                break;
            }
        }
        status
    }

    pub fn update(&mut self, update: DepthUpdate) -> DepthStatus {
        if !self.snapshot_set {
            self.queue.push_back(update);
            return DepthStatus::Queued;
        }

        if self.first_update_processed {
            if update.first_update_id != self.last_update_id + 1 {
                let missing = update.first_update_id - (self.last_update_id + 1);
                error!("Missing {} depth updates!", missing);
                self.reset();
                return DepthStatus::Gap { missing };
            }
            self.apply(&update);
            return DepthStatus::Applied;
        }

        if update.last_update_id <= self.last_update_id {
            return DepthStatus::Skipped;
        }

        let next = self.last_update_id + 1;
        if self.last_update_id == 0 || (update.first_update_id <= next && next <= update.last_update_id) {
            self.apply(&update);
            self.first_update_processed = true;
            return DepthStatus::Applied;
        }

        DepthStatus::Skipped
    }

    fn reset(&mut self) {
        self.last_update_id = 0;
        self.snapshot_set = false;
        self.first_update_processed = false;
        self.bids.clear();
        self.asks.clear();
        self.queue.clear();
    }

    fn apply(&mut self, update: &DepthUpdate) {
        self.apply_levels(&update.bids, true);
        self.apply_levels(&update.asks, false);
        self.last_update_id = update.last_update_id;
    }

    fn apply_levels(&mut self, levels: &[[Decimal; 2]], is_bid: bool) {
        let side = if is_bid { &mut self.bids } else { &mut self.asks };
        for [price, quantity] in levels {
            if quantity.is_zero() {
                side.remove(price);
            } else {
                side.insert(*price, *quantity);
            }
        }

        // keep only the best levels
        while side.len() > self.limit && self.limit > 0 {
            if is_bid {
                side.pop_first();
            } else {
                side.pop_last();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn update(first: i64, last: i64, bids: Vec<[Decimal; 2]>, asks: Vec<[Decimal; 2]>) -> DepthUpdate {
        DepthUpdate {
            symbol: "BTCUSDT".into(),
            first_update_id: first,
            last_update_id: last,
            bids,
            asks,
            timestamp: 0,
        }
    }

    fn snapshot(last_update_id: i64) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id,
            bids: vec![[dec!(100), dec!(1)], [dec!(99), dec!(2)]],
            asks: vec![[dec!(101), dec!(1)], [dec!(102), dec!(2)]],
        }
    }

    #[test]
    fn test_updates_queue_until_snapshot() {
        let mut book = DepthBook::new(10);
        assert_eq!(book.update(update(5, 8, vec![], vec![])), DepthStatus::Queued);
        assert_eq!(book.update(update(9, 12, vec![[dec!(100.5), dec!(3)]], vec![])), DepthStatus::Queued);

        // first queued update is older than the snapshot, second bridges it
        assert_eq!(book.set_snapshot(&snapshot(10)), Some(DepthStatus::Applied));
        assert_eq!(book.best_bid(), Some(dec!(100.5)));
        assert_eq!(book.last_update_id(), 12);
    }

    #[test]
    fn test_sequence_gap_clears_book() {
        let mut book = DepthBook::new(10);
        book.set_snapshot(&snapshot(10));
        assert_eq!(book.update(update(10, 11, vec![], vec![])), DepthStatus::Applied);
        assert_eq!(book.update(update(12, 13, vec![], vec![])), DepthStatus::Applied);
        assert_eq!(book.update(update(17, 18, vec![], vec![])), DepthStatus::Gap { missing: 3 });
        assert!(!book.is_synced());
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_zero_quantity_removes_level() {
        let mut book = DepthBook::new(10);
        book.set_snapshot(&snapshot(1));
        book.update(update(2, 2, vec![[dec!(100), dec!(0)]], vec![[dec!(101), Decimal::ZERO]]));
        assert_eq!(book.best_bid(), Some(dec!(99)));
        assert_eq!(book.best_ask(), Some(dec!(102)));
    }

    #[test]
    fn test_limit_keeps_best_levels() {
        let mut book = DepthBook::new(2);
        book.set_snapshot(&snapshot(1));
        book.update(update(2, 2, vec![[dec!(98), dec!(5)], [dec!(100.2), dec!(1)]], vec![[dec!(100.8), dec!(1)]]));

        let bids: Vec<Decimal> = book.bids().map(|(p, _)| *p).collect();
        let asks: Vec<Decimal> = book.asks().map(|(p, _)| *p).collect();
        assert_eq!(bids, vec![dec!(100.2), dec!(100)]);
        assert_eq!(asks, vec![dec!(100.8), dec!(101)]);
    }

    #[test]
    fn test_stale_first_update_is_skipped() {
        let mut book = DepthBook::new(10);
        book.set_snapshot(&snapshot(20));
        assert_eq!(book.update(update(15, 19, vec![], vec![])), DepthStatus::Skipped);
        // does not bridge the snapshot either
        assert_eq!(book.update(update(25, 30, vec![], vec![])), DepthStatus::Skipped);
        assert_eq!(book.update(update(19, 22, vec![], vec![])), DepthStatus::Applied);
    }
}
