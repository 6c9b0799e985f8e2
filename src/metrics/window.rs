use dashmap::DashMap;
use std::collections::VecDeque;

use super::types::{MetricType, TransactionMetric};

/// Bounded, insertion-ordered buffer of recent events for one
/// (entity, metric type). Oldest entries are evicted FIFO on overflow.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    entries: VecDeque<TransactionMetric>,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a metric, evicting the oldest entry when full. O(1) amortized.
    pub fn push(&mut self, metric: TransactionMetric) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(metric);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owned copy of the window contents, oldest first. Detectors read
    /// snapshots and never mutate the window.
    pub fn snapshot(&self) -> Vec<TransactionMetric> {
        self.entries.iter().cloned().collect()
    }
}

/// All sliding windows, keyed by (entity, metric type). Mutation for one
/// entity is serialized by the engine's keyed entity lock; distinct
/// entities update in parallel.
pub struct WindowStore {
    capacity: usize,
    windows: DashMap<(String, MetricType), SlidingWindow>,
}

impl WindowStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            windows: DashMap::new(),
        }
    }

    /// Append a metric to its window and return a snapshot including it.
    pub fn push(&self, metric: TransactionMetric) -> Vec<TransactionMetric> {
        let key = (metric.entity_id.clone(), metric.metric_type);
        let mut window = self
            .windows
            .entry(key)
            .or_insert_with(|| SlidingWindow::new(self.capacity));
        window.push(metric);
        window.snapshot()
    }

    pub fn len(&self, entity_id: &str, metric_type: MetricType) -> usize {
        self.windows
            .get(&(entity_id.to_string(), metric_type))
            .map(|w| w.len())
            .unwrap_or(0)
    }

    pub fn entity_count(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metric(n: u32) -> TransactionMetric {
        TransactionMetric {
            entity_id: "U1".to_string(),
            transaction_id: format!("tx-{}", n),
            metric_type: MetricType::Transaction,
            amount: n as f64,
            currency: "USD".to_string(),
            category: "misc".to_string(),
            merchant_id: None,
            location: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = SlidingWindow::new(5);
        for n in 0..12 {
            window.push(metric(n));
            assert!(window.len() <= 5);
        }
        // Exactly the most recent 5 remain, oldest evicted first.
        let ids: Vec<String> = window
            .snapshot()
            .iter()
            .map(|m| m.transaction_id.clone())
            .collect();
        assert_eq!(ids, vec!["tx-7", "tx-8", "tx-9", "tx-10", "tx-11"]);
    }

    #[test]
    fn test_store_snapshot_includes_new_metric() {
        let store = WindowStore::new(3);
        let snapshot = store.push(metric(1));
        assert_eq!(snapshot.len(), 1);
        let snapshot = store.push(metric(2));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.last().unwrap().transaction_id, "tx-2");
    }

    #[test]
    fn test_store_keys_by_metric_type() {
        let store = WindowStore::new(10);
        let mut payment = metric(1);
        payment.metric_type = MetricType::Payment;
        store.push(metric(0));
        store.push(payment);
        assert_eq!(store.len("U1", MetricType::Transaction), 1);
        assert_eq!(store.len("U1", MetricType::Payment), 1);
        assert_eq!(store.len("U2", MetricType::Transaction), 0);
    }
}
