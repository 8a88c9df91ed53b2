//! Per-connector counters and checkpoint timestamps.
//!
//! Counters feed the observability views and the flow-control heuristics.
//! They are ephemeral by design: reset on demand, not persisted. Quiescence
//! detection is a debounce heuristic layered on top — if a connector's full
//! stats tuple is unchanged across K consecutive polls the session counts
//! as settled. Advisory only; there is no push-based completion signal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Counter and checkpoint snapshot for one connector.
///
/// The three checkpoint pairs record the first/last event of the most
/// recently committed batch at source-commit, pipeline-receipt and
/// sink-commit time, all millisecond epochs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorStats {
    /// Tables copied by the initial snapshot.
    pub tables_migrated: u64,
    /// Rows copied by the initial snapshot (READ events).
    pub rows_migrated: u64,
    pub ddls: u64,
    pub dmls: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub bad_events: u64,
    pub total_events: u64,
    pub batches_done: u64,
    pub snapshot_begin_ms: Option<i64>,
    pub snapshot_end_ms: Option<i64>,
    pub first_src_ts_ms: Option<i64>,
    pub first_recv_ts_ms: Option<i64>,
    pub first_sink_ts_ms: Option<i64>,
    pub last_src_ts_ms: Option<i64>,
    pub last_recv_ts_ms: Option<i64>,
    pub last_sink_ts_ms: Option<i64>,
}

impl ConnectorStats {
    /// Derived average batch size: dmls per completed batch.
    pub fn avg_batch_size(&self) -> u64 {
        if self.batches_done == 0 {
            0
        } else {
            self.dmls / self.batches_done
        }
    }
}

/// Outcome of one committed batch, folded into the counters.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub reads: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub ddls: u64,
    pub bad_events: u64,
    pub first_src_ts_ms: Option<i64>,
    pub last_src_ts_ms: Option<i64>,
    pub first_recv_ts_ms: Option<i64>,
    pub last_recv_ts_ms: Option<i64>,
    pub sink_ts_ms: i64,
}

#[derive(Default)]
struct Entry {
    stats: ConnectorStats,
    settle_last: Option<ConnectorStats>,
    settle_streak: u32,
}

/// Shared collector, one slot per connector. Cheap to clone.
#[derive(Clone, Default)]
pub struct StatsCollector {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> ConnectorStats {
        let map = self.inner.lock().unwrap();
        map.get(name).map(|e| e.stats.clone()).unwrap_or_default()
    }

    /// Zero all counters and clear all timestamps, leaving connector state
    /// untouched.
    pub fn reset(&self, name: &str) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(name.to_string()).or_default();
        entry.stats = ConnectorStats::default();
        entry.settle_last = None;
        entry.settle_streak = 0;
        info!(name, "statistics reset");
    }

    pub fn snapshot_begun(&self, name: &str, now_ms: i64) {
        self.update(name, |s| {
            s.snapshot_begin_ms.get_or_insert(now_ms);
        });
    }

    /// Row counts arrive through `record_batch` as reads; this only marks
    /// the table as fully copied.
    pub fn snapshot_table_done(&self, name: &str) {
        self.update(name, |s| {
            s.tables_migrated += 1;
        });
    }

    pub fn snapshot_finished(&self, name: &str, now_ms: i64) {
        self.update(name, |s| {
            s.snapshot_end_ms = Some(now_ms);
        });
    }

    /// Fold one committed batch into the counters and overwrite the
    /// checkpoint pairs with this batch's first/last events.
    pub fn record_batch(&self, name: &str, outcome: &BatchOutcome) {
        self.update(name, |s| {
            s.creates += outcome.creates;
            s.updates += outcome.updates;
            s.deletes += outcome.deletes;
            s.rows_migrated += outcome.reads;
            s.ddls += outcome.ddls;
            s.dmls += outcome.creates + outcome.updates + outcome.deletes;
            s.bad_events += outcome.bad_events;
            s.total_events += outcome.reads
                + outcome.creates
                + outcome.updates
                + outcome.deletes
                + outcome.ddls
                + outcome.bad_events;
            s.batches_done += 1;
            if outcome.first_src_ts_ms.is_some() {
                s.first_src_ts_ms = outcome.first_src_ts_ms;
                s.last_src_ts_ms = outcome.last_src_ts_ms;
            }
            if outcome.first_recv_ts_ms.is_some() {
                s.first_recv_ts_ms = outcome.first_recv_ts_ms;
                s.last_recv_ts_ms = outcome.last_recv_ts_ms;
                s.first_sink_ts_ms = Some(outcome.sink_ts_ms);
                s.last_sink_ts_ms = Some(outcome.sink_ts_ms);
            }
        });
    }

    pub fn bump_bad_event(&self, name: &str) {
        self.update(name, |s| {
            s.bad_events += 1;
            s.total_events += 1;
        });
    }

    /// Debounce probe: returns true once the stats tuple has been unchanged
    /// for `k` consecutive calls. Each call is one polling interval from the
    /// caller's point of view.
    pub fn settled(&self, name: &str, k: u32) -> bool {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(name.to_string()).or_default();
        if entry.settle_last.as_ref() == Some(&entry.stats) {
            entry.settle_streak += 1;
        } else {
            entry.settle_last = Some(entry.stats.clone());
            entry.settle_streak = 0;
        }
        entry.settle_streak >= k
    }

    /// Drop the slot entirely (on del_conninfo).
    pub fn remove(&self, name: &str) {
        self.inner.lock().unwrap().remove(name);
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut ConnectorStats)) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(name.to_string()).or_default();
        f(&mut entry.stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_accumulation_and_average() {
        let stats = StatsCollector::new();
        stats.record_batch(
            "c1",
            &BatchOutcome {
                creates: 6,
                updates: 2,
                deletes: 2,
                first_src_ts_ms: Some(100),
                last_src_ts_ms: Some(200),
                first_recv_ts_ms: Some(110),
                last_recv_ts_ms: Some(210),
                sink_ts_ms: 250,
                ..Default::default()
            },
        );
        stats.record_batch(
            "c1",
            &BatchOutcome {
                creates: 10,
                ..Default::default()
            },
        );
        let s = stats.get("c1");
        assert_eq!(s.dmls, 20);
        assert_eq!(s.batches_done, 2);
        assert_eq!(s.avg_batch_size(), 10);
        assert_eq!(s.creates, 16);
        // second batch carried no timestamps, first batch's survive
        assert_eq!(s.first_src_ts_ms, Some(100));
        assert_eq!(s.last_sink_ts_ms, Some(250));
    }

    #[test]
    fn test_reset_clears_everything() {
        let stats = StatsCollector::new();
        stats.snapshot_begun("c1", 1);
        stats.snapshot_table_done("c1");
        stats.record_batch(
            "c1",
            &BatchOutcome {
                creates: 1,
                first_recv_ts_ms: Some(5),
                last_recv_ts_ms: Some(6),
                sink_ts_ms: 7,
                ..Default::default()
            },
        );
        stats.reset("c1");
        assert_eq!(stats.get("c1"), ConnectorStats::default());
    }

    #[test]
    fn test_settle_debounce() {
        let stats = StatsCollector::new();
        stats.record_batch("c1", &BatchOutcome { creates: 1, ..Default::default() });

        assert!(!stats.settled("c1", 3)); // first observation
        assert!(!stats.settled("c1", 3));
        assert!(!stats.settled("c1", 3));
        assert!(stats.settled("c1", 3));

        // any change restarts the streak
        stats.record_batch("c1", &BatchOutcome { creates: 1, ..Default::default() });
        assert!(!stats.settled("c1", 3));
    }
}
