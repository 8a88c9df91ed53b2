//! Change-event batching.
//!
//! Streaming commits batch-at-a-time: events accumulate until either the
//! size threshold or the age threshold trips, then the whole batch becomes
//! one target transaction. Pause, stop and reload all synchronize on these
//! boundaries.

use crate::source::SourceEvent;
use std::time::{Duration, Instant};

/// One event together with its pipeline-receipt timestamp.
#[derive(Debug, Clone)]
pub struct StagedEvent {
    pub event: SourceEvent,
    pub recv_ts_ms: i64,
}

/// A drained batch, numbered in commit order within the worker session.
#[derive(Debug)]
pub struct EventBatch {
    pub sequence: u64,
    pub events: Vec<StagedEvent>,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub max_events: usize,
    pub max_delay: Duration,
}

/// Size- and age-bounded event accumulator.
pub struct Batcher {
    config: BatchConfig,
    buf: Vec<StagedEvent>,
    first_at: Option<Instant>,
    next_sequence: u64,
}

impl Batcher {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            buf: Vec::new(),
            first_at: None,
            next_sequence: 0,
        }
    }

    /// Stage one event. Returns a full batch when the size threshold trips.
    pub fn push(&mut self, staged: StagedEvent) -> Option<EventBatch> {
        if self.buf.is_empty() {
            self.first_at = Some(Instant::now());
        }
        self.buf.push(staged);
        if self.buf.len() >= self.config.max_events {
            self.flush()
        } else {
            None
        }
    }

    /// Whether the oldest staged event has waited past the age threshold.
    pub fn due(&self) -> bool {
        match self.first_at {
            Some(t) if !self.buf.is_empty() => t.elapsed() >= self.config.max_delay,
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drain whatever is staged, empty or not-due included.
    pub fn flush(&mut self) -> Option<EventBatch> {
        if self.buf.is_empty() {
            return None;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.first_at = None;
        Some(EventBatch {
            sequence,
            events: std::mem::take(&mut self.buf),
        })
    }

    /// Reserve a sequence number for a batch built outside the accumulator
    /// (schema and snapshot batches).
    pub fn reserve_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Row, RowEvent, RowOp};
    use serde_json::json;

    fn staged(i: i64) -> StagedEvent {
        StagedEvent {
            event: SourceEvent::Row(RowEvent {
                table: "db.t".into(),
                op: RowOp::Create,
                before: None,
                after: Some(Row::from_iter([("id".into(), json!(i))])),
                src_ts_ms: i,
            }),
            recv_ts_ms: i + 1,
        }
    }

    #[test]
    fn test_size_threshold_flushes() {
        let mut batcher = Batcher::new(BatchConfig {
            max_events: 3,
            max_delay: Duration::from_secs(60),
        });
        assert!(batcher.push(staged(0)).is_none());
        assert!(batcher.push(staged(1)).is_none());
        let batch = batcher.push(staged(2)).unwrap();
        assert_eq!(batch.events.len(), 3);
        assert_eq!(batch.sequence, 0);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_age_threshold() {
        let mut batcher = Batcher::new(BatchConfig {
            max_events: 100,
            max_delay: Duration::from_millis(0),
        });
        assert!(!batcher.due());
        batcher.push(staged(0));
        assert!(batcher.due());
        let batch = batcher.flush().unwrap();
        assert_eq!(batch.events.len(), 1);
        assert!(!batcher.due());
    }

    #[test]
    fn test_sequences_are_shared_with_reservations() {
        let mut batcher = Batcher::new(BatchConfig {
            max_events: 1,
            max_delay: Duration::from_secs(60),
        });
        assert_eq!(batcher.reserve_sequence(), 0);
        let batch = batcher.push(staged(0)).unwrap();
        assert_eq!(batch.sequence, 1);
        assert_eq!(batcher.reserve_sequence(), 2);
    }

    #[test]
    fn test_flush_empty_is_none() {
        let mut batcher = Batcher::new(BatchConfig {
            max_events: 3,
            max_delay: Duration::from_secs(60),
        });
        assert!(batcher.flush().is_none());
    }
}
