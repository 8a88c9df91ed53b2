//! Adapter attachment points.
//!
//! Vendor-specific log readers (binlog parser, transaction-log miner, log
//! replicator client) live outside this crate. They deliver their output
//! through a [`SourceEndpoint`]: table definitions and existing rows for the
//! snapshot phase, and an ordered change-event queue for streaming. The
//! [`SourceHub`] maps connector names to endpoints so a worker can find its
//! feed at open time.
//!
//! The endpoint is also the natural test seam: integration tests script one
//! directly.

use crate::source::{Row, SourceEvent, TableDef};
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct EndpointState {
    tables: Vec<TableDef>,
    snapshot_rows: HashMap<String, Vec<Row>>,
    events: VecDeque<SourceEvent>,
    fail_sessions: u32,
    fail_reads: u32,
    sessions: u32,
}

/// One adapter's feed for one connector. Cheap to clone; all clones share
/// state.
#[derive(Clone, Default)]
pub struct SourceEndpoint {
    inner: Arc<Mutex<EndpointState>>,
}

impl SourceEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a source table visible to `read_schema`.
    pub fn define_table(&self, def: TableDef) {
        let mut state = self.inner.lock().unwrap();
        state.tables.retain(|t| t.name != def.name);
        state.tables.push(def);
    }

    /// Append one existing row served to the snapshot phase.
    pub fn load_row(&self, table: &str, row: Row) {
        let mut state = self.inner.lock().unwrap();
        state
            .snapshot_rows
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Queue a change event for the streaming phase.
    pub fn push(&self, event: SourceEvent) {
        self.inner.lock().unwrap().events.push_back(event);
    }

    /// Make the next `n` session openings fail, to exercise retry paths.
    pub fn fail_next_sessions(&self, n: u32) {
        self.inner.lock().unwrap().fail_sessions = n;
    }

    /// Make the next `n` event reads fail with a connection error.
    pub fn fail_next_reads(&self, n: u32) {
        self.inner.lock().unwrap().fail_reads = n;
    }

    /// Sessions opened so far (one per worker open, including retries).
    pub fn session_count(&self) -> u32 {
        self.inner.lock().unwrap().sessions
    }

    pub(crate) fn begin_session(&self) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.sessions += 1;
        if state.fail_sessions > 0 {
            state.fail_sessions -= 1;
            return Err(Error::Connection("source refused session".into()));
        }
        Ok(())
    }

    pub(crate) fn schema(&self) -> Vec<TableDef> {
        self.inner.lock().unwrap().tables.clone()
    }

    pub(crate) fn snapshot_chunk(&self, table: &str, offset: usize, max: usize) -> Vec<Row> {
        let state = self.inner.lock().unwrap();
        match state.snapshot_rows.get(table) {
            Some(rows) if offset < rows.len() => {
                let end = (offset + max).min(rows.len());
                rows[offset..end].to_vec()
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn next_event(&self) -> Result<Option<SourceEvent>> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(Error::Connection("source stream interrupted".into()));
        }
        Ok(state.events.pop_front())
    }
}

/// Registry of attached adapter endpoints, keyed by connector name.
#[derive(Clone, Default)]
pub struct SourceHub {
    inner: Arc<Mutex<HashMap<String, SourceEndpoint>>>,
}

impl SourceHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, connector: &str, endpoint: SourceEndpoint) {
        self.inner
            .lock()
            .unwrap()
            .insert(connector.to_string(), endpoint);
    }

    pub fn detach(&self, connector: &str) {
        self.inner.lock().unwrap().remove(connector);
    }

    pub fn get(&self, connector: &str) -> Option<SourceEndpoint> {
        self.inner.lock().unwrap().get(connector).cloned()
    }
}
