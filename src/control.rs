//! Control plane: the command-and-view surface the outer SQL layer calls.
//!
//! Every command validates against persisted registries, transitions the
//! named connector's worker, and returns `Ok(())` on success; callers that
//! need the numeric completion code map errors through [`Error::code`],
//! with `0` for success. Commands targeting the same connector serialize on
//! the worker registry lock, so transitions are observed in call order.

use crate::config::EngineConfig;
use crate::conninfo::{ConnInfoStore, ConnectionInfo, ExtraConnectionInfo, OlrConnectionInfo};
use crate::engine::{
    allocate_pid, spawn, Command, ConnectorShared, ConnectorState, SnapshotMode,
};
use crate::objmap::{AttributeMapping, MapKind, ObjectMapEntry, ObjectMappingStore};
use crate::source::SourceHub;
use crate::stats::{ConnectorStats, StatsCollector};
use crate::target::TargetExecutor;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct WorkerHandle {
    shared: Arc<ConnectorShared>,
    tx: mpsc::Sender<Command>,
    join: JoinHandle<()>,
}

/// One row of the connector state view. Every registered connection appears,
/// running or not.
#[derive(Debug, Clone, Serialize)]
pub struct StateRow {
    pub name: String,
    pub connector_type: String,
    pub pid: i32,
    pub stage: String,
    pub state: String,
    pub err: String,
}

/// Snapshot-phase counters for one connector.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatsRow {
    pub name: String,
    pub tables_migrated: u64,
    pub rows_migrated: u64,
    pub snapshot_begin_ms: Option<i64>,
    pub snapshot_end_ms: Option<i64>,
}

/// Streaming-phase counters and checkpoints for one connector.
#[derive(Debug, Clone, Serialize)]
pub struct CdcStatsRow {
    pub name: String,
    pub ddls: u64,
    pub dmls: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub bad_events: u64,
    pub total_events: u64,
    pub batches_done: u64,
    pub avg_batch_size: u64,
    pub first_src_ts_ms: Option<i64>,
    pub last_src_ts_ms: Option<i64>,
    pub first_recv_ts_ms: Option<i64>,
    pub last_recv_ts_ms: Option<i64>,
    pub first_sink_ts_ms: Option<i64>,
    pub last_sink_ts_ms: Option<i64>,
}

/// The engine's command-and-view surface.
pub struct ControlPlane {
    cfg: EngineConfig,
    conninfo: Mutex<ConnInfoStore>,
    objmap: Arc<Mutex<ObjectMappingStore>>,
    stats: StatsCollector,
    hub: SourceHub,
    target: Arc<dyn TargetExecutor>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl ControlPlane {
    /// Open the control plane over its persisted registries.
    pub async fn open(
        cfg: EngineConfig,
        target: Arc<dyn TargetExecutor>,
        hub: SourceHub,
    ) -> Result<Self> {
        let conninfo = ConnInfoStore::open(&cfg.metadata_dir).await?;
        let objmap = ObjectMappingStore::open(&cfg.metadata_dir).await?;
        Ok(Self {
            cfg,
            conninfo: Mutex::new(conninfo),
            objmap: Arc::new(Mutex::new(objmap)),
            stats: StatsCollector::new(),
            hub,
            target,
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// The adapter attachment registry; vendor log readers register their
    /// endpoints here under the connector name.
    pub fn hub(&self) -> &SourceHub {
        &self.hub
    }

    // ---- connection info commands ----

    /// Register a new source database connection.
    pub async fn add_conninfo(&self, info: ConnectionInfo) -> Result<()> {
        self.conninfo.lock().await.add(info).await
    }

    /// Attach the secondary log-mining endpoint required by `olr` sources.
    pub async fn add_olr_conninfo(&self, name: &str, olr: OlrConnectionInfo) -> Result<()> {
        self.conninfo.lock().await.add_olr(name, olr).await
    }

    /// Set (or overwrite) the SSL material of a connection.
    pub async fn add_extra_conninfo(&self, name: &str, extra: ExtraConnectionInfo) -> Result<()> {
        self.conninfo.lock().await.add_extra(name, extra).await
    }

    /// Clear the SSL material of a connection.
    pub async fn del_extra_conninfo(&self, name: &str) -> Result<()> {
        self.conninfo.lock().await.del_extra(name).await
    }

    /// Remove a connection entirely: stops its connector if running, then
    /// drops its mapping overrides and statistics. Idempotent; deleting a
    /// name that is not registered succeeds.
    pub async fn del_conninfo(&self, name: &str) -> Result<()> {
        {
            let mut workers = self.workers.lock().await;
            if let Some(handle) = workers.remove(name) {
                Self::shut_down_worker(name, handle).await;
            }
        }
        if !self.conninfo.lock().await.del(name).await? {
            return Ok(());
        }
        self.objmap.lock().await.purge(name).await?;
        self.stats.remove(name);
        self.hub.detach(name);
        Ok(())
    }

    // ---- lifecycle commands ----

    /// Start the named connector with the given snapshot mode.
    pub async fn start_engine(&self, name: &str, mode: SnapshotMode) -> Result<()> {
        let info = self.conninfo.lock().await.get(name)?.clone();
        let mut workers = self.workers.lock().await;
        if let Some(handle) = workers.get(name) {
            if !handle.join.is_finished() {
                return Err(Error::State(format!(
                    "connector '{}' is already running",
                    name
                )));
            }
        }
        self.spawn_worker(&mut workers, info, mode, ConnectorState::Initializing);
        Ok(())
    }

    /// Stop the named connector at its next batch boundary. Stopping a
    /// connector that is not running succeeds.
    pub async fn stop_engine(&self, name: &str) -> Result<()> {
        let handle = {
            let mut workers = self.workers.lock().await;
            workers.remove(name)
        };
        match handle {
            Some(handle) => {
                Self::shut_down_worker(name, handle).await;
                Ok(())
            }
            None => {
                // idempotent, but the connection itself must exist
                self.conninfo.lock().await.get(name)?;
                Ok(())
            }
        }
    }

    /// Suspend a polling connector at its next batch boundary.
    pub async fn pause_engine(&self, name: &str) -> Result<()> {
        let workers = self.workers.lock().await;
        let handle = Self::running(&workers, name)?;
        let status = handle.shared.status();
        if status.state != ConnectorState::Polling {
            return Err(Error::State(format!(
                "connector '{}' is {}, only a polling connector can be paused",
                name, status.state
            )));
        }
        Self::send(name, &handle.tx, Command::Pause).await
    }

    /// Resume a paused connector.
    pub async fn resume_engine(&self, name: &str) -> Result<()> {
        let workers = self.workers.lock().await;
        let handle = Self::running(&workers, name)?;
        let status = handle.shared.status();
        if status.state != ConnectorState::Paused {
            return Err(Error::State(format!(
                "connector '{}' is {}, only a paused connector can be resumed",
                name, status.state
            )));
        }
        Self::send(name, &handle.tx, Command::Resume).await
    }

    /// Stop and start the connector under a (possibly different) snapshot
    /// mode. The new worker gets a fresh pid.
    pub async fn restart_connector(&self, name: &str, mode: SnapshotMode) -> Result<()> {
        let info = self.conninfo.lock().await.get(name)?.clone();
        let mut workers = self.workers.lock().await;
        if let Some(handle) = workers.remove(name) {
            Self::shut_down_worker(name, handle).await;
        }
        info!(name, %mode, "restarting connector");
        self.spawn_worker(&mut workers, info, mode, ConnectorState::Restarting);
        Ok(())
    }

    // ---- statistics ----

    /// Zero the named connector's counters and checkpoints.
    pub async fn reset_stats(&self, name: &str) -> Result<()> {
        self.conninfo.lock().await.get(name)?;
        self.stats.reset(name);
        Ok(())
    }

    /// Raw counters, mostly for tests; the views slice the same data.
    pub fn stats(&self, name: &str) -> ConnectorStats {
        self.stats.get(name)
    }

    /// Debounce probe: one poll of the settle heuristic.
    pub fn settled(&self, name: &str) -> bool {
        self.stats.settled(name, self.cfg.worker.settle_polls)
    }

    // ---- object mapping commands ----

    /// Add or replace a mapping override. Takes effect at the next start or
    /// reload.
    pub async fn add_objmap(
        &self,
        name: &str,
        kind: MapKind,
        source: &str,
        destination: &str,
    ) -> Result<()> {
        self.conninfo.lock().await.get(name)?;
        self.objmap
            .lock()
            .await
            .add(name, kind, source, destination)
            .await
    }

    /// Disable a mapping override; the next reload reverts the object to
    /// its default mapping.
    pub async fn del_objmap(&self, name: &str, kind: MapKind, source: &str) -> Result<()> {
        self.objmap.lock().await.del(name, kind, source).await
    }

    /// Re-resolve the running connector's attribute mappings from the
    /// current overrides. Returns once the worker has swapped them in, so
    /// the change is visible when the call completes.
    pub async fn reload_objmap(&self, name: &str) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let workers = self.workers.lock().await;
            let handle = Self::running(&workers, name)?;
            Self::send(name, &handle.tx, Command::Reload(ack_tx)).await?;
        }
        match ack_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::State(format!(
                "connector '{}' exited before completing the reload",
                name
            ))),
        }
    }

    // ---- views ----

    /// One row per registered connection, running or not.
    pub async fn state_view(&self) -> Vec<StateRow> {
        let conninfo = self.conninfo.lock().await;
        let workers = self.workers.lock().await;
        conninfo
            .iter()
            .map(|info| match workers.get(&info.name) {
                Some(handle) => {
                    let status = handle.shared.status();
                    StateRow {
                        name: info.name.clone(),
                        connector_type: info.vendor.to_string(),
                        pid: status.pid,
                        stage: status.stage.map(|s| s.to_string()).unwrap_or_default(),
                        state: status.state.to_string(),
                        err: status.error.unwrap_or_else(|| "no error".to_string()),
                    }
                }
                None => StateRow {
                    name: info.name.clone(),
                    connector_type: info.vendor.to_string(),
                    pid: -1,
                    stage: String::new(),
                    state: ConnectorState::Stopped.to_string(),
                    err: "no error".to_string(),
                },
            })
            .collect()
    }

    pub fn snapshot_stats_view(&self, name: &str) -> SnapshotStatsRow {
        let s = self.stats.get(name);
        SnapshotStatsRow {
            name: name.to_string(),
            tables_migrated: s.tables_migrated,
            rows_migrated: s.rows_migrated,
            snapshot_begin_ms: s.snapshot_begin_ms,
            snapshot_end_ms: s.snapshot_end_ms,
        }
    }

    pub fn cdc_stats_view(&self, name: &str) -> CdcStatsRow {
        let s = self.stats.get(name);
        CdcStatsRow {
            name: name.to_string(),
            ddls: s.ddls,
            dmls: s.dmls,
            creates: s.creates,
            updates: s.updates,
            deletes: s.deletes,
            bad_events: s.bad_events,
            total_events: s.total_events,
            batches_done: s.batches_done,
            avg_batch_size: s.avg_batch_size(),
            first_src_ts_ms: s.first_src_ts_ms,
            last_src_ts_ms: s.last_src_ts_ms,
            first_recv_ts_ms: s.first_recv_ts_ms,
            last_recv_ts_ms: s.last_recv_ts_ms,
            first_sink_ts_ms: s.first_sink_ts_ms,
            last_sink_ts_ms: s.last_sink_ts_ms,
        }
    }

    /// The attribute mappings active in the running worker. Empty while the
    /// connector is stopped.
    pub async fn attribute_view(&self, name: &str) -> Vec<AttributeMapping> {
        let workers = self.workers.lock().await;
        workers
            .get(name)
            .map(|h| h.shared.attributes())
            .unwrap_or_default()
    }

    /// All mapping overrides registered for a connector, disabled included.
    pub async fn objmap_view(&self, name: &str) -> Vec<ObjectMapEntry> {
        self.objmap.lock().await.all_for(name)
    }

    /// Stop every running connector; used on daemon shutdown.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for (name, handle) in workers.drain() {
            Self::shut_down_worker(&name, handle).await;
        }
    }

    // ---- internals ----

    fn spawn_worker(
        &self,
        workers: &mut HashMap<String, WorkerHandle>,
        info: ConnectionInfo,
        mode: SnapshotMode,
        initial: ConnectorState,
    ) {
        let name = info.name.clone();
        let pid = allocate_pid();
        let shared = Arc::new(ConnectorShared::new(pid, initial));
        let (tx, join) = spawn(
            self.cfg.clone(),
            info,
            mode,
            shared.clone(),
            self.stats.clone(),
            self.target.clone(),
            self.hub.clone(),
            self.objmap.clone(),
            pid,
        );
        workers.insert(name, WorkerHandle { shared, tx, join });
    }

    async fn shut_down_worker(name: &str, handle: WorkerHandle) {
        if !handle.join.is_finished() {
            let _ = handle.tx.send(Command::Stop).await;
        }
        if handle.join.await.is_err() {
            warn!(name, "connector task ended abnormally");
        }
    }

    fn running<'a>(
        workers: &'a HashMap<String, WorkerHandle>,
        name: &str,
    ) -> Result<&'a WorkerHandle> {
        match workers.get(name) {
            Some(handle) if !handle.join.is_finished() => Ok(handle),
            _ => Err(Error::State(format!(
                "connector '{}' is not running",
                name
            ))),
        }
    }

    async fn send(name: &str, tx: &mpsc::Sender<Command>, cmd: Command) -> Result<()> {
        tx.send(cmd)
            .await
            .map_err(|_| Error::State(format!("connector '{}' is not running", name)))
    }
}
