//! Per-connector worker task.
//!
//! One tokio task per started connector. The task walks the lifecycle:
//! initialize, prepare the destination schema, optionally copy existing rows,
//! then stream change events batch by batch. Control commands arrive over an
//! mpsc channel and are only serviced between batches, so pause, stop and
//! reload always observe a fully committed target.

use crate::config::EngineConfig;
use crate::conninfo::ConnectionInfo;
use crate::convert::{textual_fallback, to_target_value};
use crate::engine::batch::{BatchConfig, Batcher, EventBatch, StagedEvent};
use crate::engine::state::{ConnectorStage, ConnectorState, SnapshotMode};
use crate::objmap::{
    resolve_attributes, AttributeMapping, ObjectMapEntry, ObjectMappingStore, TransformExpr,
};
use crate::source::{
    DdlEvent, DdlOp, Row, RowEvent, RowOp, SourceConnection, SourceEvent, SourceHub, TableDef,
};
use crate::stats::{BatchOutcome, StatsCollector};
use crate::target::{TargetBatch, TargetColumn, TargetExecutor, TargetOp, TargetTable};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Commands delivered to a worker, honored at batch boundaries.
pub(crate) enum Command {
    Pause,
    Resume,
    Stop,
    Reload(oneshot::Sender<Result<()>>),
}

/// Point-in-time view of one connector for the state view.
#[derive(Debug, Clone)]
pub struct ConnectorStatus {
    pub pid: i32,
    pub state: ConnectorState,
    pub stage: Option<ConnectorStage>,
    pub error: Option<String>,
}

/// State shared between a worker task and the control plane.
pub struct ConnectorShared {
    status: Mutex<ConnectorStatus>,
    attributes: Mutex<Vec<AttributeMapping>>,
}

impl ConnectorShared {
    pub(crate) fn new(pid: i32, initial: ConnectorState) -> Self {
        Self {
            status: Mutex::new(ConnectorStatus {
                pid,
                state: initial,
                stage: None,
                error: None,
            }),
            attributes: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> ConnectorStatus {
        self.status.lock().unwrap().clone()
    }

    /// The currently active attribute mappings, as shown by the
    /// attribute-mapping view.
    pub fn attributes(&self) -> Vec<AttributeMapping> {
        self.attributes.lock().unwrap().clone()
    }

    fn set_state(&self, state: ConnectorState) {
        self.status.lock().unwrap().state = state;
    }

    fn set_stage(&self, stage: ConnectorStage) {
        self.status.lock().unwrap().stage = Some(stage);
    }

    fn set_attributes(&self, atts: Vec<AttributeMapping>) {
        *self.attributes.lock().unwrap() = atts;
    }

    fn mark_stopped(&self) {
        let mut status = self.status.lock().unwrap();
        status.state = ConnectorState::Stopped;
        status.stage = None;
        status.pid = -1;
        status.error = None;
    }

    fn mark_error(&self, message: String) {
        let mut status = self.status.lock().unwrap();
        status.state = ConnectorState::Error;
        status.pid = -1;
        status.error = Some(message);
    }
}

static NEXT_PID: AtomicI32 = AtomicI32::new(1001);

/// Allocate a process-unique worker id. Fresh on every start and restart.
pub(crate) fn allocate_pid() -> i32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// Spawn a worker for one connector. The returned sender delivers commands;
/// dropping it stops the worker at the next boundary.
pub(crate) fn spawn(
    cfg: EngineConfig,
    info: ConnectionInfo,
    mode: SnapshotMode,
    shared: Arc<ConnectorShared>,
    stats: StatsCollector,
    target: Arc<dyn TargetExecutor>,
    hub: SourceHub,
    objmap: Arc<tokio::sync::Mutex<ObjectMappingStore>>,
    pid: i32,
) -> (mpsc::Sender<Command>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let batcher = Batcher::new(BatchConfig {
        max_events: cfg.batch.max_events,
        max_delay: cfg.batch_max_delay(),
    });
    let worker = Worker {
        cfg,
        info,
        mode,
        shared,
        stats,
        target,
        hub,
        objmap,
        rx,
        pid,
        schema: Vec::new(),
        projection: Projection::default(),
        batcher,
    };
    let handle = tokio::spawn(worker.run());
    (tx, handle)
}

/// Parsed write path for one source table.
struct TableProjection {
    dst_table: String,
    columns: Vec<ColumnProjection>,
    /// Source-side primary key column names.
    key_columns: Vec<String>,
}

struct ColumnProjection {
    src_column: String,
    dst_column: String,
    dst_type: String,
    transform: Option<TransformExpr>,
}

impl ColumnProjection {
    fn project(&self, raw: &Value) -> Result<Value> {
        let staged = match &self.transform {
            Some(expr) => expr.apply(raw)?,
            None => raw.clone(),
        };
        Ok(match to_target_value(&self.dst_type, &staged) {
            Ok(v) => v,
            Err(e) => {
                warn!(column = %self.dst_column, %e, "value conversion failed, storing textual form");
                textual_fallback(&staged)
            }
        })
    }
}

#[derive(Default)]
struct Projection {
    by_table: HashMap<String, TableProjection>,
}

impl Projection {
    fn build(schema: &[TableDef], atts: &[AttributeMapping]) -> Result<Self> {
        let mut by_table: HashMap<String, TableProjection> = HashMap::new();
        for att in atts {
            let entry = by_table
                .entry(att.src_table.clone())
                .or_insert_with(|| TableProjection {
                    dst_table: att.dst_table.clone(),
                    columns: Vec::new(),
                    key_columns: schema
                        .iter()
                        .find(|t| t.name == att.src_table)
                        .map(|t| {
                            t.columns
                                .iter()
                                .filter(|c| c.primary_key)
                                .map(|c| c.name.clone())
                                .collect()
                        })
                        .unwrap_or_default(),
                });
            let transform = att
                .transform
                .as_deref()
                .map(TransformExpr::parse)
                .transpose()?;
            entry.columns.push(ColumnProjection {
                src_column: att.src_column.clone(),
                dst_column: att.dst_column.clone(),
                dst_type: att.dst_type.clone(),
                transform,
            });
        }
        Ok(Self { by_table })
    }

    fn target_table(&self, tproj: &TableProjection) -> TargetTable {
        TargetTable {
            table: tproj.dst_table.clone(),
            columns: tproj
                .columns
                .iter()
                .map(|c| TargetColumn {
                    name: c.dst_column.clone(),
                    type_name: c.dst_type.clone(),
                })
                .collect(),
        }
    }
}

struct Worker {
    cfg: EngineConfig,
    info: ConnectionInfo,
    mode: SnapshotMode,
    shared: Arc<ConnectorShared>,
    stats: StatsCollector,
    target: Arc<dyn TargetExecutor>,
    hub: SourceHub,
    objmap: Arc<tokio::sync::Mutex<ObjectMappingStore>>,
    rx: mpsc::Receiver<Command>,
    pid: i32,
    schema: Vec<TableDef>,
    projection: Projection,
    batcher: Batcher,
}

impl Worker {
    async fn run(mut self) {
        let name = self.info.name.clone();
        match self.execute().await {
            Ok(()) | Err(Error::Shutdown) => {
                info!(name, "connector stopped");
                self.shared.mark_stopped();
            }
            Err(e) => {
                error!(name, error = %e, "connector failed");
                self.shared.mark_error(e.to_string());
            }
        }
    }

    async fn execute(&mut self) -> Result<()> {
        self.shared.set_state(ConnectorState::Initializing);
        self.shared.set_stage(self.mode.initial_stage());
        info!(name = %self.info.name, vendor = %self.info.vendor, mode = %self.mode, pid = self.pid, "connector starting");

        let mut conn = self.open_with_retry().await?;
        self.schema = conn.read_schema()?;
        let entries = self.current_entries().await;
        self.rebuild_projection(&entries)?;
        self.apply_schema_batch()?;
        self.shared.set_state(ConnectorState::Polling);

        if self.mode.copies_data() {
            self.run_snapshot(&mut conn).await?;
        }
        if self.mode.schema_only() {
            // park until explicitly resumed into streaming
            info!(name = %self.info.name, "schema sync complete, pausing");
            self.shared.set_state(ConnectorState::Paused);
            self.wait_while_paused().await?;
        }
        self.shared.set_stage(ConnectorStage::ChangeDataCapture);
        self.stream(&mut conn).await
    }

    async fn open_with_retry(&mut self) -> Result<SourceConnection> {
        let mut backoff = self.cfg.retry_backoff();
        let mut attempt = 0u32;
        loop {
            match SourceConnection::open(&self.info, &self.hub) {
                Ok(conn) => {
                    debug!(name = %self.info.name, "source session established");
                    return Ok(conn);
                }
                Err(e) if e.is_retryable() && attempt < self.cfg.worker.retry_max => {
                    attempt += 1;
                    warn!(name = %self.info.name, %e, attempt, "source open failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    self.poll_commands().await?;
                }
                Err(e) if e.is_retryable() => {
                    return Err(Error::Fatal(format!(
                        "source unreachable after {} attempts: {}",
                        attempt + 1,
                        e
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_snapshot(&mut self, conn: &mut SourceConnection) -> Result<()> {
        self.stats.snapshot_begun(&self.info.name, now_ms());
        let tables: Vec<String> = self
            .schema
            .iter()
            .map(|t| t.name.clone())
            .filter(|t| self.info.snapshot_included(t))
            .collect();
        for table in &tables {
            let mut copied = 0u64;
            loop {
                self.poll_commands().await?;
                let rows = conn.read_snapshot_batch(table, self.cfg.batch.snapshot_rows)?;
                if rows.is_empty() {
                    break;
                }
                copied += rows.len() as u64;
                self.commit_snapshot_rows(table, rows)?;
            }
            self.stats.snapshot_table_done(&self.info.name);
            debug!(name = %self.info.name, table = %table, rows = copied, "table copied");
        }
        self.stats.snapshot_finished(&self.info.name, now_ms());
        info!(name = %self.info.name, tables = tables.len(), "initial snapshot finished");
        Ok(())
    }

    fn commit_snapshot_rows(&mut self, table: &str, rows: Vec<Row>) -> Result<()> {
        let Some(tproj) = self.projection.by_table.get(table) else {
            return Ok(());
        };
        let mut ops = Vec::with_capacity(rows.len());
        let mut outcome = BatchOutcome {
            sink_ts_ms: now_ms(),
            ..Default::default()
        };
        for row in &rows {
            match project_row(tproj, row) {
                Ok(dst_row) => {
                    ops.push(TargetOp::Insert {
                        table: tproj.dst_table.clone(),
                        row: dst_row,
                    });
                    outcome.reads += 1;
                }
                Err(e) => {
                    warn!(name = %self.info.name, table, %e, "snapshot row skipped");
                    outcome.bad_events += 1;
                }
            }
        }
        let sequence = self.batcher.reserve_sequence();
        self.target.apply_batch(&TargetBatch {
            connector: self.info.name.clone(),
            batch_id: self.batch_id(sequence),
            ops,
        })?;
        self.stats.record_batch(&self.info.name, &outcome);
        Ok(())
    }

    async fn stream(&mut self, conn: &mut SourceConnection) -> Result<()> {
        let mut read_failures = 0u32;
        loop {
            if self.batcher.due() {
                if let Some(batch) = self.batcher.flush() {
                    self.commit(batch).await?;
                }
            }
            if self.batcher.is_empty() {
                // batch boundary: safe point for pause/stop/reload
                self.poll_commands().await?;
            }
            match conn.read_change_event() {
                Ok(Some(event)) => {
                    read_failures = 0;
                    let staged = StagedEvent {
                        event,
                        recv_ts_ms: now_ms(),
                    };
                    if let Some(batch) = self.batcher.push(staged) {
                        self.commit(batch).await?;
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(self.cfg.poll_interval()).await;
                }
                Err(e) if e.is_retryable() => {
                    if let Some(batch) = self.batcher.flush() {
                        self.commit(batch).await?;
                    }
                    read_failures += 1;
                    if read_failures > self.cfg.worker.retry_max {
                        return Err(Error::Fatal(format!(
                            "source stream failed {} times in a row: {}",
                            read_failures, e
                        )));
                    }
                    warn!(name = %self.info.name, %e, read_failures, "stream read failed, reconnecting");
                    tokio::time::sleep(self.cfg.retry_backoff()).await;
                    *conn = self.open_with_retry().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn commit(&mut self, batch: EventBatch) -> Result<()> {
        let has_ddl = batch
            .events
            .iter()
            .any(|s| matches!(s.event, SourceEvent::Ddl(_)));
        let entries = if has_ddl {
            self.current_entries().await
        } else {
            Vec::new()
        };

        let mut ops = Vec::new();
        let mut outcome = BatchOutcome::default();
        for staged in &batch.events {
            match &staged.event {
                SourceEvent::Row(ev) => {
                    if outcome.first_src_ts_ms.is_none() {
                        outcome.first_src_ts_ms = Some(ev.src_ts_ms);
                        outcome.first_recv_ts_ms = Some(staged.recv_ts_ms);
                    }
                    outcome.last_src_ts_ms = Some(ev.src_ts_ms);
                    outcome.last_recv_ts_ms = Some(staged.recv_ts_ms);

                    // tables outside the capture filter have no projection
                    let Some(tproj) = self.projection.by_table.get(&ev.table) else {
                        continue;
                    };
                    match stage_row(tproj, ev) {
                        Ok(op) => {
                            ops.push(op);
                            match ev.op {
                                RowOp::Read => outcome.reads += 1,
                                RowOp::Create => outcome.creates += 1,
                                RowOp::Update => outcome.updates += 1,
                                RowOp::Delete => outcome.deletes += 1,
                            }
                        }
                        Err(e) => {
                            warn!(name = %self.info.name, table = %ev.table, op = %ev.op, %e, "change event skipped");
                            outcome.bad_events += 1;
                        }
                    }
                }
                SourceEvent::Ddl(ev) => match self.stage_ddl(ev, &entries) {
                    Ok(Some(op)) => {
                        ops.push(op);
                        outcome.ddls += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(name = %self.info.name, %e, "schema change skipped");
                        outcome.bad_events += 1;
                    }
                },
                SourceEvent::SnapshotCompleted => {
                    debug!(name = %self.info.name, "source reports snapshot complete");
                }
            }
        }

        outcome.sink_ts_ms = now_ms();
        if !ops.is_empty() {
            self.target.apply_batch(&TargetBatch {
                connector: self.info.name.clone(),
                batch_id: self.batch_id(batch.sequence),
                ops,
            })?;
        }
        self.stats.record_batch(&self.info.name, &outcome);
        Ok(())
    }

    /// Fold one schema change into the cached source schema and emit the
    /// matching destination operation, if the table is captured.
    fn stage_ddl(&mut self, ev: &DdlEvent, entries: &[ObjectMapEntry]) -> Result<Option<TargetOp>> {
        match &ev.op {
            DdlOp::CreateTable(def) => {
                self.schema.retain(|t| t.name != def.name);
                self.schema.push(def.clone());
                self.rebuild_projection(entries)?;
                Ok(self
                    .projection
                    .by_table
                    .get(&def.name)
                    .map(|tp| TargetOp::CreateTable(self.projection.target_table(tp))))
            }
            DdlOp::AddColumn { table, column } => {
                let Some(def) = self.schema.iter_mut().find(|t| &t.name == table) else {
                    return Err(Error::Mapping(format!(
                        "schema change for unknown table '{}'",
                        table
                    )));
                };
                def.columns.retain(|c| c.name != column.name);
                def.columns.push(column.clone());
                self.rebuild_projection(entries)?;
                Ok(self.projection.by_table.get(table).and_then(|tp| {
                    tp.columns
                        .iter()
                        .find(|c| c.src_column == column.name)
                        .map(|c| TargetOp::AddColumn {
                            table: tp.dst_table.clone(),
                            column: TargetColumn {
                                name: c.dst_column.clone(),
                                type_name: c.dst_type.clone(),
                            },
                        })
                }))
            }
            DdlOp::DropColumn { table, column } => {
                let dst = self.projection.by_table.get(table).and_then(|tp| {
                    tp.columns
                        .iter()
                        .find(|c| &c.src_column == column)
                        .map(|c| (tp.dst_table.clone(), c.dst_column.clone()))
                });
                if let Some(def) = self.schema.iter_mut().find(|t| &t.name == table) {
                    def.columns.retain(|c| &c.name != column);
                }
                self.rebuild_projection(entries)?;
                Ok(dst.map(|(table, column)| TargetOp::DropColumn { table, column }))
            }
            DdlOp::DropTable { table } => {
                let dst = self
                    .projection
                    .by_table
                    .get(table)
                    .map(|tp| tp.dst_table.clone());
                self.schema.retain(|t| &t.name != table);
                self.rebuild_projection(entries)?;
                Ok(dst.map(|table| TargetOp::DropTable { table }))
            }
        }
    }

    fn apply_schema_batch(&mut self) -> Result<()> {
        let mut tables: Vec<&TableProjection> = self.projection.by_table.values().collect();
        tables.sort_by(|a, b| a.dst_table.cmp(&b.dst_table));
        let ops: Vec<TargetOp> = tables
            .iter()
            .map(|tp| TargetOp::CreateTable(self.projection.target_table(tp)))
            .collect();
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len() as u64;
        let sequence = self.batcher.reserve_sequence();
        self.target.apply_batch(&TargetBatch {
            connector: self.info.name.clone(),
            batch_id: self.batch_id(sequence),
            ops,
        })?;
        self.stats.record_batch(
            &self.info.name,
            &BatchOutcome {
                ddls: count,
                sink_ts_ms: now_ms(),
                ..Default::default()
            },
        );
        info!(name = %self.info.name, tables = count, "destination schema prepared");
        Ok(())
    }

    async fn current_entries(&self) -> Vec<ObjectMapEntry> {
        self.objmap.lock().await.entries_for(&self.info.name)
    }

    fn rebuild_projection(&mut self, entries: &[ObjectMapEntry]) -> Result<()> {
        let atts = resolve_attributes(self.info.vendor, &self.info, &self.schema, entries);
        self.projection = Projection::build(&self.schema, &atts)?;
        self.shared.set_attributes(atts);
        Ok(())
    }

    /// Recompute the attribute mappings from the current overrides and carry
    /// destination renames and type changes into the existing tables.
    async fn do_reload(&mut self) -> Result<()> {
        let entries = self.current_entries().await;
        let old = self.shared.attributes();
        self.rebuild_projection(&entries)?;
        let new = self.shared.attributes();

        let old_by_key: HashMap<(&str, &str), &AttributeMapping> = old
            .iter()
            .map(|a| ((a.src_table.as_str(), a.src_column.as_str()), a))
            .collect();
        let mut renamed = HashSet::new();
        for att in &new {
            let Some(prev) = old_by_key.get(&(att.src_table.as_str(), att.src_column.as_str()))
            else {
                continue;
            };
            if prev.dst_table != att.dst_table
                && renamed.insert((prev.dst_table.clone(), att.dst_table.clone()))
            {
                self.target.rename_table(&prev.dst_table, &att.dst_table)?;
            }
            if prev.dst_column != att.dst_column {
                self.target
                    .rename_column(&att.dst_table, &prev.dst_column, &att.dst_column)?;
            }
            if prev.dst_type != att.dst_type {
                self.target
                    .alter_column_type(&att.dst_table, &att.dst_column, &att.dst_type)?;
            }
        }
        info!(name = %self.info.name, mappings = new.len(), "object mappings reloaded");
        Ok(())
    }

    /// Drain pending commands without blocking. Called only at batch
    /// boundaries.
    async fn poll_commands(&mut self) -> Result<()> {
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd).await?,
                Err(mpsc::error::TryRecvError::Empty) => return Ok(()),
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(Error::Shutdown),
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Stop => Err(Error::Shutdown),
            Command::Resume => Ok(()),
            Command::Pause => {
                info!(name = %self.info.name, "connector paused");
                self.shared.set_state(ConnectorState::Paused);
                self.wait_while_paused().await
            }
            Command::Reload(ack) => match self.do_reload().await {
                Ok(()) => {
                    let _ = ack.send(Ok(()));
                    Ok(())
                }
                Err(e) => {
                    let message = format!("object mapping reload failed: {}", e);
                    let _ = ack.send(Err(e));
                    Err(Error::Fatal(message))
                }
            },
        }
    }

    /// Block until resumed or stopped. Reload still works while paused; it
    /// is a batch boundary like any other.
    async fn wait_while_paused(&mut self) -> Result<()> {
        loop {
            match self.rx.recv().await {
                None | Some(Command::Stop) => return Err(Error::Shutdown),
                Some(Command::Pause) => {}
                Some(Command::Resume) => {
                    info!(name = %self.info.name, "connector resumed");
                    self.shared.set_state(ConnectorState::Polling);
                    return Ok(());
                }
                Some(Command::Reload(ack)) => match self.do_reload().await {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                    }
                    Err(e) => {
                        let message = format!("object mapping reload failed: {}", e);
                        let _ = ack.send(Err(e));
                        return Err(Error::Fatal(message));
                    }
                },
            }
        }
    }

    /// Batch ids are unique across worker sessions: the pid in the high
    /// half keeps a fresh session's sequence from colliding with ids the
    /// target already saw.
    fn batch_id(&self, sequence: u64) -> u64 {
        ((self.pid as u64) << 32) | sequence
    }
}

fn stage_row(tproj: &TableProjection, ev: &RowEvent) -> Result<TargetOp> {
    let missing = || Error::Mapping(format!("{} event for '{}' carries no row image", ev.op, ev.table));
    match ev.op {
        RowOp::Read | RowOp::Create => {
            let after = ev.after.as_ref().ok_or_else(missing)?;
            Ok(TargetOp::Insert {
                table: tproj.dst_table.clone(),
                row: project_row(tproj, after)?,
            })
        }
        RowOp::Update => {
            let after = ev.after.as_ref().ok_or_else(missing)?;
            let key_src = ev.before.as_ref().unwrap_or(after);
            Ok(TargetOp::Update {
                table: tproj.dst_table.clone(),
                key: project_key(tproj, key_src)?,
                row: project_row(tproj, after)?,
            })
        }
        RowOp::Delete => {
            let before = ev.before.as_ref().ok_or_else(missing)?;
            Ok(TargetOp::Delete {
                table: tproj.dst_table.clone(),
                key: project_key(tproj, before)?,
            })
        }
    }
}

fn project_row(tproj: &TableProjection, src: &Row) -> Result<Row> {
    let mut out = Row::new();
    for col in &tproj.columns {
        let raw = src.get(&col.src_column).cloned().unwrap_or(Value::Null);
        out.insert(col.dst_column.clone(), col.project(&raw)?);
    }
    Ok(out)
}

fn project_key(tproj: &TableProjection, src: &Row) -> Result<Row> {
    let mut out = Row::new();
    for col in tproj
        .columns
        .iter()
        .filter(|c| tproj.key_columns.contains(&c.src_column))
    {
        let raw = src.get(&col.src_column).cloned().unwrap_or(Value::Null);
        out.insert(col.dst_column.clone(), col.project(&raw)?);
    }
    Ok(out)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
