//! Connector lifecycle engine: per-connector worker tasks, event batching
//! and the state machine the control plane drives.

mod batch;
mod state;
mod worker;

pub use batch::{BatchConfig, Batcher, EventBatch, StagedEvent};
pub use state::{ConnectorStage, ConnectorState, SnapshotMode};
pub use worker::{ConnectorShared, ConnectorStatus};

pub(crate) use worker::{allocate_pid, spawn, Command};
