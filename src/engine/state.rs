//! Connector lifecycle enums.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which phase of replication the connector is in. Cleared while stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorStage {
    InitialSnapshot,
    ChangeDataCapture,
    SchemaSync,
}

impl fmt::Display for ConnectorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectorStage::InitialSnapshot => "initial snapshot",
            ConnectorStage::ChangeDataCapture => "change data capture",
            ConnectorStage::SchemaSync => "schema sync",
        };
        f.write_str(s)
    }
}

/// Runtime state of the connector worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorState {
    /// Initial and terminal state; no worker alive.
    Stopped,
    /// Worker spawned, source session not yet established.
    Initializing,
    /// Steady state: the worker loop is advancing.
    Polling,
    /// Suspended at a batch boundary until resumed.
    Paused,
    /// Between stop and start during a restart.
    Restarting,
    /// Unrecoverable failure; requires a manual restart.
    Error,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectorState::Stopped => "stopped",
            ConnectorState::Initializing => "initializing",
            ConnectorState::Polling => "polling",
            ConnectorState::Paused => "paused",
            ConnectorState::Restarting => "restarting",
            ConnectorState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Start mode: whether and how the snapshot phase runs before streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotMode {
    /// Schema plus a full data copy, then stream.
    Initial,
    /// Schema only, then stream; existing rows are not copied.
    NoData,
    /// Like `Initial`, re-copying on every start.
    Always,
    /// Schema only; the connector parks in the `schema sync` stage, paused,
    /// until resumed into streaming.
    SchemaSync,
}

impl SnapshotMode {
    /// Whether existing rows are copied before streaming.
    pub fn copies_data(&self) -> bool {
        matches!(self, SnapshotMode::Initial | SnapshotMode::Always)
    }

    /// Whether the connector stops short of streaming after the schema sync.
    pub fn schema_only(&self) -> bool {
        matches!(self, SnapshotMode::SchemaSync)
    }

    /// The stage the connector enters on start.
    pub fn initial_stage(&self) -> ConnectorStage {
        match self {
            SnapshotMode::Initial | SnapshotMode::Always => ConnectorStage::InitialSnapshot,
            SnapshotMode::NoData => ConnectorStage::ChangeDataCapture,
            SnapshotMode::SchemaSync => ConnectorStage::SchemaSync,
        }
    }
}

impl fmt::Display for SnapshotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnapshotMode::Initial => "initial",
            SnapshotMode::NoData => "no_data",
            SnapshotMode::Always => "always",
            SnapshotMode::SchemaSync => "schema_sync",
        };
        f.write_str(s)
    }
}

impl FromStr for SnapshotMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "initial" => Ok(SnapshotMode::Initial),
            "no_data" => Ok(SnapshotMode::NoData),
            "always" => Ok(SnapshotMode::Always),
            "schema_sync" => Ok(SnapshotMode::SchemaSync),
            other => Err(Error::Config(format!(
                "invalid snapshot mode '{}', expected initial|no_data|always|schema_sync",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("initial".parse::<SnapshotMode>().unwrap(), SnapshotMode::Initial);
        assert_eq!("NO_DATA".parse::<SnapshotMode>().unwrap(), SnapshotMode::NoData);
        assert!("full".parse::<SnapshotMode>().is_err());
    }

    #[test]
    fn test_mode_properties() {
        assert!(SnapshotMode::Initial.copies_data());
        assert!(SnapshotMode::Always.copies_data());
        assert!(!SnapshotMode::NoData.copies_data());
        assert!(SnapshotMode::SchemaSync.schema_only());
        assert_eq!(
            SnapshotMode::NoData.initial_stage(),
            ConnectorStage::ChangeDataCapture
        );
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(ConnectorState::Polling.to_string(), "polling");
        assert_eq!(ConnectorStage::InitialSnapshot.to_string(), "initial snapshot");
        assert_eq!(SnapshotMode::SchemaSync.to_string(), "schema_sync");
    }
}
