//! Target store seam.
//!
//! The real target's query/transaction executor is an external collaborator;
//! the engine drives it through [`TargetExecutor`]. A batch is the unit of
//! commit and of crash-recovery replay: commit semantics are at-least-once,
//! so the executor must tolerate or deduplicate a replayed batch id.
//!
//! [`MemoryTarget`] is the in-process implementation used by the test suite
//! and the demo daemon. It stores destination tables as ordered rows of JSON
//! values and deduplicates batches by `(connector, batch_id)`.

use crate::source::Row;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetColumn {
    pub name: String,
    pub type_name: String,
}

/// Destination table definition. `table` is the qualified `schema.table` id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    pub table: String,
    pub columns: Vec<TargetColumn>,
}

/// One operation inside a committed batch.
#[derive(Debug, Clone)]
pub enum TargetOp {
    CreateTable(TargetTable),
    AddColumn {
        table: String,
        column: TargetColumn,
    },
    DropColumn {
        table: String,
        column: String,
    },
    DropTable {
        table: String,
    },
    Insert {
        table: String,
        row: Row,
    },
    Update {
        table: String,
        key: Row,
        row: Row,
    },
    Delete {
        table: String,
        key: Row,
    },
}

/// A transactional unit of work against the target.
#[derive(Debug, Clone)]
pub struct TargetBatch {
    pub connector: String,
    pub batch_id: u64,
    pub ops: Vec<TargetOp>,
}

/// Transactional executor interface of the target store.
pub trait TargetExecutor: Send + Sync {
    /// Apply a whole batch atomically. Re-applying an already committed
    /// `(connector, batch_id)` must be a no-op success.
    fn apply_batch(&self, batch: &TargetBatch) -> Result<()>;

    /// Rename an existing destination table. Renaming onto the current name
    /// is a no-op so reload can be replayed.
    fn rename_table(&self, from: &str, to: &str) -> Result<()>;

    fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<()>;

    fn alter_column_type(&self, table: &str, column: &str, new_type: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct TableData {
    columns: Vec<TargetColumn>,
    rows: Vec<Row>,
}

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, TableData>,
    applied: HashSet<(String, u64)>,
}

/// In-memory target store.
#[derive(Default)]
pub struct MemoryTarget {
    state: Mutex<MemoryState>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Qualified names of tables under a destination schema.
    pub fn tables_in_schema(&self, schema: &str) -> Vec<String> {
        let prefix = format!("{}.", schema);
        let state = self.state.lock().unwrap();
        state
            .tables
            .keys()
            .filter(|t| t.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.state.lock().unwrap().tables.contains_key(table)
    }

    pub fn columns(&self, table: &str) -> Option<Vec<TargetColumn>> {
        let state = self.state.lock().unwrap();
        state.tables.get(table).map(|t| t.columns.clone())
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Values of one column across all rows, in insertion order.
    pub fn column_values(&self, table: &str, column: &str) -> Vec<Value> {
        self.rows(table)
            .into_iter()
            .map(|r| r.get(column).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn apply_op(tables: &mut BTreeMap<String, TableData>, op: &TargetOp) -> Result<()> {
        match op {
            TargetOp::CreateTable(def) => {
                // create-if-not-exists so snapshot replay is harmless
                tables.entry(def.table.clone()).or_insert_with(|| TableData {
                    columns: def.columns.clone(),
                    rows: Vec::new(),
                });
                Ok(())
            }
            TargetOp::AddColumn { table, column } => {
                let data = get_table(tables, table)?;
                if !data.columns.iter().any(|c| c.name == column.name) {
                    data.columns.push(column.clone());
                }
                Ok(())
            }
            TargetOp::DropColumn { table, column } => {
                let data = get_table(tables, table)?;
                data.columns.retain(|c| &c.name != column);
                for row in &mut data.rows {
                    row.remove(column);
                }
                Ok(())
            }
            TargetOp::DropTable { table } => {
                tables.remove(table);
                Ok(())
            }
            TargetOp::Insert { table, row } => {
                let data = get_table(tables, table)?;
                data.rows.push(row.clone());
                Ok(())
            }
            TargetOp::Update { table, key, row } => {
                let data = get_table(tables, table)?;
                for existing in &mut data.rows {
                    if key_matches(existing, key) {
                        for (k, v) in row {
                            existing.insert(k.clone(), v.clone());
                        }
                        return Ok(());
                    }
                }
                // no matching row: treat the update as an upsert, which is
                // what replay after partial recovery produces
                data.rows.push(row.clone());
                Ok(())
            }
            TargetOp::Delete { table, key } => {
                let data = get_table(tables, table)?;
                data.rows.retain(|r| !key_matches(r, key));
                Ok(())
            }
        }
    }
}

fn get_table<'a>(
    tables: &'a mut BTreeMap<String, TableData>,
    table: &str,
) -> Result<&'a mut TableData> {
    tables
        .get_mut(table)
        .ok_or_else(|| Error::Fatal(format!("destination table '{}' does not exist", table)))
}

fn key_matches(row: &Row, key: &Row) -> bool {
    !key.is_empty() && key.iter().all(|(k, v)| row.get(k) == Some(v))
}

impl TargetExecutor for MemoryTarget {
    fn apply_batch(&self, batch: &TargetBatch) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let id = (batch.connector.clone(), batch.batch_id);
        if state.applied.contains(&id) {
            debug!(connector = %batch.connector, batch_id = batch.batch_id, "duplicate batch skipped");
            return Ok(());
        }

        // stage on a copy so a failing op leaves nothing half-applied
        let mut staged = state.tables.clone();
        for op in &batch.ops {
            Self::apply_op(&mut staged, op)?;
        }
        state.tables = staged;
        state.applied.insert(id);
        Ok(())
    }

    fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        if !state.tables.contains_key(from) && state.tables.contains_key(to) {
            return Ok(()); // rename already applied
        }
        let data = state
            .tables
            .remove(from)
            .ok_or_else(|| Error::Fatal(format!("destination table '{}' does not exist", from)))?;
        state.tables.insert(to.to_string(), data);
        Ok(())
    }

    fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        let data = get_table(&mut state.tables, table)?;
        if !data.columns.iter().any(|c| c.name == from)
            && data.columns.iter().any(|c| c.name == to)
        {
            return Ok(());
        }
        for col in &mut data.columns {
            if col.name == from {
                col.name = to.to_string();
            }
        }
        for row in &mut data.rows {
            if let Some(v) = row.remove(from) {
                row.insert(to.to_string(), v);
            }
        }
        Ok(())
    }

    fn alter_column_type(&self, table: &str, column: &str, new_type: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let data = get_table(&mut state.tables, table)?;
        for col in &mut data.columns {
            if col.name == column {
                col.type_name = new_type.to_string();
            }
        }
        Ok(())
    }
}
