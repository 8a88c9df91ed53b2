//! Source-side data model and vendor dispatch.
//!
//! Per-vendor behavior is a variant selected by the vendor tag at
//! connection-info creation time: [`SourceConnection`] is a tagged union
//! whose variants implement the capability set `{open, read_schema,
//! read_snapshot_batch, read_change_event}`. The variants normalize vendor
//! identifier collation and type spellings; the actual log reading is done
//! by an external adapter attached through a [`SourceEndpoint`].

mod endpoint;

pub use endpoint::{SourceEndpoint, SourceHub};

use crate::conninfo::{ConnectionInfo, Vendor};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// A row object: column name to wire value.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Vendor type name as the source catalog spells it, e.g. `varchar(255)`.
    pub type_name: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub autoincrement: bool,
}

/// One source table: fully-qualified id (`db.table`, or `db.schema.table`
/// for SQL Server) plus ordered columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

/// Row-level operation kind. `Read` rows come from the initial snapshot,
/// the rest from change data capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowOp {
    Read,
    Create,
    Update,
    Delete,
}

impl fmt::Display for RowOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowOp::Read => "read",
            RowOp::Create => "create",
            RowOp::Update => "update",
            RowOp::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowEvent {
    pub table: String,
    pub op: RowOp,
    pub before: Option<Row>,
    pub after: Option<Row>,
    /// Millisecond epoch of the event's commit in the source database.
    pub src_ts_ms: i64,
}

/// Schema change captured from the source log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DdlOp {
    CreateTable(TableDef),
    AddColumn { table: String, column: ColumnDef },
    DropColumn { table: String, column: String },
    DropTable { table: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdlEvent {
    pub op: DdlOp,
    pub src_ts_ms: i64,
}

/// One event delivered by the source adapter during streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SourceEvent {
    Row(RowEvent),
    Ddl(DdlEvent),
    /// Explicit end-of-snapshot signal from adapters that can produce one.
    /// Supersedes debounce-based quiescence detection for stage handling.
    SnapshotCompleted,
}

/// Open capability-set connection to one source database.
///
/// Tagged-union dispatch: one variant per vendor family. All variants share
/// the adapter transport but differ in identifier folding and in what they
/// require from the connection info.
pub enum SourceConnection {
    Mysql(MysqlSource),
    Sqlserver(SqlserverSource),
    Oracle(OracleSource),
    Olr(OlrSource),
}

impl fmt::Debug for SourceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceConnection::Mysql(_) => "SourceConnection::Mysql",
            SourceConnection::Sqlserver(_) => "SourceConnection::Sqlserver",
            SourceConnection::Oracle(_) => "SourceConnection::Oracle",
            SourceConnection::Olr(_) => "SourceConnection::Olr",
        };
        f.write_str(name)
    }
}

impl SourceConnection {
    /// Open the source named by `info`. Fails with a connection error when
    /// no adapter endpoint is attached or the endpoint refuses the session.
    pub fn open(info: &ConnectionInfo, hub: &SourceHub) -> Result<Self> {
        let endpoint = hub.get(&info.name).ok_or_else(|| {
            Error::Connection(format!(
                "no source adapter attached for connector '{}' ({}:{})",
                info.name, info.hostname, info.port
            ))
        })?;
        endpoint.begin_session()?;

        match info.vendor {
            Vendor::Mysql => Ok(SourceConnection::Mysql(MysqlSource::new(endpoint))),
            Vendor::Sqlserver => Ok(SourceConnection::Sqlserver(SqlserverSource::new(endpoint))),
            Vendor::Oracle => Ok(SourceConnection::Oracle(OracleSource::new(endpoint))),
            Vendor::Olr => {
                // log-mining endpoint must have been registered up front
                if info.olr.is_none() {
                    return Err(Error::Config(format!(
                        "connector '{}' has no log-mining endpoint, use add_olr_conninfo to add it",
                        info.name
                    )));
                }
                Ok(SourceConnection::Olr(OlrSource::new(endpoint)))
            }
        }
    }

    pub fn vendor(&self) -> Vendor {
        match self {
            SourceConnection::Mysql(_) => Vendor::Mysql,
            SourceConnection::Sqlserver(_) => Vendor::Sqlserver,
            SourceConnection::Oracle(_) => Vendor::Oracle,
            SourceConnection::Olr(_) => Vendor::Olr,
        }
    }

    /// Read the current table definitions, identifiers folded per vendor.
    pub fn read_schema(&mut self) -> Result<Vec<TableDef>> {
        match self {
            SourceConnection::Mysql(s) => s.read_schema(),
            SourceConnection::Sqlserver(s) => s.read_schema(),
            SourceConnection::Oracle(s) => s.read_schema(),
            SourceConnection::Olr(s) => s.read_schema(),
        }
    }

    /// Read the next chunk of existing rows for `table`, at most `max`.
    /// An empty result means the table is fully copied.
    pub fn read_snapshot_batch(&mut self, table: &str, max: usize) -> Result<Vec<Row>> {
        match self {
            SourceConnection::Mysql(s) => s.read_snapshot_batch(table, max),
            SourceConnection::Sqlserver(s) => s.read_snapshot_batch(table, max),
            SourceConnection::Oracle(s) => s.read_snapshot_batch(table, max),
            SourceConnection::Olr(s) => s.read_snapshot_batch(table, max),
        }
    }

    /// Poll the next change event, if any is pending.
    pub fn read_change_event(&mut self) -> Result<Option<SourceEvent>> {
        match self {
            SourceConnection::Mysql(s) => s.read_change_event(),
            SourceConnection::Sqlserver(s) => s.read_change_event(),
            SourceConnection::Oracle(s) => s.read_change_event(),
            SourceConnection::Olr(s) => s.read_change_event(),
        }
    }
}

/// Shared normalization core used by every vendor variant.
struct VendorFeed {
    vendor: Vendor,
    endpoint: SourceEndpoint,
    snapshot_pos: HashMap<String, usize>,
}

impl VendorFeed {
    fn new(vendor: Vendor, endpoint: SourceEndpoint) -> Self {
        Self {
            vendor,
            endpoint,
            snapshot_pos: HashMap::new(),
        }
    }

    fn read_schema(&mut self) -> Result<Vec<TableDef>> {
        Ok(self
            .endpoint
            .schema()
            .into_iter()
            .map(|def| self.fold_table(def))
            .collect())
    }

    fn read_snapshot_batch(&mut self, table: &str, max: usize) -> Result<Vec<Row>> {
        let pos = self.snapshot_pos.entry(table.to_string()).or_insert(0);
        let rows = self.endpoint.snapshot_chunk(table, *pos, max);
        *pos += rows.len();
        Ok(rows.into_iter().map(|r| fold_row(self.vendor, r)).collect())
    }

    fn read_change_event(&mut self) -> Result<Option<SourceEvent>> {
        Ok(self.endpoint.next_event()?.map(|ev| self.fold_event(ev)))
    }

    fn fold_table(&self, def: TableDef) -> TableDef {
        TableDef {
            name: self.vendor.fold(&def.name),
            columns: def
                .columns
                .into_iter()
                .map(|c| ColumnDef {
                    name: self.vendor.fold(&c.name),
                    type_name: c.type_name.to_lowercase(),
                    primary_key: c.primary_key,
                    autoincrement: c.autoincrement,
                })
                .collect(),
        }
    }

    fn fold_event(&self, event: SourceEvent) -> SourceEvent {
        match event {
            SourceEvent::Row(ev) => SourceEvent::Row(RowEvent {
                table: self.vendor.fold(&ev.table),
                before: ev.before.map(|r| fold_row(self.vendor, r)),
                after: ev.after.map(|r| fold_row(self.vendor, r)),
                ..ev
            }),
            SourceEvent::Ddl(ev) => SourceEvent::Ddl(DdlEvent {
                op: match ev.op {
                    DdlOp::CreateTable(def) => DdlOp::CreateTable(self.fold_table(def)),
                    DdlOp::AddColumn { table, column } => DdlOp::AddColumn {
                        table: self.vendor.fold(&table),
                        column: ColumnDef {
                            name: self.vendor.fold(&column.name),
                            type_name: column.type_name.to_lowercase(),
                            ..column
                        },
                    },
                    DdlOp::DropColumn { table, column } => DdlOp::DropColumn {
                        table: self.vendor.fold(&table),
                        column: self.vendor.fold(&column),
                    },
                    DdlOp::DropTable { table } => DdlOp::DropTable {
                        table: self.vendor.fold(&table),
                    },
                },
                src_ts_ms: ev.src_ts_ms,
            }),
            SourceEvent::SnapshotCompleted => SourceEvent::SnapshotCompleted,
        }
    }
}

fn fold_row(vendor: Vendor, row: Row) -> Row {
    row.into_iter().map(|(k, v)| (vendor.fold(&k), v)).collect()
}

/// MySQL-family source (binlog-fed).
pub struct MysqlSource {
    feed: VendorFeed,
}

impl MysqlSource {
    fn new(endpoint: SourceEndpoint) -> Self {
        Self {
            feed: VendorFeed::new(Vendor::Mysql, endpoint),
        }
    }

    fn read_schema(&mut self) -> Result<Vec<TableDef>> {
        self.feed.read_schema()
    }

    fn read_snapshot_batch(&mut self, table: &str, max: usize) -> Result<Vec<Row>> {
        self.feed.read_snapshot_batch(table, max)
    }

    fn read_change_event(&mut self) -> Result<Option<SourceEvent>> {
        self.feed.read_change_event()
    }
}

/// SQL-Server-family source (transaction-log-fed). Table ids carry the
/// three-part `db.schema.table` form.
pub struct SqlserverSource {
    feed: VendorFeed,
}

impl SqlserverSource {
    fn new(endpoint: SourceEndpoint) -> Self {
        Self {
            feed: VendorFeed::new(Vendor::Sqlserver, endpoint),
        }
    }

    fn read_schema(&mut self) -> Result<Vec<TableDef>> {
        self.feed.read_schema()
    }

    fn read_snapshot_batch(&mut self, table: &str, max: usize) -> Result<Vec<Row>> {
        self.feed.read_snapshot_batch(table, max)
    }

    fn read_change_event(&mut self) -> Result<Option<SourceEvent>> {
        self.feed.read_change_event()
    }
}

/// Oracle-family source (LogMiner-fed).
pub struct OracleSource {
    feed: VendorFeed,
}

impl OracleSource {
    fn new(endpoint: SourceEndpoint) -> Self {
        Self {
            feed: VendorFeed::new(Vendor::Oracle, endpoint),
        }
    }

    fn read_schema(&mut self) -> Result<Vec<TableDef>> {
        self.feed.read_schema()
    }

    fn read_snapshot_batch(&mut self, table: &str, max: usize) -> Result<Vec<Row>> {
        self.feed.read_snapshot_batch(table, max)
    }

    fn read_change_event(&mut self) -> Result<Option<SourceEvent>> {
        self.feed.read_change_event()
    }
}

/// Oracle source fed by an external log-replication service rather than
/// LogMiner.
pub struct OlrSource {
    feed: VendorFeed,
}

impl OlrSource {
    fn new(endpoint: SourceEndpoint) -> Self {
        Self {
            feed: VendorFeed::new(Vendor::Olr, endpoint),
        }
    }

    fn read_schema(&mut self) -> Result<Vec<TableDef>> {
        self.feed.read_schema()
    }

    fn read_snapshot_batch(&mut self, table: &str, max: usize) -> Result<Vec<Row>> {
        self.feed.read_snapshot_batch(table, max)
    }

    fn read_change_event(&mut self) -> Result<Option<SourceEvent>> {
        self.feed.read_change_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conninfo(vendor: Vendor) -> ConnectionInfo {
        ConnectionInfo {
            name: "c1".into(),
            hostname: "127.0.0.1".into(),
            port: 3306,
            username: "u".into(),
            password: "p".into(),
            srcdb: "inventory".into(),
            dstdb: "postgres".into(),
            table_filter: None,
            snapshot_table_filter: None,
            vendor,
            extra: None,
            olr: None,
        }
    }

    #[test]
    fn test_open_without_adapter_is_connection_error() {
        let hub = SourceHub::new();
        let err = SourceConnection::open(&conninfo(Vendor::Mysql), &hub).unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_olr_requires_secondary_endpoint() {
        let hub = SourceHub::new();
        hub.attach("c1", SourceEndpoint::new());
        let err = SourceConnection::open(&conninfo(Vendor::Olr), &hub).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_identifiers_fold_to_lowercase() {
        let hub = SourceHub::new();
        let endpoint = SourceEndpoint::new();
        endpoint.define_table(TableDef {
            name: "INVENTORY.ORDERS".into(),
            columns: vec![ColumnDef {
                name: "ORDER_NUMBER".into(),
                type_name: "NUMBER(9,0)".into(),
                primary_key: true,
                autoincrement: false,
            }],
        });
        hub.attach("c1", endpoint);

        let mut conn = SourceConnection::open(&conninfo(Vendor::Oracle), &hub).unwrap();
        let schema = conn.read_schema().unwrap();
        assert_eq!(schema[0].name, "inventory.orders");
        assert_eq!(schema[0].columns[0].name, "order_number");
        assert_eq!(schema[0].columns[0].type_name, "number(9,0)");
    }

    #[test]
    fn test_snapshot_batches_advance() {
        let hub = SourceHub::new();
        let endpoint = SourceEndpoint::new();
        endpoint.define_table(TableDef {
            name: "inventory.orders".into(),
            columns: vec![ColumnDef {
                name: "id".into(),
                type_name: "int".into(),
                primary_key: true,
                autoincrement: false,
            }],
        });
        for i in 0..5 {
            endpoint.load_row("inventory.orders", Row::from_iter([("id".into(), json!(i))]));
        }
        hub.attach("c1", endpoint);

        let mut conn = SourceConnection::open(&conninfo(Vendor::Mysql), &hub).unwrap();
        assert_eq!(conn.read_snapshot_batch("inventory.orders", 2).unwrap().len(), 2);
        assert_eq!(conn.read_snapshot_batch("inventory.orders", 2).unwrap().len(), 2);
        assert_eq!(conn.read_snapshot_batch("inventory.orders", 2).unwrap().len(), 1);
        assert!(conn.read_snapshot_batch("inventory.orders", 2).unwrap().is_empty());
    }
}
