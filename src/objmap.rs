//! User-declared object mapping overrides and attribute resolution.
//!
//! An [`ObjectMapEntry`] overrides how one source object lands in the
//! target: its table name, a column name, a column's destination type, or a
//! value transform. Entries are persisted and take effect at the next start
//! or an explicit reload, when [`resolve_attributes`] materializes the full
//! per-column [`AttributeMapping`] set from overrides layered over the
//! static type catalog and identifier passthrough.
//!
//! Precedence, highest to lowest: transform > datatype override >
//! column-name override > table-name override > vendor default.

use crate::catalog::TypeMappingCatalog;
use crate::conninfo::{ConnectionInfo, Vendor};
use crate::source::TableDef;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// What a mapping entry overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MapKind {
    Table,
    Column,
    Datatype,
    Transform,
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MapKind::Table => "table",
            MapKind::Column => "column",
            MapKind::Datatype => "datatype",
            MapKind::Transform => "transform",
        };
        f.write_str(s)
    }
}

impl FromStr for MapKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "table" => Ok(MapKind::Table),
            "column" => Ok(MapKind::Column),
            "datatype" => Ok(MapKind::Datatype),
            "transform" => Ok(MapKind::Transform),
            other => Err(Error::Config(format!(
                "invalid object mapping kind '{}', expected table|column|datatype|transform",
                other
            ))),
        }
    }
}

/// One override: (connector, kind, source id) -> destination value.
///
/// Deleting an entry only disables it; the next reload then reverts the
/// object to its default mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMapEntry {
    pub connector: String,
    pub kind: MapKind,
    pub source: String,
    pub destination: String,
    pub enabled: bool,
}

/// Materialized destination mapping for one source column. Never mutated
/// directly; recomputed wholesale on start and reload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeMapping {
    pub src_table: String,
    pub src_column: String,
    pub src_type: String,
    pub dst_table: String,
    pub dst_column: String,
    pub dst_type: String,
    pub transform: Option<String>,
}

/// Persisted store of object mapping overrides, all connectors together.
pub struct ObjectMappingStore {
    file_path: PathBuf,
    entries: BTreeMap<(String, MapKind, String), ObjectMapEntry>,
}

impl ObjectMappingStore {
    pub async fn open(metadata_dir: &Path) -> Result<Self> {
        fs::create_dir_all(metadata_dir).await?;
        let file_path = metadata_dir.join("objmap.json");
        let entries: Vec<ObjectMapEntry> = if file_path.exists() {
            let content = fs::read_to_string(&file_path).await?;
            serde_json::from_str(&content)?
        } else {
            debug!("no objmap file found at {:?}", file_path);
            Vec::new()
        };
        let entries = entries
            .into_iter()
            .map(|e| ((e.connector.clone(), e.kind, e.source.clone()), e))
            .collect();
        Ok(Self { file_path, entries })
    }

    /// Insert or update an override. Validates the kind-specific source
    /// pattern shape and, for transforms, that the expression parses.
    pub async fn add(
        &mut self,
        connector: &str,
        kind: MapKind,
        source: &str,
        destination: &str,
    ) -> Result<()> {
        validate_pattern(kind, source)?;
        if destination.trim().is_empty() {
            return Err(Error::Config("mapping destination must not be empty".into()));
        }
        if kind == MapKind::Transform {
            TransformExpr::parse(destination)?;
        }
        let source = source.trim().to_lowercase();
        let entry = ObjectMapEntry {
            connector: connector.to_string(),
            kind,
            source: source.clone(),
            destination: destination.trim().to_string(),
            enabled: true,
        };
        info!(connector, %kind, source = %entry.source, dest = %entry.destination, "object mapping added");
        self.entries
            .insert((connector.to_string(), kind, source), entry);
        self.save().await
    }

    /// Disable an override so the next reload reverts the object to its
    /// default mapping.
    pub async fn del(&mut self, connector: &str, kind: MapKind, source: &str) -> Result<()> {
        let key = (
            connector.to_string(),
            kind,
            source.trim().to_lowercase(),
        );
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.enabled = false;
                info!(connector, %kind, source = %key.2, "object mapping disabled");
                self.save().await
            }
            None => Err(Error::Config(format!(
                "no {} mapping for '{}' on connector '{}'",
                kind, source, connector
            ))),
        }
    }

    /// Enabled entries for one connector.
    pub fn entries_for(&self, connector: &str) -> Vec<ObjectMapEntry> {
        self.entries
            .values()
            .filter(|e| e.connector == connector && e.enabled)
            .cloned()
            .collect()
    }

    /// All entries for one connector, disabled included.
    pub fn all_for(&self, connector: &str) -> Vec<ObjectMapEntry> {
        self.entries
            .values()
            .filter(|e| e.connector == connector)
            .cloned()
            .collect()
    }

    /// Drop every entry belonging to a connector (on del_conninfo).
    pub async fn purge(&mut self, connector: &str) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|(c, _, _), _| c != connector);
        if self.entries.len() != before {
            self.save().await?;
        }
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let temp_path = self.file_path.with_extension("tmp");
        let list: Vec<&ObjectMapEntry> = self.entries.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.file_path).await?;
        Ok(())
    }
}

fn validate_pattern(kind: MapKind, source: &str) -> Result<()> {
    let parts: Vec<&str> = source.trim().split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Config(format!("malformed source pattern '{}'", source)));
    }
    let ok = match kind {
        // db.table, or db.schema.table for three-part vendors
        MapKind::Table => parts.len() == 2 || parts.len() == 3,
        // db.table.column or db.schema.table.column
        MapKind::Column | MapKind::Transform => parts.len() == 3 || parts.len() == 4,
        // a bare type name, or a column-scoped override
        MapKind::Datatype => parts.len() == 1 || parts.len() == 3 || parts.len() == 4,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "source pattern '{}' does not fit kind '{}'",
            source, kind
        )))
    }
}

/// Materialize the attribute mappings for one connector from its current
/// schema and overrides. Always fully resolvable: every column gets a
/// destination table, column and type.
pub fn resolve_attributes(
    vendor: Vendor,
    conninfo: &ConnectionInfo,
    tables: &[TableDef],
    entries: &[ObjectMapEntry],
) -> Vec<AttributeMapping> {
    let mut out = Vec::new();
    for table in tables {
        if !conninfo.table_included(&table.name) {
            continue;
        }
        let dst_table = lookup(entries, MapKind::Table, &table.name)
            .map(str::to_string)
            .unwrap_or_else(|| default_destination_table(&table.name));

        for column in &table.columns {
            let column_id = format!("{}.{}", table.name, column.name);

            let dst_column = lookup(entries, MapKind::Column, &column_id)
                .map(str::to_string)
                .unwrap_or_else(|| column.name.clone());

            // column-scoped datatype override wins over a type-name-scoped
            // one, which wins over the catalog default
            let dst_type = lookup(entries, MapKind::Datatype, &column_id)
                .or_else(|| lookup(entries, MapKind::Datatype, &column.type_name))
                .map(str::to_string)
                .unwrap_or_else(|| TypeMappingCatalog::resolve(vendor, &column.type_name).0.to_string());

            let transform = lookup(entries, MapKind::Transform, &column_id).map(str::to_string);

            out.push(AttributeMapping {
                src_table: table.name.clone(),
                src_column: column.name.clone(),
                src_type: column.type_name.clone(),
                dst_table: dst_table.clone(),
                dst_column,
                dst_type,
                transform,
            });
        }
    }
    out
}

fn lookup<'a>(entries: &'a [ObjectMapEntry], kind: MapKind, source: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|e| e.kind == kind && e.source == source)
        .map(|e| e.destination.as_str())
}

/// Default destination for a source table id: destination schema is the
/// source database name, table name carries over. Three-part SQL Server ids
/// drop the middle schema part.
pub fn default_destination_table(src_table: &str) -> String {
    let parts: Vec<&str> = src_table.split('.').collect();
    match parts.as_slice() {
        [db, .., table] => format!("{}.{}", db, table),
        _ => src_table.to_string(),
    }
}

/// A single-placeholder value transform, e.g. `"%d + 1000000"` or
/// `"'ID-' || %s"`. `%d` binds a numeric value, `%s` a string. Applied to
/// the column's value at write time for every row.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformExpr {
    numeric: bool,
    prefix: Option<Operand>,
    suffix: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
struct Operand {
    op: TransformOp,
    literal: Literal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TransformOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

impl TransformExpr {
    /// Parse an expression. Exactly one `%d` or `%s` placeholder, with an
    /// optional `literal op` before it and an optional `op literal` after.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let (idx, numeric) = match (expr.find("%d"), expr.find("%s")) {
            (Some(i), None) => (i, true),
            (None, Some(i)) => (i, false),
            _ => {
                return Err(Error::Transform(format!(
                    "expression '{}' must contain exactly one %d or %s placeholder",
                    expr
                )))
            }
        };
        let left = expr[..idx].trim();
        let right = expr[idx + 2..].trim();
        if right.contains("%d") || right.contains("%s") {
            return Err(Error::Transform(format!(
                "expression '{}' must contain exactly one %d or %s placeholder",
                expr
            )));
        }

        let prefix = if left.is_empty() {
            None
        } else {
            Some(parse_operand(left, false, numeric, expr)?)
        };
        let suffix = if right.is_empty() {
            None
        } else {
            Some(parse_operand(right, true, numeric, expr)?)
        };

        Ok(Self {
            numeric,
            prefix,
            suffix,
        })
    }

    /// Apply the transform to one value.
    pub fn apply(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if self.numeric {
            let mut acc = as_number(value)?;
            if let Some(pre) = &self.prefix {
                acc = apply_numeric(pre.op, literal_number(&pre.literal)?, acc)?;
            }
            if let Some(post) = &self.suffix {
                acc = apply_numeric(post.op, acc, literal_number(&post.literal)?)?;
            }
            Ok(number_value(acc))
        } else {
            let mut acc = as_string(value);
            if let Some(pre) = &self.prefix {
                acc = format!("{}{}", literal_string(&pre.literal), acc);
            }
            if let Some(post) = &self.suffix {
                acc = format!("{}{}", acc, literal_string(&post.literal));
            }
            Ok(Value::String(acc))
        }
    }
}

fn parse_operand(part: &str, op_first: bool, numeric: bool, expr: &str) -> Result<Operand> {
    let bad = || Error::Transform(format!("malformed transform expression '{}'", expr));

    let (op_str, lit_str) = if op_first {
        let mut it = part.splitn(2, char::is_whitespace);
        (it.next().ok_or_else(bad)?, it.next().ok_or_else(bad)?.trim())
    } else {
        let pos = part.rfind(char::is_whitespace).ok_or_else(bad)?;
        (part[pos..].trim(), part[..pos].trim())
    };

    let op = match op_str {
        "+" if numeric => TransformOp::Add,
        "-" if numeric => TransformOp::Sub,
        "*" if numeric => TransformOp::Mul,
        "/" if numeric => TransformOp::Div,
        "||" if !numeric => TransformOp::Concat,
        _ => return Err(bad()),
    };

    let literal = if numeric {
        if let Ok(i) = lit_str.parse::<i64>() {
            Literal::Int(i)
        } else if let Ok(f) = lit_str.parse::<f64>() {
            Literal::Float(f)
        } else {
            return Err(bad());
        }
    } else {
        let inner = lit_str
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .ok_or_else(bad)?;
        Literal::Str(inner.to_string())
    };

    Ok(Operand { op, literal })
}

fn as_number(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::Transform(format!("non-finite number {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| Error::Transform(format!("'{}' is not numeric", s))),
        other => Err(Error::Transform(format!("'{}' is not numeric", other))),
    }
}

fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn literal_number(lit: &Literal) -> Result<f64> {
    match lit {
        Literal::Int(i) => Ok(*i as f64),
        Literal::Float(f) => Ok(*f),
        Literal::Str(s) => Err(Error::Transform(format!("'{}' is not numeric", s))),
    }
}

fn literal_string(lit: &Literal) -> String {
    match lit {
        Literal::Str(s) => s.clone(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
    }
}

fn apply_numeric(op: TransformOp, lhs: f64, rhs: f64) -> Result<f64> {
    match op {
        TransformOp::Add => Ok(lhs + rhs),
        TransformOp::Sub => Ok(lhs - rhs),
        TransformOp::Mul => Ok(lhs * rhs),
        TransformOp::Div => {
            if rhs == 0.0 {
                Err(Error::Transform("division by zero".into()))
            } else {
                Ok(lhs / rhs)
            }
        }
        TransformOp::Concat => Err(Error::Transform("|| applies to strings only".into())),
    }
}

fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
