//! Connection info registry for source databases.
//!
//! A [`ConnectionInfo`] names one external database to replicate from,
//! together with the vendor tag that selects per-vendor behavior everywhere
//! else in the engine. Entries are persisted as a single JSON file under the
//! metadata directory and survive process restart; writes go through a
//! temp-file-then-rename sequence so the file is never partially written.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Source database vendor family.
///
/// The vendor tag is fixed at `add_conninfo` time and drives tagged-union
/// dispatch for everything vendor-specific: the default type catalog,
/// identifier collation, and the source capability implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Mysql,
    Sqlserver,
    Oracle,
    /// Oracle via an external log-mining endpoint. Requires a secondary
    /// endpoint registered with `add_olr_conninfo` before start.
    Olr,
}

impl Vendor {
    /// Whether unquoted source identifiers compare case-insensitively and
    /// are folded to lower case on the destination side.
    pub fn folds_identifiers(&self) -> bool {
        // All currently supported vendors either fold unquoted identifiers
        // themselves or ship case-insensitive default collations.
        true
    }

    /// Fold a source identifier according to the vendor's collation rules.
    pub fn fold(&self, ident: &str) -> String {
        if self.folds_identifiers() {
            ident.to_lowercase()
        } else {
            ident.to_string()
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Vendor::Mysql => "mysql",
            Vendor::Sqlserver => "sqlserver",
            Vendor::Oracle => "oracle",
            Vendor::Olr => "olr",
        };
        f.write_str(s)
    }
}

impl FromStr for Vendor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(Vendor::Mysql),
            "sqlserver" => Ok(Vendor::Sqlserver),
            "oracle" => Ok(Vendor::Oracle),
            "olr" => Ok(Vendor::Olr),
            other => Err(Error::Config(format!("unknown vendor tag '{}'", other))),
        }
    }
}

/// Optional SSL material for the source connection.
///
/// Written whole by `add_extra_conninfo` and cleared whole by
/// `del_extra_conninfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtraConnectionInfo {
    pub ssl_mode: String,
    pub ssl_keystore: String,
    pub ssl_keystore_pass: String,
    pub ssl_truststore: String,
    pub ssl_truststore_pass: String,
}

/// Secondary log-mining endpoint for vendors that need one (`olr`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OlrConnectionInfo {
    pub host: String,
    pub port: u16,
    pub service: String,
}

/// One named source database registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Source database (or service) to replicate from.
    pub srcdb: String,
    /// Destination database identifier; destination schemas are created
    /// under it per source database name.
    pub dstdb: String,
    /// Comma-separated `db.table` list restricting capture; `None` = all.
    pub table_filter: Option<String>,
    /// Like `table_filter` but restricting only the snapshot copy phase.
    pub snapshot_table_filter: Option<String>,
    pub vendor: Vendor,
    #[serde(default)]
    pub extra: Option<ExtraConnectionInfo>,
    #[serde(default)]
    pub olr: Option<OlrConnectionInfo>,
}

impl ConnectionInfo {
    /// Parse the positional `extra1`/`extra2` filter arguments. The control
    /// surface uses the literal string `"null"` (or empty) for "unset".
    pub fn parse_filter(arg: &str) -> Option<String> {
        let trimmed = arg.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Whether `table` (a fully-qualified, case-folded source id) passes the
    /// capture filter.
    pub fn table_included(&self, table: &str) -> bool {
        filter_matches(self.table_filter.as_deref(), table)
    }

    /// Whether `table` passes the snapshot-phase filter on top of the
    /// capture filter.
    pub fn snapshot_included(&self, table: &str) -> bool {
        self.table_included(table)
            && filter_matches(self.snapshot_table_filter.as_deref(), table)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Config(format!(
                "invalid connector name '{}'",
                self.name
            )));
        }
        if self.hostname.is_empty() {
            return Err(Error::Config("hostname must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be non-zero".into()));
        }
        if self.srcdb.is_empty() || self.dstdb.is_empty() {
            return Err(Error::Config(
                "source and destination database must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn filter_matches(filter: Option<&str>, table: &str) -> bool {
    match filter {
        None => true,
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .any(|pat| pat.eq_ignore_ascii_case(table)),
    }
}

/// Persisted registry of [`ConnectionInfo`] entries.
///
/// The whole registry is one JSON document; saves are atomic via a temporary
/// file and rename, so a crash mid-write never corrupts it.
pub struct ConnInfoStore {
    file_path: PathBuf,
    entries: BTreeMap<String, ConnectionInfo>,
}

impl ConnInfoStore {
    /// Open the registry under `metadata_dir`, loading any persisted entries.
    pub async fn open(metadata_dir: &Path) -> Result<Self> {
        fs::create_dir_all(metadata_dir).await?;
        let file_path = metadata_dir.join("conninfo.json");
        let entries = if file_path.exists() {
            let content = fs::read_to_string(&file_path).await?;
            serde_json::from_str(&content)?
        } else {
            debug!("no conninfo file found at {:?}", file_path);
            BTreeMap::new()
        };
        Ok(Self { file_path, entries })
    }

    /// Insert a new connection. Rejects duplicates and invalid fields.
    pub async fn add(&mut self, info: ConnectionInfo) -> Result<()> {
        info.validate()?;
        if self.entries.contains_key(&info.name) {
            return Err(Error::Config(format!(
                "connection info '{}' already exists",
                info.name
            )));
        }
        info!(name = %info.name, vendor = %info.vendor, "adding connection info");
        self.entries.insert(info.name.clone(), info);
        self.save().await
    }

    /// Attach the OLR endpoint to an existing connection.
    pub async fn add_olr(&mut self, name: &str, olr: OlrConnectionInfo) -> Result<()> {
        let entry = self.get_mut(name)?;
        entry.olr = Some(olr);
        self.save().await
    }

    /// Overwrite the SSL material of an existing connection.
    pub async fn add_extra(&mut self, name: &str, extra: ExtraConnectionInfo) -> Result<()> {
        let entry = self.get_mut(name)?;
        entry.extra = Some(extra);
        self.save().await
    }

    /// Clear the SSL material of an existing connection.
    pub async fn del_extra(&mut self, name: &str) -> Result<()> {
        let entry = self.get_mut(name)?;
        entry.extra = None;
        self.save().await
    }

    /// Remove a connection. Returns whether an entry existed.
    pub async fn del(&mut self, name: &str) -> Result<bool> {
        let existed = self.entries.remove(name).is_some();
        if existed {
            info!(name, "deleted connection info");
            self.save().await?;
        }
        Ok(existed)
    }

    pub fn get(&self, name: &str) -> Result<&ConnectionInfo> {
        self.entries.get(name).ok_or_else(|| {
            Error::Config(format!(
                "connection info '{}' does not exist, use add_conninfo to add one first",
                name
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionInfo> {
        self.entries.values()
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut ConnectionInfo> {
        self.entries.get_mut(name).ok_or_else(|| {
            Error::Config(format!(
                "connection info '{}' does not exist, use add_conninfo to add one first",
                name
            ))
        })
    }

    async fn save(&self) -> Result<()> {
        let temp_path = self.file_path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.file_path).await?;
        debug!(path = ?self.file_path, "conninfo saved");
        Ok(())
    }
}
