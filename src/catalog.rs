//! Static default type-equivalence catalog across source vendors.
//!
//! Destination types use canonical PostgreSQL-style display names
//! (`integer`, `character varying`, `timestamp without time zone`, ...) so
//! that what the attribute view reports matches what a target catalog would
//! show. Every lookup is total for the engine: an unknown source type is a
//! non-fatal mapping miss that falls back to `text`.

use crate::conninfo::Vendor;
use tracing::warn;

/// Single-target defaults for MySQL-family source types.
static MYSQL_DEFAULTS: &[(&str, &str)] = &[
    ("tinyint", "smallint"),
    ("tinyint unsigned", "smallint"),
    ("smallint", "smallint"),
    ("smallint unsigned", "integer"),
    ("mediumint", "integer"),
    ("mediumint unsigned", "integer"),
    ("int", "integer"),
    ("int unsigned", "bigint"),
    ("integer", "integer"),
    ("integer unsigned", "bigint"),
    ("bigint", "bigint"),
    ("bigint unsigned", "numeric"),
    ("year", "integer"),
    ("dec", "numeric"),
    ("dec unsigned", "numeric"),
    ("decimal", "numeric"),
    ("decimal unsigned", "numeric"),
    ("fixed", "numeric"),
    ("fixed unsigned", "numeric"),
    ("numeric", "numeric"),
    ("numeric unsigned", "numeric"),
    ("double", "double precision"),
    ("double unsigned", "double precision"),
    ("double precision", "double precision"),
    ("double precision unsigned", "double precision"),
    ("float", "real"),
    ("float unsigned", "real"),
    ("real", "real"),
    ("real unsigned", "real"),
    ("bool", "boolean"),
    ("boolean", "boolean"),
    ("bit", "bit"),
    ("date", "date"),
    ("time", "time without time zone"),
    ("datetime", "timestamp without time zone"),
    ("timestamp", "timestamp with time zone"),
    ("char", "character"),
    ("varchar", "character varying"),
    ("tinytext", "text"),
    ("text", "text"),
    ("mediumtext", "text"),
    ("longtext", "text"),
    ("long varchar", "text"),
    ("enum", "text"),
    ("set", "text"),
    ("binary", "bytea"),
    ("varbinary", "bytea"),
    ("tinyblob", "bytea"),
    ("blob", "bytea"),
    ("mediumblob", "bytea"),
    ("longblob", "bytea"),
    ("json", "jsonb"),
    // spatial types go to text by default
    ("geometry", "text"),
    ("geometrycollection", "text"),
    ("geomcollection", "text"),
    ("linestring", "text"),
    ("multilinestring", "text"),
    ("multipoint", "text"),
    ("multipolygon", "text"),
    ("point", "text"),
    ("polygon", "text"),
];

/// Single-target defaults for SQL-Server-family source types.
static SQLSERVER_DEFAULTS: &[(&str, &str)] = &[
    ("int identity", "integer"),
    ("bigint identity", "bigint"),
    ("smallint identity", "smallint"),
    ("int", "integer"),
    ("bigint", "bigint"),
    ("smallint", "smallint"),
    ("tinyint", "smallint"),
    ("numeric", "numeric"),
    ("decimal", "numeric"),
    ("bit", "boolean"),
    ("money", "money"),
    ("smallmoney", "money"),
    ("real", "real"),
    ("float", "real"),
    ("date", "date"),
    ("time", "time without time zone"),
    ("datetime", "timestamp without time zone"),
    ("datetime2", "timestamp without time zone"),
    ("smalldatetime", "timestamp without time zone"),
    ("datetimeoffset", "timestamp with time zone"),
    ("char", "character"),
    ("nchar", "character"),
    ("varchar", "character varying"),
    ("nvarchar", "character varying"),
    ("text", "text"),
    ("ntext", "text"),
    ("enum", "text"),
    ("binary", "bytea"),
    ("varbinary", "bytea"),
    ("image", "bytea"),
    ("uniqueidentifier", "uuid"),
    ("xml", "text"),
    ("geometry", "text"),
    ("geography", "text"),
];

/// Single-target defaults for Oracle-family source types (also used by the
/// log-mining variant). Scaled `number(p,0)` types are handled by
/// [`oracle_number_target`] instead of table entries.
static ORACLE_DEFAULTS: &[(&str, &str)] = &[
    ("binary_double", "double precision"),
    ("binary_float", "real"),
    ("float", "real"),
    ("number", "numeric"),
    ("numeric", "numeric"),
    ("decimal", "numeric"),
    ("date", "timestamp without time zone"),
    ("timestamp", "timestamp without time zone"),
    ("timestamp with time zone", "timestamp with time zone"),
    ("timestamp with local time zone", "timestamp with time zone"),
    ("interval day to second", "interval"),
    ("interval year to month", "interval"),
    ("char", "character"),
    ("nchar", "character"),
    ("varchar", "character varying"),
    ("varchar2", "character varying"),
    ("nvarchar2", "character varying"),
    ("long", "text"),
    ("raw", "bytea"),
    ("long raw", "bytea"),
    ("rowid", "text"),
    ("urowid", "text"),
    ("xmltype", "text"),
    ("bfile", "text"),
    ("blob", "bytea"),
    ("clob", "text"),
    ("nclob", "text"),
];

/// Vendor-merged canonical table backing [`verify_default_type_mappings`].
/// One entry per source type name as observed in source catalogs.
static CANONICAL_DEFAULTS: &[(&str, &str)] = &[
    ("int", "integer"),
    ("int identity", "integer"),
    ("varchar", "character varying"),
    ("enum", "text"),
    ("geometry", "text"),
    ("float", "real"),
    ("double", "double precision"),
    ("number", "numeric"),
    ("decimal", "numeric"),
    ("binary", "bytea"),
    ("smallint", "smallint"),
    ("tinyint", "smallint"),
    ("char", "character"),
    ("nchar", "character"),
    ("ntext", "text"),
    ("image", "bytea"),
    ("geography", "text"),
    ("nvarchar", "character varying"),
    ("xml", "text"),
    ("uniqueidentifier", "uuid"),
    ("binary_double", "double precision"),
    ("binary_float", "real"),
    ("long", "text"),
    ("interval day to second", "interval"),
    ("interval year to month", "interval"),
    ("timestamp with time zone", "timestamp with time zone"),
    ("timestamp with local time zone", "timestamp with time zone"),
    ("nvarchar2", "character varying"),
    ("varchar2", "character varying"),
    ("raw", "bytea"),
    ("bfile", "text"),
    ("clob", "text"),
    ("nclob", "text"),
    ("rowid", "text"),
    ("urowid", "text"),
    ("decimal unsigned", "numeric"),
    ("double unsigned", "double precision"),
    ("float unsigned", "real"),
    ("int unsigned", "bigint"),
    ("mediumint", "integer"),
    ("mediumint unsigned", "integer"),
    ("year", "integer"),
    ("smallint unsigned", "integer"),
    ("tinyint unsigned", "smallint"),
    ("varbinary", "bytea"),
    ("blob", "bytea"),
    ("longblob", "bytea"),
    ("tinyblob", "bytea"),
    ("mediumtext", "text"),
    ("tinytext", "text"),
    ("longtext", "text"),
    ("json", "jsonb"),
    ("bit", "boolean"),
    ("smallmoney", "money"),
];

/// Source types accepted as more than one destination type, depending on the
/// target's timezone configuration.
static MULTI_TARGETS: &[(&str, &[&str])] = &[
    (
        "date",
        &["timestamp without time zone", "timestamp with time zone"],
    ),
    ("time", &["time without time zone", "time with time zone"]),
    (
        "datetime",
        &["timestamp without time zone", "timestamp with time zone"],
    ),
    (
        "datetime2",
        &["timestamp without time zone", "timestamp with time zone"],
    ),
    (
        "datetimeoffset",
        &["timestamp without time zone", "timestamp with time zone"],
    ),
    (
        "smalldatetime",
        &["timestamp without time zone", "timestamp with time zone"],
    ),
    (
        "timestamp",
        &["timestamp without time zone", "timestamp with time zone"],
    ),
];

/// Static default type-equivalence table across vendors.
pub struct TypeMappingCatalog;

impl TypeMappingCatalog {
    /// Look up the default destination type for a source type, without
    /// fallback. Length/precision qualifiers are stripped before lookup
    /// (`varchar(255)` resolves as `varchar`), except the cases where the
    /// qualifier changes the target: `bit(1)` and scaled Oracle `number`.
    pub fn lookup(vendor: Vendor, src_type: &str) -> Option<&'static str> {
        let lowered = src_type.trim().to_lowercase();
        let (base, args) = split_type_args(&lowered);

        match vendor {
            Vendor::Mysql => {
                if base == "bit" && args.as_deref() == Some("1") {
                    return Some("boolean");
                }
                table_get(MYSQL_DEFAULTS, base)
            }
            Vendor::Sqlserver => table_get(SQLSERVER_DEFAULTS, base),
            Vendor::Oracle | Vendor::Olr => {
                if base == "number" {
                    if let Some(t) = args.as_deref().and_then(oracle_number_target) {
                        return Some(t);
                    }
                }
                table_get(ORACLE_DEFAULTS, base)
            }
        }
    }

    /// Resolve a source type to its destination type, falling back to the
    /// nearest safe textual representation on a miss. Returns the type and
    /// whether the fallback was taken.
    pub fn resolve(vendor: Vendor, src_type: &str) -> (&'static str, bool) {
        match Self::lookup(vendor, src_type) {
            Some(t) => (t, false),
            None => {
                warn!(%vendor, src_type, "no default type mapping, falling back to text");
                ("text", true)
            }
        }
    }

    /// Destination types acceptable for a multi-target source type.
    pub fn multi_targets(src_type: &str) -> Option<&'static [&'static str]> {
        let lowered = src_type.trim().to_lowercase();
        MULTI_TARGETS
            .iter()
            .find(|(k, _)| *k == lowered)
            .map(|(_, v)| *v)
    }
}

/// Check a (source type, destination type) pair against the canonical
/// defaults. Equality order: exact string equality, then the single-target
/// table, then multi-target set membership.
pub fn verify_default_type_mappings(src_type: &str, dst_type: &str) -> bool {
    let src = src_type.trim().to_lowercase();
    let dst = dst_type.trim().to_lowercase();

    if src == dst {
        return true;
    }
    if let Some(expected) = table_get(CANONICAL_DEFAULTS, &src) {
        if expected == dst {
            return true;
        }
    }
    if let Some(targets) = TypeMappingCatalog::multi_targets(&src) {
        if targets.contains(&dst.as_str()) {
            return true;
        }
    }
    false
}

/// Destination type for Oracle `number(p,s)` given its argument list.
/// Scale zero compresses to the narrowest integer type wide enough for the
/// precision; anything else stays numeric.
fn oracle_number_target(args: &str) -> Option<&'static str> {
    let mut parts = args.split(',').map(str::trim);
    let precision: u32 = parts.next()?.parse().ok()?;
    let scale: i32 = match parts.next() {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    if scale != 0 {
        return Some("numeric");
    }
    Some(match precision {
        0 => "numeric",
        1..=4 => "smallint",
        5..=9 => "integer",
        10..=18 => "bigint",
        _ => "numeric",
    })
}

fn table_get(table: &'static [(&str, &str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Split `varchar(255)` into (`varchar`, Some("255")). Types without an
/// argument list come back unchanged.
fn split_type_args(lowered: &str) -> (&str, Option<String>) {
    match (lowered.find('('), lowered.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            let base = lowered[..open].trim_end();
            let args = lowered[open + 1..close].replace(' ', "");
            (base, Some(args))
        }
        _ => (lowered, None),
    }
}
