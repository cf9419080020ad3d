//! redb table definitions for the hostdeck state store.
//!
//! Values are JSON-serialized records. App ids never contain `/`, so
//! `{app_id}/` is a safe prefix for per-app scans.

use redb::TableDefinition;

/// Version records keyed by `{app_id}/{version_id}`.
pub const VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("versions");

/// Traffic rule lists keyed by `{app_id}/{environment}`.
pub const TRAFFIC_RULES: TableDefinition<&str, &[u8]> = TableDefinition::new("traffic_rules");

/// Last issued version number keyed by `{app_id}`.
pub const VERSION_COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("version_counters");

pub fn version_key(app_id: &str, version_id: &str) -> String {
    format!("{app_id}/{version_id}")
}

pub fn traffic_key(app_id: &str, environment: &str) -> String {
    format!("{app_id}/{environment}")
}

pub fn app_prefix(app_id: &str) -> String {
    format!("{app_id}/")
}
