//! StateStore — redb-backed persistence for hostdeck.
//!
//! Versions, traffic rules and per-app version counters are stored in three
//! tables. The store supports both on-disk and in-memory backends (the latter
//! for testing).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hostdeck_core::{
    ListOptions, TrafficRule, TrafficRules, Version, VersionStatus, VersionUpdate,
};
use redb::{ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::database::Database;
use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<redb::Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
            }
        }
        let db = redb::Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = redb::Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(TRAFFIC_RULES).map_err(map_err!(Table))?;
        txn.open_table(VERSION_COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

#[async_trait]
impl Database for StateStore {
    async fn create_version(&self, version: Version) -> StateResult<Version> {
        let key = version_key(&version.app_id, &version.version_id);
        let value = serde_json::to_vec(&version).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, status = %version.status, "version created");
        Ok(version)
    }

    async fn update_version(&self, update: &VersionUpdate) -> StateResult<Version> {
        let key = version_key(&update.app_id, &update.version_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let version = {
            let mut table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            let existing = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| serde_json::from_slice::<Version>(guard.value()));
            let mut version = match existing {
                Some(parsed) => parsed.map_err(map_err!(Deserialize))?,
                None => return Err(StateError::NotFound(key)),
            };
            update.apply_to(&mut version);
            let value = serde_json::to_vec(&version).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            version
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, status = %version.status, "version updated");
        Ok(version)
    }

    async fn get_version(&self, app_id: &str, version_id: &str) -> StateResult<Option<Version>> {
        let key = version_key(app_id, version_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let version: Version =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    async fn list_versions(&self, app_id: &str, options: ListOptions) -> StateResult<Vec<Version>> {
        let prefix = app_prefix(app_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let version: Version =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if options.exclude_incomplete && version.status != VersionStatus::Complete {
                continue;
            }
            results.push(version);
        }
        results.sort_by_key(|v| (v.created_at, v.version_num));
        Ok(results)
    }

    async fn next_version_num(&self, app_id: &str) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next = {
            let mut table = txn.open_table(VERSION_COUNTERS).map_err(map_err!(Table))?;
            let current = table
                .get(app_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            let next = current + 1;
            table.insert(app_id, next).map_err(map_err!(Write))?;
            next
        };
        txn.commit().map_err(map_err!(Transaction))?;
        u32::try_from(next).map_err(map_err!(Write))
    }

    async fn update_traffic_rules(
        &self,
        app_id: &str,
        environment: &str,
        rules: Vec<TrafficRule>,
    ) -> StateResult<()> {
        let key = traffic_key(app_id, environment);
        let value = serde_json::to_vec(&rules).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TRAFFIC_RULES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, rules = rules.len(), "traffic rules updated");
        Ok(())
    }

    async fn get_traffic_rules(&self, app_id: &str) -> StateResult<TrafficRules> {
        let prefix = app_prefix(app_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRAFFIC_RULES).map_err(map_err!(Table))?;
        let mut results = TrafficRules::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let Some(environment) = key.value().strip_prefix(&prefix) else {
                break;
            };
            let rules: Vec<TrafficRule> =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.insert(environment.to_string(), rules);
        }
        Ok(results)
    }

    async fn delete_version(&self, app_id: &str, version_id: &str) -> StateResult<bool> {
        let key = version_key(app_id, version_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "version deleted");
        Ok(existed)
    }
}
