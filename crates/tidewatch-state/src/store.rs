//! StateStore — redb-backed state persistence for Tidewatch.
//!
//! Provides typed operations over monitored applications, monitored hosts,
//! and the append-only health-check log. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! redb serializes write transactions, so record ids are allocated without
//! any locking of our own and concurrent appends never lose records.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
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
        txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(HEALTH_CHECKS).map_err(map_err!(Table))?;
        txn.open_table(APP_CHECK_INDEX).map_err(map_err!(Table))?;
        txn.open_table(HOST_CHECK_INDEX).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Applications ───────────────────────────────────────────────

    /// Insert or update a monitored application.
    pub fn put_application(&self, app: &MonitoredApplication) -> StateResult<()> {
        let value = serde_json::to_vec(app).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            table
                .insert(app.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app_id = %app.id, "application stored");
        Ok(())
    }

    /// Get an application by ID.
    pub fn get_application(&self, app_id: &str) -> StateResult<Option<MonitoredApplication>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        match table.get(app_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let app: MonitoredApplication =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(app))
            }
            None => Ok(None),
        }
    }

    /// List all applications.
    pub fn list_applications(&self) -> StateResult<Vec<MonitoredApplication>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let app: MonitoredApplication =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(app);
        }
        Ok(results)
    }

    /// Reset an application's consecutive-failure counter to zero.
    ///
    /// Read-modify-write inside one transaction, so it cannot clobber a
    /// concurrent check's counter update.
    pub fn reset_application_failures(&self, app_id: &str) -> StateResult<MonitoredApplication> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let app = {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            let mut app = read_entity::<MonitoredApplication>(&table, app_id)?
                .ok_or_else(|| StateError::ApplicationNotFound(app_id.to_string()))?;
            app.consecutive_failures = 0;
            let value = serde_json::to_vec(&app).map_err(map_err!(Serialize))?;
            table
                .insert(app_id, value.as_slice())
                .map_err(map_err!(Write))?;
            app
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, "failure counter reset");
        Ok(app)
    }

    /// Record an application check: update the counter and last-checked
    /// stamp, and append the record, in a single transaction.
    ///
    /// Returns the updated application and the record with its assigned id.
    pub fn commit_application_check(
        &self,
        record: HealthCheckRecord,
    ) -> StateResult<(MonitoredApplication, HealthCheckRecord)> {
        let CheckTarget::Application(app_id) = &record.target else {
            return Err(StateError::TargetMismatch {
                expected: "application".to_string(),
                actual: record.target.to_string(),
            });
        };
        let app_id = app_id.clone();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let app = {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            let mut app = read_entity::<MonitoredApplication>(&table, &app_id)?
                .ok_or_else(|| StateError::ApplicationNotFound(app_id.clone()))?;
            app.record_check(record.status, record.checked_at);
            let value = serde_json::to_vec(&app).map_err(map_err!(Serialize))?;
            table
                .insert(app_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            app
        };
        let record = insert_record(&txn, record)?;
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            %app_id,
            record_id = record.id,
            status = %record.status,
            failures = app.consecutive_failures,
            "application check committed"
        );
        Ok((app, record))
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a monitored host.
    pub fn put_host(&self, host: &MonitoredHost) -> StateResult<()> {
        let value = serde_json::to_vec(host).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            table
                .insert(host.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host_id = %host.id, "host stored");
        Ok(())
    }

    /// Get a host by ID.
    pub fn get_host(&self, host_id: &str) -> StateResult<Option<MonitoredHost>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        read_entity(&table, host_id)
    }

    /// List all hosts.
    pub fn list_hosts(&self) -> StateResult<Vec<MonitoredHost>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let host: MonitoredHost =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(host);
        }
        Ok(results)
    }

    /// Record a host check: update connectivity state and append the record
    /// in a single transaction.
    pub fn commit_host_check(
        &self,
        record: HealthCheckRecord,
        offline_threshold: u32,
    ) -> StateResult<(MonitoredHost, HealthCheckRecord)> {
        let CheckTarget::Host(host_id) = &record.target else {
            return Err(StateError::TargetMismatch {
                expected: "host".to_string(),
                actual: record.target.to_string(),
            });
        };
        let host_id = host_id.clone();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let host = {
            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            let mut host = read_entity::<MonitoredHost>(&table, &host_id)?
                .ok_or_else(|| StateError::HostNotFound(host_id.clone()))?;
            host.record_check(record.status, record.checked_at, offline_threshold);
            let value = serde_json::to_vec(&host).map_err(map_err!(Serialize))?;
            table
                .insert(host_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            host
        };
        let record = insert_record(&txn, record)?;
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            %host_id,
            record_id = record.id,
            status = %record.status,
            host_status = ?host.status,
            "host check committed"
        );
        Ok((host, record))
    }

    // ── Health checks ──────────────────────────────────────────────

    /// Append a health-check record, assigning its id.
    pub fn append_health_check(&self, record: HealthCheckRecord) -> StateResult<HealthCheckRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = insert_record(&txn, record)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    /// Most recent records for a target, newest first.
    pub fn list_health_checks(
        &self,
        target: &CheckTarget,
        limit: usize,
    ) -> StateResult<Vec<HealthCheckRecord>> {
        self.scan_health_checks(target, 0, u64::MAX, limit, true)
    }

    /// Records for a target with `from <= checked_at <= to`, oldest first.
    pub fn health_checks_between(
        &self,
        target: &CheckTarget,
        from: u64,
        to: u64,
    ) -> StateResult<Vec<HealthCheckRecord>> {
        self.scan_health_checks(target, from, to, usize::MAX, false)
    }

    fn scan_health_checks(
        &self,
        target: &CheckTarget,
        from: u64,
        to: u64,
        limit: usize,
        newest_first: bool,
    ) -> StateResult<Vec<HealthCheckRecord>> {
        let mut results = Vec::new();
        if limit == 0 || from > to {
            return Ok(results);
        }

        let start = check_index_key(target.id(), from, 0);
        let end = check_index_key(target.id(), to, u64::MAX);

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn
            .open_table(index_table(target))
            .map_err(map_err!(Table))?;
        let checks = txn.open_table(HEALTH_CHECKS).map_err(map_err!(Table))?;

        let range = index
            .range(start.as_str()..=end.as_str())
            .map_err(map_err!(Read))?;
        let ids: Box<dyn Iterator<Item = _>> = if newest_first {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };

        for entry in ids {
            let (_, record_id) = entry.map_err(map_err!(Read))?;
            if let Some(guard) = checks.get(record_id.value()).map_err(map_err!(Read))? {
                let record: HealthCheckRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                if record.target != *target {
                    continue;
                }
                results.push(record);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }
}

/// Index table holding records owned by `target`'s kind.
fn index_table(target: &CheckTarget) -> TableDefinition<'static, &'static str, u64> {
    match target {
        CheckTarget::Application(_) => APP_CHECK_INDEX,
        CheckTarget::Host(_) => HOST_CHECK_INDEX,
    }
}

/// Deserialize a JSON entity by key from any readable `&str`-keyed table.
fn read_entity<T: serde::de::DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let entity = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(entity))
        }
        None => Ok(None),
    }
}

/// Allocate the next record id and write the record plus its index entry.
fn insert_record(txn: &WriteTransaction, mut record: HealthCheckRecord) -> StateResult<HealthCheckRecord> {
    let mut checks = txn.open_table(HEALTH_CHECKS).map_err(map_err!(Table))?;
    let next_id = match checks.last().map_err(map_err!(Read))? {
        Some((key, _)) => key.value() + 1,
        None => 1,
    };
    record.id = next_id;

    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
    checks
        .insert(next_id, value.as_slice())
        .map_err(map_err!(Write))?;

    let mut index = txn
        .open_table(index_table(&record.target))
        .map_err(map_err!(Table))?;
    index
        .insert(record.index_key().as_str(), next_id)
        .map_err(map_err!(Write))?;
    Ok(record)
}
