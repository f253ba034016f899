use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, TransactionBehavior, params};
use deadpool::managed::PoolError;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use super::models::{
    ServiceKey, ServiceRecord, UserRecord, millis_to_timestamp, timestamp_to_millis,
};
use crate::pool::{LibsqlManager, LibsqlPool};

// SQLite result codes; libsql reports extended codes, the primary code is the low byte
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_IOERR: i32 = 10;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

const SERVICE_COLUMNS: &str =
    "tenant_id, host, port, alias, interval_seconds, status, last_check_time, next_check_time";

/// Errors raised by the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] PoolError<libsql::Error>),
    #[error("alias {alias:?} is already in use for tenant {tenant_id}")]
    AliasConflict { tenant_id: String, alias: String },
    #[error("malformed row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Store busy, locked, failing I/O or out of connections; retrying may succeed.
    /// Constraint and SQL errors are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) | StoreError::Pool(PoolError::Backend(e)) => {
                is_transient_libsql(e)
            }
            StoreError::Pool(PoolError::Timeout(_)) => true,
            _ => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Whether an upsert created the identity key or replaced an existing row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Persistence for service and user records.
///
/// Records handed out are snapshots; nothing changes on disk until they are written back.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_service(&self, key: &ServiceKey) -> StoreResult<Option<ServiceRecord>>;

    async fn find_by_alias(&self, tenant_id: &str, alias: &str)
    -> StoreResult<Option<ServiceRecord>>;

    async fn list_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<ServiceRecord>>;

    async fn count_by_tenant(&self, tenant_id: &str) -> StoreResult<u64>;

    /// Insert or replace by `(tenant_id, host, port)`
    async fn upsert_service(&self, record: &ServiceRecord) -> StoreResult<UpsertOutcome>;

    /// Returns whether a row was removed
    async fn delete_service(&self, key: &ServiceKey) -> StoreResult<bool>;

    /// Returns the removed record, if any
    async fn delete_by_alias(&self, tenant_id: &str, alias: &str)
    -> StoreResult<Option<ServiceRecord>>;

    /// Every record with `next_check_time <= now`, across tenants
    async fn due_services(&self, now: DateTime<Utc>) -> StoreResult<Vec<ServiceRecord>>;

    /// Write the status and schedule fields of `updated`, but only if the stored row still
    /// has `expected_next_check`. Never inserts. Returns whether the row was updated.
    async fn record_check(
        &self,
        expected_next_check: DateTime<Utc>,
        updated: &ServiceRecord,
    ) -> StoreResult<bool>;

    /// `host_cnt + 1`, creating the user with `host_cnt = 1` if needed
    async fn increment_host_count(&self, tenant_id: &str, user_type: &str) -> StoreResult<()>;

    /// `host_cnt - 1`, never below zero
    async fn decrement_host_count(&self, tenant_id: &str) -> StoreResult<()>;

    async fn get_user(&self, tenant_id: &str) -> StoreResult<Option<UserRecord>>;

    /// Reset `host_cnt` to the number of stored services; returns the new count
    async fn resync_host_count(&self, tenant_id: &str, user_type: &str) -> StoreResult<u64>;
}

/// LibSQL store implementation
pub struct LibsqlStore {
    pool: LibsqlPool,
    /// Serialises writers in this process so racing writes to one row resolve in order
    write_lock: Mutex<()>,
}

impl LibsqlStore {
    /// Create a new store from an already migrated pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool, write_lock: Mutex::new(()) }
    }

    /// Open the database file, run migrations and return a ready store
    pub async fn connect(path: &str, max_connections: usize) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = crate::pool::open_local(path, max_connections).await?;
        {
            let conn = pool.get().await?;
            super::initialize_database(&conn).await?;
        }

        tracing::info!(path, max_connections, "Opened service store");
        Ok(Self::new_from_pool(pool))
    }

    /// Close the pool; outstanding connections are dropped when returned
    pub fn close(&self) {
        self.pool.close();
    }

    async fn get_conn(&self) -> StoreResult<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn query_services(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> StoreResult<Vec<ServiceRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut records = Vec::new();

        while let Some(row) = rows.next().await? {
            records.push(row_to_service(&row)?);
        }

        Ok(records)
    }
}

fn row_to_service(row: &Row) -> StoreResult<ServiceRecord> {
    let port: i64 = row.get(2)?;
    let interval: i64 = row.get(4)?;
    let status: String = row.get(5)?;
    let last_check: i64 = row.get(6)?;
    let next_check: i64 = row.get(7)?;

    Ok(ServiceRecord {
        tenant_id: row.get(0)?,
        host: row.get(1)?,
        port: u16::try_from(port).map_err(|_| StoreError::Corrupt(format!("port {port}")))?,
        alias: row.get(3)?,
        interval_seconds: u64::try_from(interval)
            .map_err(|_| StoreError::Corrupt(format!("interval {interval}")))?,
        status: status.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        last_check_time: millis_to_timestamp(last_check)
            .ok_or_else(|| StoreError::Corrupt(format!("last_check_time {last_check}")))?,
        next_check_time: millis_to_timestamp(next_check)
            .ok_or_else(|| StoreError::Corrupt(format!("next_check_time {next_check}")))?,
    })
}

fn interval_to_i64(interval_seconds: u64) -> StoreResult<i64> {
    i64::try_from(interval_seconds)
        .map_err(|_| StoreError::Corrupt(format!("interval {interval_seconds}")))
}

fn is_transient_libsql(err: &libsql::Error) -> bool {
    match err {
        libsql::Error::SqliteFailure(code, _) => {
            matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED | SQLITE_IOERR)
        }
        _ => false,
    }
}

fn is_unique_violation(err: &libsql::Error) -> bool {
    matches!(err, libsql::Error::SqliteFailure(SQLITE_CONSTRAINT_UNIQUE, _))
}

/// Existence check and upsert; must run inside a write transaction so the outcome
/// cannot be raced by another connection.
async fn upsert_in(conn: &Connection, record: &ServiceRecord) -> StoreResult<UpsertOutcome> {
    let mut existing = conn
        .query(
            "SELECT 1 FROM services WHERE tenant_id = ? AND host = ? AND port = ?",
            params![record.tenant_id.clone(), record.host.clone(), i64::from(record.port)],
        )
        .await?;
    let outcome = if existing.next().await?.is_some() {
        UpsertOutcome::Replaced
    } else {
        UpsertOutcome::Inserted
    };
    drop(existing);

    let result = conn
        .execute(
            "INSERT INTO services (tenant_id, host, port, alias, interval_seconds, status, last_check_time, next_check_time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, host, port) DO UPDATE SET
                alias = excluded.alias,
                interval_seconds = excluded.interval_seconds,
                status = excluded.status,
                last_check_time = excluded.last_check_time,
                next_check_time = excluded.next_check_time",
            params![
                record.tenant_id.clone(),
                record.host.clone(),
                i64::from(record.port),
                record.alias.clone(),
                interval_to_i64(record.interval_seconds)?,
                record.status.to_string(),
                timestamp_to_millis(record.last_check_time),
                timestamp_to_millis(record.next_check_time)
            ],
        )
        .await;

    match result {
        Ok(_) => Ok(outcome),
        Err(e) if is_unique_violation(&e) => Err(StoreError::AliasConflict {
            tenant_id: record.tenant_id.clone(),
            alias: record.alias.clone(),
        }),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Store for LibsqlStore {
    async fn get_service(&self, key: &ServiceKey) -> StoreResult<Option<ServiceRecord>> {
        let sql = format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE tenant_id = ? AND host = ? AND port = ?"
        );
        let mut records = self
            .query_services(
                &sql,
                params![key.tenant_id.clone(), key.host.clone(), i64::from(key.port)],
            )
            .await?;
        Ok(records.pop())
    }

    async fn find_by_alias(
        &self,
        tenant_id: &str,
        alias: &str,
    ) -> StoreResult<Option<ServiceRecord>> {
        let sql =
            format!("SELECT {SERVICE_COLUMNS} FROM services WHERE tenant_id = ? AND alias = ?");
        let mut records =
            self.query_services(&sql, params![tenant_id.to_string(), alias.to_string()]).await?;
        Ok(records.pop())
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<ServiceRecord>> {
        let sql = format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE tenant_id = ? ORDER BY alias ASC"
        );
        self.query_services(&sql, params![tenant_id.to_string()]).await
    }

    async fn count_by_tenant(&self, tenant_id: &str) -> StoreResult<u64> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM services WHERE tenant_id = ?", params![
                tenant_id.to_string()
            ])
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn upsert_service(&self, record: &ServiceRecord) -> StoreResult<UpsertOutcome> {
        let _guard = self.write_lock.lock().await;
        let conn = self.get_conn().await?;

        // IMMEDIATE takes the write lock up front, so other processes on the same file
        // wait instead of both seeing the key as absent
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
        match upsert_in(&tx, record).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(service = %record.key(), "Failed to roll back upsert: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn delete_service(&self, key: &ServiceKey) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let conn = self.get_conn().await?;

        let deleted = conn
            .execute(
                "DELETE FROM services WHERE tenant_id = ? AND host = ? AND port = ?",
                params![key.tenant_id.clone(), key.host.clone(), i64::from(key.port)],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_by_alias(
        &self,
        tenant_id: &str,
        alias: &str,
    ) -> StoreResult<Option<ServiceRecord>> {
        let _guard = self.write_lock.lock().await;
        let conn = self.get_conn().await?;

        let sql = format!(
            "DELETE FROM services WHERE tenant_id = ? AND alias = ? RETURNING {SERVICE_COLUMNS}"
        );
        let mut rows = conn.query(&sql, params![tenant_id.to_string(), alias.to_string()]).await?;

        let mut removed = None;
        while let Some(row) = rows.next().await? {
            removed = Some(row_to_service(&row)?);
        }
        Ok(removed)
    }

    async fn due_services(&self, now: DateTime<Utc>) -> StoreResult<Vec<ServiceRecord>> {
        let sql = format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE next_check_time <= ? ORDER BY next_check_time ASC, tenant_id ASC, host ASC, port ASC"
        );
        self.query_services(&sql, params![timestamp_to_millis(now)]).await
    }

    async fn record_check(
        &self,
        expected_next_check: DateTime<Utc>,
        updated: &ServiceRecord,
    ) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let conn = self.get_conn().await?;

        // Single statement: status and schedule land together or not at all
        let changed = conn
            .execute(
                "UPDATE services SET status = ?, last_check_time = ?, next_check_time = ?
                 WHERE tenant_id = ? AND host = ? AND port = ? AND next_check_time = ?",
                params![
                    updated.status.to_string(),
                    timestamp_to_millis(updated.last_check_time),
                    timestamp_to_millis(updated.next_check_time),
                    updated.tenant_id.clone(),
                    updated.host.clone(),
                    i64::from(updated.port),
                    timestamp_to_millis(expected_next_check)
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn increment_host_count(&self, tenant_id: &str, user_type: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO users (tenant_id, host_cnt, user_type) VALUES (?, 1, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET host_cnt = host_cnt + 1",
            params![tenant_id.to_string(), user_type.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn decrement_host_count(&self, tenant_id: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let conn = self.get_conn().await?;

        conn.execute(
            "UPDATE users SET host_cnt = MAX(host_cnt - 1, 0) WHERE tenant_id = ?",
            params![tenant_id.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn get_user(&self, tenant_id: &str) -> StoreResult<Option<UserRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT tenant_id, host_cnt, user_type FROM users WHERE tenant_id = ?",
                params![tenant_id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let host_cnt: i64 = row.get(1)?;
                Ok(Some(UserRecord {
                    tenant_id: row.get(0)?,
                    host_cnt: u64::try_from(host_cnt)
                        .map_err(|_| StoreError::Corrupt(format!("host_cnt {host_cnt}")))?,
                    user_type: row.get(2)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn resync_host_count(&self, tenant_id: &str, user_type: &str) -> StoreResult<u64> {
        let guard = self.write_lock.lock().await;
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO users (tenant_id, host_cnt, user_type)
             VALUES (?1, (SELECT COUNT(*) FROM services WHERE tenant_id = ?1), ?2)
             ON CONFLICT(tenant_id) DO UPDATE SET host_cnt = excluded.host_cnt",
            params![tenant_id.to_string(), user_type.to_string()],
        )
        .await?;
        drop(conn);
        drop(guard);

        Ok(self.get_user(tenant_id).await?.map(|user| user.host_cnt).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::ServiceStatus;
    use crate::test_support::{record, test_now, test_store};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_upsert_reports_insert_then_replace() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;
        let now = test_now();

        let first = record("1", "127.0.0.1", 9999, "a", 5, now);
        assert_eq!(store.upsert_service(&first).await?, UpsertOutcome::Inserted);

        let mut second = first.clone();
        second.interval_seconds = 60;
        assert_eq!(store.upsert_service(&second).await?, UpsertOutcome::Replaced);

        let stored = store.list_by_tenant("1").await?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].interval_seconds, 60);
        Ok(())
    }

    #[tokio::test]
    async fn test_alias_unique_index_is_enforced() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;
        let now = test_now();

        store.upsert_service(&record("1", "10.0.0.1", 80, "web", 5, now)).await?;
        let clash = store.upsert_service(&record("1", "10.0.0.2", 80, "web", 5, now)).await;
        assert!(matches!(clash, Err(StoreError::AliasConflict { .. })));

        // Same alias for another tenant is fine
        store.upsert_service(&record("2", "10.0.0.2", 80, "web", 5, now)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_due_services_filters_by_next_check() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;
        let now = test_now();

        store.upsert_service(&record("1", "10.0.0.1", 80, "due", 5, now)).await?;
        let mut later = record("2", "10.0.0.2", 80, "later", 5, now);
        later.next_check_time = now + Duration::seconds(30);
        store.upsert_service(&later).await?;

        let due = store.due_services(now).await?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].alias, "due");

        assert!(store.due_services(now - Duration::seconds(1)).await?.is_empty());
        assert_eq!(store.due_services(now + Duration::seconds(30)).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_record_check_never_resurrects_deleted_rows() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;
        let now = test_now();
        let original = record("1", "10.0.0.1", 80, "a", 5, now);
        store.upsert_service(&original).await?;

        assert!(store.delete_service(&original.key()).await?);

        let checked = original.with_check_result(true, now)?;
        assert!(!store.record_check(original.next_check_time, &checked).await?);
        assert!(store.get_service(&original.key()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_record_check_rejects_stale_schedule() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;
        let now = test_now();
        let original = record("1", "10.0.0.1", 80, "a", 5, now);
        store.upsert_service(&original).await?;

        let checked = original.with_check_result(true, now)?;
        assert!(store.record_check(original.next_check_time, &checked).await?);

        let again = original.with_check_result(false, now)?;
        assert!(!store.record_check(original.next_check_time, &again).await?);

        let stored = store.get_service(&original.key()).await?.unwrap();
        assert_eq!(stored.status, ServiceStatus::Up);
        Ok(())
    }

    #[tokio::test]
    async fn test_host_count_increments_and_clamps() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;

        store.decrement_host_count("1").await?;
        assert!(store.get_user("1").await?.is_none());

        store.increment_host_count("1", "free").await?;
        store.increment_host_count("1", "free").await?;
        assert_eq!(store.get_user("1").await?.unwrap().host_cnt, 2);

        for _ in 0..3 {
            store.decrement_host_count("1").await?;
        }
        let user = store.get_user("1").await?.unwrap();
        assert_eq!(user.host_cnt, 0);
        assert_eq!(user.user_type, "free");
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_by_alias_returns_removed_record() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;
        let now = test_now();
        store.upsert_service(&record("1", "10.0.0.1", 80, "a", 5, now)).await?;

        let removed = store.delete_by_alias("1", "a").await?.unwrap();
        assert_eq!(removed.host, "10.0.0.1");
        assert!(store.delete_by_alias("1", "a").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_resync_matches_service_count() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;
        let now = test_now();
        store.upsert_service(&record("1", "10.0.0.1", 80, "a", 5, now)).await?;
        store.upsert_service(&record("1", "10.0.0.2", 80, "b", 5, now)).await?;

        assert_eq!(store.resync_host_count("1", "free").await?, 2);
        assert_eq!(store.count_by_tenant("1").await?, 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_upsert_outcome_is_exact_across_stores() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shared.db").to_string_lossy().into_owned();
        let first = Arc::new(LibsqlStore::connect(&path, 2).await?);
        let second = Arc::new(LibsqlStore::connect(&path, 2).await?);
        let now = test_now();

        for port in 1000..1050u16 {
            let svc = record("1", "10.0.0.1", port, &format!("svc-{port}"), 5, now);
            let a = tokio::spawn({
                let (store, svc) = (first.clone(), svc.clone());
                async move { store.upsert_service(&svc).await }
            });
            let b = tokio::spawn({
                let (store, svc) = (second.clone(), svc.clone());
                async move { store.upsert_service(&svc).await }
            });

            let outcomes = [a.await??, b.await??];
            let inserted = outcomes.iter().filter(|o| **o == UpsertOutcome::Inserted).count();
            assert_eq!(inserted, 1, "port {port}: {outcomes:?}");
        }

        assert_eq!(first.count_by_tenant("1").await?, 50);
        Ok(())
    }

    #[test]
    fn test_only_busy_locked_and_io_errors_are_transient() {
        let failure = |code: i32| StoreError::Database(libsql::Error::SqliteFailure(code, String::new()));

        assert!(failure(5).is_transient());
        assert!(failure(6).is_transient());
        // SQLITE_IOERR_WRITE
        assert!(failure(778).is_transient());
        assert!(!failure(SQLITE_CONSTRAINT_UNIQUE).is_transient());
        assert!(!failure(1).is_transient());
        assert!(!StoreError::Corrupt("port 0".into()).is_transient());
        assert!(!StoreError::AliasConflict { tenant_id: "1".into(), alias: "a".into() }.is_transient());
    }
}
