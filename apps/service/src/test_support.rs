//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tempfile::{TempDir, tempdir};

use crate::clock::{Clock, SystemClock};
use crate::database::{
    LibsqlStore, ServiceKey, ServiceRecord, Store, StoreError, StoreResult, UpsertOutcome,
    UserRecord,
};
use crate::monitoring::types::ServiceStatus;

/// Store backed by a fresh database file; keep the `TempDir` alive for the test's duration.
pub async fn test_store() -> anyhow::Result<(Arc<dyn Store>, TempDir)> {
    let dir = tempdir()?;
    let path = dir.path().join("test.db");
    let store = LibsqlStore::connect(&path.to_string_lossy(), 4).await?;
    Ok((Arc::new(store), dir))
}

/// "Now" at storage precision
pub fn test_now() -> DateTime<Utc> {
    SystemClock.now()
}

pub fn record(
    tenant_id: &str,
    host: &str,
    port: u16,
    alias: &str,
    interval_seconds: u64,
    now: DateTime<Utc>,
) -> ServiceRecord {
    let now = now.trunc_subsecs(3);
    ServiceRecord {
        tenant_id: tenant_id.to_string(),
        host: host.to_string(),
        port,
        alias: alias.to_string(),
        interval_seconds,
        status: ServiceStatus::Init,
        last_check_time: now,
        next_check_time: now,
    }
}

/// Wraps a real store and fails chosen operations with a busy error, a set number of times
pub struct FailingStore {
    inner: Arc<dyn Store>,
    pub fail_record_check: AtomicUsize,
    pub fail_increment: AtomicUsize,
    pub increment_calls: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            fail_record_check: AtomicUsize::new(0),
            fail_increment: AtomicUsize::new(0),
            increment_calls: AtomicUsize::new(0),
        }
    }
}

fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

fn busy() -> StoreError {
    StoreError::Database(libsql::Error::SqliteFailure(5, "database is locked".to_string()))
}

#[async_trait]
impl Store for FailingStore {
    async fn get_service(&self, key: &ServiceKey) -> StoreResult<Option<ServiceRecord>> {
        self.inner.get_service(key).await
    }

    async fn find_by_alias(
        &self,
        tenant_id: &str,
        alias: &str,
    ) -> StoreResult<Option<ServiceRecord>> {
        self.inner.find_by_alias(tenant_id, alias).await
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<ServiceRecord>> {
        self.inner.list_by_tenant(tenant_id).await
    }

    async fn count_by_tenant(&self, tenant_id: &str) -> StoreResult<u64> {
        self.inner.count_by_tenant(tenant_id).await
    }

    async fn upsert_service(&self, record: &ServiceRecord) -> StoreResult<UpsertOutcome> {
        self.inner.upsert_service(record).await
    }

    async fn delete_service(&self, key: &ServiceKey) -> StoreResult<bool> {
        self.inner.delete_service(key).await
    }

    async fn delete_by_alias(
        &self,
        tenant_id: &str,
        alias: &str,
    ) -> StoreResult<Option<ServiceRecord>> {
        self.inner.delete_by_alias(tenant_id, alias).await
    }

    async fn due_services(&self, now: DateTime<Utc>) -> StoreResult<Vec<ServiceRecord>> {
        self.inner.due_services(now).await
    }

    async fn record_check(
        &self,
        expected_next_check: DateTime<Utc>,
        updated: &ServiceRecord,
    ) -> StoreResult<bool> {
        if take_failure(&self.fail_record_check) {
            return Err(busy());
        }
        self.inner.record_check(expected_next_check, updated).await
    }

    async fn increment_host_count(&self, tenant_id: &str, user_type: &str) -> StoreResult<()> {
        self.increment_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.fail_increment) {
            return Err(busy());
        }
        self.inner.increment_host_count(tenant_id, user_type).await
    }

    async fn decrement_host_count(&self, tenant_id: &str) -> StoreResult<()> {
        self.inner.decrement_host_count(tenant_id).await
    }

    async fn get_user(&self, tenant_id: &str) -> StoreResult<Option<UserRecord>> {
        self.inner.get_user(tenant_id).await
    }

    async fn resync_host_count(&self, tenant_id: &str, user_type: &str) -> StoreResult<u64> {
        self.inner.resync_host_count(tenant_id, user_type).await
    }
}
