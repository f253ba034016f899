use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::database::{Store, StoreError, StoreResult, UserRecord};

/// Attempts per quota delta before the failure is surfaced
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Maintains `UserRecord.host_cnt` through atomic store-side deltas
#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn Store>,
    default_user_type: String,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn Store>, default_user_type: impl Into<String>) -> Self {
        Self { store, default_user_type: default_user_type.into() }
    }

    /// `host_cnt + 1`; creates the user with `host_cnt = 1` on first registration
    pub async fn increment(&self, tenant_id: &str) -> StoreResult<()> {
        self.with_retry(tenant_id, "increment", move || {
            self.store.increment_host_count(tenant_id, &self.default_user_type)
        })
        .await
    }

    /// `host_cnt - 1`, clamped at zero
    pub async fn decrement(&self, tenant_id: &str) -> StoreResult<()> {
        self.with_retry(tenant_id, "decrement", move || self.store.decrement_host_count(tenant_id))
            .await
    }

    pub async fn get(&self, tenant_id: &str) -> StoreResult<Option<UserRecord>> {
        self.store.get_user(tenant_id).await
    }

    /// Current count, zero for tenants that never registered anything
    pub async fn host_count(&self, tenant_id: &str) -> StoreResult<u64> {
        Ok(self.store.get_user(tenant_id).await?.map(|user| user.host_cnt).unwrap_or(0))
    }

    /// Recount from the stored services; repairs drift left by a surfaced quota failure
    pub async fn resync(&self, tenant_id: &str) -> StoreResult<u64> {
        let count = self.store.resync_host_count(tenant_id, &self.default_user_type).await?;
        info!(tenant = %tenant_id, host_cnt = count, "Resynchronised service quota");
        Ok(count)
    }

    async fn with_retry<F, Fut>(&self, tenant_id: &str, op: &str, mut f: F) -> StoreResult<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = StoreResult<()>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(tenant = %tenant_id, attempt, "Quota {} failed, retrying: {}", op, e);
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Quota delta that could not be applied although the service change was committed
#[derive(Debug, thiserror::Error)]
#[error("service change for tenant {tenant_id} was saved but its quota could not be updated: {source}")]
pub struct QuotaSyncError {
    pub tenant_id: String,
    #[source]
    pub source: StoreError,
}
