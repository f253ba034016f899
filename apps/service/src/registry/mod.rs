//! Service registry - the write path used by the command surface.
//!
//! Registrations and removals for one tenant are serialised by a per-tenant lock, so a
//! service row and the tenant's `host_cnt` always move together. The scheduler never
//! takes these locks; its writes are conditional updates that cannot recreate rows.

pub mod locks;
pub mod quota;

pub use locks::TenantLocks;
pub use quota::{QuotaSyncError, QuotaTracker};

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::database::{ServiceKey, ServiceRecord, Store, StoreError, UpsertOutcome};
use crate::validation::{self, IntervalLimits, ValidationError};

/// Errors reported back to whoever issued a registry command
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("alias {alias:?} is already used by {host}:{port}")]
    AliasTaken { alias: String, host: String, port: u16 },
    #[error("no service matches {0}")]
    NotFound(String),
    #[error("tenant {tenant_id} already monitors {limit} services")]
    QuotaExceeded { tenant_id: String, limit: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    QuotaSync(#[from] QuotaSyncError),
}

/// How `unregister` finds its target. An alias is matched exactly, case-sensitively,
/// and never falls back to host/port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceTarget {
    Alias(String),
    Endpoint { host: String, port: u16 },
}

impl std::fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceTarget::Alias(alias) => write!(f, "alias {alias:?}"),
            ServiceTarget::Endpoint { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Limits applied to registrations
#[derive(Debug, Clone)]
pub struct RegistrationPolicy {
    pub intervals: IntervalLimits,
    /// Zero means unlimited
    pub max_services_per_tenant: u64,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            intervals: IntervalLimits { min_seconds: 5, max_seconds: 86_400 },
            max_services_per_tenant: 0,
        }
    }
}

pub struct ServiceRegistry {
    store: Arc<dyn Store>,
    quota: QuotaTracker,
    clock: Arc<dyn Clock>,
    policy: RegistrationPolicy,
    tenant_locks: TenantLocks,
}

impl ServiceRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        quota: QuotaTracker,
        clock: Arc<dyn Clock>,
        policy: RegistrationPolicy,
    ) -> Self {
        Self { store, quota, clock, policy, tenant_locks: TenantLocks::new() }
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Register or re-register `(tenant, host, port)`.
    ///
    /// The record is reset to `init` and due immediately. Quota only moves when the
    /// identity key is new.
    pub async fn register(
        &self,
        tenant_id: &str,
        host: &str,
        port: u32,
        alias: Option<&str>,
        interval_seconds: u64,
    ) -> Result<ServiceRecord, RegistryError> {
        let record = ServiceRecord::new(
            tenant_id,
            host,
            port,
            alias,
            interval_seconds,
            &self.policy.intervals,
            self.clock.now(),
        )?;

        let _guard = self.tenant_locks.lock(tenant_id).await;

        if let Some(existing) = self.store.find_by_alias(tenant_id, &record.alias).await? {
            if existing.host != record.host || existing.port != record.port {
                return Err(RegistryError::AliasTaken {
                    alias: record.alias,
                    host: existing.host,
                    port: existing.port,
                });
            }
        }

        if self.policy.max_services_per_tenant > 0
            && self.store.get_service(&record.key()).await?.is_none()
        {
            let count = self.store.count_by_tenant(tenant_id).await?;
            if count >= self.policy.max_services_per_tenant {
                return Err(RegistryError::QuotaExceeded {
                    tenant_id: tenant_id.to_string(),
                    limit: self.policy.max_services_per_tenant,
                });
            }
        }

        let outcome = match self.store.upsert_service(&record).await {
            Ok(outcome) => outcome,
            Err(StoreError::AliasConflict { alias, .. }) => {
                let holder = self.store.find_by_alias(tenant_id, &alias).await?;
                return Err(RegistryError::AliasTaken {
                    alias,
                    host: holder.as_ref().map(|r| r.host.clone()).unwrap_or_default(),
                    port: holder.map(|r| r.port).unwrap_or_default(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if outcome == UpsertOutcome::Inserted {
            if let Err(source) = self.quota.increment(tenant_id).await {
                warn!(tenant = %tenant_id, alias = %record.alias, "Service saved but quota increment failed: {}", source);
                return Err(QuotaSyncError { tenant_id: tenant_id.to_string(), source }.into());
            }
        }

        info!(
            tenant = %tenant_id,
            alias = %record.alias,
            endpoint = %record.endpoint(),
            interval = record.interval_seconds,
            replaced = outcome == UpsertOutcome::Replaced,
            "Registered service"
        );
        Ok(record)
    }

    /// Remove a service by alias or by host/port; `NotFound` if nothing matched.
    pub async fn unregister(
        &self,
        tenant_id: &str,
        target: &ServiceTarget,
    ) -> Result<(), RegistryError> {
        validation::validate_tenant(tenant_id)?;
        let _guard = self.tenant_locks.lock(tenant_id).await;

        let removed = match target {
            ServiceTarget::Alias(alias) => {
                self.store.delete_by_alias(tenant_id, alias).await?.is_some()
            }
            ServiceTarget::Endpoint { host, port } => {
                self.store.delete_service(&ServiceKey::new(tenant_id, host.as_str(), *port)).await?
            }
        };

        if !removed {
            return Err(RegistryError::NotFound(target.to_string()));
        }

        if let Err(source) = self.quota.decrement(tenant_id).await {
            warn!(tenant = %tenant_id, %target, "Service removed but quota decrement failed: {}", source);
            return Err(QuotaSyncError { tenant_id: tenant_id.to_string(), source }.into());
        }

        info!(tenant = %tenant_id, %target, "Unregistered service");
        Ok(())
    }

    /// Snapshot of a tenant's services, ordered by alias
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<ServiceRecord>, RegistryError> {
        Ok(self.store.list_by_tenant(tenant_id).await?)
    }

    pub async fn get_by_tenant(&self, tenant_id: &str) -> Result<Vec<ServiceRecord>, RegistryError> {
        self.list(tenant_id).await
    }

    pub async fn get_by_alias(
        &self,
        tenant_id: &str,
        alias: &str,
    ) -> Result<Option<ServiceRecord>, RegistryError> {
        Ok(self.store.find_by_alias(tenant_id, alias).await?)
    }
}
