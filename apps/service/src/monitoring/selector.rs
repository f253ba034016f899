use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::database::{ServiceRecord, Store, StoreResult};

/// Picks the records whose `next_check_time` has elapsed
#[derive(Clone)]
pub struct DueServiceSelector {
    store: Arc<dyn Store>,
}

impl DueServiceSelector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Point-in-time snapshot of due records across all tenants; empty when nothing is due.
    pub async fn due_services(&self, now: DateTime<Utc>) -> StoreResult<Vec<ServiceRecord>> {
        let due = self.store.due_services(now).await?;
        debug_assert!(due.iter().all(|record| record.is_due(now)));
        tracing::debug!(count = due.len(), "Selected due services");
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{record, test_now, test_store};
    use chrono::Duration;

    #[tokio::test]
    async fn test_nothing_due_is_empty_not_error() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;
        let selector = DueServiceSelector::new(store);

        assert!(selector.due_services(test_now()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_selects_across_tenants_at_boundary() -> anyhow::Result<()> {
        let (store, _dir) = test_store().await?;
        let now = test_now();

        store.upsert_service(&record("1", "10.0.0.1", 80, "a", 5, now)).await?;
        store.upsert_service(&record("2", "10.0.0.1", 80, "a", 5, now)).await?;
        let mut future = record("3", "10.0.0.1", 80, "a", 5, now);
        future.next_check_time = now + Duration::milliseconds(1);
        store.upsert_service(&future).await?;

        let selector = DueServiceSelector::new(store);
        let due = selector.due_services(now).await?;

        let mut tenants: Vec<_> = due.iter().map(|r| r.tenant_id.as_str()).collect();
        tenants.sort();
        assert_eq!(tenants, vec!["1", "2"]);
        Ok(())
    }
}
