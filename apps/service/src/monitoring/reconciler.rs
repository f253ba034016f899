use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use super::types::StatusChange;
use crate::database::{ServiceRecord, Store, StoreError};
use crate::notify::StatusObserver;
use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Removed or re-registered since it was selected; nothing was written
    #[error("service {0} changed while it was being checked")]
    Superseded(String),
    /// The interval pushes the next check past the representable range
    #[error("cannot schedule next check: {0}")]
    Schedule(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Turns probe results into persisted status and schedule updates
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    observer: Option<Arc<dyn StatusObserver>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, observer: None }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Apply one probe result to the snapshot `record` was selected as.
    ///
    /// Status, `last_check_time` and `next_check_time` are written in one conditional
    /// update keyed on the snapshot's `next_check_time`. On any error the stored schedule
    /// is untouched, so the record stays due for the next tick.
    pub async fn apply(
        &self,
        record: &ServiceRecord,
        reachable: bool,
        now: DateTime<Utc>,
    ) -> Result<ServiceRecord, ReconcileError> {
        let updated = record.with_check_result(reachable, now)?;

        if !self.store.record_check(record.next_check_time, &updated).await? {
            debug!(service = %record.key(), "Skipping result for superseded service");
            return Err(ReconcileError::Superseded(record.key().to_string()));
        }

        if record.status != updated.status {
            if let Some(observer) = &self.observer {
                let change = StatusChange {
                    tenant_id: updated.tenant_id.clone(),
                    record: updated.clone(),
                    old_status: record.status,
                    new_status: updated.status,
                };
                observer.on_status_change(&change).await;
            }
        }

        Ok(updated)
    }
}
