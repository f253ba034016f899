//! Status change hook for the notification layer.
//!
//! The reconciler calls observers after a transition has been persisted. Delivering
//! messages to people, and retrying that delivery, belongs to whoever subscribes.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::monitoring::types::StatusChange;

#[async_trait]
pub trait StatusObserver: Send + Sync {
    async fn on_status_change(&self, change: &StatusChange);
}

/// Logs every transition
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

#[async_trait]
impl StatusObserver for LogObserver {
    async fn on_status_change(&self, change: &StatusChange) {
        info!(
            tenant = %change.tenant_id,
            alias = %change.record.alias,
            endpoint = %change.record.endpoint(),
            from = %change.old_status,
            to = %change.new_status,
            "Service status changed"
        );
    }
}

/// Fans transitions out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<StatusChange>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl StatusObserver for BroadcastObserver {
    async fn on_status_change(&self, change: &StatusChange) {
        // Ignore errors if there are no receivers
        if self.tx.send(change.clone()).is_err() {
            debug!(tenant = %change.tenant_id, "No status subscribers");
        }
    }
}

/// Calls several observers in order
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<std::sync::Arc<dyn StatusObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: std::sync::Arc<dyn StatusObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[async_trait]
impl StatusObserver for ObserverSet {
    async fn on_status_change(&self, change: &StatusChange) {
        for observer in &self.observers {
            observer.on_status_change(change).await;
        }
    }
}
