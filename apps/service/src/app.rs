use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::database::{LibsqlStore, Store};
use crate::monitoring::{
    DueServiceSelector, MonitoringScheduler, Prober, Reconciler, StatusChange, TcpProber,
};
use crate::notify::{BroadcastObserver, LogObserver, ObserverSet, StatusObserver};
use crate::registry::{QuotaTracker, ServiceRegistry};

/// Buffered status changes per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 256;

/// The assembled engine: one store shared by the registry and the scheduler
pub struct Monitor {
    store: Arc<dyn Store>,
    libsql: Option<Arc<LibsqlStore>>,
    registry: ServiceRegistry,
    scheduler: Arc<MonitoringScheduler>,
    events: BroadcastObserver,
}

impl Monitor {
    /// Open the configured database and wire the production components
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let libsql =
            Arc::new(LibsqlStore::connect(&config.database.path, config.database.max_connections).await?);
        let store: Arc<dyn Store> = libsql.clone();

        let mut monitor = Self::from_parts(
            store,
            Arc::new(TcpProber::new(config.probe_timeout())),
            Arc::new(SystemClock),
            Arc::new(LogObserver),
            config,
        );
        monitor.libsql = Some(libsql);
        Ok(monitor)
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        prober: Arc<dyn Prober>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn StatusObserver>,
        config: &Config,
    ) -> Self {
        let quota = QuotaTracker::new(store.clone(), config.registry.default_user_type.clone());
        let registry =
            ServiceRegistry::new(store.clone(), quota, clock.clone(), config.registration_policy());

        let events = BroadcastObserver::new(EVENT_CAPACITY);
        let observers = ObserverSet::new().with(observer).with(Arc::new(events.clone()));

        let scheduler = MonitoringScheduler::new(
            DueServiceSelector::new(store.clone()),
            prober,
            Reconciler::new(store.clone()).with_observer(Arc::new(observers)),
            clock,
            config.scheduler_settings(),
        );

        Self { store, libsql: None, registry, scheduler: Arc::new(scheduler), events }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> Arc<MonitoringScheduler> {
        self.scheduler.clone()
    }

    /// Status transitions persisted after this call
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StatusChange> {
        self.events.subscribe()
    }

    pub fn close(&self) {
        if let Some(libsql) = &self.libsql {
            libsql.close();
        }
    }
}
