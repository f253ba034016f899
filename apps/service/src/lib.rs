//! portwatch - tenant-scoped TCP endpoint monitoring
//!
//! Tenants register `host:port` endpoints with the [`registry`]; the
//! [`monitoring`] scheduler probes whatever is due on each tick and records
//! the latest status through the [`database`] store.

pub mod app;
pub mod clock;
pub mod config;
pub mod database;
pub mod monitoring;
pub mod notify;
pub mod pool;
pub mod registry;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use app::Monitor;
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::{LibsqlStore, ServiceKey, ServiceRecord, Store, StoreError, UserRecord};
pub use monitoring::{
    DueServiceSelector, MonitoringScheduler, Prober, ReconcileError, Reconciler, ServiceStatus,
    TcpProber,
};
pub use registry::{RegistryError, ServiceRegistry, ServiceTarget};
