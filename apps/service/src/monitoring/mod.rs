/// Monitoring engine module - decides what to check and records what was found
///
/// This module is responsible for:
/// - Selecting services whose next check is due
/// - Probing endpoints over TCP with a bounded timeout
/// - Reconciling results into status and schedule updates
/// - Driving all of it from a fixed-cadence tick
pub mod prober;
pub mod reconciler;
pub mod scheduler;
pub mod selector;
pub mod types;

pub use prober::{ProbeError, Prober, TcpProber};
pub use reconciler::{ReconcileError, Reconciler};
pub use scheduler::{MonitoringScheduler, SchedulerSettings};
pub use selector::DueServiceSelector;
pub use types::{CheckOutcome, ServiceStatus, StatusChange, TickReport};
