use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::prober::Prober;
use super::reconciler::{ReconcileError, Reconciler};
use super::selector::DueServiceSelector;
use super::types::{CheckOutcome, ServiceStatus, TickReport};
use crate::clock::Clock;
use crate::database::ServiceRecord;

/// Tick cadence and fan-out limits
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub max_concurrency: usize,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            max_concurrency: 32,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Monitoring scheduler - on every tick, probes whatever is due and records the results
pub struct MonitoringScheduler {
    selector: DueServiceSelector,
    prober: Arc<dyn Prober>,
    reconciler: Reconciler,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler
    pub fn new(
        selector: DueServiceSelector,
        prober: Arc<dyn Prober>,
        reconciler: Reconciler,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self { selector, prober, reconciler, clock, settings }
    }

    /// One pass: select due records, probe them with bounded concurrency, reconcile each.
    ///
    /// Per-record failures are logged and counted; they never stop the rest of the tick.
    pub async fn run_tick(&self) -> TickReport {
        let now = self.clock.now();

        let due = match self.selector.due_services(now).await {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to select due services: {}", e);
                return TickReport::default();
            }
        };

        let mut report = TickReport { due: due.len(), ..Default::default() };
        if due.is_empty() {
            return report;
        }

        let outcomes: Vec<CheckOutcome> = futures::stream::iter(due)
            .map(|record| self.check_service(record))
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }

        debug!(
            due = report.due,
            up = report.up,
            down = report.down,
            superseded = report.superseded,
            failed = report.failed,
            "Tick complete"
        );
        report
    }

    async fn check_service(&self, record: ServiceRecord) -> CheckOutcome {
        let reachable = match self.prober.check(&record.host, record.port).await {
            Ok(reachable) => reachable,
            Err(e) => {
                warn!(tenant = %record.tenant_id, alias = %record.alias, "Probe rejected: {}", e);
                return CheckOutcome::Failed;
            }
        };

        match self.reconciler.apply(&record, reachable, self.clock.now()).await {
            Ok(updated) if updated.status == ServiceStatus::Up => CheckOutcome::Up,
            Ok(_) => CheckOutcome::Down,
            Err(ReconcileError::Superseded(_)) => CheckOutcome::Superseded,
            Err(e) => {
                error!(
                    tenant = %record.tenant_id,
                    alias = %record.alias,
                    "Failed to record check result, will retry next tick: {}",
                    e
                );
                CheckOutcome::Failed
            }
        }
    }

    /// Tick until `shutdown` fires. An in-flight tick gets `shutdown_grace` to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut timer = interval(self.settings.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_ms = self.settings.tick.as_millis() as u64,
            max_concurrency = self.settings.max_concurrency,
            "Monitoring scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    let tick = self.run_tick();
                    tokio::pin!(tick);

                    tokio::select! {
                        _ = &mut tick => {}
                        _ = shutdown.cancelled() => {
                            info!("Shutdown requested, finishing in-flight checks");
                            if timeout(self.settings.shutdown_grace, &mut tick).await.is_err() {
                                warn!(
                                    grace_ms = self.settings.shutdown_grace.as_millis() as u64,
                                    "Abandoned in-flight checks after grace period"
                                );
                            }
                            break;
                        }
                    }
                }
            }
        }

        info!("Monitoring scheduler stopped");
    }

    /// Run on a background task
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
