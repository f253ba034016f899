use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::database::models::ServiceRecord;

/// Latest known reachability of a monitored service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Registered but not probed yet
    Init,
    Up,
    Down,
}

impl ServiceStatus {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable { ServiceStatus::Up } else { ServiceStatus::Down }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Init => "init",
            ServiceStatus::Up => "up",
            ServiceStatus::Down => "down",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ServiceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(ServiceStatus::Init),
            "up" => Ok(ServiceStatus::Up),
            "down" => Ok(ServiceStatus::Down),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted status transition, handed to status observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub tenant_id: String,
    pub record: ServiceRecord,
    pub old_status: ServiceStatus,
    pub new_status: ServiceStatus,
}

/// What happened to one due record during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Up,
    Down,
    /// Removed or re-registered while the probe was in flight; nothing written
    Superseded,
    /// Probe or persistence failed; the record stays due
    Failed,
}

/// Summary of a single scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub up: usize,
    pub down: usize,
    pub superseded: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn record(&mut self, outcome: CheckOutcome) {
        match outcome {
            CheckOutcome::Up => self.up += 1,
            CheckOutcome::Down => self.down += 1,
            CheckOutcome::Superseded => self.superseded += 1,
            CheckOutcome::Failed => self.failed += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.up + self.down + self.superseded + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_its_own_display() {
        for status in [ServiceStatus::Init, ServiceStatus::Up, ServiceStatus::Down] {
            assert_eq!(status.to_string().parse::<ServiceStatus>(), Ok(status));
        }
        assert!("degraded".parse::<ServiceStatus>().is_err());
        assert!("UP".parse::<ServiceStatus>().is_err());
    }

    #[test]
    fn test_tick_report_counts_outcomes() {
        let mut report = TickReport { due: 4, ..Default::default() };
        report.record(CheckOutcome::Up);
        report.record(CheckOutcome::Down);
        report.record(CheckOutcome::Down);
        report.record(CheckOutcome::Failed);

        assert_eq!(report.up, 1);
        assert_eq!(report.down, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.processed(), report.due);
    }
}
