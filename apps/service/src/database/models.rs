use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::ServiceStatus;
use crate::validation::{self, ValidationError};

/// Identity of a monitored endpoint: one row per `(tenant, host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub tenant_id: String,
    pub host: String,
    pub port: u16,
}

impl ServiceKey {
    pub fn new(tenant_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { tenant_id: tenant_id.into(), host: host.into(), port }
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.tenant_id, self.host, self.port)
    }
}

/// ServiceRecord model - one monitored TCP endpoint owned by a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub tenant_id: String,
    pub host: String,
    pub port: u16,
    pub alias: String,
    pub interval_seconds: u64,
    pub status: ServiceStatus,
    pub last_check_time: DateTime<Utc>,
    pub next_check_time: DateTime<Utc>,
}

impl ServiceRecord {
    /// Create a freshly registered record, due immediately.
    ///
    /// Fails when the host, port, alias or interval would not be accepted by the registry.
    /// An empty alias falls back to `host/port`.
    pub fn new(
        tenant_id: &str,
        host: &str,
        port: u32,
        alias: Option<&str>,
        interval_seconds: u64,
        limits: &validation::IntervalLimits,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        validation::validate_tenant(tenant_id)?;
        validation::validate_host(host)?;
        let port = validation::validate_port(port)?;
        limits.validate(interval_seconds)?;

        let alias = match alias.map(str::trim).filter(|a| !a.is_empty()) {
            Some(alias) => alias.to_string(),
            None => default_alias(host, port),
        };
        validation::validate_alias(&alias)?;

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            host: host.to_string(),
            port,
            alias,
            interval_seconds,
            status: ServiceStatus::Init,
            last_check_time: now,
            next_check_time: now,
        })
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.tenant_id.clone(), self.host.clone(), self.port)
    }

    /// Endpoint in `host:port` form
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_check_time <= now
    }

    /// The record as it looks after a probe observed at `now`.
    ///
    /// Fails when `now + interval` is not a representable timestamp.
    pub fn with_check_result(
        &self,
        reachable: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let too_long = || ValidationError::IntervalTooLong {
            interval: self.interval_seconds,
            max: validation::MAX_INTERVAL_SECONDS,
        };
        let next_check_time = interval_duration(self.interval_seconds)
            .and_then(|interval| now.checked_add_signed(interval))
            .ok_or_else(too_long)?;

        Ok(Self {
            status: ServiceStatus::from_reachable(reachable),
            last_check_time: now,
            next_check_time,
            ..self.clone()
        })
    }
}

/// UserRecord model - per-tenant quota bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub tenant_id: String,
    pub host_cnt: u64,
    pub user_type: String,
}

pub fn default_alias(host: &str, port: u16) -> String {
    format!("{host}/{port}")
}

/// `None` when the interval does not fit a `Duration`
pub fn interval_duration(interval_seconds: u64) -> Option<Duration> {
    i64::try_from(interval_seconds).ok().and_then(Duration::try_seconds)
}

/// Convert a timestamp to Unix milliseconds for storage
pub fn timestamp_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert stored Unix milliseconds back to a timestamp
pub fn millis_to_timestamp(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
