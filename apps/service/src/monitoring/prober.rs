use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::validation;

/// Default connect timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Raised only for calls that could never succeed; network failures are `Ok(false)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("malformed probe target {host:?}:{port}")]
    MalformedTarget { host: String, port: u16 },
}

/// Reachability check for one endpoint
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// `Ok(true)` only if a connection was established in time
    async fn check(&self, host: &str, port: u16) -> Result<bool, ProbeError>;
}

/// TCP connect prober
#[derive(Debug, Clone)]
pub struct TcpProber {
    timeout_duration: Duration,
}

impl TcpProber {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { timeout_duration }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_duration
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl Prober for TcpProber {
    async fn check(&self, host: &str, port: u16) -> Result<bool, ProbeError> {
        if port == 0 || validation::validate_host(host).is_err() {
            return Err(ProbeError::MalformedTarget { host: host.to_string(), port });
        }

        let target = match host.parse::<Ipv6Addr>() {
            Ok(_) => format!("[{host}]:{port}"),
            Err(_) => format!("{host}:{port}"),
        };

        let start = Instant::now();

        // Resolution happens inside connect, so DNS stalls are bounded by the same timeout
        match timeout(self.timeout_duration, TcpStream::connect(target.as_str())).await {
            Ok(Ok(_stream)) => {
                debug!(%target, latency_ms = start.elapsed().as_millis() as u64, "TCP probe succeeded");
                Ok(true)
            }
            Ok(Err(e)) => {
                debug!(%target, error = %e, "TCP probe failed");
                Ok(false)
            }
            Err(_) => {
                debug!(%target, timeout_ms = self.timeout_duration.as_millis() as u64, "TCP probe timed out");
                Ok(false)
            }
        }
    }
}
