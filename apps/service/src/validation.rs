use std::net::IpAddr;

use thiserror::Error;

/// Longest alias a tenant may pick
pub const MAX_ALIAS_LEN: usize = 64;

/// Longest hostname accepted (RFC 1035 limit)
pub const MAX_HOST_LEN: usize = 253;

/// Hard ceiling on `interval_seconds` (one leap year), whatever the configured maximum
pub const MAX_INTERVAL_SECONDS: u64 = 366 * 86_400;

/// Reasons a registration request is rejected before it reaches the store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Tenant id cannot be empty")]
    EmptyTenant,
    #[error("Invalid host {0:?}")]
    InvalidHost(String),
    #[error("Port must be between 1 and 65535, got {0}")]
    InvalidPort(u32),
    #[error("Check interval too short: {interval} seconds (minimum: {min})")]
    IntervalTooShort { interval: u64, min: u64 },
    #[error("Check interval too long: {interval} seconds (maximum: {max})")]
    IntervalTooLong { interval: u64, max: u64 },
    #[error("Invalid alias {0:?}")]
    InvalidAlias(String),
}

/// Accepted range for `interval_seconds`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalLimits {
    pub min_seconds: u64,
    pub max_seconds: u64,
}

impl IntervalLimits {
    pub fn validate(&self, interval: u64) -> Result<(), ValidationError> {
        if interval < self.min_seconds {
            return Err(ValidationError::IntervalTooShort { interval, min: self.min_seconds });
        }

        let max = self.max_seconds.min(MAX_INTERVAL_SECONDS);
        if interval > max {
            return Err(ValidationError::IntervalTooLong { interval, max });
        }

        Ok(())
    }
}

pub fn validate_tenant(tenant_id: &str) -> Result<(), ValidationError> {
    if tenant_id.trim().is_empty() {
        return Err(ValidationError::EmptyTenant);
    }
    Ok(())
}

/// Validate port is in 1..=65535
pub fn validate_port(port: u32) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ValidationError::InvalidPort(port)),
    }
}

/// Validate a bare host: an IP literal or a hostname, never `host:port` or a URL.
pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidHost(host.to_string());

    if host.is_empty() || host.len() > MAX_HOST_LEN {
        return Err(invalid());
    }

    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    if host.starts_with('-') || host.ends_with('-') || host.starts_with('.') {
        return Err(invalid());
    }

    if host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Aliases are matched exactly (case-sensitive), so only reject what cannot be typed back.
pub fn validate_alias(alias: &str) -> Result<(), ValidationError> {
    if alias.is_empty()
        || alias.chars().count() > MAX_ALIAS_LEN
        || alias.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::InvalidAlias(alias.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_validation() {
        assert_eq!(validate_port(1), Ok(1));
        assert_eq!(validate_port(65535), Ok(65535));

        assert_eq!(validate_port(0), Err(ValidationError::InvalidPort(0)));
        assert_eq!(validate_port(65536), Err(ValidationError::InvalidPort(65536)));
    }

    #[test]
    fn test_host_validation() {
        assert!(validate_host("127.0.0.1").is_ok());
        assert!(validate_host("::1").is_ok());
        assert!(validate_host("example.com").is_ok());
        assert!(validate_host("proxy2.wynd.network").is_ok());
        assert!(validate_host("my_host-1").is_ok());

        assert!(validate_host("").is_err());
        assert!(validate_host("example.com:80").is_err());
        assert!(validate_host("http://example.com").is_err());
        assert!(validate_host("bad host").is_err());
        assert!(validate_host("-leading").is_err());
        assert!(validate_host(&"a".repeat(MAX_HOST_LEN + 1)).is_err());
    }

    #[test]
    fn test_interval_ceiling_applies_to_unbounded_limits() {
        let limits = IntervalLimits { min_seconds: 5, max_seconds: u64::MAX };

        assert!(limits.validate(MAX_INTERVAL_SECONDS).is_ok());
        assert_eq!(
            limits.validate(100_000_000_000_000),
            Err(ValidationError::IntervalTooLong {
                interval: 100_000_000_000_000,
                max: MAX_INTERVAL_SECONDS
            })
        );
    }

    #[test]
    fn test_interval_limits() {
        let limits = IntervalLimits { min_seconds: 5, max_seconds: 86400 };

        assert!(limits.validate(5).is_ok());
        assert!(limits.validate(86400).is_ok());

        assert_eq!(
            limits.validate(4),
            Err(ValidationError::IntervalTooShort { interval: 4, min: 5 })
        );
        assert_eq!(
            limits.validate(86401),
            Err(ValidationError::IntervalTooLong { interval: 86401, max: 86400 })
        );
    }

    #[test]
    fn test_alias_validation() {
        assert!(validate_alias("a").is_ok());
        assert!(validate_alias("example.com/443").is_ok());
        assert!(validate_alias("데이터베이스").is_ok());

        assert!(validate_alias("").is_err());
        assert!(validate_alias("two words").is_err());
        assert!(validate_alias(&"x".repeat(MAX_ALIAS_LEN + 1)).is_err());
    }
}
