//! Configuration for the MFA controller.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// MFA policy configuration.
///
/// Every field has a sane default, so hosts usually embed this in their own
/// configuration file and only override what they need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MfaConfig {
    /// Issuer advertised in provisioning URIs.
    pub issuer: String,
    /// Number of ±30s steps tolerated during verification.
    pub time_window: u8,
    /// Failed attempts before lockout.
    pub max_failed_attempts: u32,
    /// Lockout length in milliseconds.
    pub lockout_duration_ms: u64,
    /// Backup codes generated per batch.
    pub backup_code_count: usize,
    /// Lifetime of a transient setup secret in milliseconds.
    pub setup_ttl_ms: u64,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            issuer: "MediCheck".into(),
            time_window: 1,
            max_failed_attempts: 3,
            lockout_duration_ms: 15 * 60 * 1000,
            backup_code_count: 8,
            setup_ttl_ms: 10 * 60 * 1000,
        }
    }
}

impl MfaConfig {
    /// Update the advertised issuer.
    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub(crate) fn lockout_duration(&self) -> Duration {
        Duration::milliseconds(self.lockout_duration_ms as i64)
    }

    pub(crate) fn setup_ttl(&self) -> Duration {
        Duration::milliseconds(self.setup_ttl_ms as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MfaConfig::default();

        assert_eq!(config.time_window, 1);
        assert_eq!(config.max_failed_attempts, 3);
        assert_eq!(config.lockout_duration_ms, 900_000);
        assert_eq!(config.backup_code_count, 8);
        assert_eq!(config.setup_ttl_ms, 600_000);
    }

    #[test]
    fn test_partial_deserialization() {
        let config: MfaConfig =
            serde_json::from_str(r#"{"max_failed_attempts": 5}"#).unwrap();

        assert_eq!(config.max_failed_attempts, 5);
        assert_eq!(config.time_window, 1);
        assert_eq!(config.issuer, "MediCheck");
    }
}
