//! Per-account MFA state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::totp::TotpSecret;

/// Committed MFA record for one account.
///
/// Invariant: `enabled == false` implies `secret` is `None` and
/// `backup_code_hashes` is empty. The default value is the disabled state
/// every account starts in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MfaState {
    pub enabled: bool,
    pub secret: Option<TotpSecret>,
    pub backup_code_hashes: Vec<String>,
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub enabled_at: Option<DateTime<Utc>>,
}

impl MfaState {
    /// Freshly enabled state committed by a successful setup.
    pub(crate) fn enabled(
        secret: TotpSecret,
        backup_code_hashes: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            enabled: true,
            secret: Some(secret),
            backup_code_hashes,
            failed_attempts: 0,
            lockout_until: None,
            enabled_at: Some(now),
        }
    }

    /// Whether the lockout window is still running at `now`.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }

    /// Seconds left on the lockout, rounded up. Zero when not locked.
    pub fn lockout_remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        match self.lockout_until {
            Some(until) if now < until => {
                let millis = (until - now).num_milliseconds().max(0) as u64;
                millis.div_ceil(1000)
            },
            _ => 0,
        }
    }

    /// Clear the failure counters after a successful verification.
    pub(crate) fn reset_failures(&mut self) {
        self.failed_attempts = 0;
        self.lockout_until = None;
    }
}
