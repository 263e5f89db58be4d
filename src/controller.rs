//! MFA session controller.
//!
//! Stateful orchestration around the TOTP engine: setup
//! (generate → verify → commit), login verification with lockout, backup
//! codes and disablement. All durable state lives behind [`MfaStore`]; the
//! controller only holds transient setup secrets and per-account locks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;

use crate::backup;
use crate::clock::{Clock, SystemClock};
use crate::config::MfaConfig;
use crate::error::{MfaError, Result};
use crate::state::MfaState;
use crate::store::{EventSink, MfaEventKind, MfaStore};
use crate::totp::{self, TotpSecret};

/// Secret handed out by `start_setup`, not yet committed.
struct PendingSetup {
    secret: TotpSecret,
    expires_at: DateTime<Utc>,
}

/// Data returned when initiating setup, for QR-code rendering and manual
/// entry. The secret is not persisted until the user proves possession.
#[derive(Debug)]
pub struct SetupData {
    pub secret: TotpSecret,
    pub provisioning_uri: String,
}

/// Outcome of a successful login verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginVerification {
    pub used_backup_code: bool,
    /// Unconsumed backup codes left, only set when one was just consumed.
    pub remaining_backup_codes: Option<usize>,
}

/// Point-in-time MFA summary for an account.
#[derive(Debug, Clone)]
pub struct MfaStatus {
    pub enabled: bool,
    pub backup_codes_remaining: usize,
    pub enabled_at: Option<DateTime<Utc>>,
    pub lockout_until: Option<DateTime<Utc>>,
}

/// MFA manager.
///
/// Mutating operations are serialized per account, so two concurrent
/// `verify_login` calls cannot under-count failed attempts or double-consume
/// a backup code.
pub struct MfaController {
    config: MfaConfig,
    store: Arc<dyn MfaStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<String, PendingSetup>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MfaController {
    /// Create a new [`MfaController`] on the system clock.
    pub fn new(
        config: MfaConfig,
        store: Arc<dyn MfaStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            store,
            events,
            clock: Arc::new(SystemClock),
            pending: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Begin MFA enrollment for an account.
    ///
    /// The generated secret stays in a transient, TTL-bound slot until
    /// [`confirm_setup`](Self::confirm_setup) commits it. Calling again
    /// before confirmation replaces the previous pending secret.
    pub async fn start_setup(
        &self,
        account_id: &str,
        label: &str,
    ) -> Result<SetupData> {
        let state = self.load(account_id).await?;
        if state.enabled {
            return Err(MfaError::AlreadyEnabled);
        }

        let now = self.clock.now();
        let generated = totp::generate_secret(label, &self.config.issuer);

        let mut pending = self.pending.lock().await;
        pending.retain(|_, entry| entry.expires_at > now);
        pending.insert(
            account_id.to_owned(),
            PendingSetup {
                secret: generated.secret.clone(),
                expires_at: now + self.config.setup_ttl(),
            },
        );
        drop(pending);

        tracing::debug!(account_id, "MFA setup started");

        Ok(SetupData {
            secret: generated.secret,
            provisioning_uri: generated.provisioning_uri,
        })
    }

    /// Complete enrollment by proving possession of the secret.
    ///
    /// On success the secret and a fresh backup-code batch are committed
    /// and the plaintext codes are returned exactly once. A wrong code
    /// leaves the committed state untouched and the pending secret in
    /// place for a retry.
    pub async fn confirm_setup(
        &self,
        account_id: &str,
        submitted_code: &str,
    ) -> Result<Vec<String>> {
        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let secret = {
            let mut pending = self.pending.lock().await;
            match pending.get(account_id) {
                Some(entry) if entry.expires_at > now => entry.secret.clone(),
                Some(_) => {
                    pending.remove(account_id);
                    return Err(MfaError::SetupExpired);
                },
                None => return Err(MfaError::SetupExpired),
            }
        };

        if !totp::verify_code(
            &secret,
            submitted_code,
            unix_seconds(now),
            self.config.time_window,
        )? {
            return Err(MfaError::invalid_code());
        }

        let codes = backup::generate_backup_codes(self.config.backup_code_count);
        let hashes = codes.iter().map(|c| backup::hash_backup_code(c)).collect();

        let state = MfaState::enabled(secret, hashes, now);
        self.store.save(account_id, &state).await?;
        self.pending.lock().await.remove(account_id);

        self.emit(
            account_id,
            MfaEventKind::Enabled,
            json!({ "backup_codes": codes.len() }),
        )
        .await;

        Ok(codes)
    }

    /// Verify a TOTP or backup code during login.
    ///
    /// Failure bookkeeping follows the lockout policy: reaching
    /// `max_failed_attempts` sets a lockout, and while it runs every call
    /// fails fast without touching the counters. Expiry of the lockout does
    /// not reset the counter; only a success does.
    pub async fn verify_login(
        &self,
        account_id: &str,
        submitted_code: &str,
    ) -> Result<LoginVerification> {
        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut state = self.load(account_id).await?;

        if !state.enabled {
            return Err(MfaError::NotEnabled);
        }
        if state.is_locked(now) {
            return Err(MfaError::LockedOut {
                retry_after_secs: state.lockout_remaining_secs(now),
            });
        }

        // An enabled account without a secret is corrupt data, not user error.
        let secret = state.secret.clone().ok_or(MfaError::InvalidSecret)?;

        if totp::verify_code(
            &secret,
            submitted_code,
            unix_seconds(now),
            self.config.time_window,
        )? {
            state.reset_failures();
            self.store.save(account_id, &state).await?;
            self.emit(account_id, MfaEventKind::VerifySuccess, json!({})).await;

            return Ok(LoginVerification {
                used_backup_code: false,
                remaining_backup_codes: None,
            });
        }

        if let Some(index) = state
            .backup_code_hashes
            .iter()
            .position(|hash| backup::verify_backup_code(submitted_code, hash))
        {
            // Consume exactly one matching entry before returning.
            state.backup_code_hashes.remove(index);
            state.reset_failures();
            let remaining = state.backup_code_hashes.len();
            self.store.save(account_id, &state).await?;

            self.emit(
                account_id,
                MfaEventKind::BackupCodeUsed,
                json!({ "remaining": remaining }),
            )
            .await;

            return Ok(LoginVerification {
                used_backup_code: true,
                remaining_backup_codes: Some(remaining),
            });
        }

        state.failed_attempts += 1;

        if state.failed_attempts >= self.config.max_failed_attempts {
            state.lockout_until = Some(now + self.config.lockout_duration());
            self.store.save(account_id, &state).await?;

            tracing::warn!(
                account_id,
                attempts = state.failed_attempts,
                "MFA verification locked out"
            );
            self.emit(
                account_id,
                MfaEventKind::Lockout,
                json!({ "attempts": state.failed_attempts }),
            )
            .await;

            Err(MfaError::LockedOut {
                retry_after_secs: state.lockout_remaining_secs(now),
            })
        } else {
            let attempts_remaining =
                self.config.max_failed_attempts - state.failed_attempts;
            self.store.save(account_id, &state).await?;

            self.emit(
                account_id,
                MfaEventKind::VerifyFailed,
                json!({ "attempts_remaining": attempts_remaining }),
            )
            .await;

            Err(MfaError::InvalidCode {
                attempts_remaining: Some(attempts_remaining),
            })
        }
    }

    /// Disable MFA, clearing the secret and backup codes. Idempotent.
    ///
    /// Any re-authentication gate belongs to the caller.
    pub async fn disable(&self, account_id: &str) -> Result<()> {
        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;

        self.store.save(account_id, &MfaState::default()).await?;
        self.emit(account_id, MfaEventKind::Disabled, json!({})).await;

        Ok(())
    }

    /// Replace the backup-code batch; old codes become invalid immediately.
    pub async fn regenerate_backup_codes(
        &self,
        account_id: &str,
    ) -> Result<Vec<String>> {
        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;

        let mut state = self.load(account_id).await?;
        if !state.enabled {
            return Err(MfaError::NotEnabled);
        }

        let codes = backup::generate_backup_codes(self.config.backup_code_count);
        state.backup_code_hashes =
            codes.iter().map(|c| backup::hash_backup_code(c)).collect();
        self.store.save(account_id, &state).await?;

        self.emit(
            account_id,
            MfaEventKind::BackupCodesRegenerated,
            json!({ "backup_codes": codes.len() }),
        )
        .await;

        Ok(codes)
    }

    /// Current MFA summary for an account.
    pub async fn status(&self, account_id: &str) -> Result<MfaStatus> {
        let state = self.load(account_id).await?;

        Ok(MfaStatus {
            enabled: state.enabled,
            backup_codes_remaining: state.backup_code_hashes.len(),
            enabled_at: state.enabled_at,
            lockout_until: state.lockout_until,
        })
    }

    /// Accounts with no record yet are in the implicit disabled state.
    async fn load(&self, account_id: &str) -> Result<MfaState> {
        Ok(self.store.load(account_id).await?.unwrap_or_default())
    }

    async fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(account_id.to_owned())
            .or_default()
            .clone()
    }

    /// Record an audit event, logging instead of failing on sink errors.
    async fn emit(
        &self,
        account_id: &str,
        kind: MfaEventKind,
        details: serde_json::Value,
    ) {
        if let Err(err) = self.events.record(account_id, kind, details).await {
            tracing::warn!(
                error = %err,
                account_id,
                event = kind.as_str(),
                "failed to record audit event"
            );
        }
    }
}

fn unix_seconds(now: DateTime<Utc>) -> u64 {
    now.timestamp().max(0) as u64
}
