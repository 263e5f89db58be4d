//! End-to-end scenarios for the MFA controller: enrollment, lockout policy,
//! backup-code consumption and audit events.

use std::sync::Arc;

use async_trait::async_trait;
use medicheck_mfa::{
    Clock, EventSink, FixedClock, LoginVerification, MemorySink, MemoryStore,
    MfaConfig, MfaController, MfaError, MfaEventKind, StoreError, TotpSecret,
    totp,
};
use serde_json::Value;

struct Harness {
    controller: MfaController,
    sink: Arc<MemorySink>,
    clock: Arc<FixedClock>,
}

fn harness(config: MfaConfig) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let clock = Arc::new(FixedClock::at_unix(1_700_000_000));
    let controller =
        MfaController::new(config, Arc::new(MemoryStore::new()), sink.clone())
            .with_clock(clock.clone());

    Harness {
        controller,
        sink,
        clock,
    }
}

fn unix(clock: &FixedClock) -> u64 {
    clock.now().timestamp() as u64
}

fn current_code(secret: &TotpSecret, clock: &FixedClock) -> String {
    totp::compute_code(secret, unix(clock) / totp::TIME_STEP).unwrap()
}

/// A 6-digit string matching none of the ±window candidate codes.
fn wrong_code(secret: &TotpSecret, clock: &FixedClock) -> String {
    let current = unix(clock) / totp::TIME_STEP;
    let candidates: Vec<String> = (current - 1..=current + 1)
        .map(|counter| totp::compute_code(secret, counter).unwrap())
        .collect();

    (0..1_000_000)
        .map(|n| format!("{n:06}"))
        .find(|code| !candidates.contains(code))
        .unwrap()
}

async fn enroll(h: &Harness, account_id: &str) -> (TotpSecret, Vec<String>) {
    let setup = h.controller.start_setup(account_id, account_id).await.unwrap();
    let code = current_code(&setup.secret, &h.clock);
    let codes = h.controller.confirm_setup(account_id, &code).await.unwrap();
    (setup.secret, codes)
}

#[tokio::test]
async fn setup_flow_commits_and_verifies() {
    let h = harness(MfaConfig::default());
    let (secret, codes) = enroll(&h, "emp-1").await;

    assert_eq!(codes.len(), 8);

    let status = h.controller.status("emp-1").await.unwrap();
    assert!(status.enabled);
    assert_eq!(status.backup_codes_remaining, 8);
    assert_eq!(status.enabled_at, Some(h.clock.now()));

    let outcome = h
        .controller
        .verify_login("emp-1", &current_code(&secret, &h.clock))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        LoginVerification {
            used_backup_code: false,
            remaining_backup_codes: None,
        }
    );

    assert_eq!(
        h.sink.kinds().await,
        vec![MfaEventKind::Enabled, MfaEventKind::VerifySuccess]
    );
}

#[tokio::test]
async fn confirm_setup_with_wrong_code_commits_nothing() {
    let h = harness(MfaConfig::default());
    let setup = h.controller.start_setup("emp-1", "emp-1").await.unwrap();

    let err = h
        .controller
        .confirm_setup("emp-1", &wrong_code(&setup.secret, &h.clock))
        .await
        .unwrap_err();
    assert!(matches!(err, MfaError::InvalidCode { .. }));

    let status = h.controller.status("emp-1").await.unwrap();
    assert!(!status.enabled);
    assert_eq!(status.backup_codes_remaining, 0);
    assert!(h.sink.events().await.is_empty());

    // The pending secret survives a wrong guess, so the user can retry.
    let code = current_code(&setup.secret, &h.clock);
    h.controller.confirm_setup("emp-1", &code).await.unwrap();
    assert!(h.controller.status("emp-1").await.unwrap().enabled);
}

#[tokio::test]
async fn verify_login_requires_enabled_mfa() {
    let h = harness(MfaConfig::default());

    let err = h.controller.verify_login("emp-1", "123456").await.unwrap_err();
    assert!(matches!(err, MfaError::NotEnabled));
}

#[tokio::test]
async fn lockout_triggers_on_third_failure() {
    let h = harness(MfaConfig::default());
    let (secret, _) = enroll(&h, "emp-1").await;
    let bad = wrong_code(&secret, &h.clock);

    let err = h.controller.verify_login("emp-1", &bad).await.unwrap_err();
    assert!(matches!(
        err,
        MfaError::InvalidCode {
            attempts_remaining: Some(2)
        }
    ));

    let err = h.controller.verify_login("emp-1", &bad).await.unwrap_err();
    assert!(matches!(
        err,
        MfaError::InvalidCode {
            attempts_remaining: Some(1)
        }
    ));

    let err = h.controller.verify_login("emp-1", &bad).await.unwrap_err();
    assert!(matches!(
        err,
        MfaError::LockedOut {
            retry_after_secs: 900
        }
    ));

    // While locked, attempts fail fast and the counter stays put.
    h.clock.advance(chrono::Duration::seconds(10));
    let err = h.controller.verify_login("emp-1", &bad).await.unwrap_err();
    assert!(matches!(
        err,
        MfaError::LockedOut {
            retry_after_secs: 890
        }
    ));

    // Even the correct code is refused during lockout.
    let good = current_code(&secret, &h.clock);
    let err = h.controller.verify_login("emp-1", &good).await.unwrap_err();
    assert!(matches!(err, MfaError::LockedOut { .. }));

    assert_eq!(
        h.sink.kinds().await,
        vec![
            MfaEventKind::Enabled,
            MfaEventKind::VerifyFailed,
            MfaEventKind::VerifyFailed,
            MfaEventKind::Lockout,
        ]
    );
}

#[tokio::test]
async fn lockout_expiry_permits_retry_without_resetting_counter() {
    let h = harness(MfaConfig::default());
    let (secret, _) = enroll(&h, "emp-1").await;
    let bad = wrong_code(&secret, &h.clock);

    for _ in 0..3 {
        let _ = h.controller.verify_login("emp-1", &bad).await.unwrap_err();
    }

    // Past the lockout window the counter is still at the threshold, so one
    // more failure locks again immediately.
    h.clock.advance(chrono::Duration::minutes(16));
    let bad = wrong_code(&secret, &h.clock);
    let err = h.controller.verify_login("emp-1", &bad).await.unwrap_err();
    assert!(matches!(err, MfaError::LockedOut { .. }));

    // After that second lockout passes, a correct code resets everything.
    h.clock.advance(chrono::Duration::minutes(16));
    let good = current_code(&secret, &h.clock);
    h.controller.verify_login("emp-1", &good).await.unwrap();

    // Counter is back to zero: the next failure is a plain invalid code.
    let bad = wrong_code(&secret, &h.clock);
    let err = h.controller.verify_login("emp-1", &bad).await.unwrap_err();
    assert!(matches!(
        err,
        MfaError::InvalidCode {
            attempts_remaining: Some(2)
        }
    ));
}

#[tokio::test]
async fn success_resets_failed_attempts() {
    let h = harness(MfaConfig::default());
    let (secret, _) = enroll(&h, "emp-1").await;
    let bad = wrong_code(&secret, &h.clock);

    for _ in 0..2 {
        let _ = h.controller.verify_login("emp-1", &bad).await.unwrap_err();
    }
    let good = current_code(&secret, &h.clock);
    h.controller.verify_login("emp-1", &good).await.unwrap();

    // Two more failures stay below the threshold again.
    for expected in [2u32, 1] {
        let err = h.controller.verify_login("emp-1", &bad).await.unwrap_err();
        assert!(matches!(
            err,
            MfaError::InvalidCode { attempts_remaining: Some(n) } if n == expected
        ));
    }
}

#[tokio::test]
async fn backup_code_is_single_use() {
    let h = harness(MfaConfig::default());
    let (_, codes) = enroll(&h, "emp-1").await;

    let outcome = h.controller.verify_login("emp-1", &codes[0]).await.unwrap();
    assert_eq!(
        outcome,
        LoginVerification {
            used_backup_code: true,
            remaining_backup_codes: Some(7),
        }
    );
    assert_eq!(
        h.controller.status("emp-1").await.unwrap().backup_codes_remaining,
        7
    );

    // Replaying the consumed code is just another failed attempt.
    let err = h.controller.verify_login("emp-1", &codes[0]).await.unwrap_err();
    assert!(matches!(
        err,
        MfaError::InvalidCode {
            attempts_remaining: Some(2)
        }
    ));

    let used = h
        .sink
        .events()
        .await
        .into_iter()
        .find(|e| e.kind == MfaEventKind::BackupCodeUsed)
        .unwrap();
    assert_eq!(used.details["remaining"], 7);
}

#[tokio::test]
async fn backup_code_accepts_unformatted_input() {
    let h = harness(MfaConfig::default());
    let (_, codes) = enroll(&h, "emp-1").await;

    let typed: String = codes[1]
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    let outcome = h.controller.verify_login("emp-1", &typed).await.unwrap();
    assert!(outcome.used_backup_code);
}

#[tokio::test]
async fn concurrent_backup_code_submissions_yield_one_success() {
    let h = harness(MfaConfig::default());
    let (_, codes) = enroll(&h, "emp-1").await;

    let (first, second) = tokio::join!(
        h.controller.verify_login("emp-1", &codes[0]),
        h.controller.verify_login("emp-1", &codes[0]),
    );

    let successes =
        [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert_eq!(
        h.controller.status("emp-1").await.unwrap().backup_codes_remaining,
        7
    );
}

#[tokio::test]
async fn regenerate_replaces_the_whole_batch() {
    let h = harness(MfaConfig::default());
    let (_, old_codes) = enroll(&h, "emp-1").await;

    let new_codes =
        h.controller.regenerate_backup_codes("emp-1").await.unwrap();
    assert_eq!(new_codes.len(), 8);

    // Old codes are invalid immediately, no grace period.
    let err = h
        .controller
        .verify_login("emp-1", &old_codes[0])
        .await
        .unwrap_err();
    assert!(matches!(err, MfaError::InvalidCode { .. }));

    let outcome =
        h.controller.verify_login("emp-1", &new_codes[0]).await.unwrap();
    assert!(outcome.used_backup_code);
}

#[tokio::test]
async fn regenerate_requires_enabled_mfa() {
    let h = harness(MfaConfig::default());

    let err =
        h.controller.regenerate_backup_codes("emp-1").await.unwrap_err();
    assert!(matches!(err, MfaError::NotEnabled));
}

#[tokio::test]
async fn disable_clears_state_and_is_idempotent() {
    let h = harness(MfaConfig::default());
    enroll(&h, "emp-1").await;

    h.controller.disable("emp-1").await.unwrap();
    h.controller.disable("emp-1").await.unwrap();

    let status = h.controller.status("emp-1").await.unwrap();
    assert!(!status.enabled);
    assert_eq!(status.backup_codes_remaining, 0);

    let err = h.controller.verify_login("emp-1", "123456").await.unwrap_err();
    assert!(matches!(err, MfaError::NotEnabled));
}

#[tokio::test]
async fn custom_policy_is_honored() {
    let config = MfaConfig {
        time_window: 0,
        max_failed_attempts: 5,
        lockout_duration_ms: 60_000,
        ..Default::default()
    };
    let h = harness(config);
    let (secret, _) = enroll(&h, "emp-1").await;

    // With window 0 the previous step's code is already stale.
    let stale =
        totp::compute_code(&secret, unix(&h.clock) / totp::TIME_STEP - 1)
            .unwrap();
    let current = current_code(&secret, &h.clock);
    if stale != current {
        let err =
            h.controller.verify_login("emp-1", &stale).await.unwrap_err();
        assert!(matches!(err, MfaError::InvalidCode { .. }));
    }

    // Threshold of 5 and a one-minute lockout, on a clean account.
    let (secret, _) = enroll(&h, "emp-2").await;
    let bad = wrong_code(&secret, &h.clock);
    let mut last = None;
    for _ in 0..4 {
        last = Some(h.controller.verify_login("emp-2", &bad).await.unwrap_err());
    }
    assert!(matches!(
        last,
        Some(MfaError::InvalidCode {
            attempts_remaining: Some(1)
        })
    ));

    let err = h.controller.verify_login("emp-2", &bad).await.unwrap_err();
    assert!(matches!(
        err,
        MfaError::LockedOut {
            retry_after_secs: 60
        }
    ));
}

/// Sink that always fails, to prove audit gaps never break operations.
struct FailingSink;

#[async_trait]
impl EventSink for FailingSink {
    async fn record(
        &self,
        _account_id: &str,
        _kind: MfaEventKind,
        _details: Value,
    ) -> Result<(), StoreError> {
        Err(StoreError::new("audit backend unreachable"))
    }
}

#[tokio::test]
async fn event_sink_failure_does_not_fail_operations() {
    let clock = Arc::new(FixedClock::at_unix(1_700_000_000));
    let controller = MfaController::new(
        MfaConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(FailingSink),
    )
    .with_clock(clock.clone());

    let setup = controller.start_setup("emp-1", "emp-1").await.unwrap();
    let code = totp::compute_code(
        &setup.secret,
        clock.now().timestamp() as u64 / totp::TIME_STEP,
    )
    .unwrap();

    let codes = controller.confirm_setup("emp-1", &code).await.unwrap();
    assert_eq!(codes.len(), 8);
    controller.verify_login("emp-1", &code).await.unwrap();
    controller.disable("emp-1").await.unwrap();
}
