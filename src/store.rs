//! Collaborator ports: account-state persistence and audit events.
//!
//! The controller owns no durable state; everything lives behind
//! [`MfaStore`]. The in-memory adapters below keep tests hermetic and let
//! small deployments run without external infrastructure.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::state::MfaState;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by a store or event-sink implementation.
#[derive(Debug, Error)]
#[error("account store failure: {0}")]
pub struct StoreError(#[from] pub BoxError);

impl StoreError {
    /// Wrap any error type into a [`StoreError`].
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self(err.into())
    }
}

/// Port for MFA account-state persistence.
///
/// Each call must be atomic on its own; the controller serializes whole
/// read-modify-write sequences per account, so implementations only need
/// per-call consistency. Hosts sharding controllers across processes must
/// provide store-level transactions themselves.
#[async_trait]
pub trait MfaStore: Send + Sync {
    /// Load the committed state for an account, `None` if never written.
    async fn load(&self, account_id: &str)
    -> Result<Option<MfaState>, StoreError>;

    /// Replace the committed state for an account.
    async fn save(
        &self,
        account_id: &str,
        state: &MfaState,
    ) -> Result<(), StoreError>;
}

/// Audit event types emitted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MfaEventKind {
    Enabled,
    Disabled,
    VerifySuccess,
    VerifyFailed,
    Lockout,
    BackupCodeUsed,
    BackupCodesRegenerated,
}

impl MfaEventKind {
    /// Wire name of the event, stable across releases.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "MFA_ENABLED",
            Self::Disabled => "MFA_DISABLED",
            Self::VerifySuccess => "MFA_VERIFY_SUCCESS",
            Self::VerifyFailed => "MFA_VERIFY_FAILED",
            Self::Lockout => "MFA_LOCKOUT",
            Self::BackupCodeUsed => "BACKUP_CODE_USED",
            Self::BackupCodesRegenerated => "BACKUP_CODES_REGENERATED",
        }
    }
}

/// Port for the audit trail.
///
/// Best-effort: the controller logs failures and carries on, an audit gap
/// must never fail the primary operation.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(
        &self,
        account_id: &str,
        kind: MfaEventKind,
        details: Value,
    ) -> Result<(), StoreError>;
}

/// In-process store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, MfaState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MfaStore for MemoryStore {
    async fn load(
        &self,
        account_id: &str,
    ) -> Result<Option<MfaState>, StoreError> {
        Ok(self.records.read().await.get(account_id).cloned())
    }

    async fn save(
        &self,
        account_id: &str,
        state: &MfaState,
    ) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(account_id.to_owned(), state.clone());
        Ok(())
    }
}

/// Event recorded by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub account_id: String,
    pub kind: MfaEventKind,
    pub details: Value,
}

/// In-process sink that keeps every event, mostly useful in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }

    /// Event kinds in emission order.
    pub async fn kinds(&self) -> Vec<MfaEventKind> {
        self.events.lock().await.iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn record(
        &self,
        account_id: &str,
        kind: MfaEventKind,
        details: Value,
    ) -> Result<(), StoreError> {
        self.events.lock().await.push(RecordedEvent {
            account_id: account_id.to_owned(),
            kind,
            details,
        });
        Ok(())
    }
}

/// Sink that drops every event.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn record(
        &self,
        _account_id: &str,
        _kind: MfaEventKind,
        _details: Value,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}
