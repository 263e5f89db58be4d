//! Error handler for the MFA core.

use thiserror::Error;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, MfaError>;

/// Enum representing MFA failures.
///
/// `InvalidSecret` indicates a data-integrity bug upstream and should be
/// treated as a hard failure; the other variants are expected control flow
/// the caller branches on. Display strings stay generic so they can be
/// surfaced to end users without leaking which check rejected the input.
#[derive(Debug, Error)]
pub enum MfaError {
    #[error("secret is not valid base32")]
    InvalidSecret,

    #[error("invalid code")]
    InvalidCode {
        /// Failures left before lockout. `None` outside of login
        /// verification (e.g. during setup confirmation).
        attempts_remaining: Option<u32>,
    },

    #[error("no pending setup for this account")]
    SetupExpired,

    #[error("MFA is not enabled for this account")]
    NotEnabled,

    #[error("MFA is already enabled for this account")]
    AlreadyEnabled,

    #[error("too many failed attempts, retry in {retry_after_secs}s")]
    LockedOut { retry_after_secs: u64 },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl MfaError {
    /// Shorthand for an [`MfaError::InvalidCode`] with no attempt counter.
    pub(crate) fn invalid_code() -> Self {
        Self::InvalidCode {
            attempts_remaining: None,
        }
    }
}
