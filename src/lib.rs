//! MFA core for MediCheck, the medical-checkup record platform.
//!
//! Two pieces: a pure TOTP engine ([`totp`], [`backup`]) implementing
//! RFC 6238 code generation and one-time backup codes, and a session
//! controller ([`controller`]) orchestrating per-account enrollment, login
//! verification and lockout over pluggable persistence ([`store`]).
//!
//! The crate has no HTTP surface; the REST layer and the employee-record
//! services sit above it and implement the [`store::MfaStore`] and
//! [`store::EventSink`] ports against their own database.

#![forbid(unsafe_code)]

pub mod backup;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod state;
pub mod store;
pub mod totp;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::MfaConfig;
pub use controller::{LoginVerification, MfaController, MfaStatus, SetupData};
pub use error::{MfaError, Result};
pub use state::MfaState;
pub use store::{
    EventSink, MemorySink, MemoryStore, MfaEventKind, MfaStore, NullSink,
    StoreError,
};
pub use totp::TotpSecret;
