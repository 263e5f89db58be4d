//! TOTP engine using HMAC-SHA1 (RFC 6238).
//!
//! Pure, stateless computation: no knowledge of accounts or sessions. Code
//! generation is bit-exact with RFC 6238 / RFC 4226 so any standard
//! authenticator app can be enrolled.

use base32::Alphabet;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use zeroize::Zeroize;

use crate::error::{MfaError, Result};

/// Secret length in bytes (160 bits).
const SECRET_LENGTH: usize = 20;
/// Number of digits in a code.
const DIGITS: u32 = 6;
/// Time step in seconds.
pub const TIME_STEP: u64 = 30;

/// Base32-encoded TOTP secret (RFC 4648, no padding).
///
/// Never logged after initial setup: `Debug` is redacted and the buffer is
/// zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TotpSecret {
    encoded: String,
}

impl TotpSecret {
    /// Wrap an already-encoded secret.
    ///
    /// Malformed input is not rejected here; [`compute_code`] fails with
    /// [`MfaError::InvalidSecret`] on first use instead.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self {
            encoded: encoded.into(),
        }
    }

    /// Returns the Base32 text, e.g. for manual authenticator entry.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Decode to raw key bytes.
    fn decode(&self) -> Result<Vec<u8>> {
        base32::decode(Alphabet::Rfc4648 { padding: false }, &self.encoded)
            .filter(|bytes| !bytes.is_empty())
            .ok_or(MfaError::InvalidSecret)
    }
}

impl std::fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpSecret")
            .field("encoded", &"[REDACTED]")
            .finish()
    }
}

impl Drop for TotpSecret {
    fn drop(&mut self) {
        self.encoded.zeroize();
    }
}

/// Freshly generated secret with its enrollment URI.
#[derive(Debug)]
pub struct GeneratedSecret {
    pub secret: TotpSecret,
    pub provisioning_uri: String,
}

/// Generate a new 160-bit secret from the OS CSPRNG.
///
/// `label` identifies the account inside the authenticator app; it is not
/// validated or persisted here.
pub fn generate_secret(label: &str, issuer: &str) -> GeneratedSecret {
    let mut bytes = [0u8; SECRET_LENGTH];
    OsRng.fill_bytes(&mut bytes);

    let secret =
        TotpSecret::new(base32::encode(Alphabet::Rfc4648 { padding: false }, &bytes));
    bytes.zeroize();

    let provisioning_uri = provisioning_uri(&secret, label, issuer);

    GeneratedSecret {
        secret,
        provisioning_uri,
    }
}

/// Build an `otpauth://` URI for QR-code enrollment.
pub fn provisioning_uri(secret: &TotpSecret, label: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{label}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={DIGITS}&period={TIME_STEP}",
        label = urlencoding::encode(label),
        secret = urlencoding::encode(secret.as_str()),
        issuer = urlencoding::encode(issuer),
    )
}

/// Compute the 6-digit code for a time counter.
///
/// Deterministic: same (secret, counter) always yields the same code.
pub fn compute_code(secret: &TotpSecret, time_counter: u64) -> Result<String> {
    let key = secret.decode()?;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key)
        .map_err(|_| MfaError::InvalidSecret)?;
    mac.update(&time_counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation (RFC 4226 §5.3).
    let offset = (digest[19] & 0x0f) as usize;
    let binary_code = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    Ok(format!("{:06}", binary_code % 10u32.pow(DIGITS)))
}

/// Verify a submitted code at `now_unix` seconds, tolerating ±`window`
/// time steps.
///
/// Input that is not exactly 6 ASCII digits is rejected before any
/// cryptographic work. Comparison is constant-time.
pub fn verify_code(
    secret: &TotpSecret,
    submitted: &str,
    now_unix: u64,
    window: u8,
) -> Result<bool> {
    if submitted.len() != DIGITS as usize
        || !submitted.bytes().all(|b| b.is_ascii_digit())
    {
        return Ok(false);
    }

    let current = (now_unix / TIME_STEP) as i64;

    for offset in -(window as i64)..=(window as i64) {
        let counter = current + offset;
        if counter < 0 {
            continue;
        }

        let expected = compute_code(secret, counter as u64)?;
        if constant_time_eq(expected.as_bytes(), submitted.as_bytes()) {
            return Ok(true);
        }
    }

    Ok(false)
}
