//! Backup-code generation and verification.
//!
//! Codes are human-typed recovery tokens formatted as `XXXX-XXXX-XXXX-XXXX`
//! over a 32-symbol alphabet that excludes visually ambiguous characters.
//! Only one-way SHA-256 digests are ever stored; the plaintext batch is
//! shown to the user exactly once.

use constant_time_eq::constant_time_eq;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// 32 symbols, no `0`, `1`, `O` or `I`.
const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Groups per code and characters per group.
const GROUPS: usize = 4;
const GROUP_LENGTH: usize = 4;

/// Generate a batch of plaintext backup codes.
///
/// The caller owns display-once semantics and must hash each code with
/// [`hash_backup_code`] before storage.
pub fn generate_backup_codes(count: usize) -> Vec<String> {
    (0..count).map(|_| generate_code()).collect()
}

fn generate_code() -> String {
    let mut bytes = [0u8; GROUPS * GROUP_LENGTH];
    OsRng.fill_bytes(&mut bytes);

    bytes
        .chunks(GROUP_LENGTH)
        .map(|group| {
            group
                .iter()
                .map(|byte| ALPHABET[(byte % 32) as usize] as char)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Strip hyphens and whitespace, fold to uppercase.
fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Hex-encoded SHA-256 digest of a normalized backup code.
pub fn hash_backup_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(code).as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a submitted code against a stored digest in constant time.
pub fn verify_backup_code(submitted: &str, stored_hash: &str) -> bool {
    constant_time_eq(
        hash_backup_code(submitted).as_bytes(),
        stored_hash.as_bytes(),
    )
}
