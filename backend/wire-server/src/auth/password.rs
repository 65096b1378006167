//! Password hashing
//!
//! PBKDF2-SHA256 with a per-user random salt. The iteration count is
//! stored with the verifier; verification always performs the stored
//! work and compares in constant time regardless of operand lengths.

use crate::models::PasswordVerifier;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

pub fn hash_password(password: &str) -> PasswordVerifier {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hash = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut hash);

    PasswordVerifier {
        salt: hex::encode(salt),
        hash: hex::encode(hash),
        iterations: PBKDF2_ITERATIONS,
    }
}

/// Recompute the candidate hash with the verifier's stored parameters and
/// compare without early exit. The derivation dominates the cost, so the
/// work done is fixed for any candidate password.
pub fn verify_password(password: &str, verifier: &PasswordVerifier) -> bool {
    let Ok(salt) = hex::decode(&verifier.salt) else {
        return false;
    };
    let Ok(expected) = hex::decode(&verifier.hash) else {
        return false;
    };

    let mut candidate = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        &salt,
        verifier.iterations.max(1),
        &mut candidate,
    );

    constant_time_eq(&candidate, &expected)
}

/// Comparison without early exit: walks the full span of both operands
/// (at least `HASH_LEN` positions), folding the length mismatch into the
/// accumulator instead of branching on it.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let span = a.len().max(b.len()).max(HASH_LEN);
    let mut diff = u8::from(a.len() != b.len());
    for i in 0..span {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}
