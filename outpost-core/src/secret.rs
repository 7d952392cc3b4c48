//! Access-point secret generation.
//!
//! Secrets are drawn from a fixed alphabet chosen for unambiguous manual
//! entry: no `O` (confusable with zero), no `I`/`l`/`i` lookalikes, no `0`
//! or `1`. A hardware random source supplies the entropy through the
//! [`rand_core::RngCore`] seam so hosts can substitute a deterministic
//! generator in tests.

use rand_core::RngCore;

use crate::{Error, Result};

/// Characters eligible for generated secrets.
///
/// There is no "O" (Oh) to reduce confusion, and likewise no `I`, `l`, `i`,
/// `0` or `1`.
pub const SECRET_ALPHABET: &[u8] =
    b"abcdefghjkmnopqrstuvwxyzABCDEFGHJKMNPQRSTUVWXYZ23456789.-,:$/";

/// Shortest secret accepted anywhere: generated, stored or supplied.
pub const MIN_SECRET_LEN: usize = 8;

/// Length requested for self-generated access point secrets.
pub const DEFAULT_AP_SECRET_LEN: usize = 8;

/// Capacity of a secret string, bounded by the WPA2 passphrase limit.
pub const MAX_SECRET_LEN: usize = 64;

/// Generate a random secret of `requested_len` characters.
///
/// The effective length is clamped to `MIN_SECRET_LEN..=MAX_SECRET_LEN`.
/// Each character is drawn independently from [`SECRET_ALPHABET`].
#[expect(
    clippy::arithmetic_side_effects,
    clippy::integer_division_remainder_used,
    clippy::indexing_slicing,
    reason = "the modulus keeps the index inside the fixed alphabet"
)]
pub fn generate<R: RngCore>(rng: &mut R, requested_len: usize) -> heapless::String<64> {
    let len = requested_len.clamp(MIN_SECRET_LEN, MAX_SECRET_LEN);
    let mut secret = heapless::String::new();
    for _ in 0..len {
        let index = rng.next_u32() as usize % SECRET_ALPHABET.len();
        // alphabet is ASCII and the loop stays within capacity
        let _ = secret.push(char::from(SECRET_ALPHABET[index]));
    }
    secret
}

/// Validate a caller-supplied fixed secret.
///
/// Anything shorter than [`MIN_SECRET_LEN`] is rejected; callers fall back
/// to [`generate`] and surface the error as a warning.
pub fn accept_supplied(candidate: &str) -> Result<&str> {
    if candidate.len() < MIN_SECRET_LEN {
        return Err(Error::SecretTooShort {
            len: candidate.len(),
            min: MIN_SECRET_LEN,
        });
    }
    Ok(candidate)
}
