//! Uniform-random 16-character alphanumeric identifier generation.
//!
//! Draws cryptographic random bytes via `OsRng` and rejects any byte whose
//! value would introduce modulo bias, redrawing until accepted. This is the
//! standard rejection-sampling shape: with a 62-character alphabet, bytes
//! `>= 248` (`62 * floor(256/62)`) are rejected so every accepted byte maps
//! uniformly onto `[0, 62)`.

use rand::RngCore;
use rand::rngs::OsRng;

pub const ID_LENGTH: usize = 16;
const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const REJECTION_CEILING: u8 = ((256 / ALPHABET.len()) * ALPHABET.len()) as u8;

/// Generates a 16-character id over `[A-Za-z0-9]` with exactly uniform
/// per-character distribution.
pub fn generate_id() -> String {
    generate_id_with_rng(&mut OsRng)
}

/// Same as [`generate_id`] but takes an explicit RNG, so tests can exercise
/// the rejection loop with a scripted source of bytes.
pub fn generate_id_with_rng(rng: &mut impl RngCore) -> String {
    let mut out = String::with_capacity(ID_LENGTH);
    let mut byte = [0u8; 1];
    while out.len() < ID_LENGTH {
        rng.fill_bytes(&mut byte);
        if byte[0] >= REJECTION_CEILING {
            continue;
        }
        out.push(ALPHABET[(byte[0] % ALPHABET.len() as u8) as usize] as char);
    }
    out
}

/// Validates the 8-64 alphanumeric id-format rule the API surface (C9)
/// applies to path-supplied ids (distinct from the fixed 16-char length
/// this generator itself always produces).
pub fn is_valid_id_format(id: &str) -> bool {
    let len = id.len();
    (8..=64).contains(&len) && id.bytes().all(|b| b.is_ascii_alphanumeric())
}
