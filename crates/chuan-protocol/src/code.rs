//! Room code generation and normalization
//!
//! Codes are 6 characters drawn from a 32-symbol alphabet that leaves
//! out `0`, `1`, `I` and `O` so a code read off one screen can be
//! typed on another without ambiguity. Input is case-insensitive;
//! codes are always emitted upper-case.

use rand::Rng;

use crate::error::CodeError;

/// The 32 admissible code characters.
pub const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Fixed code length.
pub const CODE_LEN: usize = 6;

/// Generate a uniformly random room code.
///
/// Uniqueness is the registry's job (rejection against live codes);
/// this function only guarantees alphabet and length.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Normalize client input to canonical (upper-case) form.
///
/// Rejects anything that is not exactly [`CODE_LEN`] characters from
/// the alphabet after upper-casing.
pub fn normalize(input: &str) -> Result<String, CodeError> {
    let trimmed = input.trim();
    if trimmed.len() != CODE_LEN {
        return Err(CodeError::BadLength(trimmed.len()));
    }
    let upper = trimmed.to_ascii_uppercase();
    if let Some(ch) = upper.bytes().find(|b| !ALPHABET.contains(b)) {
        return Err(CodeError::BadCharacter(ch as char));
    }
    Ok(upper)
}
