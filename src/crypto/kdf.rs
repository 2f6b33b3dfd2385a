use std::num::NonZeroU32;
use rand::{rngs::OsRng, RngCore};
use ring::pbkdf2;
use crate::crypto::aes::{SecureKey, KEY_SIZE};
use crate::error::{AppError, Result};

/// Salt length in bytes for PBKDF2.
pub const SALT_SIZE: usize = 32;

/// Derives an AES-256 key from a password and salt using PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Result<SecureKey> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| AppError::Validation("PBKDF2 iteration count must be non-zero".to_string()))?;

    let mut key = [0u8; KEY_SIZE];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut key,
    );

    Ok(SecureKey::new(key))
}

/// Generates a fresh random salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}
