use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};
use crate::error::{AppError, Result};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// The size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Creates a new `SecureKey` from a byte array.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Returns a reference to the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecureKey(<redacted>)")
    }
}

/// Generates a new random AES-GCM nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts a plaintext using AES-256-GCM.
///
/// A fresh nonce is generated for every call and prepended to the output,
/// so the result is laid out as `nonce || ciphertext || tag`.
pub fn seal(key: &SecureKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| AppError::Internal("AES-GCM encryption failed".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypts a `nonce || ciphertext || tag` buffer produced by [`seal`].
///
/// The tag check is the only gate: any failure to open, whether from a wrong
/// key or tampered bytes, is reported as [`AppError::Authentication`].
pub fn open(key: &SecureKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(AppError::Format(format!(
            "ciphertext too short: expected at least {} bytes, got {}",
            NONCE_SIZE + TAG_SIZE,
            sealed.len()
        )));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| AppError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SecureKey {
        SecureKey::new([byte; KEY_SIZE])
    }

    #[test]
    fn seal_prepends_nonce_and_appends_tag() {
        let sealed = seal(&key(7), b"sk-live-abc123").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + "sk-live-abc123".len() + TAG_SIZE);
    }

    #[test]
    fn open_reverses_seal() {
        let sealed = seal(&key(7), b"payload").unwrap();
        assert_eq!(open(&key(7), &sealed).unwrap(), b"payload");
    }

    #[test]
    fn open_with_wrong_key_is_authentication_error() {
        let sealed = seal(&key(7), b"payload").unwrap();
        assert!(matches!(open(&key(8), &sealed), Err(AppError::Authentication)));
    }

    #[test]
    fn flipped_tag_bit_is_authentication_error() {
        let mut sealed = seal(&key(7), b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(open(&key(7), &sealed), Err(AppError::Authentication)));
    }

    #[test]
    fn truncated_input_is_format_error() {
        assert!(matches!(
            open(&key(7), &[0u8; NONCE_SIZE + TAG_SIZE - 1]),
            Err(AppError::Format(_))
        ));
    }

    #[test]
    fn same_plaintext_seals_differently() {
        let a = seal(&key(7), b"payload").unwrap();
        let b = seal(&key(7), b"payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn debug_redacts_key_material() {
        assert_eq!(format!("{:?}", key(1)), "SecureKey(<redacted>)");
    }
}
