use serde::{Deserialize, Serialize};
use crate::error::{AppError, Result};

/// Separator between ciphertext and salt in the stored single-field form.
const STORED_SEPARATOR: char = '.';

/// A third-party API credential encrypted under a user's password.
///
/// Both fields are standard base64. `ciphertext` is `nonce || ciphertext || tag`.
/// The plaintext is never part of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredential {
    /// The sealed credential, base64-encoded.
    pub ciphertext: String,
    /// The PBKDF2 salt, base64-encoded. Fresh for every encryption.
    pub salt: String,
}

impl EncryptedCredential {
    /// Renders the credential as `"<ciphertext>.<salt>"` for a single text column.
    pub fn to_stored(&self) -> String {
        format!("{}{}{}", self.ciphertext, STORED_SEPARATOR, self.salt)
    }

    /// Parses the `"<ciphertext>.<salt>"` stored form.
    pub fn from_stored(stored: &str) -> Result<Self> {
        let mut parts = stored.split(STORED_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ciphertext), Some(salt), None) if !ciphertext.is_empty() && !salt.is_empty() => {
                Ok(Self {
                    ciphertext: ciphertext.to_string(),
                    salt: salt.to_string(),
                })
            }
            _ => Err(AppError::Format("invalid stored credential format".to_string())),
        }
    }
}
