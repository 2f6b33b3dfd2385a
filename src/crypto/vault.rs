use base64::{Engine as _, engine::general_purpose::STANDARD};
use zeroize::Zeroizing;
use crate::config::DEFAULT_PBKDF2_ITERATIONS;
use crate::crypto::{aes, kdf};
use crate::error::{AppError, Result};
use crate::models::credential::EncryptedCredential;

/// Password-based encryption of third-party credentials.
///
/// The vault is stateless apart from its iteration count and can be shared
/// freely between threads.
#[derive(Debug, Clone, Copy)]
pub struct CredentialVault {
    iterations: u32,
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::new(DEFAULT_PBKDF2_ITERATIONS)
    }
}

impl CredentialVault {
    /// Creates a vault using `iterations` PBKDF2 rounds; zero falls back to
    /// the production default.
    pub fn new(iterations: u32) -> Self {
        let iterations = if iterations == 0 {
            DEFAULT_PBKDF2_ITERATIONS
        } else {
            iterations
        };
        Self { iterations }
    }

    /// The PBKDF2 iteration count in use.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Encrypts `plaintext` under a key derived from `password` and a fresh salt.
    pub fn encrypt(&self, plaintext: &str, password: &str) -> Result<EncryptedCredential> {
        if plaintext.is_empty() {
            return Err(AppError::Validation("plaintext cannot be empty".to_string()));
        }
        if password.is_empty() {
            return Err(AppError::Validation("password cannot be empty".to_string()));
        }

        let salt = kdf::generate_salt();
        let key = kdf::derive_key(password, &salt, self.iterations)?;
        let sealed = aes::seal(&key, plaintext.as_bytes())?;

        Ok(EncryptedCredential {
            ciphertext: STANDARD.encode(sealed),
            salt: STANDARD.encode(salt),
        })
    }

    /// Decrypts a credential previously produced by [`CredentialVault::encrypt`].
    ///
    /// Malformed input yields `Format`; a wrong password or tampered data
    /// yields `Authentication`, and only the AEAD tag check decides that.
    pub fn decrypt(
        &self,
        credential: &EncryptedCredential,
        password: &str,
    ) -> Result<Zeroizing<String>> {
        if credential.ciphertext.is_empty() {
            return Err(AppError::Validation("encrypted data cannot be empty".to_string()));
        }
        if credential.salt.is_empty() {
            return Err(AppError::Validation("salt cannot be empty".to_string()));
        }
        if password.is_empty() {
            return Err(AppError::Validation("password cannot be empty".to_string()));
        }

        let sealed = STANDARD
            .decode(&credential.ciphertext)
            .map_err(|_| AppError::Format("encrypted data is not valid base64".to_string()))?;
        let salt = STANDARD
            .decode(&credential.salt)
            .map_err(|_| AppError::Format("salt is not valid base64".to_string()))?;

        let key = kdf::derive_key(password, &salt, self.iterations)?;
        let plaintext = Zeroizing::new(aes::open(&key, &sealed)?);

        // A successful tag check over bytes we sealed from a &str guarantees UTF-8;
        // anything else means the record was not produced by this vault.
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| AppError::Format("decrypted credential is not UTF-8".to_string()))?;

        Ok(Zeroizing::new(text.to_string()))
    }

    /// Reports whether `password` opens `credential`, without handing out the plaintext.
    pub fn verify_password(&self, credential: &EncryptedCredential, password: &str) -> bool {
        self.decrypt(credential, password).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aes::{NONCE_SIZE, TAG_SIZE};
    use crate::crypto::kdf::SALT_SIZE;

    fn vault() -> CredentialVault {
        CredentialVault::new(1_000)
    }

    #[test]
    fn round_trip_example_credential() {
        let encrypted = vault().encrypt("sk-live-abc123", "Tr0ub4dor&3").unwrap();
        let decrypted = vault().decrypt(&encrypted, "Tr0ub4dor&3").unwrap();
        assert_eq!(decrypted.as_str(), "sk-live-abc123");
    }

    #[test]
    fn wrong_password_is_authentication_error() {
        let encrypted = vault().encrypt("sk-live-abc123", "Tr0ub4dor&3").unwrap();
        assert!(matches!(
            vault().decrypt(&encrypted, "wrongpass"),
            Err(AppError::Authentication)
        ));
    }

    #[test]
    fn repeated_encryption_is_fresh() {
        let a = vault().encrypt("sk-live-abc123", "pw").unwrap();
        let b = vault().encrypt("sk-live-abc123", "pw").unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.salt, b.salt);
    }

    #[test]
    fn output_sizes() {
        let encrypted = vault().encrypt("abc", "pw").unwrap();
        let salt = STANDARD.decode(&encrypted.salt).unwrap();
        let sealed = STANDARD.decode(&encrypted.ciphertext).unwrap();
        assert_eq!(salt.len(), SALT_SIZE);
        assert_eq!(sealed.len(), NONCE_SIZE + 3 + TAG_SIZE);
    }

    #[test]
    fn empty_inputs_rejected() {
        assert!(matches!(vault().encrypt("", "pw"), Err(AppError::Validation(_))));
        assert!(matches!(vault().encrypt("secret", ""), Err(AppError::Validation(_))));

        let encrypted = vault().encrypt("secret", "pw").unwrap();
        assert!(matches!(vault().decrypt(&encrypted, ""), Err(AppError::Validation(_))));
    }

    #[test]
    fn malformed_input_is_format_error() {
        let encrypted = vault().encrypt("secret", "pw").unwrap();

        let bad_base64 = EncryptedCredential {
            ciphertext: "!!!not base64!!!".to_string(),
            salt: encrypted.salt.clone(),
        };
        assert!(matches!(vault().decrypt(&bad_base64, "pw"), Err(AppError::Format(_))));

        let too_short = EncryptedCredential {
            ciphertext: STANDARD.encode([0u8; NONCE_SIZE + TAG_SIZE - 1]),
            salt: encrypted.salt,
        };
        assert!(matches!(vault().decrypt(&too_short, "pw"), Err(AppError::Format(_))));
    }

    #[test]
    fn tampered_ciphertext_is_authentication_error() {
        let encrypted = vault().encrypt("secret", "pw").unwrap();
        let mut sealed = STANDARD.decode(&encrypted.ciphertext).unwrap();
        sealed[NONCE_SIZE] ^= 0xFF;
        let tampered = EncryptedCredential {
            ciphertext: STANDARD.encode(sealed),
            salt: encrypted.salt,
        };
        assert!(matches!(vault().decrypt(&tampered, "pw"), Err(AppError::Authentication)));
    }

    #[test]
    fn swapped_salt_is_authentication_error() {
        let a = vault().encrypt("secret", "pw").unwrap();
        let b = vault().encrypt("secret", "pw").unwrap();
        let mixed = EncryptedCredential {
            ciphertext: a.ciphertext,
            salt: b.salt,
        };
        assert!(matches!(vault().decrypt(&mixed, "pw"), Err(AppError::Authentication)));
    }

    #[test]
    fn verify_password_reports_without_plaintext() {
        let encrypted = vault().encrypt("secret", "pw").unwrap();
        assert!(vault().verify_password(&encrypted, "pw"));
        assert!(!vault().verify_password(&encrypted, "other"));
    }

    #[test]
    fn different_iteration_counts_do_not_interoperate() {
        let encrypted = CredentialVault::new(1_000).encrypt("secret", "pw").unwrap();
        assert!(!CredentialVault::new(2_000).verify_password(&encrypted, "pw"));
    }

    #[test]
    fn zero_iterations_fall_back_to_default() {
        assert_eq!(CredentialVault::new(0).iterations(), DEFAULT_PBKDF2_ITERATIONS);
    }
}
