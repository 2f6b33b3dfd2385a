use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A decrypted credential held in memory for the lifetime of a session.
///
/// The buffer is wiped on drop and on [`SessionSecret::clear`]; `Debug`
/// never prints it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret(String);

impl SessionSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrows the plaintext credential.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrites the credential with zeros and truncates it.
    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecret(<redacted>)")
    }
}

/// Represents an unlocked session.
///
/// ⚠️ IMPORTANT: `secret` is the DECRYPTED third-party credential.
/// It is skipped during serialization and must never be logged.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// The opaque session id.
    pub id: String,
    /// The ID of the user this session belongs to.
    pub owner_id: String,
    /// ⚠️ Decrypted credential, memory only.
    #[serde(skip)]
    pub secret: SessionSecret,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is past its expiry at `now`.
    ///
    /// The expiry instant itself counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Wipes the secret in place.
    pub fn clear(&mut self) {
        self.secret.clear();
    }

    /// A short, log-safe prefix of the session id.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Returns the first few characters of a session id for log lines.
pub fn short_id(id: &str) -> &str {
    let end = id.char_indices().nth(8).map(|(i, _)| i).unwrap_or(id.len());
    &id[..end]
}
