use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use zeroize::Zeroizing;
use crate::crypto::token;
use crate::error::{AppError, Result};
use crate::models::session::{short_id, Session, SessionSecret};
use crate::sessions::clock::{Clock, SystemClock};

/// Point-in-time counts of the session table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
}

/// In-memory store of unlocked sessions.
///
/// The table sits behind a single `RwLock`: lookups share the read side,
/// every mutation takes the write side. Cloning the broker shares the table.
#[derive(Clone)]
pub struct SessionBroker {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl SessionBroker {
    /// Creates a broker whose sessions live for `ttl`, reading the wall clock.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Creates a broker with an injected clock.
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            clock,
        }
    }

    /// The configured session lifetime.
    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Stores a new session for `owner_id` holding `secret`.
    ///
    /// Existing sessions of the same owner are left alone; callers that want
    /// one session per user use [`SessionBroker::replace_for_owner`].
    pub async fn create(&self, owner_id: &str, secret: &str) -> Result<String> {
        let session = self.new_session(owner_id, secret)?;
        let id = session.id.clone();
        self.sessions.write().await.insert(id.clone(), session);

        tracing::debug!("🔑 Session {} created for owner {}", short_id(&id), owner_id);
        Ok(id)
    }

    /// Swaps every session of `owner_id` for a single new one holding `secret`.
    ///
    /// Removal and insertion happen under one write guard, so concurrent
    /// callers for the same owner always leave exactly one session behind.
    /// Returns the new session and how many sessions it replaced.
    pub async fn replace_for_owner(&self, owner_id: &str, secret: &str) -> Result<(Session, usize)> {
        let session = self.new_session(owner_id, secret)?;

        let mut sessions = self.sessions.write().await;
        let replaced = remove_owned(&mut sessions, owner_id);
        sessions.insert(session.id.clone(), session.clone());
        drop(sessions);

        tracing::debug!(
            "🔑 Session {} created for owner {} (replaced {})",
            short_id(&session.id),
            owner_id,
            replaced
        );
        Ok((session, replaced))
    }

    /// Looks up a live session.
    ///
    /// An expired entry is removed on the spot and reported as `Expired`.
    pub async fn get(&self, session_id: &str) -> Result<Session> {
        if session_id.is_empty() {
            return Err(AppError::Validation("session ID cannot be empty".to_string()));
        }

        let now = self.clock.now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(session_id) {
                None => return Err(AppError::NotFound),
                Some(session) if !session.is_expired_at(now) => return Ok(session.clone()),
                Some(_) => {}
            }
        }

        self.remove_expired(session_id, now).await;
        Err(AppError::Expired)
    }

    /// Returns the first live session belonging to `owner_id`.
    ///
    /// When an owner holds several sessions, which one is returned is unspecified.
    pub async fn get_by_owner(&self, owner_id: &str) -> Result<Session> {
        if owner_id.is_empty() {
            return Err(AppError::Validation("owner ID cannot be empty".to_string()));
        }

        let now = self.clock.now();
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|s| s.owner_id == owner_id && !s.is_expired_at(now))
            .cloned()
            .ok_or(AppError::NotFound)
    }

    /// Removes a session, wiping its secret. Returns whether anything was removed.
    pub async fn delete(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.remove(session_id) {
            Some(mut session) => {
                session.clear();
                tracing::debug!("🗑️ Session {} deleted", short_id(session_id));
                true
            }
            None => false,
        }
    }

    /// Removes every session of `owner_id`, wiping secrets. Returns how many went.
    pub async fn delete_by_owner(&self, owner_id: &str) -> usize {
        let removed = remove_owned(&mut *self.sessions.write().await, owner_id);

        if removed > 0 {
            tracing::debug!("🗑️ Removed {} session(s) for owner {}", removed, owner_id);
        }
        removed
    }

    /// Pushes a live session's expiry to `now + ttl` and returns the new expiry.
    pub async fn renew(&self, session_id: &str) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;

        let session = sessions.get_mut(session_id).ok_or(AppError::NotFound)?;
        if session.is_expired_at(now) {
            if let Some(mut expired) = sessions.remove(session_id) {
                expired.clear();
            }
            return Err(AppError::Expired);
        }

        session.expires_at = now + self.ttl;
        Ok(session.expires_at)
    }

    /// Removes every expired session, wiping secrets first. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            if session.is_expired_at(now) {
                session.clear();
                false
            } else {
                true
            }
        });
        before - sessions.len()
    }

    /// Counts sessions, splitting live from expired-but-not-yet-swept.
    pub async fn stats(&self) -> SessionStats {
        let now = self.clock.now();
        let sessions = self.sessions.read().await;
        let expired = sessions.values().filter(|s| s.is_expired_at(now)).count();

        SessionStats {
            total: sessions.len(),
            active: sessions.len() - expired,
            expired,
        }
    }

    /// Wipes and removes every session. Returns how many went.
    pub async fn clear(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.len();
        for session in sessions.values_mut() {
            session.clear();
        }
        sessions.clear();
        removed
    }

    /// Number of stored sessions, expired ones included.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether `session_id` names a live session.
    pub async fn is_valid(&self, session_id: &str) -> bool {
        self.get(session_id).await.is_ok()
    }

    /// Copies out the decrypted credential of a live session.
    pub async fn secret(&self, session_id: &str) -> Result<Zeroizing<String>> {
        let session = self.get(session_id).await?;
        if session.secret.is_empty() {
            return Err(AppError::NotFound);
        }
        Ok(Zeroizing::new(session.secret.expose().to_string()))
    }

    fn new_session(&self, owner_id: &str, secret: &str) -> Result<Session> {
        if owner_id.is_empty() {
            return Err(AppError::Validation("owner ID cannot be empty".to_string()));
        }
        if secret.is_empty() {
            return Err(AppError::Validation("secret cannot be empty".to_string()));
        }

        let now = self.clock.now();
        Ok(Session {
            id: token::generate_session_id(),
            owner_id: owner_id.to_string(),
            secret: SessionSecret::new(secret),
            created_at: now,
            expires_at: now + self.ttl,
        })
    }

    async fn remove_expired(&self, session_id: &str, now: DateTime<Utc>) {
        let mut sessions = self.sessions.write().await;
        let expired = sessions
            .get(session_id)
            .is_some_and(|session| session.is_expired_at(now));

        if expired {
            if let Some(mut session) = sessions.remove(session_id) {
                session.clear();
                tracing::debug!("⌛ Session {} expired and removed", short_id(session_id));
            }
        }
    }
}

/// Drops every session of `owner_id` from the table, wiping secrets.
fn remove_owned(sessions: &mut HashMap<String, Session>, owner_id: &str) -> usize {
    let before = sessions.len();
    sessions.retain(|_, session| {
        if session.owner_id == owner_id {
            session.clear();
            false
        } else {
            true
        }
    });
    before - sessions.len()
}
