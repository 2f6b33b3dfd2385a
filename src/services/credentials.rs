use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;
use crate::crypto::vault::CredentialVault;
use crate::error::{AppError, Result};
use crate::generation::orchestrator::GenerationOrchestrator;
use crate::models::credential::EncryptedCredential;
use crate::models::generation::{CancelOutcome, GenerationRequest, GenerationResponse};
use crate::models::session::{short_id, Session};
use crate::sessions::broker::SessionBroker;
use crate::validation::prompt::{sanitize_prompt, validate_prompt};

/// Whether a stored credential exists and whether a password opens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifyOutcome {
    pub has_credential: bool,
    pub can_decrypt: bool,
}

/// A freshly unlocked session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockedSession {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Credential and session state of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub has_credential: bool,
    pub has_active_session: bool,
    pub requires_unlock: bool,
}

/// User-facing credential flows, composed over the vault, the session
/// broker and the generation orchestrator.
///
/// Persisting `EncryptedCredential` values is the caller's job; every flow
/// that needs one takes it as an argument.
#[derive(Clone)]
pub struct CredentialService {
    vault: CredentialVault,
    broker: SessionBroker,
    orchestrator: GenerationOrchestrator,
}

impl CredentialService {
    pub fn new(vault: CredentialVault, broker: SessionBroker, orchestrator: GenerationOrchestrator) -> Self {
        Self {
            vault,
            broker,
            orchestrator,
        }
    }

    /// Checks `credential` against the generation service and encrypts it
    /// under `password`.
    ///
    /// # Arguments
    ///
    /// * `owner_id` - The user the credential belongs to.
    /// * `credential` - The plaintext third-party API key.
    /// * `password` - The password that will unlock it.
    ///
    /// # Returns
    ///
    /// The `EncryptedCredential` to persist.
    pub async fn setup(&self, owner_id: &str, credential: &str, password: &str) -> Result<EncryptedCredential> {
        require_owner(owner_id)?;
        if credential.is_empty() || password.is_empty() {
            return Err(AppError::Validation(
                "credential and password are required".to_string(),
            ));
        }

        self.orchestrator.verify_credential(credential).await?;

        let vault = self.vault;
        let credential = Zeroizing::new(credential.to_string());
        let password = Zeroizing::new(password.to_string());
        let encrypted = derive(move || vault.encrypt(&credential, &password)).await?;

        tracing::info!("🔐 Credential configured for owner {}", owner_id);
        Ok(encrypted)
    }

    /// Reports whether `password` opens the stored credential.
    pub async fn verify(&self, stored: Option<&EncryptedCredential>, password: &str) -> Result<VerifyOutcome> {
        if password.is_empty() {
            return Err(AppError::Validation("password is required".to_string()));
        }

        let Some(stored) = stored else {
            return Ok(VerifyOutcome {
                has_credential: false,
                can_decrypt: false,
            });
        };

        let vault = self.vault;
        let stored = stored.clone();
        let password = Zeroizing::new(password.to_string());
        let can_decrypt = derive(move || Ok(vault.verify_password(&stored, &password))).await?;

        Ok(VerifyOutcome {
            has_credential: true,
            can_decrypt,
        })
    }

    /// Decrypts the stored credential into a new session.
    ///
    /// Any earlier session of the same owner is replaced atomically, so a
    /// user holds exactly one session after a successful unlock.
    pub async fn unlock(
        &self,
        owner_id: &str,
        stored: Option<&EncryptedCredential>,
        password: &str,
    ) -> Result<UnlockedSession> {
        require_owner(owner_id)?;
        if password.is_empty() {
            return Err(AppError::Validation("password is required".to_string()));
        }
        let stored = stored
            .cloned()
            .ok_or_else(|| AppError::Validation("credential not configured".to_string()))?;

        let vault = self.vault;
        let password = Zeroizing::new(password.to_string());
        let secret = derive(move || vault.decrypt(&stored, &password)).await?;

        let (session, replaced) = self.broker.replace_for_owner(owner_id, &secret).await?;

        tracing::info!(
            "🔓 Session {} unlocked for owner {} (replaced {})",
            session.short_id(),
            owner_id,
            replaced
        );

        Ok(UnlockedSession {
            session_id: session.id.clone(),
            expires_at: session.expires_at,
        })
    }

    /// Ends a session the caller owns.
    pub async fn lock(&self, owner_id: &str, session_id: &str) -> Result<()> {
        self.owned_session(owner_id, session_id).await?;
        self.broker.delete(session_id).await;

        tracing::info!("🔒 Session {} locked by owner {}", short_id(session_id), owner_id);
        Ok(())
    }

    /// Summarizes the owner's credential and session state.
    pub async fn status(&self, owner_id: &str, has_stored: bool) -> Result<CredentialStatus> {
        require_owner(owner_id)?;
        let has_active_session = self.broker.get_by_owner(owner_id).await.is_ok();

        Ok(CredentialStatus {
            has_credential: has_stored,
            has_active_session,
            requires_unlock: has_stored && !has_active_session,
        })
    }

    /// Re-encrypts the stored credential under a new password.
    ///
    /// Live sessions keep working; they hold the decrypted credential.
    pub async fn change_password(
        &self,
        stored: &EncryptedCredential,
        old_password: &str,
        new_password: &str,
    ) -> Result<EncryptedCredential> {
        if old_password.is_empty() || new_password.is_empty() {
            return Err(AppError::Validation(
                "current and new password are required".to_string(),
            ));
        }

        let vault = self.vault;
        let stored = stored.clone();
        let old_password = Zeroizing::new(old_password.to_string());
        let new_password = Zeroizing::new(new_password.to_string());
        let rotated = derive(move || {
            let secret = vault.decrypt(&stored, &old_password)?;
            vault.encrypt(&secret, &new_password)
        })
        .await?;

        tracing::info!("🔑 Credential password changed");
        Ok(rotated)
    }

    /// Runs a generation with the credential held by the caller's session.
    ///
    /// `deadline` bounds the wait for the result; `None` uses the configured default.
    pub async fn generate_for_session(
        &self,
        owner_id: &str,
        session_id: &str,
        mut request: GenerationRequest,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse> {
        validate_prompt(&request.prompt)?;
        request.prompt = sanitize_prompt(&request.prompt);

        let session = self.owned_session(owner_id, session_id).await?;
        let response = self
            .orchestrator
            .generate(session.secret.expose(), &request, deadline, cancel)
            .await
            .inspect_err(AppError::log)?;

        tracing::info!(
            model = %response.model,
            request_id = %response.request_id,
            artifacts = response.artifacts.len(),
            cost = response.cost,
            elapsed_ms = response.elapsed.as_millis() as u64,
            "✅ Generation completed"
        );
        Ok(response)
    }

    /// Cancels a job using the credential held by the caller's session.
    pub async fn cancel_for_session(
        &self,
        owner_id: &str,
        session_id: &str,
        model: &str,
        request_id: &str,
    ) -> Result<CancelOutcome> {
        let session = self.owned_session(owner_id, session_id).await?;
        self.orchestrator
            .cancel(session.secret.expose(), model, request_id)
            .await
    }

    async fn owned_session(&self, owner_id: &str, session_id: &str) -> Result<Session> {
        require_owner(owner_id)?;
        let session = self.broker.get(session_id).await?;
        if session.owner_id != owner_id {
            tracing::warn!(
                "⚠️ Owner {} tried to use session {} of another user",
                owner_id,
                short_id(session_id)
            );
            return Err(AppError::Forbidden);
        }
        Ok(session)
    }
}

fn require_owner(owner_id: &str) -> Result<()> {
    if owner_id.is_empty() {
        return Err(AppError::Validation("owner ID cannot be empty".to_string()));
    }
    Ok(())
}

/// Runs PBKDF2-bound work off the async executor.
async fn derive<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("key derivation task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use crate::generation::transport::HttpQueueTransport;

    async fn service(server: &MockServer) -> (CredentialService, SessionBroker) {
        let transport = HttpQueueTransport::with_base_url(&server.uri(), Duration::from_secs(5)).unwrap();
        let orchestrator = GenerationOrchestrator::with_transport(
            Arc::new(transport),
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        let broker = SessionBroker::new(Duration::from_secs(3600));
        let service = CredentialService::new(CredentialVault::new(1_000), broker.clone(), orchestrator);
        (service, broker)
    }

    async fn accept_probe(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/fal-ai/flux/requests/00000000-0000-0000-0000-000000000000/status"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn setup_then_unlock() {
        let server = MockServer::start().await;
        accept_probe(&server).await;
        let (service, broker) = service(&server).await;

        let stored = service.setup("user-1", "sk-live-abc123", "Tr0ub4dor&3").await.unwrap();
        let unlocked = service.unlock("user-1", Some(&stored), "Tr0ub4dor&3").await.unwrap();

        assert_eq!(broker.secret(&unlocked.session_id).await.unwrap().as_str(), "sk-live-abc123");
    }

    #[tokio::test]
    async fn setup_rejects_credential_refused_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let (service, _) = service(&server).await;

        let err = service.setup("user-1", "sk-bad", "pw").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn unlock_replaces_previous_session() {
        let server = MockServer::start().await;
        let (service, broker) = service(&server).await;
        let stored = CredentialVault::new(1_000).encrypt("sk-live-abc123", "pw").unwrap();

        let first = service.unlock("user-1", Some(&stored), "pw").await.unwrap();
        let second = service.unlock("user-1", Some(&stored), "pw").await.unwrap();

        assert!(matches!(broker.get(&first.session_id).await, Err(AppError::NotFound)));
        assert!(broker.get(&second.session_id).await.is_ok());
        assert_eq!(broker.count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_unlocks_leave_one_session() {
        let server = MockServer::start().await;
        let (service, broker) = service(&server).await;
        let stored = CredentialVault::new(1_000).encrypt("sk-live-abc123", "pw").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let stored = stored.clone();
            handles.push(tokio::spawn(async move {
                service.unlock("user-1", Some(&stored), "pw").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(broker.count().await, 1);
        assert!(service.status("user-1", true).await.unwrap().has_active_session);
    }

    #[tokio::test]
    async fn unlock_errors() {
        let server = MockServer::start().await;
        let (service, broker) = service(&server).await;
        let stored = CredentialVault::new(1_000).encrypt("sk-live-abc123", "pw").unwrap();

        let missing = service.unlock("user-1", None, "pw").await.unwrap_err();
        assert_eq!(missing.to_string(), "Validation error: credential not configured");

        let wrong = service.unlock("user-1", Some(&stored), "nope").await.unwrap_err();
        assert!(matches!(wrong, AppError::Authentication));
        assert_eq!(broker.count().await, 0);
    }

    #[tokio::test]
    async fn verify_reports_without_unlocking() {
        let server = MockServer::start().await;
        let (service, broker) = service(&server).await;
        let stored = CredentialVault::new(1_000).encrypt("sk-live-abc123", "pw").unwrap();

        let none = service.verify(None, "pw").await.unwrap();
        assert_eq!(none, VerifyOutcome { has_credential: false, can_decrypt: false });

        let ok = service.verify(Some(&stored), "pw").await.unwrap();
        assert_eq!(ok, VerifyOutcome { has_credential: true, can_decrypt: true });

        let bad = service.verify(Some(&stored), "wrong").await.unwrap();
        assert!(!bad.can_decrypt);
        assert_eq!(broker.count().await, 0);
    }

    #[tokio::test]
    async fn lock_checks_ownership() {
        let server = MockServer::start().await;
        let (service, broker) = service(&server).await;
        let stored = CredentialVault::new(1_000).encrypt("sk-live-abc123", "pw").unwrap();
        let unlocked = service.unlock("user-1", Some(&stored), "pw").await.unwrap();

        let err = service.lock("user-2", &unlocked.session_id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        assert!(broker.is_valid(&unlocked.session_id).await);

        service.lock("user-1", &unlocked.session_id).await.unwrap();
        assert!(!broker.is_valid(&unlocked.session_id).await);
        assert!(matches!(
            service.lock("user-1", &unlocked.session_id).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn status_tracks_unlock_state() {
        let server = MockServer::start().await;
        let (service, _) = service(&server).await;
        let stored = CredentialVault::new(1_000).encrypt("sk-live-abc123", "pw").unwrap();

        let before = service.status("user-1", true).await.unwrap();
        assert!(before.requires_unlock);
        assert!(!before.has_active_session);

        service.unlock("user-1", Some(&stored), "pw").await.unwrap();
        let after = service.status("user-1", true).await.unwrap();
        assert!(after.has_active_session);
        assert!(!after.requires_unlock);

        let unconfigured = service.status("user-2", false).await.unwrap();
        assert!(!unconfigured.has_credential && !unconfigured.requires_unlock);
    }

    #[tokio::test]
    async fn change_password_rotates_encryption() {
        let server = MockServer::start().await;
        let (service, _) = service(&server).await;
        let vault = CredentialVault::new(1_000);
        let stored = vault.encrypt("sk-live-abc123", "old-pw").unwrap();

        let rotated = service.change_password(&stored, "old-pw", "new-pw").await.unwrap();
        assert_ne!(rotated, stored);
        assert_eq!(vault.decrypt(&rotated, "new-pw").unwrap().as_str(), "sk-live-abc123");
        assert!(!vault.verify_password(&rotated, "old-pw"));

        assert!(matches!(
            service.change_password(&stored, "wrong", "new-pw").await,
            Err(AppError::Authentication)
        ));
    }

    #[tokio::test]
    async fn generate_uses_session_credential_and_sanitized_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/flux/schnell"))
            .and(header("authorization", "Key sk-live-abc123"))
            .and(wiremock::matchers::body_json(json!({"prompt": "a red fox"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "req-9"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/flux/requests/req-9/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "COMPLETED",
                "result": {"images": [{"url": "https://cdn.example/fox.png"}]}
            })))
            .mount(&server)
            .await;

        let (service, _) = service(&server).await;
        let stored = CredentialVault::new(1_000).encrypt("sk-live-abc123", "pw").unwrap();
        let unlocked = service.unlock("user-1", Some(&stored), "pw").await.unwrap();

        let request = GenerationRequest::new("flux/schnell", "  a   red\nfox ");
        let response = service
            .generate_for_session("user-1", &unlocked.session_id, request, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.artifacts.len(), 1);
        assert!((response.cost - 0.003).abs() < 1e-12);
    }

    #[tokio::test]
    async fn generate_honours_per_call_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "req-slow"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "IN_PROGRESS"})))
            .mount(&server)
            .await;

        let (service, broker) = service(&server).await;
        let stored = CredentialVault::new(1_000).encrypt("sk-live-abc123", "pw").unwrap();
        let unlocked = service.unlock("user-1", Some(&stored), "pw").await.unwrap();

        let request = GenerationRequest::new("flux/schnell", "a cat");
        let err = service
            .generate_for_session(
                "user-1",
                &unlocked.session_id,
                request,
                Some(Duration::from_millis(100)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout { ref request_id, .. } if request_id == "req-slow"));
        assert!(broker.is_valid(&unlocked.session_id).await);
    }

    #[tokio::test]
    async fn generate_rejects_foreign_session_before_submitting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (service, _) = service(&server).await;
        let stored = CredentialVault::new(1_000).encrypt("sk-live-abc123", "pw").unwrap();
        let unlocked = service.unlock("user-1", Some(&stored), "pw").await.unwrap();

        let request = GenerationRequest::new("flux/schnell", "a cat");
        let err = service
            .generate_for_session("user-2", &unlocked.session_id, request, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let empty = GenerationRequest::new("flux/schnell", " ");
        assert!(matches!(
            service
                .generate_for_session("user-1", &unlocked.session_id, empty, None, &CancellationToken::new())
                .await,
            Err(AppError::Validation(_))
        ));
    }
}
