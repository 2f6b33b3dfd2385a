use std::sync::Arc;
use crate::config::Config;
use crate::crypto::vault::CredentialVault;
use crate::error::Result;
use crate::generation::orchestrator::GenerationOrchestrator;
use crate::services::credentials::CredentialService;
use crate::sessions::broker::SessionBroker;
use crate::sessions::reaper::SessionReaper;

/// The application's state.
///
/// Cloning is cheap; every clone shares the same session table and reaper.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// Password-based credential encryption.
    pub vault: CredentialVault,
    /// In-memory store of unlocked sessions.
    pub broker: SessionBroker,
    /// Background sweeper of expired sessions.
    pub reaper: Arc<SessionReaper>,
    /// Client of the generation queue.
    pub orchestrator: GenerationOrchestrator,
    /// Credential flows over the components above.
    pub credentials: CredentialService,
}

impl AppState {
    /// Creates a new `AppState`. The reaper is built but not started.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub fn new(config: &Config) -> Result<Self> {
        let vault = CredentialVault::new(config.pbkdf2_iterations);
        tracing::info!("✅ Credential vault initialized ({} PBKDF2 iterations)", vault.iterations());

        let broker = SessionBroker::new(config.session_ttl);
        tracing::info!("✅ Session broker initialized (TTL: {:?})", config.session_ttl);

        let reaper = Arc::new(SessionReaper::new(broker.clone(), config.sweep_interval));

        let orchestrator = GenerationOrchestrator::new(config)?;
        tracing::info!("✅ Generation client initialized ({})", config.generation_base_url);

        let credentials = CredentialService::new(vault, broker.clone(), orchestrator.clone());

        Ok(AppState {
            config: config.clone(),
            vault,
            broker,
            reaper,
            orchestrator,
            credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_the_session_table() {
        let state = AppState::new(&Config::default()).unwrap();
        let other = state.clone();

        let id = state.broker.create("user-1", "secret").await.unwrap();
        assert!(other.broker.is_valid(&id).await);
        assert!(!other.reaper.is_running());
    }
}
