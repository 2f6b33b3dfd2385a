//! Zero-knowledge storage of third-party API credentials, short-lived
//! unlocked sessions, and metered image generation against a queue API.

pub mod config;
pub mod error;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod kdf;
    pub mod token;
    pub mod vault;
}

pub mod models {
    pub mod credential;
    pub mod generation;
    pub mod session;
}

pub mod sessions {
    pub mod broker;
    pub mod clock;
    pub mod reaper;
}

pub mod generation {
    pub mod model_id;
    pub mod orchestrator;
    pub mod registry;
    pub mod transport;
}

pub mod services {
    pub mod credentials;
}

pub mod validation {
    pub mod prompt;
}

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
