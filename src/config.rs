use std::env;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};

/// Default PBKDF2 iteration count for production.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;
/// Default session lifetime (24 hours).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default interval between reaper sweeps (1 hour).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default deadline for a single generation (10 minutes).
pub const DEFAULT_GENERATION_DEADLINE: Duration = Duration::from_secs(10 * 60);
/// Default per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default queue endpoint of the generation service.
pub const DEFAULT_GENERATION_BASE_URL: &str = "https://queue.fal.run";

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// PBKDF2 iterations used when deriving credential keys.
    pub pbkdf2_iterations: u32,
    /// How long an unlocked session stays valid.
    pub session_ttl: Duration,
    /// How often the reaper sweeps expired sessions.
    pub sweep_interval: Duration,
    /// How often a pending generation is polled.
    pub poll_interval: Duration,
    /// How long to wait for a generation before giving up.
    pub generation_deadline: Duration,
    /// Base URL of the generation queue.
    pub generation_base_url: String,
    /// Timeout applied to each individual HTTP request.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            session_ttl: DEFAULT_SESSION_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            generation_deadline: DEFAULT_GENERATION_DEADLINE,
            generation_base_url: DEFAULT_GENERATION_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// Every variable is optional; missing ones fall back to the defaults
    /// above. Zero or unparsable values are rejected.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a `Config` from any variable source, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let pbkdf2_iterations = positive(&lookup, "PBKDF2_ITERATIONS", defaults.pbkdf2_iterations)?;
        let session_ttl = Duration::from_secs(positive(
            &lookup,
            "SESSION_TTL_SECS",
            defaults.session_ttl.as_secs(),
        )?);
        let sweep_interval = Duration::from_secs(positive(
            &lookup,
            "SESSION_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        )?);
        let poll_interval = Duration::from_millis(positive(
            &lookup,
            "GENERATION_POLL_INTERVAL_MS",
            defaults.poll_interval.as_millis() as u64,
        )?);
        let generation_deadline = Duration::from_secs(positive(
            &lookup,
            "GENERATION_DEADLINE_SECS",
            defaults.generation_deadline.as_secs(),
        )?);
        let request_timeout = Duration::from_secs(positive(
            &lookup,
            "GENERATION_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?);

        let generation_base_url = lookup("GENERATION_BASE_URL")
            .unwrap_or(defaults.generation_base_url)
            .trim_end_matches('/')
            .to_string();
        if !generation_base_url.starts_with("http://") && !generation_base_url.starts_with("https://") {
            anyhow::bail!("GENERATION_BASE_URL must be an http(s) URL");
        }

        Ok(Self {
            pbkdf2_iterations,
            session_ttl,
            sweep_interval,
            poll_interval,
            generation_deadline,
            generation_base_url,
            request_timeout,
        })
    }
}

/// Reads a strictly positive number from `lookup`, or returns `default`.
fn positive<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default + Copy,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let value = match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid {}", name))?,
        None => return Ok(default),
    };

    if value <= T::default() {
        anyhow::bail!("{} must be greater than zero", name);
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.pbkdf2_iterations, 100_000);
        assert_eq!(config.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.sweep_interval, Duration::from_secs(3_600));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.generation_deadline, Duration::from_secs(600));
    }

    fn lookup(vars: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name| vars.get(name).map(|v| v.to_string())
    }

    #[test]
    fn from_lookup_reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PBKDF2_ITERATIONS", "1000"),
            ("SESSION_TTL_SECS", "60"),
            ("GENERATION_POLL_INTERVAL_MS", " 250 "),
            ("GENERATION_BASE_URL", "http://localhost:9999/"),
        ]))
        .unwrap();

        assert_eq!(config.pbkdf2_iterations, 1000);
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.generation_base_url, "http://localhost:9999");
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);
    }

    #[test]
    fn from_lookup_without_variables_uses_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.pbkdf2_iterations, DEFAULT_PBKDF2_ITERATIONS);
        assert_eq!(config.generation_base_url, DEFAULT_GENERATION_BASE_URL);
    }

    #[test]
    fn from_lookup_rejects_zero_and_garbage() {
        assert!(Config::from_lookup(lookup(&[("SESSION_TTL_SECS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("SESSION_TTL_SECS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("PBKDF2_ITERATIONS", "-5")])).is_err());
        assert!(Config::from_lookup(lookup(&[("GENERATION_BASE_URL", "ftp://queue")])).is_err());
    }
}
