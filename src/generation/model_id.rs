use std::fmt;
use crate::error::{AppError, Result};

/// Vendor namespace the queue service expects in front of every model path.
pub const VENDOR_PREFIX: &str = "fal-ai";

/// The two URL forms of one model, computed once.
///
/// The queue takes the full path for submission (`fal-ai/flux/schnell`) and
/// only the first two segments for status, result and cancel
/// (`fal-ai/flux`). Transport calls accept a `ModelRoute`, never a raw
/// string, so the prefix cannot be applied twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelRoute {
    model: String,
    submit: String,
    status: String,
}

impl ModelRoute {
    /// Normalizes a model identifier, prefixed or not.
    ///
    /// `flux/schnell`, `fal-ai/flux/schnell` and `/fal-ai/flux/schnell/` all
    /// resolve to the same route.
    pub fn resolve(model: &str) -> Result<Self> {
        let mut bare = model.trim().trim_matches('/');
        while let Some(rest) = bare.strip_prefix(VENDOR_PREFIX) {
            match rest.strip_prefix('/') {
                Some(rest) => bare = rest.trim_start_matches('/'),
                None if rest.is_empty() => bare = rest,
                None => break,
            }
        }

        if bare.is_empty() {
            return Err(AppError::Validation("model cannot be empty".to_string()));
        }
        if bare.split('/').any(|segment| segment.trim().is_empty()) {
            return Err(AppError::Validation(format!("invalid model identifier: {}", model)));
        }

        let family = bare.split('/').next().unwrap_or(bare);

        Ok(Self {
            model: bare.to_string(),
            submit: format!("{}/{}", VENDOR_PREFIX, bare),
            status: format!("{}/{}", VENDOR_PREFIX, family),
        })
    }

    /// The registry name, without vendor prefix.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Path used to submit a job.
    pub fn submit_path(&self) -> &str {
        &self.submit
    }

    /// Path prefix used for status, result and cancel of a job.
    pub fn status_path(&self) -> &str {
        &self.status
    }
}

impl fmt::Display for ModelRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.submit)
    }
}
