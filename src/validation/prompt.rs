use crate::error::{AppError, Result};

/// Maximum prompt length, in characters.
pub const MAX_PROMPT_CHARS: usize = 1000;

/// Fragments stripped from prompts before they leave the service.
const STRIPPED_FRAGMENTS: &[&str] = &["<script", "</script>", "javascript:", "data:"];

/// Validates a generation prompt.
///
/// # Arguments
///
/// * `prompt` - The prompt to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the prompt is acceptable.
pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(AppError::Validation("prompt cannot be empty".to_string()));
    }

    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(AppError::Validation(format!(
            "prompt cannot exceed {} characters",
            MAX_PROMPT_CHARS
        )));
    }

    Ok(())
}

/// Normalizes a prompt: collapses whitespace runs to single spaces and
/// removes script-injection fragments.
pub fn sanitize_prompt(prompt: &str) -> String {
    let mut cleaned = prompt.split_whitespace().collect::<Vec<_>>().join(" ");

    for fragment in STRIPPED_FRAGMENTS {
        cleaned = cleaned.replace(fragment, "");
    }

    cleaned
}
