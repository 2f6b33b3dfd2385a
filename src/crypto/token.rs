use rand::RngCore;
use rand::rngs::OsRng;
use base64::{Engine as _, engine::general_purpose};

/// The size of a session id in bytes (256 bits of entropy).
const SESSION_ID_SIZE: usize = 32;

/// Generates a new random session id.
///
/// # Returns
///
/// A URL-safe base64-encoded id without padding.
pub fn generate_session_id() -> String {
    let mut token = [0u8; SESSION_ID_SIZE];
    OsRng.fill_bytes(&mut token);

    general_purpose::URL_SAFE_NO_PAD.encode(token)
}
