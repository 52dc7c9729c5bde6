//! ID generation and identifier checks.

use rand::Rng;

use crate::error::{RalphError, Result};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique task ID
///
/// Format: `task-{timestamp_ms}-{random_hex}`
/// Example: `task-1738300800123-a1b2`
pub fn generate_task_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("task-{}-{:04x}", timestamp, random)
}

/// Check that an identifier is safe to use as a storage key.
///
/// Identifiers become file names, so only ASCII alphanumerics, `-`, `_`
/// and `.` are accepted, and a leading `.` is refused.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(RalphError::Validation(format!("{} must not be empty", kind)));
    }
    if id.starts_with('.') {
        return Err(RalphError::Validation(format!("{} must not start with '.': {}", kind, id)));
    }
    let valid = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(RalphError::Validation(format!(
            "{} contains invalid characters: {}",
            kind, id
        )));
    }
    Ok(())
}
