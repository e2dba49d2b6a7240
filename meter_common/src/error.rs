//! Shared error types.

use thiserror::Error;

/// Configuration loading, parsing and validation errors.
///
/// An invalid payload is always rejected atomically: the previously
/// active snapshot stays in force.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// File I/O error on the persistent store.
    #[error("config I/O error: {0}")]
    Io(String),

    /// TOML/JSON parse error.
    #[error("config parse error: {0}")]
    Parse(String),

    /// Parameter bound violation.
    #[error("config validation: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_detail() {
        let err = ConfigError::Validation("sleep_timeout_s = 7 is in the rejected band".into());
        assert!(err.to_string().contains("sleep_timeout_s"));
    }
}
