//! Configuration validation logic.

use crate::config::schema::ServerConfig;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a ServerConfig for semantic correctness.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError(
            "listener.port must be nonzero".to_string(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError(
            "listener.max_connections must be > 0".to_string(),
        ));
    }
    if config.timeouts.read_ms == 0 {
        errors.push(ValidationError(
            "timeouts.read_ms must be > 0".to_string(),
        ));
    }
    if config.timeouts.drain_secs == 0 {
        tracing::warn!("timeouts.drain_secs is 0, stop() will not wait for in-flight connections");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let mut config = ServerConfig::default();
        config.listener.port = 0;
        config.listener.max_connections = 0;
        config.timeouts.read_ms = 0;

        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 3);
        assert!(errs[0].0.contains("listener.port"));
    }
}
