use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Config error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = DaemonError::NotFound("bash".to_string());
        assert_eq!(err.to_string(), "Not found: bash");
    }

    #[test]
    fn test_timeout_display() {
        let err = DaemonError::Timeout("usage probe exceeded 10s".to_string());
        assert_eq!(err.to_string(), "Timeout: usage probe exceeded 10s");
    }

    #[test]
    fn test_invalid_output_display() {
        let err = DaemonError::InvalidOutput("expected JSON object".to_string());
        assert_eq!(err.to_string(), "Invalid output: expected JSON object");
    }

    #[test]
    fn test_config_display() {
        let err = DaemonError::Config("probe command is empty".to_string());
        assert_eq!(err.to_string(), "Config error: probe command is empty");
    }
}
