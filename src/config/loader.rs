//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::CoordinatorConfig;
use crate::config::validation::{default_base, normalize, validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<CoordinatorConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse, validate and normalize configuration text.
pub fn parse_config(content: &str) -> Result<CoordinatorConfig, ConfigError> {
    let config: CoordinatorConfig = toml::from_str(content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(normalize(config, &default_base()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_reads_and_normalizes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [map]
            grid = [2, 2]
            start = [10.0, 20.0]
            end = [10.5, 20.5]

            [manager]
            address = "127.0.0.1:5001"
            map_workers = false
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.manager.address.as_deref(), Some("127.0.0.1:5001"));
        assert!(!config.manager.map_workers);
        assert_eq!(config.scan.coroutines_limit, Some(4));
        assert!(config.persistence.directory.is_some());
    }

    #[test]
    fn validation_errors_are_joined() {
        let err = parse_config(
            r#"
            [map]
            grid = [2, 2]
            start = [10.0, 20.0]
            end = [10.0, 20.0]

            [scan]
            scan_delay = 1
            "#,
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("must differ"));
        assert!(message.contains("scan_delay"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/coordinator.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
