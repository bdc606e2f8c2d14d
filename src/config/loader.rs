//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` and `${VAR:-default}`
    pub fn from_yaml(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let mut config: Config = serde_yaml::from_str(&expanded)?;
        config.api.base_url = config.api.base_url.trim_end_matches('/').to_string();
        if let Some(token) = &config.api.access_token {
            if token.trim().is_empty() {
                config.api.access_token = None;
            }
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_minimal() {
        let config = ConfigLoader::from_yaml("api:\n  base_url: \"http://localhost:8080/\"\n")
            .unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8080");
        assert!(config.api.access_token.is_none());
        assert_eq!(config.upload.max_concurrent_chunks, 5);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_from_yaml_blank_token_is_dropped() {
        let yaml = "api:\n  base_url: \"http://localhost\"\n  access_token: \"${KUMO_LOADER_UNSET:-}\"\n";
        let config = ConfigLoader::from_yaml(yaml).unwrap();
        assert!(config.api.access_token.is_none());
    }

    #[test]
    fn test_from_yaml_invalid_fails_validation() {
        let yaml = "api:\n  base_url: \"localhost\"\n";
        assert!(matches!(
            ConfigLoader::from_yaml(yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
