//! Loading hub configuration from TOML

use std::path::Path;

use crate::config::{ConfigResult, HubConfig};

/// Loads and validates [`HubConfig`] values
pub struct ConfigLoader;

impl ConfigLoader {
    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(content: &str) -> ConfigResult<HubConfig> {
        let config: HubConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    ///
    /// A missing file yields the default configuration.
    pub async fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<HubConfig> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            tracing::debug!(path = %path.display(), "hub config not found, using defaults");
            return Ok(HubConfig::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), ?config, "loaded hub config");
        Ok(config)
    }

    /// Serialize a configuration and write it to disk
    pub async fn save_to_file(config: &HubConfig, path: impl AsRef<Path>) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
