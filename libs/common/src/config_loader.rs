//! Configuration loading helper functions
//!
//! Files are read through figment, with the provider picked from the file
//! extension. JSON is what the gateway ships with; YAML and TOML load the
//! same models.

use std::path::Path;

use figment::{
    providers::{Format, Json, Toml, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{Error, Result};

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Resolve the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::config("Config file must have an extension"))?;

        match extension.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => Err(Error::config(format!(
                "Unsupported config file format: {}",
                other
            ))),
        }
    }
}

/// Load configuration from a specific file
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let format = ConfigFormat::from_path(path)?;
    debug!("Loading {:?} configuration from {}", format, path.display());
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content, format)
}

/// Load configuration from an in-memory document
pub fn load_config_from_str<T>(content: &str, format: ConfigFormat) -> Result<T>
where
    T: DeserializeOwned,
{
    let figment = match format {
        ConfigFormat::Json => Figment::new().merge(Json::string(content)),
        ConfigFormat::Yaml => Figment::new().merge(Yaml::string(content)),
        ConfigFormat::Toml => Figment::new().merge(Toml::string(content)),
    };

    figment
        .extract()
        .map_err(|e| Error::config(format!("Failed to parse configuration: {}", e)))
}
