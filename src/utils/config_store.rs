//! ConfigStore - Result Set Configuration Files
//!
//! TOML or JSON, picked by file extension. Missing keys fall back to
//! defaults, a missing file yields the default configuration.

use std::fs;
use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};

use crate::domain::config::ResultSetConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

fn format_of(path: &Path) -> Result<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        other => Err(Error::Invalid {
            message: format!(
                "Unsupported config extension {:?} for {}",
                other.unwrap_or(""),
                path.display()
            ),
        }),
    }
}

/// Load a config file, or the default when it does not exist
pub fn load_config<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let format = format_of(path)?;
    if !path.exists() {
        tracing::debug!("Config file {} not found, using defaults", path.display());
        return Ok(T::default());
    }

    let content = fs::read_to_string(path)?;
    let config = match format {
        Format::Toml => toml::from_str(&content)?,
        Format::Json => serde_json::from_str(&content)?,
    };
    Ok(config)
}

/// Save a config file, creating parent directories as needed
pub fn save_config<T: Serialize>(path: impl AsRef<Path>, config: &T) -> Result<()> {
    let path = path.as_ref();
    let content = match format_of(path)? {
        Format::Toml => toml::to_string_pretty(config)?,
        Format::Json => serde_json::to_string_pretty(config)?,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Load and validate a result set configuration
pub fn load_result_set_config(path: impl AsRef<Path>) -> Result<ResultSetConfig> {
    let config: ResultSetConfig = load_config(path)?;
    config.validate()?;
    Ok(config)
}
