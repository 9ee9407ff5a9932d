//! Daemon configuration, loaded from a JSON file.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Top-level configuration.
///
/// Key names match the files the fleet already deploys, including the
/// historical `InternEnpoint` spelling.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bind address of the control HTTP surface.
    #[serde(rename = "Listen", default = "default_listen")]
    pub listen: String,

    /// Serial device the printer is connected to.
    #[serde(rename = "Serial", default = "default_serial")]
    pub serial: String,

    #[serde(rename = "InternEnpoint")]
    pub intern: InternEndpoint,
}

/// Credentials and coordinates of the intern registry.
#[derive(Debug, Clone, Deserialize)]
pub struct InternEndpoint {
    #[serde(rename = "Api_app")]
    pub api_app: String,
    #[serde(rename = "Api_key")]
    pub api_key: String,
    #[serde(rename = "Api_uri")]
    pub api_uri: String,
    #[serde(rename = "PrinterName")]
    pub printer_name: String,
    #[serde(rename = "OfficeName")]
    pub office_name: String,
}

fn default_listen() -> String {
    "[::1]:8888".to_string()
}

fn default_serial() -> String {
    "/dev/ttyACM0".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't open main config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("can't decode main config {path}: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },
}

/// Load the configuration from `path`. Missing or unparsable files are
/// fatal at startup, so the error carries the path for the log line.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Decode {
        path: path.display().to_string(),
        source,
    })
}
