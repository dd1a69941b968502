use crate::server::filters::{TimeRange, DEFAULT_LOCATION};

use anyhow::{Context, Result};
use serde::Deserialize;

use std::net::SocketAddr;
use std::path::Path;

const DEFAULT_FIELDS: [&str; 6] = ["pm25", "pm10", "no2", "so2", "co", "o3"];

/// Service settings. Every key is optional in the file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct Config {
    pub bind: SocketAddr,
    pub location: String,
    pub time_range: TimeRange,
    pub fields: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            location: DEFAULT_LOCATION.to_owned(),
            time_range: TimeRange::default(),
            fields: DEFAULT_FIELDS.iter().map(|field| field.to_string()).collect(),
        }
    }
}

impl Config {
    pub(crate) fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid config")
    }

    /// Reads `path` when given, otherwise falls back to the defaults.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
