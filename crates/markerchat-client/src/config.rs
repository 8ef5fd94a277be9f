//! Client configuration: an optional TOML file, overridden by CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::driver::mobile::{Prompt, default_prompts};

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_FRAME_POLL_MS: u64 = 25;
pub const DEFAULT_DISPLAY_NAME: &str = "Display";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Fixed wait between a close and the next attempt.
    pub reconnect_delay_ms: u64,
    /// How often the frame source is polled.
    pub frame_poll_ms: u64,
    /// Name the display sends under and highlights.
    pub display_name: String,
    /// Markers the AR toolkit is trained on.
    pub markers: Vec<String>,
    pub prompts: Vec<Prompt>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            frame_poll_ms: DEFAULT_FRAME_POLL_MS,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            markers: vec!["elephant".to_string(), "lizard".to_string()],
            prompts: default_prompts(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "loaded client config");
        Ok(config)
    }

    /// `load` when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn frame_period(&self) -> Duration {
        // A zero period would panic in tokio::time::interval.
        Duration::from_millis(self.frame_poll_ms.max(1))
    }
}
