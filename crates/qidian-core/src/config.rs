use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, anyhow};

use crate::mode::Mode;
use crate::playback::DEFAULT_TICK;
use crate::stream::Framing;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8002";
pub const BASE_URL_ENV: &str = "QIDIAN_BASE_URL";

/// Endpoint paths on the agent service
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Endpoints {
    pub stream: String,
    pub sse: String,
    pub query: String,
    pub health: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            stream: "/query_stream".to_string(),
            sse: "/query_stream_sse".to_string(),
            query: "/query".to_string(),
            health: "/healthz".to_string(),
        }
    }
}

impl Endpoints {
    pub fn for_framing(&self, framing: Framing) -> &str {
        match framing {
            Framing::LineJson => &self.stream,
            Framing::FieldFramed => &self.sse,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub base_url: Option<String>,
    pub framing: Option<Framing>,
    pub default_mode: Option<Mode>,
    pub smooth: Option<bool>,
    pub tick_ms: Option<u64>,
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            base_url: None,
            framing: Some(Framing::LineJson),
            default_mode: Some(Mode::Default),
            smooth: Some(true),
            tick_ms: None,
            endpoints: Endpoints::default(),
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    /// Base URL with the environment override applied.
    pub fn base_url(&self) -> String {
        std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn framing(&self) -> Framing {
        self.framing.unwrap_or_default()
    }

    pub fn mode(&self) -> Mode {
        self.default_mode.unwrap_or_default()
    }

    pub fn smooth(&self) -> bool {
        self.smooth.unwrap_or(true)
    }

    pub fn tick(&self) -> Duration {
        match self.tick_ms {
            Some(0) | None => DEFAULT_TICK,
            Some(ms) => Duration::from_millis(ms),
        }
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("qidian").join("config.json"))
    }
}
