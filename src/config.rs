//! TOML configuration parsing and validation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for per-session data (`<data_root>/sessions/<id>/`).
    pub data_root: PathBuf,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_max_upload_mb() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArxivConfig {
    #[serde(default = "default_arxiv_api_url")]
    pub api_url: String,
    #[serde(default = "default_arxiv_max_results")]
    pub max_results: usize,
    #[serde(default = "default_arxiv_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            api_url: default_arxiv_api_url(),
            max_results: default_arxiv_max_results(),
            timeout_secs: default_arxiv_timeout_secs(),
        }
    }
}

fn default_arxiv_api_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}
fn default_arxiv_max_results() -> usize {
    10
}
fn default_arxiv_timeout_secs() -> u64 {
    30
}

/// External graph-RAG engine the pipeline delegates to.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// `http` posts to `url`; `stub` answers from a canned response
    /// (offline development and tests).
    #[serde(default = "default_engine_provider")]
    pub provider: String,
    #[serde(default = "default_engine_url")]
    pub url: String,
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: default_engine_provider(),
            url: default_engine_url(),
            timeout_secs: default_engine_timeout_secs(),
        }
    }
}

fn default_engine_provider() -> String {
    "http".to_string()
}
fn default_engine_url() -> String {
    "http://127.0.0.1:9620".to_string()
}
fn default_engine_timeout_secs() -> u64 {
    300
}

/// Attempt ceilings and spacing for the client-side poller and query bridge.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    #[serde(default = "default_query_interval_ms")]
    pub query_interval_ms: u64,
    #[serde(default = "default_query_max_attempts")]
    pub query_max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_attempts: default_poll_max_attempts(),
            query_interval_ms: default_query_interval_ms(),
            query_max_attempts: default_query_max_attempts(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_poll_max_attempts() -> u32 {
    60
}
fn default_query_interval_ms() -> u64 {
    1000
}
fn default_query_max_attempts() -> u32 {
    60
}

impl Config {
    /// Minimal config for tests and tools that do not read a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/graphchat.sqlite"),
            },
            storage: StorageConfig {
                data_root: PathBuf::from("./data"),
                max_upload_mb: default_max_upload_mb(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:8000".to_string(),
            },
            arxiv: ArxivConfig::default(),
            engine: EngineConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.storage.max_upload_mb == 0 {
        anyhow::bail!("storage.max_upload_mb must be > 0");
    }

    if config.arxiv.max_results == 0 {
        anyhow::bail!("arxiv.max_results must be > 0");
    }

    if config.client.poll_max_attempts == 0 || config.client.query_max_attempts == 0 {
        anyhow::bail!("client poll/query attempt ceilings must be >= 1");
    }

    match config.engine.provider.as_str() {
        "http" | "stub" => {}
        other => anyhow::bail!(
            "Unknown engine provider: '{}'. Must be http or stub.",
            other
        ),
    }

    Ok(config)
}
