use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context};
use serde::Deserialize;
use crate::queue::{HttpTransportConfig, QueueConfig};
use crate::validation::FileValidator;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// API base url, e.g. `https://api.example.com/api/v1`
    pub endpoint: String,
    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub validation: FileValidator,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_transfer_timeout_secs() -> u64 {
    30 * 60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&config_str).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(config_str: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoint.trim().is_empty() {
            bail!("endpoint must not be empty");
        }
        if self.max_concurrent == 0 {
            bail!("max_concurrent must be greater than 0");
        }
        if self.transfer_timeout_secs == 0 {
            bail!("transfer_timeout_secs must be greater than 0");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than 0");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.max_concurrent,
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
            ..Default::default()
        }
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            endpoint: self.endpoint.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            chunk_size: self.chunk_size,
        }
    }
}
