use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub listeners: serde_yaml_ng::Sequence,
    #[serde(default)]
    pub matchmaker: MatchmakerParams,
    #[serde(default)]
    pub io_params: IoParams,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        let s = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read config file {}", path))?;
        Self::parse(&s)
    }

    pub fn parse(s: &str) -> Result<Self> {
        serde_yaml_ng::from_str(s).context("parse yaml")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakerParams {
    /// seconds a client waits for a partner before being told to keep waiting
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
}

fn default_retry_interval() -> u64 {
    5
}

impl Default for MatchmakerParams {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IoParams {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    8192
}

impl Default for IoParams {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown: u64,
}

fn default_shutdown_timeout() -> u64 {
    1
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            shutdown: default_shutdown_timeout(),
        }
    }
}

/// Runtime knobs the matchmaker hands down to every session it forms.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub retry_interval: Duration,
    pub buffer_size: usize,
    pub shutdown_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&Config {
            listeners: Default::default(),
            matchmaker: Default::default(),
            io_params: Default::default(),
            timeouts: Default::default(),
        })
    }
}

impl From<&Config> for SessionOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            retry_interval: Duration::from_secs(cfg.matchmaker.retry_interval),
            buffer_size: cfg.io_params.buffer_size,
            shutdown_timeout: Duration::from_secs(cfg.timeouts.shutdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_CONFIG: &str = r#"
listeners:
  - name: web
    type: websocket
    bind: "127.0.0.1:4000"
  - name: tcp
    type: tcp
    bind: "127.0.0.1:4001"
matchmaker:
  retryInterval: 10
ioParams:
  bufferSize: 4096
timeouts:
  shutdown: 3
"#;

    #[test]
    fn test_parse_full_config() {
        let cfg = Config::parse(FULL_CONFIG).unwrap();
        assert_eq!(cfg.listeners.len(), 2);
        assert_eq!(cfg.matchmaker.retry_interval, 10);
        assert_eq!(cfg.io_params.buffer_size, 4096);
        assert_eq!(cfg.timeouts.shutdown, 3);

        let opts = SessionOptions::from(&cfg);
        assert_eq!(opts.retry_interval, Duration::from_secs(10));
        assert_eq!(opts.buffer_size, 4096);
        assert_eq!(opts.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_parse_defaults() {
        let cfg = Config::parse("listeners: []").unwrap();
        assert!(cfg.listeners.is_empty());
        assert_eq!(cfg.matchmaker.retry_interval, 5);
        assert_eq!(cfg.io_params.buffer_size, 8192);
        assert_eq!(cfg.timeouts.shutdown, 1);

        let opts = SessionOptions::default();
        assert_eq!(opts.retry_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_missing_listeners() {
        assert!(Config::parse("matchmaker:\n  retryInterval: 1\n").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FULL_CONFIG.as_bytes()).unwrap();
        let cfg = Config::load(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(cfg.listeners.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = Config::load("/nonexistent/roulette.yaml").await.unwrap_err();
        assert!(err.to_string().contains("read config file"));
    }
}
