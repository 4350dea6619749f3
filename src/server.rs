use anyhow::{Context, Result, anyhow, bail};
use std::{collections::HashMap, sync::Arc};
use tracing::info;

use crate::{
    config::{self, SessionOptions},
    listeners::{self, Listener},
    matchmaker::Matchmaker,
};

pub struct ChatServer {
    pub listeners: HashMap<String, Arc<dyn Listener>>,
    pub matchmaker: Arc<Matchmaker>,
}

impl ChatServer {
    pub async fn from_config_file(config_path: &str) -> Result<Self> {
        let cfg = config::Config::load(config_path).await?;
        Self::from_config(&cfg)
    }

    pub fn from_config(cfg: &config::Config) -> Result<Self> {
        let listeners: HashMap<String, Arc<dyn Listener>> = listeners::from_config(&cfg.listeners)?
            .into_iter()
            .map(|(name, l)| (name, Arc::from(l)))
            .collect();
        let matchmaker = Arc::new(Matchmaker::new(SessionOptions::from(cfg)));
        Ok(ChatServer {
            listeners,
            matchmaker,
        })
    }

    pub async fn init(&mut self) -> Result<()> {
        for l in self.listeners.values_mut() {
            if let Some(listener_mut) = Arc::get_mut(l) {
                listener_mut.init().await.with_context(|| {
                    format!("Failed to initialize listener {}", listener_mut.name())
                })?;
            } else {
                return Err(anyhow!(
                    "Cannot get mutable reference to listener during initialization"
                ));
            }
        }
        Ok(())
    }

    pub async fn verify(&self) -> Result<()> {
        if self.listeners.is_empty() {
            bail!("no listener configured");
        }
        let opts = self.matchmaker.options();
        if opts.retry_interval.is_zero() {
            bail!("matchmaker.retryInterval must be at least 1 second");
        }
        if opts.buffer_size == 0 {
            bail!("ioParams.bufferSize must not be 0");
        }
        for l in self.listeners.values() {
            l.verify().await?;
        }
        Ok(())
    }

    /// Bind every listener. Each one runs its own accept loop from here on.
    pub async fn start(&self) -> Result<()> {
        for l in self.listeners.values().cloned() {
            l.listen(self.matchmaker.clone()).await?;
        }
        Ok(())
    }

    pub async fn run(mut self) -> Result<()> {
        self.init().await?;
        self.verify().await?;
        self.start().await?;

        tokio::signal::ctrl_c()
            .await
            .context("wait for shutdown signal")?;
        info!("shutting down");
        Ok(())
    }
}
