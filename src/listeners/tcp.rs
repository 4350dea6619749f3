use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::{Listener, ListenerRef};
use crate::{common, io::ChatStream, matchmaker::Matchmaker};

/// Raw TCP transport: every accepted socket is a chat client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TcpChatListener {
    name: String,
    bind: String,
    #[serde(default = "default_keepalive")]
    keepalive: bool,
}

fn default_keepalive() -> bool {
    true
}

pub fn from_value(value: &serde_yaml_ng::Value) -> Result<ListenerRef> {
    let ret: TcpChatListener = serde_yaml_ng::from_value(value.clone()).context("parse config")?;
    Ok(Box::new(ret))
}

#[async_trait]
impl Listener for TcpChatListener {
    async fn listen(self: Arc<Self>, matchmaker: Arc<Matchmaker>) -> Result<()> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("{}: bind {}", self.name, self.bind))?;
        info!("{} listening on {}", self.name, listener.local_addr()?);
        tokio::spawn(self.accept(listener, matchmaker));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl TcpChatListener {
    async fn accept(self: Arc<Self>, listener: TcpListener, matchmaker: Arc<Matchmaker>) {
        loop {
            match listener.accept().await.context("accept") {
                Ok((socket, source)) => {
                    let source = common::try_map_v4_addr(source);
                    debug!("{}: connected from {}", self.name, source);
                    if self.keepalive {
                        common::set_keepalive(&socket)
                            .unwrap_or_else(|e| warn!("set_keepalive failed: {}", e));
                    }
                    #[cfg(feature = "metrics")]
                    crate::metrics::CONNECTIONS
                        .with_label_values(&[self.name.as_str()])
                        .inc();
                    let stream = ChatStream::new(format!("{}:{}", self.name, source), socket);
                    // pairing can take forever, keep it off the accept loop
                    let matchmaker = matchmaker.clone();
                    tokio::spawn(async move { matchmaker.submit(stream).await });
                }
                Err(e) => {
                    error!(
                        "{}: fatal accept error: {:#}, shutting down listener",
                        self.name, e
                    );
                    return;
                }
            }
        }
    }
}
