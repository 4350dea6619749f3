use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_yaml_ng::Value;
use std::{collections::HashMap, sync::Arc};

use crate::matchmaker::Matchmaker;

pub mod tcp;
pub mod websocket;

/// A transport that accepts clients and hands them to the matchmaker.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn verify(&self) -> Result<()> {
        Ok(())
    }
    /// Bind and spawn the accept loop. Returns once the transport is bound;
    /// a later accept failure only stops this transport.
    async fn listen(self: Arc<Self>, matchmaker: Arc<Matchmaker>) -> Result<()>;
    fn name(&self) -> &str;
}

pub type ListenerRef = Box<dyn Listener>;

pub fn from_config(cfg: &[Value]) -> Result<HashMap<String, ListenerRef>> {
    let mut ret: HashMap<String, ListenerRef> = Default::default();
    for val in cfg {
        let r = from_value(val)?;
        let old = ret.insert(r.name().to_owned(), r);
        if let Some(old) = old {
            bail!("duplicate listener name: {}", old.name());
        }
    }
    Ok(ret)
}

pub fn from_value(value: &Value) -> Result<ListenerRef> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing listener name"))?;
    let tname = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(name);
    match tname {
        "tcp" => tcp::from_value(value),
        "websocket" => websocket::from_value(value),
        name => bail!("unknown listener type: {:?}", name),
    }
}
