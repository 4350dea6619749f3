use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{Html, IntoResponse},
    routing::get,
};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
    net::TcpListener,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace};

use super::{Listener, ListenerRef};
use crate::{
    common,
    io::{ChatStream, StreamCloser},
    matchmaker::Matchmaker,
};

const INDEX_HTML: &str = include_str!("../../ui/index.html");
const SOCKET_PATH_PLACEHOLDER: &str = "{{socketPath}}";

/// WebSocket transport: serves the chat page and upgrades `path` to a client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketListener {
    name: String,
    bind: String,
    #[serde(default = "default_path")]
    path: String,
    /// chat page with the socket path filled in, rendered by `init`
    #[serde(skip)]
    index: String,
}

fn default_path() -> String {
    "/socket".to_owned()
}

pub fn from_value(value: &serde_yaml_ng::Value) -> Result<ListenerRef> {
    let ret: WebSocketListener =
        serde_yaml_ng::from_value(value.clone()).context("parse config")?;
    Ok(Box::new(ret))
}

struct AppState {
    name: String,
    index: String,
    matchmaker: Arc<Matchmaker>,
}

#[async_trait]
impl Listener for WebSocketListener {
    async fn init(&mut self) -> Result<()> {
        self.index = render_index(&self.path);
        Ok(())
    }

    async fn verify(&self) -> Result<()> {
        if !self.path.starts_with('/') || self.path == "/" {
            bail!("{}: invalid websocket path {:?}", self.name, self.path);
        }
        Ok(())
    }

    async fn listen(self: Arc<Self>, matchmaker: Arc<Matchmaker>) -> Result<()> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("{}: bind {}", self.name, self.bind))?;
        info!(
            "{} listening on {} (websocket at {})",
            self.name,
            listener.local_addr()?,
            self.path
        );
        let app = self.router(matchmaker);
        let name = self.name.clone();
        tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                error!("{}: fatal server error: {}, shutting down listener", name, e);
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl WebSocketListener {
    fn router(&self, matchmaker: Arc<Matchmaker>) -> Router {
        let state = Arc::new(AppState {
            name: self.name.clone(),
            index: self.index.clone(),
            matchmaker,
        });
        let router = Router::new()
            .route("/", get(index))
            .route(&self.path, get(upgrade));
        #[cfg(feature = "metrics")]
        let router = router.route("/metrics", get(metrics));
        router.layer(TraceLayer::new_for_http()).with_state(state)
    }
}

fn render_index(path: &str) -> String {
    INDEX_HTML.replace(SOCKET_PATH_PLACEHOLDER, path)
}

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.index.clone())
}

#[cfg(feature = "metrics")]
async fn metrics() -> String {
    crate::metrics::render()
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(source): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let source = common::try_map_v4_addr(source);
    // the upgrade callback runs on its own task, one per client
    ws.on_upgrade(move |socket| async move {
        debug!("{}: connected from {}", state.name, source);
        #[cfg(feature = "metrics")]
        crate::metrics::CONNECTIONS
            .with_label_values(&[state.name.as_str()])
            .inc();
        let opts = state.matchmaker.options();
        let (local, remote) = duplex(opts.buffer_size);
        let stream = ChatStream::new(format!("{}:{}", state.name, source), local);
        let (sink, frames) = socket.split();
        tokio::spawn(bridge(
            sink,
            frames,
            remote,
            stream.closer(),
            stream.label().to_owned(),
            opts.buffer_size,
            opts.shutdown_timeout,
        ));
        state.matchmaker.submit(stream).await;
    })
}

/// Take the next frame out of the bytes the session wrote for the browser.
///
/// Valid UTF-8 goes out as text. A character cut in half by the read buffer
/// stays in `pending` until the rest of it arrives; anything else that is not
/// UTF-8 goes out as binary.
fn next_frame(pending: &mut Vec<u8>) -> Option<Message> {
    let checked = std::str::from_utf8(pending)
        .map(|_| ())
        .map_err(|e| (e.valid_up_to(), e.error_len()));
    let valid = match checked {
        Ok(()) => pending.len(),
        Err((valid, None)) => valid,
        Err((_, Some(_))) => return Some(Message::Binary(Bytes::from(std::mem::take(pending)))),
    };
    if valid == 0 {
        return None;
    }
    let rest = pending.split_off(valid);
    let text = std::mem::replace(pending, rest);
    Some(Message::Text(String::from_utf8_lossy(&text).into_owned().into()))
}

/// Pump bytes between a WebSocket and the in-process end of a duplex pipe.
///
/// Incoming text and binary frames are written to the pipe as raw bytes.
/// Whatever the session writes is sent back as frames. The bridge ends when
/// either the browser or the session is done; a session shutdown turns into
/// a close frame. Once the stream is closed the browser gets `grace` to take
/// the rest of its frames, then the socket is dropped.
async fn bridge<S, F>(
    mut sink: S,
    mut frames: F,
    pipe: DuplexStream,
    closer: StreamCloser,
    label: String,
    buffer_size: usize,
    grace: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    F: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(pipe);

    let inbound = async {
        while let Some(frame) = frames.next().await {
            match frame.context("receive")? {
                Message::Text(text) => writer.write_all(text.as_bytes()).await?,
                Message::Binary(data) => writer.write_all(&data).await?,
                Message::Close(_) => break,
                // pings are answered by axum
                _ => {}
            }
        }
        writer.shutdown().await?;
        anyhow::Ok(())
    };

    let outbound = async {
        let mut buf = vec![0u8; buffer_size.max(1)];
        let mut pending = Vec::new();
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&buf[..n]);
            if let Some(frame) = next_frame(&mut pending) {
                sink.send(frame).await.context("send")?;
            }
        }
        if !pending.is_empty() {
            sink.send(Message::Binary(pending.into())).await.context("send")?;
        }
        sink.send(Message::Close(None)).await.context("send close")?;
        anyhow::Ok(())
    };
    tokio::pin!(outbound);

    let result = tokio::select! {
        r = inbound => r,
        r = &mut outbound => r,
        _ = closer.closed() => {
            match tokio::time::timeout(grace, &mut outbound).await {
                Ok(r) => r,
                Err(_) => Err(anyhow!("browser did not drain within {:?}", grace)),
            }
        }
    };
    match result {
        Ok(()) => trace!("{}: websocket bridge finished", label),
        Err(e) => debug!("{}: websocket bridge: {:#}", label, e),
    }
}
