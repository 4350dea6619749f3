use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder};

lazy_static::lazy_static! {
    pub static ref CONNECTIONS: IntCounterVec = prometheus::register_int_counter_vec!(
        "chat_connections",
        "Number of client connections accepted.",
        &["listener"]
    )
    .unwrap();
    pub static ref PAIRINGS: IntCounter = prometheus::register_int_counter!(
        "chat_pairings",
        "Number of sessions formed by the matchmaker."
    )
    .unwrap();
    pub static ref STILL_WAITING: IntCounter = prometheus::register_int_counter!(
        "chat_still_waiting",
        "Number of keepalive notices sent to waiting clients."
    )
    .unwrap();
    pub static ref ACTIVE_SESSIONS: IntGauge = prometheus::register_int_gauge!(
        "chat_active_sessions",
        "Number of sessions currently relaying."
    )
    .unwrap();
    pub static ref RELAYED_BYTES: IntCounter = prometheus::register_int_counter!(
        "chat_relayed_bytes",
        "Number of bytes relayed between paired clients."
    )
    .unwrap();
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        tracing::warn!("failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
