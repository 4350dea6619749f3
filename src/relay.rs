use std::io::Result as IoResult;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{
    config::SessionOptions,
    io::{ChatStream, StreamState, copy_stream},
};

/// Sent to both clients when a session starts.
pub const PEER_CONNECTED_NOTICE: &str = "Someone's here!\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    AToB,
    BToA,
}

/// Relay bytes between two paired clients until one of them is done.
///
/// The first direction to finish ends the session: both streams are closed
/// right away, which unblocks the other direction, and only the first
/// direction's error (if any) is logged. Nothing is reported to the clients.
pub async fn relay(mut a: ChatStream, mut b: ChatStream, opts: &SessionOptions) {
    let session = format!("{} <-> {}", a.label(), b.label());
    info!("session started: {}", session);

    for s in [&mut a, &mut b] {
        s.set_state(StreamState::Relaying);
        if let Err(e) = s.notify(PEER_CONNECTED_NOTICE).await {
            debug!("{}: failed to send notice: {}", s.label(), e);
        }
    }

    #[cfg(feature = "metrics")]
    crate::metrics::ACTIVE_SESSIONS.inc();

    let close_a = a.closer();
    let close_b = b.closer();
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let mut copies: JoinSet<(Direction, u64, IoResult<()>)> = JoinSet::new();
    {
        let (size, grace) = (opts.buffer_size, opts.shutdown_timeout);
        let name = format!("{} a->b", session);
        copies.spawn(async move {
            let (n, result) = copy_stream(a_read, b_write, &name, size, grace).await;
            (Direction::AToB, n, result)
        });
        let name = format!("{} b->a", session);
        copies.spawn(async move {
            let (n, result) = copy_stream(b_read, a_write, &name, size, grace).await;
            (Direction::BToA, n, result)
        });
    }

    let first = tokio::select! {
        first = copies.join_next() => first,
        _ = close_a.closed() => None,
        _ = close_b.closed() => None,
    };
    close_a.close();
    close_b.close();

    match &first {
        Some(Ok((direction, n, Ok(())))) => {
            debug!("{}: {:?} finished after {} bytes", session, direction, n);
        }
        Some(Ok((direction, n, Err(e)))) => {
            warn!("{}: {:?} failed after {} bytes: {}", session, direction, n, e);
        }
        Some(Err(e)) => warn!("{}: copy task failed: {}", session, e),
        None => debug!("{}: closed from outside", session),
    }
    #[cfg(feature = "metrics")]
    if let Some(Ok((_, n, _))) = first {
        crate::metrics::RELAYED_BYTES.inc_by(n);
    }

    // the other direction ends by itself now that both streams are closed
    while let Some(rest) = copies.join_next().await {
        #[cfg(feature = "metrics")]
        if let Ok((_, n, _)) = rest {
            crate::metrics::RELAYED_BYTES.inc_by(n);
        }
        #[cfg(not(feature = "metrics"))]
        let _ = rest;
    }

    #[cfg(feature = "metrics")]
    crate::metrics::ACTIVE_SESSIONS.dec();

    info!("session ended: {}", session);
}
