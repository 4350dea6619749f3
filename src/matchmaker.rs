use tokio::sync::{
    Mutex,
    oneshot::{self, error::TryRecvError},
};
use tracing::{debug, info, trace};

use crate::{
    config::SessionOptions,
    io::{ChatStream, StreamState},
    relay::relay,
};

/// Sent once, as soon as a client enters matchmaking.
pub const WAITING_NOTICE: &str = "Waiting for a friend ...";
/// Sent every retry interval while a client is still alone.
pub const STILL_WAITING_NOTICE: &str = "Still waiting ...";

/// The occupant of the rendezvous slot.
struct Waiting {
    stream: ChatStream,
    /// fired by whoever takes `stream` out of the slot, with the taker's label
    taken: oneshot::Sender<String>,
}

/// Pairs clients that arrive independently.
///
/// A single slot holds at most one waiting client. An arriving client either
/// takes the occupant and runs the session, or becomes the occupant and waits
/// to be taken. Waiting clients leave the slot on every retry interval to be
/// told they are still waiting, then try again from scratch, so there is no
/// arrival-order fairness.
pub struct Matchmaker {
    slot: Mutex<Option<Waiting>>,
    opts: SessionOptions,
}

impl Matchmaker {
    pub fn new(opts: SessionOptions) -> Self {
        Self {
            slot: Mutex::new(None),
            opts,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.opts
    }

    /// Enter matchmaking with `stream`.
    ///
    /// Returns when the stream has been handed to a session (possibly after
    /// running that session on this task) or when its client went away while
    /// waiting. Never fails.
    pub async fn submit(&self, mut stream: ChatStream) {
        debug!("{}: entering matchmaking", stream.label());
        if let Err(e) = stream.notify(WAITING_NOTICE).await {
            debug!("{}: left before matchmaking: {}", stream.label(), e);
            stream.close();
            return;
        }
        stream.set_state(StreamState::Waiting);

        loop {
            let (tx, mut rx) = oneshot::channel();
            {
                let mut slot = self.slot.lock().await;
                if let Some(mut waiting) = slot.take() {
                    if waiting.stream.is_gone() {
                        // dropping `taken` tells the occupant's task to give up
                        debug!("{}: left while waiting", waiting.stream.label());
                        waiting.stream.close();
                    } else {
                        // notify the occupant while still holding the slot, so a
                        // timed out occupant can tell from its receiver alone
                        // whether it still owns its stream
                        let _ = waiting.taken.send(stream.label().to_owned());
                        drop(slot);
                        self.start_session(waiting.stream, stream).await;
                        return;
                    }
                }
                *slot = Some(Waiting { stream, taken: tx });
            }

            match tokio::time::timeout(self.opts.retry_interval, &mut rx).await {
                Ok(Ok(partner)) => {
                    trace!("taken by {}", partner);
                    return;
                }
                Ok(Err(_)) => return,
                Err(_) => {}
            }

            // retry interval elapsed: take our stream back unless someone
            // took it in the meantime
            stream = {
                let mut slot = self.slot.lock().await;
                match rx.try_recv() {
                    Ok(partner) => {
                        trace!("taken by {} at the deadline", partner);
                        return;
                    }
                    Err(TryRecvError::Closed) => return,
                    Err(TryRecvError::Empty) => match slot.take() {
                        Some(waiting) => waiting.stream,
                        None => return,
                    },
                }
            };

            trace!("{}: no partner yet", stream.label());
            if let Err(e) = stream.notify(STILL_WAITING_NOTICE).await {
                debug!("{}: left while waiting: {}", stream.label(), e);
                stream.close();
                return;
            }
            #[cfg(feature = "metrics")]
            crate::metrics::STILL_WAITING.inc();
        }
    }

    async fn start_session(&self, mut a: ChatStream, mut b: ChatStream) {
        info!("paired {} with {}", a.label(), b.label());
        a.set_state(StreamState::Paired);
        b.set_state(StreamState::Paired);
        #[cfg(feature = "metrics")]
        crate::metrics::PAIRINGS.inc();
        relay(a, b, &self.opts).await;
    }

    /// Whether a client is currently sitting in the slot.
    pub async fn has_waiting(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}
