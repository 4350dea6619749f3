use std::fmt;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Result as IoResult};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::trace;

/// A trait for type-erased async streams accepted by the listeners
pub trait IOStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}
impl<T> IOStream for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

/// Where a stream currently is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connected,
    Waiting,
    Paired,
    Relaying,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connected => "connected",
            Self::Waiting => "waiting",
            Self::Paired => "paired",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Handle that closes a [`ChatStream`] from anywhere.
///
/// Closing is idempotent. Once closed, pending and future reads on the stream
/// return EOF and writes fail with `BrokenPipe`.
#[derive(Debug, Clone, Default)]
pub struct StreamCloser(CancellationToken);

impl StreamCloser {
    pub fn close(&self) {
        self.0.cancel()
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the stream has been closed.
    pub async fn closed(&self) {
        self.0.cancelled().await
    }
}

/// A client connection as seen by the matchmaker and the relay.
///
/// Wraps whatever the listener accepted and adds a close that force-unblocks
/// in-flight I/O. The read and write directions wait on separate close
/// futures so the halves returned by `tokio::io::split` can be driven from
/// different tasks.
pub struct ChatStream {
    label: String,
    state: StreamState,
    inner: Box<dyn IOStream>,
    // bytes picked up by `is_gone`, served before the transport is read again
    peeked: BytesMut,
    closer: StreamCloser,
    read_closed: Pin<Box<WaitForCancellationFutureOwned>>,
    write_closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl ChatStream {
    pub fn new<T: IOStream + 'static>(label: impl Into<String>, inner: T) -> Self {
        let closer = StreamCloser::default();
        let read_closed = Box::pin(closer.0.clone().cancelled_owned());
        let write_closed = Box::pin(closer.0.clone().cancelled_owned());
        Self {
            label: label.into(),
            state: StreamState::Connected,
            inner: Box::new(inner),
            peeked: BytesMut::new(),
            closer,
            read_closed,
            write_closed,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> StreamState {
        if self.closer.is_closed() {
            StreamState::Closed
        } else {
            self.state
        }
    }

    pub fn set_state(&mut self, state: StreamState) -> &mut Self {
        trace!("{}: {} -> {}", self.label, self.state, state);
        self.state = state;
        self
    }

    pub fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }

    pub fn close(&mut self) {
        self.closer.close();
        self.state = StreamState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Check, without waiting, whether the client has already hung up.
    ///
    /// Anything the client sent in the meantime is kept and returned by the
    /// next read.
    pub fn is_gone(&mut self) -> bool {
        if self.is_closed() {
            return true;
        }
        if !self.peeked.is_empty() {
            return false;
        }
        let mut buf = [0u8; 512];
        let mut read_buf = ReadBuf::new(&mut buf);
        let mut cx = Context::from_waker(Waker::noop());
        match Pin::new(&mut self.inner).poll_read(&mut cx, &mut read_buf) {
            Poll::Ready(Ok(())) if read_buf.filled().is_empty() => true,
            Poll::Ready(Ok(())) => {
                self.peeked.extend_from_slice(read_buf.filled());
                false
            }
            Poll::Ready(Err(e)) => {
                trace!("{}: read error while waiting: {}", self.label, e);
                true
            }
            Poll::Pending => false,
        }
    }

    /// Write a system notice and flush it out.
    pub async fn notify(&mut self, notice: &str) -> IoResult<()> {
        self.write_all(notice.as_bytes()).await?;
        self.flush().await
    }
}

impl fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStream")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

fn closed_error() -> IoError {
    IoError::new(IoErrorKind::BrokenPipe, "stream closed")
}

impl AsyncRead for ChatStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<IoResult<()>> {
        let this = self.get_mut();
        if this.closer.is_closed() || this.read_closed.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Ok(()));
        }
        if !this.peeked.is_empty() {
            let n = this.peeked.len().min(buf.remaining());
            buf.put_slice(&this.peeked[..n]);
            this.peeked.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ChatStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        let this = self.get_mut();
        if this.closer.is_closed() || this.write_closed.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(closed_error()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        let this = self.get_mut();
        if this.closer.is_closed() || this.write_closed.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(closed_error()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    // Shutdown always reaches the transport, so a closed stream can still
    // tell its client that the conversation is over.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_log::test;
    use tokio::io::{AsyncReadExt, duplex};
    use tokio::time::{sleep, timeout};

    #[test(tokio::test)]
    async fn test_notify_writes_exact_bytes() {
        let (mut client, server) = duplex(1024);
        let mut stream = ChatStream::new("test:1", server);
        stream.notify("Waiting for a friend ...").await.unwrap();

        let mut buf = vec![0u8; "Waiting for a friend ...".len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"Waiting for a friend ...");
    }

    #[test(tokio::test)]
    async fn test_close_is_idempotent() {
        let (_client, server) = duplex(1024);
        let mut stream = ChatStream::new("test:1", server);
        let closer = stream.closer();

        closer.close();
        closer.close();
        stream.close();

        assert!(stream.is_closed());
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test(tokio::test)]
    async fn test_close_unblocks_pending_read() {
        let (_client, server) = duplex(1024);
        let mut stream = ChatStream::new("test:1", server);
        let closer = stream.closer();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            stream.read(&mut buf).await
        });
        sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        closer.close();
        let n = timeout(Duration::from_secs(1), reader)
            .await
            .expect("read should be unblocked by close")
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test(tokio::test)]
    async fn test_close_unblocks_split_halves_independently() {
        let (_client, server) = duplex(4);
        let stream = ChatStream::new("test:1", server);
        let closer = stream.closer();
        let (mut r, mut w) = tokio::io::split(stream);

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            r.read(&mut buf).await
        });
        // the client never reads, so this blocks once the duplex buffer fills
        let writer = tokio::spawn(async move { w.write_all(&[0u8; 64]).await });
        sleep(Duration::from_millis(20)).await;

        closer.close();
        let read = timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        let write = timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
        assert_eq!(read.unwrap(), 0);
        assert_eq!(write.unwrap_err().kind(), IoErrorKind::BrokenPipe);
    }

    #[test(tokio::test)]
    async fn test_write_after_close_fails() {
        let (_client, server) = duplex(1024);
        let mut stream = ChatStream::new("test:1", server);
        stream.close();
        let err = stream.notify("Still waiting ...").await.unwrap_err();
        assert_eq!(err.kind(), IoErrorKind::BrokenPipe);
    }

    #[test(tokio::test)]
    async fn test_shutdown_after_close_reaches_client() {
        let (mut client, server) = duplex(1024);
        let mut stream = ChatStream::new("test:1", server);
        stream.close();
        stream.shutdown().await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[test(tokio::test)]
    async fn test_is_gone_after_client_hangs_up() {
        let (client, server) = duplex(1024);
        let mut stream = ChatStream::new("test:1", server);
        assert!(!stream.is_gone());
        drop(client);
        assert!(stream.is_gone());
    }

    #[test(tokio::test)]
    async fn test_is_gone_keeps_early_bytes() {
        let (mut client, server) = duplex(1024);
        let mut stream = ChatStream::new("test:1", server);
        client.write_all(b"anyone?").await.unwrap();
        assert!(!stream.is_gone());
        drop(client);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"anyone?");
    }

    #[test(tokio::test)]
    async fn test_is_gone_after_close() {
        let (_client, server) = duplex(1024);
        let mut stream = ChatStream::new("test:1", server);
        stream.close();
        assert!(stream.is_gone());
    }

    #[test]
    fn test_state_transitions() {
        let (_client, server) = tokio::io::duplex(16);
        let mut stream = ChatStream::new("test:1", server);
        assert_eq!(stream.state(), StreamState::Connected);
        stream.set_state(StreamState::Waiting);
        assert_eq!(stream.state(), StreamState::Waiting);
        stream.set_state(StreamState::Paired).set_state(StreamState::Relaying);
        assert_eq!(stream.state(), StreamState::Relaying);
        assert_eq!(format!("{:?}", stream), "ChatStream { label: \"test:1\", state: Relaying }");
    }
}
