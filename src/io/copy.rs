use std::io::Result as IoResult;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Copy one direction of a session until the source reaches EOF or fails.
///
/// Every chunk is written out and flushed before the next read, so bytes
/// arrive at the destination in order and unmodified. Whatever ended the
/// loop, the destination is shut down afterwards (bounded by
/// `shutdown_timeout`); the shutdown outcome is not part of the result.
///
/// Returns the number of bytes written to `w` together with how the loop
/// ended, so bytes moved before a failure are still accounted for.
pub async fn copy_stream<R, W>(
    mut r: R,
    mut w: W,
    direction: &str,
    buffer_size: usize,
    shutdown_timeout: Duration,
) -> (u64, IoResult<()>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let result = copy_loop(&mut r, &mut w, buffer_size, &mut total).await;
    match tokio::time::timeout(shutdown_timeout, w.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!("{}: shutdown: {}", direction, e),
        Err(_) => trace!("{}: shutdown timed out", direction),
    }
    (total, result)
}

async fn copy_loop<R, W>(r: &mut R, w: &mut W, buffer_size: usize, total: &mut u64) -> IoResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let len = r.read(&mut buf).await?;
        if len == 0 {
            return Ok(());
        }
        w.write_all(&buf[..len]).await?;
        w.flush().await?;
        *total += len as u64;
    }
}
