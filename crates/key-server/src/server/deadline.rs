//! Write deadline for a connection's byte stream.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

/// Wraps a stream so that a write, flush or shutdown which makes no progress
/// for `timeout` fails with [`io::ErrorKind::TimedOut`].
///
/// The timer starts when a write side operation first returns `Pending` and
/// is cleared whenever one completes, so a peer that keeps draining, however
/// slowly, is never cut off. Reads are passed through untouched.
pub struct WriteDeadline<S> {
    inner: S,
    timeout: Duration,
    armed: Option<Pin<Box<Sleep>>>,
}

impl<S> WriteDeadline<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            armed: None,
        }
    }

    fn enforce<T>(
        &mut self,
        cx: &mut Context<'_>,
        poll: Poll<io::Result<T>>,
    ) -> Poll<io::Result<T>> {
        if poll.is_ready() {
            self.armed = None;
            return poll;
        }

        let timeout = self.timeout;
        let deadline = self
            .armed
            .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
        match deadline.as_mut().poll(cx) {
            Poll::Ready(()) => {
                self.armed = None;
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "write deadline exceeded",
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for WriteDeadline<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for WriteDeadline<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.enforce(cx, poll)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        this.enforce(cx, poll)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.enforce(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        this.enforce(cx, poll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out() {
        let (client, _peer) = tokio::io::duplex(64);
        let mut stream = WriteDeadline::new(client, Duration::from_secs(2));

        let started = Instant::now();
        let err = stream.write_all(&[0u8; 1024]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reader_that_keeps_draining_is_not_cut_off() {
        let (client, mut peer) = tokio::io::duplex(64);
        let reader = tokio::spawn(async move {
            let mut chunk = [0u8; 64];
            let mut total = 0;
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let n = peer.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break total;
                }
                total += n;
            }
        });

        // 64 reads at one per second, far beyond the 2s deadline in total.
        let mut stream = WriteDeadline::new(client, Duration::from_secs(2));
        stream.write_all(&[7u8; 4096]).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        assert_eq!(reader.await.unwrap(), 4096);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_are_not_bounded() {
        let (client, mut peer) = tokio::io::duplex(64);
        let mut stream = WriteDeadline::new(client, Duration::from_secs(1));

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            peer.write_all(b"late").await.unwrap();
            peer
        });

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"late");
        drop(writer.await.unwrap());
    }
}
