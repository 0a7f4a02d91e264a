//! Accept loop and connection lifecycle.
//!
//! Every accepted socket gets its own task on a [`TaskTracker`]. A connection
//! goes through three stages:
//!
//! 1. TLS handshake, bounded by the read timeout. Skipped when the listener
//!    was bound without TLS.
//! 2. HTTP/1.1 or HTTP/2 served by hyper's auto builder. HTTP/1 header reads
//!    are bounded by the same read timeout, and every write to the socket by
//!    the write timeout.
//! 3. Close: after the idle timeout with no request in flight, when shutdown
//!    starts (graceful), or when the shutdown deadline passes (forced).
//!
//! Shutdown happens in two phases. Once the shutdown future resolves the
//! listener socket is dropped, so new connections are refused, and every open
//! connection is asked to finish its in-flight requests. If connections are
//! still open when the deadline passes they are torn down and
//! [`Error::ShutdownTimeout`] is returned.

use crate::server::config::ServerConfig;
use crate::server::deadline::WriteDeadline;
use crate::server::error::{Error, Result};
use axum::Router;
use core::future::Future;
use core::time::Duration;
use hyper::Request;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

/// Pause after a failed `accept`, so descriptor exhaustion does not spin.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection deadlines.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl From<&ServerConfig> for ConnectionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            idle_timeout: config.idle_timeout,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// A bound TCP socket that serves a [`Router`], terminating TLS when it was
/// given a TLS configuration.
pub struct Listener {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    limits: ConnectionLimits,
}

impl Listener {
    /// Binds `addr` without accepting yet. With `tls` set to `None` the
    /// listener speaks plain HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] if the address cannot be bound.
    pub async fn bind(
        addr: &str,
        tls: Option<Arc<rustls::ServerConfig>>,
        limits: ConnectionLimits,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::startup(format!("failed to bind {addr}: {e}")))?;
        Ok(Self {
            listener,
            acceptor: tls.map(TlsAcceptor::from),
            limits,
        })
    }

    pub const fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Address the socket is actually bound to, useful after binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves, then drains.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if connections are still open when
    /// the shutdown deadline passes.
    pub async fn serve<F>(self, router: Router, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Self {
            listener,
            acceptor,
            limits,
        } = self;

        let graceful = CancellationToken::new();
        let forced = CancellationToken::new();
        let tracker = TaskTracker::new();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            back_off_after_accept_error(&e).await;
                            continue;
                        }
                    };
                    tracker.spawn(handle_connection(
                        acceptor.clone(),
                        stream,
                        peer,
                        router.clone(),
                        limits,
                        graceful.clone(),
                        forced.clone(),
                    ));
                }
            }
        }

        drop(listener);
        graceful.cancel();
        tracker.close();

        tracing::info!(
            active_connections = tracker.len(),
            timeout_seconds = limits.shutdown_timeout.as_secs(),
            "waiting for active connections to drain"
        );

        if tokio::time::timeout(limits.shutdown_timeout, tracker.wait())
            .await
            .is_ok()
        {
            tracing::info!("all connections drained, shutting down cleanly");
            return Ok(());
        }

        let remaining = tracker.len();
        tracing::warn!(
            active_connections = remaining,
            "shutdown timeout reached, forcing connections closed"
        );
        forced.cancel();
        Err(Error::ShutdownTimeout { remaining })
    }
}

async fn back_off_after_accept_error(err: &io::Error) {
    tracing::error!(error = %err, "failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

async fn handle_connection(
    acceptor: Option<TlsAcceptor>,
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    limits: ConnectionLimits,
    graceful: CancellationToken,
    forced: CancellationToken,
) {
    let stream = WriteDeadline::new(stream, limits.write_timeout);
    let Some(acceptor) = acceptor else {
        serve_http(stream, peer, router, limits, graceful, forced).await;
        return;
    };

    let tls = tokio::select! {
        handshake = tokio::time::timeout(limits.read_timeout, acceptor.accept(stream)) => {
            match handshake {
                Ok(Ok(tls)) => tls,
                Ok(Err(e)) => {
                    tracing::debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    tracing::debug!(%peer, "TLS handshake timed out");
                    return;
                }
            }
        }
        () = forced.cancelled() => return,
    };
    serve_http(tls, peer, router, limits, graceful, forced).await;
}

async fn serve_http<I>(
    io: I,
    peer: SocketAddr,
    router: Router,
    limits: ConnectionLimits,
    graceful: CancellationToken,
    forced: CancellationToken,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let activity = Arc::new(Activity::default());
    let service = {
        let activity = Arc::clone(&activity);
        hyper::service::service_fn(move |request: Request<Incoming>| {
            let in_flight = activity.begin();
            let router = router.clone();
            async move {
                let response = router.oneshot(request).await;
                drop(in_flight);
                response
            }
        })
    };

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(limits.read_timeout);
    builder.http2().timer(TokioTimer::new());

    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let idle = activity.idle_for(limits.idle_timeout);
    tokio::pin!(idle);

    let mut closing = false;
    loop {
        tokio::select! {
            served = conn.as_mut() => {
                if let Err(e) = served {
                    tracing::debug!(%peer, error = %e, "connection closed with error");
                }
                break;
            }
            () = graceful.cancelled(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            () = &mut idle, if !closing => {
                tracing::debug!(%peer, "closing idle connection");
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            () = forced.cancelled() => {
                tracing::debug!(%peer, "connection force-closed");
                break;
            }
        }
    }
}

/// Tracks requests in flight on one connection.
#[derive(Default)]
struct Activity {
    in_flight: AtomicUsize,
    changed: Notify,
}

impl Activity {
    fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.changed.notify_waiters();
        InFlight(Arc::clone(self))
    }

    /// Resolves once no request has been in flight for `timeout`.
    async fn idle_for(&self, timeout: Duration) {
        loop {
            let changed = self.changed.notified();
            if self.in_flight.load(Ordering::Acquire) > 0 {
                changed.await;
                continue;
            }
            let quiet = tokio::time::timeout(timeout, changed).await.is_err();
            if quiet && self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
        }
    }
}

struct InFlight(Arc<Activity>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.0.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_fires_after_quiet_period() {
        let activity = Activity::default();
        let started = tokio::time::Instant::now();
        activity.idle_for(Duration::from_secs(60)).await;
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_waits_for_in_flight_requests() {
        let activity = Arc::new(Activity::default());
        let request = activity.begin();

        let watcher = {
            let activity = Arc::clone(&activity);
            tokio::spawn(async move { activity.idle_for(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!watcher.is_finished());

        let released = tokio::time::Instant::now();
        drop(request);
        watcher.await.unwrap();
        assert!(released.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn accept_errors_pause_the_loop() {
        let started = tokio::time::Instant::now();
        back_off_after_accept_error(&io::Error::other("too many open files")).await;
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }

    #[test]
    fn in_flight_guard_balances_counter() {
        let activity = Arc::new(Activity::default());
        let a = activity.begin();
        let b = activity.begin();
        assert_eq!(activity.in_flight.load(Ordering::Acquire), 2);
        drop(a);
        drop(b);
        assert_eq!(activity.in_flight.load(Ordering::Acquire), 0);
    }
}
