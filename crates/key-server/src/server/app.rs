use crate::server::config::ServerConfig;
use crate::server::error::Result;
use crate::server::listener::{ConnectionLimits, Listener};
use crate::server::service::handler::AppState;
use crate::server::service::router::router;
use crate::server::tls::load_server_config;
use axum::Router;
use core::future::Future;
use key_server_core::{KeyService, Keys, OsRandom, PrometheusMetrics};
use std::net::SocketAddr;
use std::sync::Arc;

/// Routes served by every instance, for startup logging.
pub const ROUTES: &[(&str, &str)] = &[
    ("GET", "/health"),
    ("GET", "/ready"),
    ("GET", "/key/{length}"),
    ("GET", "/metrics"),
];

/// One fully wired key server.
///
/// Owns its own metrics registry, so several instances can live in the same
/// process without sharing counters.
pub struct Application {
    config: Arc<ServerConfig>,
    metrics: Arc<PrometheusMetrics>,
    router: Router,
}

impl Application {
    /// Builds the service graph without touching the network or TLS files.
    ///
    /// # Errors
    ///
    /// Fails only if the metrics registry cannot be assembled.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let config = Arc::new(config);
        let metrics = Arc::new(PrometheusMetrics::new(config.max_size)?);
        let keys: Arc<dyn Keys> = Arc::new(KeyService::new(
            OsRandom,
            Arc::clone(&metrics),
            config.max_size,
        ));
        let state = AppState::new(keys, Arc::clone(&metrics));
        let router = router(state, config.write_timeout);

        Ok(Self {
            config,
            metrics,
            router,
        })
    }

    /// The request router, for driving the handlers in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn metrics(&self) -> &Arc<PrometheusMetrics> {
        &self.metrics
    }

    /// Loads the TLS material, if any is configured, and binds the listening
    /// socket.
    ///
    /// # Errors
    ///
    /// Returns a startup error if the certificate or key cannot be loaded or
    /// the address cannot be bound.
    pub async fn bind(self) -> Result<Server> {
        let tls = match &self.config.tls {
            Some(files) => Some(load_server_config(&files.cert_path, &files.key_path)?),
            None => {
                tracing::warn!("TLS certificates not provided, serving plain HTTP");
                None
            }
        };
        let listener = Listener::bind(
            &self.config.listen_addr(),
            tls,
            ConnectionLimits::from(self.config.as_ref()),
        )
        .await?;

        let addr = listener.local_addr()?;
        for (method, path) in ROUTES {
            tracing::info!(%method, %path, "registered route");
        }
        if listener.is_tls() {
            tracing::info!(%addr, "key server listening over TLS");
        } else {
            tracing::info!(%addr, "key server listening over plain HTTP");
        }

        Ok(Server {
            listener,
            router: self.router,
        })
    }

    /// Binds and serves until `shutdown` resolves and connections drain.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.bind().await?.run(shutdown).await
    }
}

/// A bound, not yet accepting, server.
pub struct Server {
    listener: Listener,
    router: Router,
}

impl Server {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`crate::server::error::Error::ShutdownTimeout`] if connections
    /// outlive the shutdown deadline.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.listener.serve(self.router, shutdown).await
    }
}
