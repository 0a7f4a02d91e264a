//! Server-side wiring: configuration, telemetry, TLS, routing and the
//! connection listener.
//!
//! ## Structure
//!
//! - [`config`] - CLI/environment parsing into an immutable [`config::ServerConfig`].
//! - [`telemetry`] - `tracing` subscriber setup.
//! - [`service`] - axum router and request handlers.
//! - [`tls`] - certificate loading and the hardened rustls policy.
//! - [`listener`] - accept loop and graceful shutdown.
//! - [`deadline`] - per-socket write deadline.
//! - [`app`] - ties the pieces together per application instance.

pub mod app;
pub mod config;
pub mod deadline;
pub mod error;
pub mod listener;
pub mod service;
pub mod telemetry;
pub mod tls;
