//! HTTP surface of the key server.
//!
//! Requests arrive here already decrypted by the listener. Handlers delegate
//! key issuance to [`key_server_core::Keys`] and record their outcome on the
//! application's own [`key_server_core::PrometheusMetrics`].
//!
//! ## Structure
//!
//! - [`router`] - route table, fallbacks and tower layers.
//! - [`handler`] - request handlers and the error-to-response mapping.

pub mod handler;
pub mod router;
