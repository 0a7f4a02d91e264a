//! # Logging
//!
//! All diagnostics go through `tracing`. The subscriber installed here prints
//! events to stdout either as multi-line pretty output (the default) or as one
//! JSON object per line, selected by `LOG_FORMAT`.
//!
//! Verbosity follows `RUST_LOG` and falls back to `info`:
//!
//! ```bash
//! RUST_LOG=key_server=debug,tower_http=debug key-server
//! ```
//!
//! Request spans come from `tower_http::trace::TraceLayer`; events emitted
//! while a request is processed are nested under its span.
//!
//! Metrics are not exported from here. They are scraped from `/metrics`,
//! which reads the application's own registry.

use crate::server::config::LogFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global `tracing` subscriber.
///
/// # Errors
///
/// Fails if a global subscriber has already been set.
pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    let layer = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_line_number(true)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_file(true);

    match format {
        LogFormat::Pretty => registry.with(layer.pretty()).try_init()?,
        LogFormat::Json => registry
            .with(layer.json().flatten_event(true).with_current_span(true))
            .try_init()?,
    }

    Ok(())
}
