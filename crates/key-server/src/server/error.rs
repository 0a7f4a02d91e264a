//! Errors that abort startup or shutdown of the server.
//!
//! Request-level failures never surface here; they are mapped to HTTP
//! responses in [`crate::server::service::handler`].
//!
//! ## Error Cases
//! - `Startup`: missing or unreadable certificate material, bad bind address.
//! - `Tls`: rustls rejected the policy or the key pair.
//! - `Io`: a socket operation failed.
//! - `ShutdownTimeout`: connections were still open when the drain deadline
//!   expired and had to be force-closed.
//! - `Core`: the collector registry could not be built.

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("startup failed: {context}")]
    Startup { context: String },

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("graceful shutdown timed out with {remaining} connection(s) still open")]
    ShutdownTimeout { remaining: usize },

    #[error(transparent)]
    Core(#[from] key_server_core::Error),
}

impl Error {
    pub fn startup(context: impl Into<String>) -> Self {
        Self::Startup {
            context: context.into(),
        }
    }
}
