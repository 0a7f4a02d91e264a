//! Core building blocks of the key server: the CSPRNG-backed random source,
//! the URL-safe encoder, the per-instance Prometheus collectors and the
//! [`KeyService`] that applies the length policy on top of them.
//!
//! Nothing in here knows about HTTP or TLS. The server crate wires these
//! pieces together behind an axum router.

mod encoding;
mod error;
mod metrics;
mod random;
mod service;

pub use crate::encoding::*;
pub use crate::error::*;
pub use crate::metrics::*;
pub use crate::random::*;
pub use crate::service::*;
