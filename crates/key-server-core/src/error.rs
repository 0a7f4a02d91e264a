//! Errors raised while drawing, encoding or accounting for keys.
//!
//! ## Error Cases
//! - `InvalidLength`: the random source was asked for zero or fewer bytes.
//! - `RandomFailure`: the operating system CSPRNG refused to deliver.
//! - `OutOfRange`: the requested length falls outside `1..=max_size`.
//! - `Internal`: a generation failure, wrapping the underlying cause.
//! - `DuplicateCollector`: a collector name was registered twice.
//! - `Decode` / `Exposition`: base64 or metrics text encoding failed.

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The random source only produces positive lengths.
    #[error("key length must be positive, got {length}")]
    InvalidLength { length: i64 },

    /// The underlying CSPRNG could not fill the buffer.
    #[error("failed to read random bytes for key generation: {reason}")]
    RandomFailure { reason: String },

    /// The request violated the configured length policy.
    #[error("key length {length} is out of allowed range (1-{max})")]
    OutOfRange { length: i64, max: usize },

    /// Generation failed after the length was accepted.
    #[error("failed to generate key: {source}")]
    Internal { source: Box<Error> },

    #[error("collector `{name}` is already registered")]
    DuplicateCollector { name: &'static str },

    #[error("invalid URL-safe base64: {reason}")]
    Decode { reason: String },

    #[error("failed to encode metrics: {reason}")]
    Exposition { reason: String },
}

impl Error {
    /// Wraps a lower-level failure as [`Error::Internal`].
    pub fn internal(cause: Error) -> Self {
        Self::Internal {
            source: Box::new(cause),
        }
    }

    /// Returns `true` when the error stems from the caller's input rather
    /// than from the service.
    pub const fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_message_is_literal() {
        let err = Error::OutOfRange {
            length: -10,
            max: 1024,
        };
        assert_eq!(
            err.to_string(),
            "key length -10 is out of allowed range (1-1024)"
        );
        assert!(err.is_out_of_range());
    }

    #[test]
    fn internal_wraps_cause() {
        let err = Error::internal(Error::RandomFailure {
            reason: "entropy pool closed".into(),
        });
        assert_eq!(
            err.to_string(),
            "failed to generate key: failed to read random bytes for key generation: entropy pool closed"
        );
        assert!(!err.is_out_of_range());
        assert!(core::error::Error::source(&err).is_some());
    }
}
