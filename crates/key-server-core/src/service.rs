use crate::{Error, Metrics, RandomBytes, Result, encode};
use std::sync::Arc;
use std::time::Instant;

/// Issues encoded keys for a requested length.
///
/// The HTTP layer only depends on this trait, so tests can substitute a
/// canned implementation without touching the length policy.
pub trait Keys: Send + Sync {
    /// Returns URL-safe base64 text encoding exactly `length` random bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfRange`] if `length` is not within `1..=max_size`.
    /// - [`Error::Internal`] if the random source failed.
    fn generate(&self, length: i64) -> Result<String>;
}

/// Length policy and timing around a [`RandomBytes`] source.
///
/// The service holds no mutable state of its own: the only shared writes are
/// the metric updates, which are atomic. It is safe to call from any number of
/// tasks at once.
pub struct KeyService<R, M> {
    random: R,
    metrics: Arc<M>,
    max_size: usize,
}

impl<R, M> KeyService<R, M>
where
    R: RandomBytes,
    M: Metrics,
{
    pub fn new(random: R, metrics: Arc<M>, max_size: usize) -> Self {
        Self {
            random,
            metrics,
            max_size,
        }
    }

    fn in_range(&self, length: i64) -> bool {
        length > 0 && u64::try_from(length).is_ok_and(|len| len <= self.max_size as u64)
    }
}

impl<R, M> Keys for KeyService<R, M>
where
    R: RandomBytes,
    M: Metrics,
{
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    fn generate(&self, length: i64) -> Result<String> {
        self.metrics.record_generation_request();

        if !self.in_range(length) {
            self.metrics.record_invalid_length();
            return Err(Error::OutOfRange {
                length,
                max: self.max_size,
            });
        }

        let start = Instant::now();
        let drawn = self.random.fill(length);
        // Observed for failed draws too so the histogram counts every attempt.
        self.metrics
            .observe_generation_duration(start.elapsed().as_secs_f64(), length);

        let bytes = match drawn {
            Ok(bytes) => bytes,
            Err(cause) => {
                self.metrics.record_generation_error();
                #[cfg(feature = "tracing")]
                tracing::warn!(length, error = %cause, "random source failed");
                return Err(Error::internal(cause));
            }
        };

        let key = encode(&bytes);
        self.metrics.observe_generated_key_length(length);
        Ok(key)
    }
}
