use crate::Result;

/// A trait for sources that hand out a buffer of random bytes.
///
/// This abstraction allows you to plug in the operating system CSPRNG or a
/// deterministic source in tests.
///
/// # Example
/// ```
/// use key_server_core::{Error, RandomBytes, Result};
///
/// struct Zeroes;
/// impl RandomBytes for Zeroes {
///     fn fill(&self, n: i64) -> Result<Vec<u8>> {
///         let len = usize::try_from(n)
///             .ok()
///             .filter(|&len| len > 0)
///             .ok_or(Error::InvalidLength { length: n })?;
///         Ok(vec![0; len])
///     }
/// }
///
/// assert_eq!(Zeroes.fill(4).unwrap(), vec![0, 0, 0, 0]);
/// assert!(Zeroes.fill(0).is_err());
/// ```
pub trait RandomBytes: Send + Sync {
    /// Returns exactly `n` random bytes.
    ///
    /// Implementations must fail with [`crate::Error::InvalidLength`] when
    /// `n <= 0` and must never return a short buffer.
    fn fill(&self, n: i64) -> Result<Vec<u8>>;
}

impl<T: RandomBytes + ?Sized> RandomBytes for std::sync::Arc<T> {
    fn fill(&self, n: i64) -> Result<Vec<u8>> {
        (**self).fill(n)
    }
}
