use crate::{Error, RandomBytes, Result};
use rand::TryRngCore;
use rand::rngs::OsRng;

/// A `RandomBytes` source backed by the operating system CSPRNG (`OsRng`).
///
/// This type does not hold any state; every call goes straight to the OS
/// (`getrandom(2)` on Linux). A refusal from the OS is reported as
/// [`Error::RandomFailure`] instead of panicking, and is never retried.
#[derive(Default, Clone, Copy, Debug)]
pub struct OsRandom;

impl RandomBytes for OsRandom {
    fn fill(&self, n: i64) -> Result<Vec<u8>> {
        let len = usize::try_from(n)
            .ok()
            .filter(|&len| len > 0)
            .ok_or(Error::InvalidLength { length: n })?;

        let mut buf = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| Error::RandomFailure {
                reason: e.to_string(),
            })?;
        Ok(buf)
    }
}
