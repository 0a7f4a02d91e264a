use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;

/// Encodes raw key material as URL-safe base64 (`-` and `_`, `=` padded).
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Decodes text produced by [`encode`] back into bytes.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    URL_SAFE.decode(text).map_err(|e| Error::Decode {
        reason: e.to_string(),
    })
}
