//! Miscellaneous helper utilities.
use std::path::Path;

use base64::Engine;
use rsa::rand_core::{OsRng, RngCore};

use crate::error::Result;

/// Ensure a file path's parent directory exists.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Fill a buffer of `len` bytes from the OS RNG.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Random uppercase hex string of `chars` characters.
#[must_use]
pub fn random_hex_upper(chars: usize) -> String {
    let mut out = hex::encode_upper(random_bytes(chars.div_ceil(2)));
    out.truncate(chars);
    out
}

/// Random lowercase hex string of `chars` characters.
#[must_use]
pub fn random_hex(chars: usize) -> String {
    let mut out = hex::encode(random_bytes(chars.div_ceil(2)));
    out.truncate(chars);
    out
}

/// Standard base64 with padding.
#[must_use]
pub fn b64_encode(data: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode standard base64.
pub fn b64_decode(data: &str) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data.trim())?)
}

/// Base64url without padding, as used by JWK and ClearKey init data.
#[must_use]
pub fn b64url_encode(data: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

/// Decode base64url, tolerating optional padding.
pub fn b64url_decode(data: &str) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data.trim().trim_end_matches('='))?)
}

/// Encode a string as UTF-16LE bytes.
#[must_use]
pub fn utf16le_encode(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// Decode UTF-16LE bytes, replacing invalid sequences. A trailing odd byte is dropped.
#[must_use]
pub fn utf16le_decode(data: &[u8]) -> String {
    let units = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect::<Vec<u16>>();
    String::from_utf16_lossy(&units)
}

/// Seconds since the unix epoch.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_hex_has_requested_length() {
        let id = random_hex_upper(32);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(random_hex(7).len(), 7);
    }

    #[test]
    fn utf16le_roundtrip() {
        let bytes = utf16le_encode("<WRMHEADER/>");
        assert_eq!(bytes.len(), 24);
        assert_eq!(utf16le_decode(&bytes), "<WRMHEADER/>");
    }

    #[test]
    fn b64url_accepts_padding() {
        let kid = hex::decode("9eb4050de44b4802932e27d75083e266").unwrap();
        let enc = b64url_encode(&kid);
        assert_eq!(enc, "nrQFDeRLSAKTLifXUIPiZg");
        assert_eq!(b64url_decode(&format!("{}==", enc)).unwrap(), kid);
    }
}
