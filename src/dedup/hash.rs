use super::normalize::normalize_url;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the normalized form of `url`
pub fn url_hash(url: &str) -> String {
    sha256_hex(normalize_url(url).as_bytes())
}

/// Hex SHA-256 of `text` with every whitespace run collapsed to one space
pub fn content_hash(text: &str) -> String {
    sha256_hex(collapse_whitespace(text).as_bytes())
}

/// Collapses whitespace runs to a single space and trims both ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
