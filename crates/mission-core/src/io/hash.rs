//! Content hashing for change detection

/// Compute the BLAKE3 hash of `content` as lowercase hex.
pub fn compute_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}
