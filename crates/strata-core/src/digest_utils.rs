/// Returns the first six bytes of the SHA-256 digest of `bytes` as lowercase hex.
///
/// Used to build compact, collision-resistant suffixes for synthesized
/// delivery identifiers.
pub fn short_payload_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    digest[..6]
        .iter()
        .map(|value| format!("{:02x}", value))
        .collect::<String>()
}
