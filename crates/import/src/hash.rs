use sha2::{Digest, Sha256};

/// SHA-256 of the raw statement file, lowercase hex. Used to refuse a second
/// upload of the same bytes.
pub fn file_hash(data: &[u8]) -> String {
    let digest: [u8; 32] = Sha256::digest(data).into();
    to_hex(&digest)
}

pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}
