//! Domain-separated SHA-256 helpers for identifier derivation.

use crate::Hash32;
use sha2::{Digest, Sha256};

/// Domain separation tag for operation selector derivation.
pub const OPERATION_ID_DOMAIN_V1: &[u8] = b"NESTRA_OPERATION_ID_V1";

/// Domain separation tag for module identifier derivation.
pub const MODULE_ID_DOMAIN_V1: &[u8] = b"NESTRA_MODULE_ID_V1";

/// Compute a deterministic SHA-256 hash of a byte slice.
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    Hash32(bytes)
}

/// Compute a domain-separated SHA-256 hash: `H(domain || data)`.
pub fn sha256_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    Hash32(bytes)
}
