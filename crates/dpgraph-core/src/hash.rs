//! Stable hashing for expression trees, tensors, and publish receipts.

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    Hash256(blake3::hash(bytes).into())
}

/// Hash any serde-serializable value deterministically (via JSON).
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256, crate::error::Error> {
    let bytes = serde_json::to_vec(v)?;
    Ok(hash_bytes(&bytes))
}

/// Digest of a tensor's shape, dtype and raw little-endian values.
pub fn hash_tensor(t: &Tensor) -> Hash256 {
    let mut h = Hasher::new();
    h.update(t.dtype().name().as_bytes());
    for d in t.shape().dims() {
        h.update(&(*d as u64).to_le_bytes());
    }
    for v in t.data() {
        h.update(&v.to_le_bytes());
    }
    Hash256(h.finalize().into())
}
