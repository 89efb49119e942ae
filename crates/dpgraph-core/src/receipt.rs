//! Audit receipt emitted by every private publish.
//!
//! Records what was charged to whom and which sources were redacted, so a
//! release can be justified after the fact without keeping the private inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;
use crate::id::{DataSubject, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub id: ReceiptId,

    /// Stable hash of the expression tree that was released.
    pub expr_hash: Hash256,

    /// Library version string for provenance.
    pub engine_version: String,

    pub sigma: f64,
    pub delta: f64,

    /// Lipschitz bound used for calibration (1 for linear nodes).
    pub sensitivity: f64,

    /// Standard deviation of the noise actually added.
    pub noise_scale: f64,

    /// Epsilon successfully deducted per subject in this call.
    pub charged: BTreeMap<DataSubject, f64>,

    /// Sources replaced by zero stand-ins before release.
    pub dropped_sources: Vec<NodeId>,

    /// Drop-and-retry rounds taken.
    pub retries: usize,

    /// Digest of the released (noised) value.
    pub output_digest: Option<Hash256>,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl PublishReceipt {
    pub fn new(expr_hash: Hash256, sigma: f64, delta: f64, started_ms: u64) -> Self {
        Self {
            id: ReceiptId(Uuid::new_v4()),
            expr_hash,
            engine_version: crate::VERSION.to_string(),
            sigma,
            delta,
            sensitivity: 0.0,
            noise_scale: 0.0,
            charged: BTreeMap::new(),
            dropped_sources: Vec::new(),
            retries: 0,
            output_digest: None,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64, output_digest: Option<Hash256>) -> Self {
        self.finished_ms = finished_ms;
        self.output_digest = output_digest;
        self
    }

    /// Total epsilon charged across subjects.
    pub fn total_charged(&self) -> f64 {
        self.charged.values().sum()
    }
}

/// Wall-clock milliseconds since the Unix epoch (0 if the clock is before it).
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
