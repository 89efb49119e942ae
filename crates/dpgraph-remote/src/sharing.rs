//! Fallback for operations whose operands live on different parties.
//!
//! The protocol itself is out of scope; a backend is plugged in through
//! [`SecretSharing`].

use serde::{Deserialize, Serialize};

use dpgraph_core::id::{ObjectId, PartyId};

use crate::error::Result;
use crate::handle::RemoteHandle;
use crate::infer::PublicMeta;
use crate::op::RemoteOp;

/// Result of a secret-shared computation: one share per party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedTensor {
    pub op: String,
    pub shares: Vec<(PartyId, ObjectId)>,
    pub meta: PublicMeta,
}

pub trait SecretSharing: Send + Sync {
    /// Evaluate `lhs op rhs` where the handles belong to different parties.
    /// `meta` is the locally inferred public metadata of the result.
    fn apply(
        &self,
        op: &RemoteOp,
        lhs: &RemoteHandle,
        rhs: &RemoteHandle,
        meta: PublicMeta,
    ) -> Result<SharedTensor>;
}

/// What [`crate::Client::apply`] hands back.
#[derive(Debug, Clone)]
pub enum RemoteValue {
    Handle(RemoteHandle),
    Shared(SharedTensor),
}

impl RemoteValue {
    pub fn into_handle(self) -> Option<RemoteHandle> {
        match self {
            RemoteValue::Handle(h) => Some(h),
            RemoteValue::Shared(_) => None,
        }
    }

    pub fn meta(&self) -> &PublicMeta {
        match self {
            RemoteValue::Handle(h) => h.meta(),
            RemoteValue::Shared(s) => &s.meta,
        }
    }
}
