//! Requester-side handle to an object living on another party.

use std::collections::BTreeSet;

use rand::Rng;

use dpgraph_core::bounds::{Bounds, ValueBounds};
use dpgraph_core::dtype::DType;
use dpgraph_core::error::Result as CoreResult;
use dpgraph_core::id::{DataSubject, ObjectId, PartyId};
use dpgraph_core::shape::Shape;
use dpgraph_core::tensor::Tensor;

use crate::infer::PublicMeta;
use crate::transport::Ticket;

#[derive(Debug, Clone, PartialEq)]
pub enum HandleStatus {
    /// Command sent, no reply seen yet.
    Processing,
    Ready,
    /// The party rejected or failed the command.
    Failed(String),
}

/// Opaque reference plus public metadata. Never holds the value.
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    owner: PartyId,
    id_at_location: ObjectId,
    meta: PublicMeta,
    status: HandleStatus,
    pub(crate) pending: Option<Ticket>,
    /// Uploaded array operand, deleted once the command resolves.
    pub(crate) scratch: Option<ObjectId>,
}

impl RemoteHandle {
    pub(crate) fn ready(owner: PartyId, id_at_location: ObjectId, meta: PublicMeta) -> Self {
        Self {
            owner,
            id_at_location,
            meta,
            status: HandleStatus::Ready,
            pending: None,
            scratch: None,
        }
    }

    pub(crate) fn processing(
        owner: PartyId,
        id_at_location: ObjectId,
        meta: PublicMeta,
        ticket: Ticket,
    ) -> Self {
        Self {
            owner,
            id_at_location,
            meta,
            status: HandleStatus::Processing,
            pending: Some(ticket),
            scratch: None,
        }
    }

    pub(crate) fn resolve(&mut self, status: HandleStatus) {
        self.status = status;
        self.pending = None;
    }

    pub fn owner(&self) -> &PartyId {
        &self.owner
    }

    pub fn id_at_location(&self) -> ObjectId {
        self.id_at_location
    }

    pub fn meta(&self) -> &PublicMeta {
        &self.meta
    }

    pub fn shape(&self) -> &Shape {
        &self.meta.shape
    }

    pub fn dtype(&self) -> DType {
        self.meta.dtype
    }

    pub fn bounds(&self) -> &Bounds {
        &self.meta.bounds
    }

    pub fn min_vals(&self) -> &ValueBounds {
        &self.meta.bounds.min
    }

    pub fn max_vals(&self) -> &ValueBounds {
        &self.meta.bounds.max
    }

    pub fn subjects(&self) -> &BTreeSet<DataSubject> {
        &self.meta.subjects
    }

    pub fn status(&self) -> &HandleStatus {
        &self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == HandleStatus::Ready
    }

    /// A uniform random tensor within the public bounds, for display only.
    pub fn synthetic<R: Rng + ?Sized>(&self, rng: &mut R) -> CoreResult<Tensor> {
        Ok(self
            .meta
            .bounds
            .sample(|| rng.gen::<f64>())?
            .cast(self.meta.dtype))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[test]
    fn synthetic_preview_stays_in_bounds() {
        let meta = PublicMeta {
            shape: Shape::from([50]),
            dtype: DType::Float64,
            bounds: Bounds::uniform(-2.0, 3.0, [50]),
            subjects: BTreeSet::new(),
        };
        let h = RemoteHandle::ready(PartyId::from("bob"), ObjectId::new(1), meta);
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let preview = h.synthetic(&mut rng).unwrap();
        assert_eq!(preview.shape(), &Shape::from([50]));
        assert!(preview.data().iter().all(|v| (-2.0..=3.0).contains(v)));
        assert!(h.is_ready());
    }
}
