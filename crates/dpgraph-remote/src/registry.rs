//! Per-party object store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use dpgraph_core::id::ObjectId;
use dpgraph_core::tensor::Tensor;
use dpgraph_lazy::LazyNode;

use crate::error::{RemoteError, Result};
use crate::infer::PublicMeta;

/// What a party can hold: a tracked node or a plain public tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StoredObject {
    Node(LazyNode),
    Tensor(Tensor),
}

impl StoredObject {
    pub fn meta(&self) -> PublicMeta {
        match self {
            StoredObject::Node(n) => PublicMeta {
                shape: n.shape().clone(),
                dtype: n.dtype(),
                bounds: n.bounds().clone(),
                subjects: n.subjects().clone(),
            },
            StoredObject::Tensor(t) => PublicMeta::of_tensor(t),
        }
    }

    /// The current value (a node's materialized value).
    pub fn value(&self) -> &Tensor {
        match self {
            StoredObject::Node(n) => n.value(),
            StoredObject::Tensor(t) => t,
        }
    }

    pub fn as_node(&self) -> Option<&LazyNode> {
        match self {
            StoredObject::Node(n) => Some(n),
            StoredObject::Tensor(_) => None,
        }
    }
}

impl From<LazyNode> for StoredObject {
    fn from(n: LazyNode) -> Self {
        StoredObject::Node(n)
    }
}

impl From<Tensor> for StoredObject {
    fn from(t: Tensor) -> Self {
        StoredObject::Tensor(t)
    }
}

#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: HashMap<ObjectId, StoredObject>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `obj` under `id`, returning whatever it replaced.
    pub fn insert(&mut self, id: ObjectId, obj: StoredObject) -> Option<StoredObject> {
        self.objects.insert(id, obj)
    }

    pub fn get(&self, id: ObjectId) -> Result<&StoredObject> {
        self.objects.get(&id).ok_or(RemoteError::UnknownObject(id))
    }

    /// Remove and return; the registry no longer holds the object.
    pub fn take(&mut self, id: ObjectId) -> Result<StoredObject> {
        self.objects.remove(&id).ok_or(RemoteError::UnknownObject(id))
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<StoredObject> {
        self.objects.remove(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.objects.keys().copied().collect();
        ids.sort();
        ids
    }
}
