//! Source maps: which private inputs a node was built from, and the
//! substitutes used when replaying it.

use std::collections::btree_map::{self, BTreeMap};
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use dpgraph_core::bounds::Bounds;
use dpgraph_core::error::{Error, Result};
use dpgraph_core::id::{DataSubject, NodeId};
use dpgraph_core::tensor::Tensor;

use crate::node::LazyNode;

/// Ordered `NodeId -> source` map.
///
/// Entries are leaves or stand-ins for leaves; they carry no sources of their
/// own, so cloning a state only bumps reference counts. Serialized as the
/// list of entries; each entry carries its own id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Arc<LazyNode>>", into = "Vec<Arc<LazyNode>>")]
pub struct SourceState {
    entries: BTreeMap<NodeId, Arc<LazyNode>>,
}

impl SourceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Arc<LazyNode>> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, NodeId, Arc<LazyNode>> {
        self.entries.iter()
    }

    /// Insert under the node's own id, rejecting a different node with the same id.
    pub fn insert(&mut self, node: Arc<LazyNode>) -> Result<()> {
        let id = node.id();
        match self.entries.get(&id) {
            Some(existing) if same_source(existing, &node) => Ok(()),
            Some(_) => Err(Error::IdCollision(id)),
            None => {
                self.entries.insert(id, node);
                Ok(())
            }
        }
    }

    /// Overwrite the entry for `node.id()` unconditionally.
    pub fn replace(&mut self, node: Arc<LazyNode>) {
        self.entries.insert(node.id(), node);
    }

    /// Union of two states. Shared ids must refer to the same source.
    pub fn merge(&self, other: &SourceState) -> Result<SourceState> {
        let (mut out, smaller) = if self.len() >= other.len() {
            (self.clone(), other)
        } else {
            (other.clone(), self)
        };
        for node in smaller.entries.values() {
            out.insert(Arc::clone(node))?;
        }
        Ok(out)
    }

    /// Replace `id` with a zero-valued stand-in of the same shape and dtype,
    /// no subjects and bounds `[0, 0]`.
    pub fn redact(&mut self, id: NodeId) -> Result<()> {
        let current = self.entries.get(&id).ok_or(Error::MissingSource(id))?;
        let stand_in = LazyNode::stand_in(
            id,
            current.value().zeros_like(),
            Bounds::uniform(0.0, 0.0, current.shape().clone()),
            BTreeSet::new(),
        );
        self.entries.insert(id, Arc::new(stand_in));
        Ok(())
    }

    /// Replace `id`'s value, keeping its subjects and bounds.
    pub fn substitute(&mut self, id: NodeId, value: Tensor) -> Result<()> {
        let current = self.entries.get(&id).ok_or(Error::MissingSource(id))?;
        if value.shape() != current.shape() {
            return Err(Error::ShapeMismatch {
                op: "substitute",
                lhs: current.shape().clone(),
                rhs: value.shape().clone(),
            });
        }
        let stand_in = LazyNode::stand_in(
            id,
            value,
            current.bounds().clone(),
            current.subjects().clone(),
        );
        self.entries.insert(id, Arc::new(stand_in));
        Ok(())
    }

    /// Union of the subjects of every entry.
    pub fn subjects(&self) -> BTreeSet<DataSubject> {
        self.entries
            .values()
            .flat_map(|n| n.subjects().iter().cloned())
            .collect()
    }

    /// Ids of the entries owned by `subject`.
    pub fn sources_of(&self, subject: &DataSubject) -> Vec<NodeId> {
        self.entries
            .iter()
            .filter(|(_, n)| n.subjects().contains(subject))
            .map(|(id, _)| *id)
            .collect()
    }
}

impl From<Vec<Arc<LazyNode>>> for SourceState {
    fn from(nodes: Vec<Arc<LazyNode>>) -> Self {
        let entries = nodes.into_iter().map(|n| (n.id(), n)).collect();
        Self { entries }
    }
}

impl From<SourceState> for Vec<Arc<LazyNode>> {
    fn from(state: SourceState) -> Self {
        state.entries.into_values().collect()
    }
}

fn same_source(a: &Arc<LazyNode>, b: &Arc<LazyNode>) -> bool {
    Arc::ptr_eq(a, b) || (a.value() == b.value() && a.subjects() == b.subjects())
}

impl<'a> IntoIterator for &'a SourceState {
    type Item = (&'a NodeId, &'a Arc<LazyNode>);
    type IntoIter = btree_map::Iter<'a, NodeId, Arc<LazyNode>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
