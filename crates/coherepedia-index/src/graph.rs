//! In-memory graph storage for concurrent construction.
//!
//! The graph is a pre-sized arena indexed by node id. Each node's neighbor
//! list sits behind its own `RwLock`, so insertions touching disjoint nodes
//! never contend. Callers must never hold two node locks at once.

use crate::error::{IndexError, Result};
use crate::format::NO_NODE;
use coherepedia_vector::NodeId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::OnceLock;

struct Slot {
    present: AtomicBool,
    neighbors: RwLock<Vec<NodeId>>,
}

/// Concurrently mutable graph with a fixed capacity.
pub struct ConcurrentGraph {
    slots: Vec<Slot>,
    /// Traversal start node, `NO_NODE` until the first insertion
    entry: AtomicU32,
    /// Number of claimed nodes
    size: AtomicUsize,
    /// Degree bound R (lists may transiently exceed it)
    max_degree: usize,
}

impl ConcurrentGraph {
    /// Create an empty graph able to hold ids `0..capacity`.
    pub fn new(capacity: usize, max_degree: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                present: AtomicBool::new(false),
                neighbors: RwLock::new(Vec::new()),
            })
            .collect();

        Self {
            slots,
            entry: AtomicU32::new(NO_NODE),
            size: AtomicUsize::new(0),
            max_degree,
        }
    }

    /// Claim `id` for insertion.
    ///
    /// Fails if the id is outside the arena or was already claimed.
    pub fn claim(&self, id: NodeId) -> Result<()> {
        let slot = self.slot(id)?;
        if slot.present.swap(true, Ordering::AcqRel) {
            return Err(IndexError::DuplicateNode(id));
        }
        self.size.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Make `id` the entry point if there is none yet.
    ///
    /// Returns true if this call won.
    pub fn try_set_entry(&self, id: NodeId) -> bool {
        self.entry
            .compare_exchange(NO_NODE, id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Traversal start node.
    pub fn entry_node(&self) -> Option<NodeId> {
        match self.entry.load(Ordering::Acquire) {
            NO_NODE => None,
            id => Some(id),
        }
    }

    /// True if `id` has been claimed.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id as usize)
            .map(|s| s.present.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Snapshot of a node's neighbor list.
    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        self.slots
            .get(id as usize)
            .map(|s| s.neighbors.read().clone())
            .unwrap_or_default()
    }

    /// Copy a node's neighbor list into `out` (cleared first).
    pub fn neighbors_into(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.clear();
        if let Some(slot) = self.slots.get(id as usize) {
            out.extend_from_slice(&slot.neighbors.read());
        }
    }

    /// Replace a node's neighbor list.
    pub fn set_neighbors(&self, id: NodeId, neighbors: Vec<NodeId>) -> Result<()> {
        *self.slot(id)?.neighbors.write() = neighbors;
        Ok(())
    }

    /// Run `f` with exclusive access to one node's neighbor list.
    pub fn update_neighbors<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut Vec<NodeId>) -> R,
    ) -> Result<R> {
        let mut guard = self.slot(id)?.neighbors.write();
        Ok(f(&mut guard))
    }

    /// Ids of all claimed nodes, ascending.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.present.load(Ordering::Acquire))
            .map(|(id, _)| id as NodeId)
    }

    /// Number of claimed nodes.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of ids the arena can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Largest neighbor list in the graph.
    pub fn max_observed_degree(&self) -> usize {
        self.slots
            .iter()
            .map(|s| s.neighbors.read().len())
            .max()
            .unwrap_or(0)
    }

    fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots
            .get(id as usize)
            .ok_or(IndexError::CapacityExceeded {
                id,
                capacity: self.slots.len(),
            })
    }
}

/// Write-once per-id storage for full-precision vectors.
pub struct VectorArena {
    slots: Vec<OnceLock<Box<[f32]>>>,
    dimension: usize,
}

impl VectorArena {
    pub fn new(capacity: usize, dimension: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            dimension,
        }
    }

    /// Store the vector for `id`. Each id can be set once.
    pub fn set(&self, id: NodeId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::dimension_mismatch(self.dimension, vector.len()));
        }
        let slot = self
            .slots
            .get(id as usize)
            .ok_or(IndexError::CapacityExceeded {
                id,
                capacity: self.slots.len(),
            })?;
        slot.set(vector.into())
            .map_err(|_| IndexError::DuplicateNode(id))
    }

    pub fn get(&self, id: NodeId) -> Option<&[f32]> {
        self.slots.get(id as usize)?.get().map(|v| &v[..])
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
