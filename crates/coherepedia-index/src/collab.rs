//! Interfaces to the systems around the index.
//!
//! The index stores vectors only. Row content lives in a [`ContentStore`]
//! keyed by node id, rows arrive from a sharded [`Dataset`], and text
//! queries are embedded by an [`EmbeddingProvider`]. In-memory versions of
//! the store and the dataset are provided for tests and benchmarks.

use crate::error::{IndexError, Result};
use coherepedia_vector::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Row content keyed by node id.
pub trait ContentStore: Sync {
    fn put(&self, id: NodeId, record: Vec<u8>) -> Result<()>;

    fn get(&self, id: NodeId) -> Result<Option<Vec<u8>>>;

    /// Number of stored records.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns query text into a vector.
pub trait EmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Source rows, split into independently readable shards.
pub trait Dataset: Sync {
    fn shard_count(&self) -> usize;

    /// Upper bound on the total number of rows; sizes the build arenas.
    fn row_hint(&self) -> usize;

    /// Feed every row of `shard` to `f` as `(record, embedding)`.
    ///
    /// Stops at the first error from `f`.
    fn for_each_row(
        &self,
        shard: usize,
        f: &mut dyn FnMut(Vec<u8>, &[f32]) -> Result<()>,
    ) -> Result<()>;
}

/// [`ContentStore`] backed by a hash map.
#[derive(Default)]
pub struct MemoryContentStore {
    records: RwLock<HashMap<NodeId, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for MemoryContentStore {
    fn put(&self, id: NodeId, record: Vec<u8>) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(&id) {
            return Err(IndexError::Collaborator(format!(
                "content for node {} already stored",
                id
            )));
        }
        records.insert(id, record);
        Ok(())
    }

    fn get(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}

/// One dataset row.
pub type Row = (Vec<u8>, Vec<f32>);

/// [`Dataset`] held entirely in memory.
pub struct MemoryDataset {
    shards: Vec<Vec<Row>>,
}

impl MemoryDataset {
    pub fn new(shards: Vec<Vec<Row>>) -> Self {
        Self { shards }
    }

    /// Spread `vectors` round-robin over `shard_count` shards. Each record
    /// is the row's position in `vectors`, as little-endian u64.
    pub fn from_vectors(vectors: Vec<Vec<f32>>, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards: Vec<Vec<Row>> = (0..shard_count).map(|_| Vec::new()).collect();
        for (i, v) in vectors.into_iter().enumerate() {
            shards[i % shard_count].push(((i as u64).to_le_bytes().to_vec(), v));
        }
        Self { shards }
    }
}

impl Dataset for MemoryDataset {
    fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn row_hint(&self) -> usize {
        self.shards.iter().map(Vec::len).sum()
    }

    fn for_each_row(
        &self,
        shard: usize,
        f: &mut dyn FnMut(Vec<u8>, &[f32]) -> Result<()>,
    ) -> Result<()> {
        let rows = self.shards.get(shard).ok_or_else(|| {
            IndexError::Collaborator(format!(
                "shard {} out of range ({} shards)",
                shard,
                self.shards.len()
            ))
        })?;
        for (record, embedding) in rows {
            f(record.clone(), embedding)?;
        }
        Ok(())
    }
}
