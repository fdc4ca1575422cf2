//! Per-worker record of touched cold chunks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_common::Id;

static NEXT_CLIPPER_ID: AtomicU64 = AtomicU64::new(1);

/// Tracks which cold chunks one inserter holds open.
///
/// A cold chunk stays resident while any clipper references it. Releasing
/// the clipper hands each chunk back to the registry, which persists and
/// evicts chunks that no clipper references anymore.
#[derive(Debug)]
pub struct Clipper {
    id: u64,
    chunks: BTreeMap<Id, Id>,
}

impl Clipper {
    pub fn new() -> Self {
        Self {
            id: NEXT_CLIPPER_ID.fetch_add(1, Ordering::Relaxed),
            chunks: BTreeMap::new(),
        }
    }

    /// Unique id of this clipper.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Records a touched chunk. Returns true the first time it is seen.
    pub fn insert(&mut self, chunk_id: Id, chunk_num: Id) -> bool {
        match self.chunks.entry(chunk_id) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(chunk_num);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Removes and returns every `(chunk id, chunk number)` pair.
    pub fn drain(&mut self) -> Vec<(Id, Id)> {
        std::mem::take(&mut self.chunks).into_iter().collect()
    }
}

impl Default for Clipper {
    fn default() -> Self {
        Self::new()
    }
}
