//! Cold chunk residency.
//!
//! Cold chunks are created or loaded on first touch and stay resident while
//! any clipper references them. When the last reference is clipped, the chunk
//! is serialized, written, and evicted; a later touch loads it back from
//! storage.

use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::climber::Climber;
use crate::clipper::Clipper;
use crate::context::BuildContext;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use strata_common::{ChunkInfo, Id, Result, StrataError};
use strata_storage::Endpoint;
use tracing::debug;

/// Residency state of one cold chunk.
#[derive(Default)]
struct ColdEntry {
    /// The chunk while resident. Locked across load and eviction.
    chunk: Mutex<Option<Arc<Chunk>>>,
    /// Outstanding references per clipper id. A clipper reused after a
    /// release may hold a second reference before the first is clipped.
    refs: Mutex<HashMap<u64, usize>>,
}

/// Registry of cold chunks.
pub struct Cold {
    /// Shared build state.
    ctx: Arc<BuildContext>,
    /// Chunk storage.
    endpoint: Arc<dyn Endpoint>,
    /// Entries are never removed, so a thread holding one always sees the
    /// chunk it guards.
    entries: Mutex<HashMap<Id, Arc<ColdEntry>>>,
    /// Ids of chunks present in storage.
    stored: Mutex<BTreeSet<Id>>,
}

impl Cold {
    /// Creates an empty cold registry.
    pub fn new(ctx: Arc<BuildContext>, endpoint: Arc<dyn Endpoint>) -> Self {
        Self::with_ids(ctx, endpoint, Vec::new())
    }

    /// Creates a cold registry over chunks already in storage.
    pub fn with_ids(ctx: Arc<BuildContext>, endpoint: Arc<dyn Endpoint>, ids: Vec<Id>) -> Self {
        Self {
            ctx,
            endpoint,
            entries: Mutex::new(HashMap::new()),
            stored: Mutex::new(ids.into_iter().collect()),
        }
    }

    /// Returns the cell for the climber's node, making its chunk resident and
    /// recording the reference on `clipper`.
    pub fn get_cell(&self, climber: &Climber, clipper: &mut Clipper) -> Result<Arc<Cell>> {
        let info = self
            .ctx
            .structure()
            .chunk_info(climber.index(), climber.depth());

        let entry = Arc::clone(self.entries.lock().entry(info.chunk_id.clone()).or_default());
        let first = clipper.insert(info.chunk_id.clone(), info.chunk_num.clone());

        let chunk = {
            let mut slot = entry.chunk.lock();
            let chunk = match slot.as_ref() {
                // Collected but unwritten: its cells no longer reach storage.
                Some(chunk) if chunk.is_collected() => {
                    return Err(StrataError::ClipFailed(format!(
                        "chunk {} was not written",
                        info.chunk_id
                    )));
                }
                Some(chunk) => Arc::clone(chunk),
                None => {
                    let chunk = Arc::new(self.load_or_create(&info)?);
                    *slot = Some(Arc::clone(&chunk));
                    chunk
                }
            };
            if first {
                *entry.refs.lock().entry(clipper.id()).or_insert(0) += 1;
            }
            chunk
        };

        chunk.get_cell(climber)
    }

    fn load_or_create(&self, info: &ChunkInfo) -> Result<Chunk> {
        let stored = self.stored.lock().contains(&info.chunk_id);
        if stored {
            debug!(chunk = %info.chunk_id, "reloading cold chunk");
            self.ctx.load_chunk(self.endpoint.as_ref(), &info.chunk_id)
        } else {
            Chunk::create(
                Arc::clone(&self.ctx),
                info.depth,
                info.chunk_id.clone(),
                info.points_per_chunk.clone(),
            )
        }
    }

    /// Drops `clipper_id`'s reference to a chunk, persisting and evicting the
    /// chunk if it was the last one.
    pub fn clip(&self, chunk_id: &Id, clipper_id: u64) -> Result<()> {
        let Some(entry) = self.entries.lock().get(chunk_id).cloned() else {
            return Ok(());
        };

        let mut slot = entry.chunk.lock();
        {
            let mut refs = entry.refs.lock();
            if let Some(count) = refs.get_mut(&clipper_id) {
                *count -= 1;
                if *count == 0 {
                    refs.remove(&clipper_id);
                }
            }
            if !refs.is_empty() {
                return Ok(());
            }
        }

        if let Some(chunk) = slot.take() {
            if let Err(e) = self.persist(&chunk) {
                // Stays resident, closed to inserts, until `release_all`
                // retries the write.
                *slot = Some(chunk);
                return Err(e);
            }
            debug!(chunk = %chunk_id, "clipped cold chunk");
        }
        Ok(())
    }

    fn persist(&self, chunk: &Chunk) -> Result<()> {
        // A chunk whose earlier write failed is already collected and only
        // its write is outstanding.
        if !chunk.is_collected() {
            chunk.collect()?;
        }
        chunk.flush(self.endpoint.as_ref())?;
        self.stored.lock().insert(chunk.id().clone());
        Ok(())
    }

    /// Persists and evicts every resident chunk, regardless of references.
    pub fn release_all(&self) -> Result<()> {
        let entries: Vec<(Id, Arc<ColdEntry>)> = self
            .entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        for (id, entry) in entries {
            let mut slot = entry.chunk.lock();
            entry.refs.lock().clear();
            if let Some(chunk) = slot.take() {
                if let Err(e) = self.persist(&chunk) {
                    *slot = Some(chunk);
                    return Err(e);
                }
                debug!(chunk = %id, "released cold chunk");
            }
        }
        Ok(())
    }

    /// Number of chunks currently resident.
    pub fn resident(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.chunk.lock().is_some())
            .count()
    }

    /// Ids of chunks in storage, ascending.
    pub fn ids(&self) -> Vec<Id> {
        self.stored.lock().iter().cloned().collect()
    }
}
