//! Point placement across the base and cold tiers.

use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::climber::Climber;
use crate::clip_pool::ClipPool;
use crate::clipper::Clipper;
use crate::cold::Cold;
use crate::context::BuildContext;
use crate::pool::{PointHandle, PointInfo};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use strata_common::{Id, Metadata, Point, Result, StrataError};
use strata_storage::Endpoint;
use tracing::{debug, info, warn};

/// Priority comparisons measure distance in x, y and z for every structure,
/// including 2D ones.
const COMPARE_IN_3D: bool = true;

/// Clip jobs that may wait behind the running one.
const CLIP_QUEUE_SIZE: usize = 1;

/// Points a batch worker inserts between clipper releases.
const BATCH_RELEASE_INTERVAL: usize = 4096;

/// Returns true if `candidate` is strictly closer to `mid` than `current`.
/// Ties keep the current occupant.
#[inline]
pub fn better(candidate: &Point, current: &Point, mid: &Point, is_3d: bool) -> bool {
    if is_3d {
        candidate.sq_dist_3d(mid) < current.sq_dist_3d(mid)
    } else {
        candidate.sq_dist_2d(mid) < current.sq_dist_2d(mid)
    }
}

/// Insertion counters.
#[derive(Debug, Default)]
pub struct InsertStats {
    inserted: AtomicU64,
    dropped: AtomicU64,
    out_of_bounds: AtomicU64,
}

impl InsertStats {
    /// Insertions that left one more point in the tree.
    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Acquire)
    }

    /// Points pushed past the maximum depth.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    /// Points rejected for lying outside the bounds.
    pub fn out_of_bounds(&self) -> u64 {
        self.out_of_bounds.load(Ordering::Acquire)
    }
}

/// Routes points to cells and runs the displacement descent.
///
/// Any number of threads may insert concurrently through `&Registry`, each
/// with its own `Clipper`. `save` takes `&mut self` and so runs after every
/// inserter has finished.
pub struct Registry {
    ctx: Arc<BuildContext>,
    endpoint: Arc<dyn Endpoint>,
    base: Option<Chunk>,
    cold: Option<Arc<Cold>>,
    clip_pool: ClipPool,
    stats: InsertStats,
    saved: bool,
}

impl Registry {
    /// Creates a registry for a fresh build.
    pub fn new(ctx: Arc<BuildContext>, endpoint: Arc<dyn Endpoint>) -> Result<Self> {
        let structure = ctx.structure();
        let base = if structure.has_base() {
            Some(Chunk::create(
                Arc::clone(&ctx),
                0,
                structure.base_index_begin().clone(),
                structure.base_index_span().clone(),
            )?)
        } else {
            None
        };
        Self::with_parts(ctx, endpoint, base, Vec::new())
    }

    /// Reopens a saved build to continue inserting.
    pub fn load(ctx: Arc<BuildContext>, endpoint: Arc<dyn Endpoint>, metadata: &Metadata) -> Result<Self> {
        if metadata.structure != *ctx.structure() {
            return Err(StrataError::ConfigError(
                "metadata structure differs from the build structure".to_string(),
            ));
        }

        let structure = ctx.structure();
        let base = if structure.has_base() {
            Some(ctx.load_chunk(endpoint.as_ref(), structure.base_index_begin())?)
        } else {
            None
        };
        info!(
            cold_chunks = metadata.ids.len(),
            num_points = metadata.num_points,
            "loaded registry"
        );
        Self::with_parts(ctx, endpoint, base, metadata.ids.clone())
    }

    fn with_parts(
        ctx: Arc<BuildContext>,
        endpoint: Arc<dyn Endpoint>,
        base: Option<Chunk>,
        ids: Vec<Id>,
    ) -> Result<Self> {
        let cold = if ctx.structure().has_cold() {
            Some(Arc::new(Cold::with_ids(Arc::clone(&ctx), Arc::clone(&endpoint), ids)))
        } else {
            None
        };

        Ok(Self {
            ctx,
            endpoint,
            base,
            cold,
            clip_pool: ClipPool::new(CLIP_QUEUE_SIZE)?,
            stats: InsertStats::default(),
            saved: false,
        })
    }

    pub fn context(&self) -> &Arc<BuildContext> {
        &self.ctx
    }

    pub fn stats(&self) -> &InsertStats {
        &self.stats
    }

    /// The base chunk, until the registry is saved.
    pub fn base(&self) -> Option<&Chunk> {
        self.base.as_ref()
    }

    /// Number of cold chunks currently resident.
    pub fn resident_cold_chunks(&self) -> usize {
        self.cold.as_ref().map_or(0, |c| c.resident())
    }

    /// Decodes and inserts one packed record.
    ///
    /// Returns false if the point was rejected as out of bounds or the
    /// insertion dropped a point at the depth limit.
    pub fn insert(&self, record: Bytes, clipper: &mut Clipper) -> Result<bool> {
        if self.saved {
            return Err(StrataError::RegistrySaved);
        }
        self.clip_pool.check()?;
        let info = PointInfo::from_record(self.ctx.schema(), record)?;
        if !self
            .ctx
            .bbox()
            .contains(info.point(), self.ctx.structure().is_3d())
        {
            self.stats.out_of_bounds.fetch_add(1, Ordering::AcqRel);
            return Ok(false);
        }

        let handle = self.ctx.pool().allocate(info);
        let mut climber = self.ctx.climber();
        self.add_point(handle, &mut climber, clipper)
    }

    /// Inserts `records` on the build's worker threads, each with its own
    /// clipper.
    ///
    /// Workers release their clipper every `BATCH_RELEASE_INTERVAL` points
    /// and when they finish. Returns the number of points left in the tree.
    pub fn insert_batch(&self, records: Vec<Bytes>) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let workers = self.ctx.threads().min(records.len());
        let per_worker = records.len().div_ceil(workers);
        debug!(points = records.len(), workers, "inserting batch");

        let results: Vec<Result<u64>> = thread::scope(|s| {
            let handles: Vec<_> = records
                .chunks(per_worker)
                .map(|slice| {
                    s.spawn(move || -> Result<u64> {
                        let mut clipper = Clipper::new();
                        let mut kept = 0;
                        for (i, record) in slice.iter().enumerate() {
                            if self.insert(record.clone(), &mut clipper)? {
                                kept += 1;
                            }
                            if (i + 1) % BATCH_RELEASE_INTERVAL == 0 {
                                self.release(&mut clipper)?;
                            }
                        }
                        self.release(&mut clipper)?;
                        Ok(kept)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(StrataError::Internal("insert worker panicked".to_string()))
                    })
                })
                .collect()
        });

        let mut kept = 0;
        for r in results {
            kept += r?;
        }
        Ok(kept)
    }

    /// Places a pooled point, starting at the climber's node.
    ///
    /// At each node the point either settles into an empty cell, displaces a
    /// farther occupant and carries on descending with that occupant, or
    /// descends itself. A point that descends past the maximum depth is
    /// released from the pool and the call returns false.
    ///
    /// Fails with `ClipFailed` once a cold chunk could not be written; the
    /// point being carried is released.
    pub fn add_point(&self, handle: PointHandle, climber: &mut Climber, clipper: &mut Clipper) -> Result<bool> {
        if self.saved {
            return Err(StrataError::RegistrySaved);
        }
        self.clip_pool.check()?;

        let pool = self.ctx.pool();
        let mut candidate = handle;
        let mut point = pool
            .point(candidate)
            .ok_or_else(|| StrataError::Internal("inserting a released point".to_string()))?;

        loop {
            let cell = match self.get_cell(climber, clipper) {
                Ok(cell) => cell,
                Err(e) => {
                    pool.release(candidate);
                    return Err(e);
                }
            };
            if let Some(cell) = cell {
                let mid = climber.bbox().mid();
                loop {
                    match cell.load() {
                        None => {
                            if cell.swap_empty(candidate) {
                                self.stats.inserted.fetch_add(1, Ordering::AcqRel);
                                return Ok(true);
                            }
                        }
                        Some(current) => {
                            // A stale occupant was displaced concurrently.
                            let Some(current_point) = pool.point(current) else {
                                continue;
                            };
                            if !better(&point, &current_point, &mid, COMPARE_IN_3D) {
                                break;
                            }
                            if cell.swap(candidate, current) {
                                candidate = current;
                                point = current_point;
                                break;
                            }
                        }
                    }
                }
            }

            climber.magnify(&point);
            if !self.ctx.structure().in_range(climber.index()) {
                pool.release(candidate);
                self.stats.dropped.fetch_add(1, Ordering::AcqRel);
                return Ok(false);
            }
        }
    }

    /// Cell for the climber's node, or None within the null depths.
    pub fn get_cell(&self, climber: &Climber, clipper: &mut Clipper) -> Result<Option<Arc<Cell>>> {
        let structure = self.ctx.structure();
        let index = climber.index();

        if structure.is_within_base(index) {
            let base = self.base.as_ref().ok_or(StrataError::RegistrySaved)?;
            Ok(Some(base.get_cell(climber)?))
        } else if structure.is_within_cold(index) {
            match &self.cold {
                Some(cold) => Ok(Some(cold.get_cell(climber, clipper)?)),
                None => Ok(None),
            }
        } else {
            Ok(None)
        }
    }

    /// Queues the release of one clipper reference to a cold chunk.
    pub fn clip(&self, index: &Id, chunk_num: &Id, clipper_id: u64) -> Result<()> {
        let Some(cold) = &self.cold else {
            return Ok(());
        };
        debug!(chunk = %index, %chunk_num, clipper_id, "queueing clip");

        let cold = Arc::clone(cold);
        let index = index.clone();
        self.clip_pool
            .add(Box::new(move || cold.clip(&index, clipper_id)))
    }

    /// Releases every chunk a clipper touched.
    pub fn release(&self, clipper: &mut Clipper) -> Result<()> {
        let clipper_id = clipper.id();
        for (index, chunk_num) in clipper.drain() {
            self.clip(&index, &chunk_num, clipper_id)?;
        }
        Ok(())
    }

    /// Moves the points of another base chunk of this build into ours.
    pub fn merge_base(&mut self, other: Chunk) -> Result<()> {
        let base = self.base.as_mut().ok_or(StrataError::RegistrySaved)?;
        base.merge(other)
    }

    /// Persists everything and records the result in `metadata`.
    ///
    /// Waits for queued clips, writes every resident cold chunk, then the
    /// base chunk. A clip that failed in the background is reported here.
    pub fn save(&mut self, metadata: &mut Metadata) -> Result<()> {
        if self.saved {
            return Err(StrataError::RegistrySaved);
        }
        self.saved = true;

        self.clip_pool.join()?;
        if let Some(cold) = &self.cold {
            cold.release_all()?;
            metadata.ids = cold.ids();
        }
        if let Some(base) = self.base.take() {
            base.save(self.endpoint.as_ref())?;
        }

        metadata.num_points += self.stats.inserted();
        metadata.num_dropped += self.stats.dropped();
        metadata.num_out_of_bounds += self.stats.out_of_bounds();
        info!(
            inserted = self.stats.inserted(),
            dropped = self.stats.dropped(),
            out_of_bounds = self.stats.out_of_bounds(),
            cold_chunks = metadata.ids.len(),
            "saved registry"
        );
        Ok(())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.saved && self.stats.inserted() > 0 {
            warn!(
                inserted = self.stats.inserted(),
                "registry dropped without saving"
            );
        }
    }
}
