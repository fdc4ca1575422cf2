//! Chunks: fixed id ranges of nodes that are created, filled, serialized and
//! loaded as a unit.
//!
//! Three layouts share one type:
//! - `Base`: the always-resident top of the tree, a dense array saved with a
//!   leading tube id per record
//! - `Contiguous`: a dense cold chunk above the sparse depth
//! - `Sparse`: a cold chunk holding only occupied nodes in a map
//!
//! Serialized form is the compressed records of every point followed by a
//! `Tail`.

mod tail;

pub use tail::{pop_tail, push_tail, ChunkType, Tail, TAIL_SIZE};

use crate::cell::Cell;
use crate::climber::Climber;
use crate::context::BuildContext;
use crate::pool::{PointHandle, PointInfo};
use crate::tube::Tube;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_common::{Id, Result, StrataError};
use strata_storage::{decompress, ensure_put, Compressor, Endpoint};
use tracing::debug;

/// Storage layout of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Base,
    Contiguous,
    Sparse,
}

impl ChunkKind {
    /// Layout for a chunk starting at `id` at `depth`.
    pub fn select(ctx: &BuildContext, id: &Id, depth: usize) -> Self {
        if id < ctx.structure().sparse_index_begin() {
            if depth == 0 {
                ChunkKind::Base
            } else {
                ChunkKind::Contiguous
            }
        } else {
            ChunkKind::Sparse
        }
    }
}

enum Tubes {
    Dense(Box<[Tube]>),
    Sparse(Mutex<HashMap<Id, Arc<Tube>>>),
}

/// Snapshot of a sparse tube map in node order.
fn sorted_tubes(map: &Mutex<HashMap<Id, Arc<Tube>>>) -> Vec<(Id, Arc<Tube>)> {
    let mut entries: Vec<(Id, Arc<Tube>)> = map
        .lock()
        .iter()
        .map(|(k, v)| (k.clone(), Arc::clone(v)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

/// A range of `max_points` nodes starting at node `id`.
pub struct Chunk {
    ctx: Arc<BuildContext>,
    kind: ChunkKind,
    depth: usize,
    z_depth: usize,
    id: Id,
    max_points: Id,
    tubes: Tubes,
    data: Mutex<Option<Vec<u8>>>,
    collected: AtomicBool,
    persisted: AtomicBool,
}

impl Chunk {
    /// Creates an empty chunk.
    pub fn create(ctx: Arc<BuildContext>, depth: usize, id: Id, max_points: Id) -> Result<Self> {
        let kind = ChunkKind::select(&ctx, &id, depth);
        debug!(chunk = %id, depth, ?kind, "creating chunk");
        Self::with_kind(ctx, kind, depth, id, max_points)
    }

    /// Rebuilds a chunk from its serialized form.
    ///
    /// The layout comes from the trailer. Corrupt payloads, collisions between
    /// loaded points, and base records whose tube disagrees with their
    /// coordinates are all fatal.
    pub fn from_bytes(
        ctx: Arc<BuildContext>,
        depth: usize,
        id: Id,
        max_points: Id,
        mut data: Vec<u8>,
    ) -> Result<Self> {
        let tail = pop_tail(&mut data);
        let num_points = usize::try_from(tail.num_points).map_err(|_| StrataError::ChunkCorrupted {
            id: id.to_string(),
            reason: format!("point count {} too large", tail.num_points),
        })?;

        let kind = match tail.chunk_type {
            ChunkType::Invalid => return Err(StrataError::InvalidTail { id: id.to_string() }),
            ChunkType::Sparse => ChunkKind::Sparse,
            ChunkType::Contiguous if depth == 0 => ChunkKind::Base,
            ChunkType::Contiguous => ChunkKind::Contiguous,
        };
        debug!(chunk = %id, depth, ?kind, num_points, "loading chunk");

        let chunk = Self::with_kind(ctx, kind, depth, id, max_points)?;
        match kind {
            ChunkKind::Base => chunk.populate_base(&data, num_points)?,
            ChunkKind::Contiguous | ChunkKind::Sparse => chunk.populate(&data, num_points)?,
        }
        Ok(chunk)
    }

    fn with_kind(
        ctx: Arc<BuildContext>,
        kind: ChunkKind,
        depth: usize,
        id: Id,
        max_points: Id,
    ) -> Result<Self> {
        let tubes = match kind {
            ChunkKind::Base | ChunkKind::Contiguous => {
                let len = max_points.to_usize().ok_or_else(|| {
                    StrataError::ConfigError(format!(
                        "dense chunk {} of {} nodes does not fit in memory",
                        id, max_points
                    ))
                })?;
                Tubes::Dense((0..len).map(|_| Tube::new()).collect())
            }
            ChunkKind::Sparse => Tubes::Sparse(Mutex::new(HashMap::new())),
        };

        Ok(Self {
            z_depth: ctx.structure().max_tick_depth().min(depth),
            ctx,
            kind,
            depth,
            id,
            max_points,
            tubes,
            data: Mutex::new(None),
            collected: AtomicBool::new(false),
            persisted: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    #[inline]
    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns true once the chunk has been serialized.
    pub fn is_collected(&self) -> bool {
        self.collected.load(Ordering::Acquire)
    }

    /// Returns true once the chunk has been written to storage.
    pub fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::Acquire)
    }

    /// Returns the cell for the climber's node and tick.
    pub fn get_cell(&self, climber: &Climber) -> Result<Arc<Cell>> {
        let offset = self.normalize(climber.index())?;
        let tick = climber.tick(self.z_depth);

        match &self.tubes {
            Tubes::Dense(tubes) => {
                let tube = offset
                    .to_usize()
                    .and_then(|i| tubes.get(i))
                    .ok_or_else(|| self.outside(climber.index()))?;
                Ok(tube.cell_at(tick))
            }
            Tubes::Sparse(map) => {
                let tube = Arc::clone(map.lock().entry(offset).or_default());
                Ok(tube.cell_at(tick))
            }
        }
    }

    /// Offset of a node within this chunk.
    fn normalize(&self, index: &Id) -> Result<Id> {
        match index.checked_sub(&self.id) {
            Some(offset) if offset < self.max_points => Ok(offset),
            _ => Err(self.outside(index)),
        }
    }

    fn outside(&self, index: &Id) -> StrataError {
        StrataError::Internal(format!(
            "node {} routed to chunk {} of {} nodes",
            index, self.id, self.max_points
        ))
    }

    /// Visits every tube in node order.
    fn for_each_tube(&self, mut f: impl FnMut(&Tube)) {
        match &self.tubes {
            Tubes::Dense(tubes) => tubes.iter().for_each(f),
            Tubes::Sparse(map) => {
                for (_, tube) in sorted_tubes(map) {
                    f(&tube);
                }
            }
        }
    }

    /// Number of points currently held.
    pub fn num_points(&self) -> usize {
        let mut n = 0;
        self.for_each_tube(|tube| n += tube.occupied().len());
        n
    }

    /// Copies of every held point, in node then tick order.
    pub fn points(&self) -> Vec<PointInfo> {
        self.nodes().into_iter().map(|(_, info)| info).collect()
    }

    /// Copies of every held point with the id of its node, in node then tick
    /// order.
    pub fn nodes(&self) -> Vec<(Id, PointInfo)> {
        let pool = self.ctx.pool();
        let mut out = Vec::new();
        let mut push = |offset: &Id, tube: &Tube| {
            for (_, handle) in tube.occupied() {
                if let Some(info) = pool.get(handle) {
                    out.push((&self.id + offset, info));
                }
            }
        };

        match &self.tubes {
            Tubes::Dense(tubes) => {
                for (i, tube) in tubes.iter().enumerate() {
                    if !tube.is_empty() {
                        push(&Id::from(i), tube);
                    }
                }
            }
            Tubes::Sparse(map) => {
                for (offset, tube) in sorted_tubes(map) {
                    push(&offset, &tube);
                }
            }
        }
        out
    }

    fn populate(&self, data: &[u8], num_points: usize) -> Result<()> {
        let schema = self.ctx.schema();
        let expected = num_points
            .checked_mul(schema.point_size())
            .ok_or_else(|| StrataError::ChunkCorrupted {
                id: self.id.to_string(),
                reason: format!("point count {} overflows", num_points),
            })?;
        let records = decompress(data, expected)?;
        if records.len() != expected {
            return Err(StrataError::ChunkCorrupted {
                id: self.id.to_string(),
                reason: format!(
                    "expected {} bytes of records, got {}",
                    expected,
                    records.len()
                ),
            });
        }

        let mut climber = self.ctx.climber();
        for record in records.chunks_exact(schema.point_size()) {
            let info = PointInfo::from_record(schema, Bytes::copy_from_slice(record))?;
            climber.reset();
            climber.magnify_to(info.point(), self.depth);
            self.place(&climber, info)?;
        }
        Ok(())
    }

    fn populate_base(&self, data: &[u8], num_points: usize) -> Result<()> {
        let celled = self.ctx.celled_schema();
        // An overflowing count matches no payload.
        let expected = num_points
            .checked_mul(celled.point_size())
            .unwrap_or(usize::MAX);
        let records = decompress(data, expected)?;
        if records.len() != expected {
            return Err(StrataError::BadBasePointCount {
                expected,
                actual: records.len(),
            });
        }

        let structure = self.ctx.structure();
        let mut climber = self.ctx.climber();
        for record in records.chunks_exact(celled.point_size()) {
            let (tube_bytes, body) = record.split_at(8);
            let mut raw = [0u8; 8];
            raw.copy_from_slice(tube_bytes);
            let tube = u64::from_le_bytes(raw);

            let info = PointInfo::from_record(self.ctx.schema(), Bytes::copy_from_slice(body))?;
            let depth = structure.calc_depth(&(&self.id + tube));
            climber.reset();
            climber.magnify_to(info.point(), depth);

            let computed = climber.index().checked_sub(&self.id);
            if computed.as_ref().and_then(Id::to_u64) != Some(tube) {
                return Err(StrataError::BadBaseTube {
                    stored: tube,
                    computed: computed.map_or_else(|| "below chunk".to_string(), |c| c.to_string()),
                });
            }
            self.place(&climber, info)?;
        }
        Ok(())
    }

    /// Stores a loaded point, which must land in an empty cell.
    fn place(&self, climber: &Climber, info: PointInfo) -> Result<()> {
        let cell = self.get_cell(climber)?;
        let pool = self.ctx.pool();
        let handle = pool.allocate(info);
        if !cell.swap_empty(handle) {
            pool.release(handle);
            return Err(StrataError::ChunkCorrupted {
                id: self.id.to_string(),
                reason: format!("two points in node {}", climber.index()),
            });
        }
        Ok(())
    }

    /// Serializes and releases every point, staging the result for `flush`.
    ///
    /// May run once. Base chunks are finalized with `save` instead, so this
    /// is a no-op for them.
    pub fn collect(&self) -> Result<()> {
        let chunk_type = match self.kind {
            ChunkKind::Base => return Ok(()),
            ChunkKind::Contiguous => ChunkType::Contiguous,
            ChunkKind::Sparse => ChunkType::Sparse,
        };
        if self.collected.swap(true, Ordering::AcqRel) {
            return Err(StrataError::AlreadyPersisted(self.id.to_string()));
        }

        let mut handles = Vec::new();
        self.for_each_tube(|tube| handles.extend(tube.drain().into_iter().map(|(_, h)| h)));

        let schema = self.ctx.schema();
        let mut compressor = Compressor::new(schema, handles.len(), self.ctx.compression());
        for handle in handles {
            let info = self.release(handle)?;
            compressor.push(info.data())?;
        }

        let num_points = compressor.num_points() as u64;
        let mut data = compressor.finish()?;
        push_tail(&mut data, Tail::new(num_points, chunk_type));
        debug!(chunk = %self.id, num_points, bytes = data.len(), "collected chunk");

        *self.data.lock() = Some(data);
        Ok(())
    }

    /// Writes data staged by `collect`. Returns false if nothing was staged.
    ///
    /// On failure the data stays staged, so the write can be retried.
    pub fn flush(&self, endpoint: &dyn Endpoint) -> Result<bool> {
        let mut staged = self.data.lock();
        let Some(data) = staged.as_ref() else {
            return Ok(false);
        };

        ensure_put(
            endpoint,
            &self.ctx.chunk_path(&self.id),
            data,
            self.ctx.put_attempts(),
        )?;
        *staged = None;
        self.persisted.store(true, Ordering::Release);
        Ok(true)
    }

    /// Writes a base chunk, prefixing each record with its tube offset.
    pub fn save(&self, endpoint: &dyn Endpoint) -> Result<()> {
        if self.kind != ChunkKind::Base {
            return Err(StrataError::Internal(format!(
                "chunk {} is not the base chunk",
                self.id
            )));
        }
        if self.collected.swap(true, Ordering::AcqRel) {
            return Err(StrataError::AlreadyPersisted(self.id.to_string()));
        }

        let Tubes::Dense(tubes) = &self.tubes else {
            return Err(StrataError::Internal("base chunk is not dense".to_string()));
        };
        let mut records = Vec::new();
        for (offset, tube) in tubes.iter().enumerate() {
            for (_, handle) in tube.drain() {
                records.push((offset as u64, self.release(handle)?));
            }
        }

        let celled = self.ctx.celled_schema();
        let mut compressor = Compressor::new(celled, records.len(), self.ctx.compression());
        let mut record = Vec::with_capacity(celled.point_size());
        for (offset, info) in &records {
            record.clear();
            record.extend_from_slice(&offset.to_le_bytes());
            record.extend_from_slice(info.data());
            compressor.push(&record)?;
        }

        let mut data = compressor.finish()?;
        push_tail(&mut data, Tail::new(records.len() as u64, ChunkType::Contiguous));
        ensure_put(
            endpoint,
            &self.ctx.chunk_path(&self.id),
            &data,
            self.ctx.put_attempts(),
        )?;
        self.persisted.store(true, Ordering::Release);
        debug!(chunk = %self.id, num_points = records.len(), "saved base chunk");
        Ok(())
    }

    /// Moves every point of `other` into this base chunk.
    ///
    /// Both chunks must belong to the same build. Slices of a partitioned
    /// build own disjoint nodes, so a tube occupied on both sides is an
    /// error; it is detected before anything moves.
    pub fn merge(&mut self, mut other: Chunk) -> Result<()> {
        if self.kind != ChunkKind::Base || other.kind != ChunkKind::Base {
            return Err(StrataError::Internal("only base chunks merge".to_string()));
        }
        if !Arc::ptr_eq(&self.ctx, &other.ctx) {
            return Err(StrataError::Internal(
                "merged chunks must share a build context".to_string(),
            ));
        }

        let (Tubes::Dense(ours), Tubes::Dense(theirs)) = (&mut self.tubes, &mut other.tubes) else {
            return Err(StrataError::Internal("base chunk is not dense".to_string()));
        };
        if ours.len() != theirs.len() {
            return Err(StrataError::Internal(format!(
                "base chunk spans differ: {} and {}",
                ours.len(),
                theirs.len()
            )));
        }

        for (i, (a, b)) in ours.iter().zip(theirs.iter()).enumerate() {
            if !a.is_empty() && !b.is_empty() {
                return Err(StrataError::TubeConflict { tube: i });
            }
        }
        for (a, b) in ours.iter_mut().zip(theirs.iter_mut()) {
            if !b.is_empty() {
                std::mem::swap(a, b);
            }
        }
        Ok(())
    }

    fn release(&self, handle: PointHandle) -> Result<PointInfo> {
        self.ctx.pool().release(handle).ok_or_else(|| {
            StrataError::Internal(format!("stale point handle in chunk {}", self.id))
        })
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        let pool = self.ctx.pool();
        self.for_each_tube(|tube| {
            for (_, handle) in tube.drain() {
                pool.release(handle);
            }
        });
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("depth", &self.depth)
            .field("max_points", &self.max_points)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::{
        BBox, BuildConfig, CompressionType, Point, Schema, Structure, StructureConfig,
    };
    use strata_storage::MemoryEndpoint;

    fn ctx_with(config: StructureConfig, compression: CompressionType) -> Arc<BuildContext> {
        BuildContext::new(
            Schema::xyz(vec![]).unwrap(),
            BBox::new(Point::new(0.0, 0.0, 0.0), Point::new(100.0, 100.0, 100.0)),
            Structure::new(config).unwrap(),
            &BuildConfig {
                compression,
                put_attempts: 2,
                ..Default::default()
            },
        )
    }

    fn quadtree() -> Arc<BuildContext> {
        ctx_with(
            StructureConfig {
                base_depth_end: 2,
                sparse_depth_begin: 3,
                max_depth: 5,
                chunk_points: 16,
                dimensions: 2,
                ..Default::default()
            },
            CompressionType::Lz4,
        )
    }

    fn info(ctx: &BuildContext, p: Point) -> PointInfo {
        let record = ctx.schema().make_record(&p).unwrap();
        PointInfo::new(p, Bytes::from(record))
    }

    /// Inserts a point at `depth`, directly into its empty cell.
    fn put(ctx: &BuildContext, chunk: &Chunk, p: Point, depth: usize) {
        let mut climber = ctx.climber();
        climber.magnify_to(&p, depth);
        let cell = chunk.get_cell(&climber).unwrap();
        assert!(cell.swap_empty(ctx.pool().allocate(info(ctx, p))));
    }

    fn base(ctx: &Arc<BuildContext>) -> Chunk {
        let s = ctx.structure();
        Chunk::create(
            Arc::clone(ctx),
            0,
            s.base_index_begin().clone(),
            s.base_index_span().clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_kind_selection() {
        let ctx = quadtree();
        // Sparse depth 3 begins at id 21.
        assert_eq!(ChunkKind::select(&ctx, &Id::zero(), 0), ChunkKind::Base);
        assert_eq!(ChunkKind::select(&ctx, &Id::from(5u64), 2), ChunkKind::Contiguous);
        assert_eq!(ChunkKind::select(&ctx, &Id::from(21u64), 3), ChunkKind::Sparse);
        assert_eq!(ChunkKind::select(&ctx, &Id::from(85u64), 4), ChunkKind::Sparse);
    }

    #[test]
    fn test_get_cell_same_node() {
        let ctx = quadtree();
        let chunk = Chunk::create(Arc::clone(&ctx), 2, Id::from(5u64), Id::from(16u64)).unwrap();

        let mut a = ctx.climber();
        a.magnify_to(&Point::new(1.0, 1.0, 0.0), 2);
        let mut b = ctx.climber();
        b.magnify_to(&Point::new(2.0, 2.0, 0.0), 2);

        assert!(Arc::ptr_eq(&chunk.get_cell(&a).unwrap(), &chunk.get_cell(&b).unwrap()));
    }

    #[test]
    fn test_get_cell_outside_chunk() {
        let ctx = quadtree();
        let chunk = Chunk::create(Arc::clone(&ctx), 3, Id::from(21u64), Id::from(16u64)).unwrap();

        let mut climber = ctx.climber();
        climber.magnify_to(&Point::new(99.0, 99.0, 0.0), 3);
        assert!(*climber.index() >= Id::from(37u64));
        assert!(matches!(chunk.get_cell(&climber), Err(StrataError::Internal(_))));
    }

    #[test]
    fn test_collect_flush_reload() {
        for (id, depth, kind) in [(5u64, 2, ChunkKind::Contiguous), (21, 3, ChunkKind::Sparse)] {
            let ctx = quadtree();
            let endpoint = MemoryEndpoint::new();
            let chunk =
                Chunk::create(Arc::clone(&ctx), depth, Id::from(id), Id::from(16u64)).unwrap();
            assert_eq!(chunk.kind(), kind);

            let points = [Point::new(1.0, 1.0, 0.0), Point::new(40.0, 10.0, 0.0)];
            for p in points {
                put(&ctx, &chunk, p, depth);
            }
            assert_eq!(chunk.num_points(), 2);

            chunk.collect().unwrap();
            assert_eq!(ctx.pool().live(), 0);
            assert!(chunk.flush(&endpoint).unwrap());
            assert!(!chunk.flush(&endpoint).unwrap());
            assert!(chunk.is_persisted());
            assert_eq!(endpoint.put_count(), 1);

            let loaded = ctx.load_chunk(&endpoint, &Id::from(id)).unwrap();
            assert_eq!(loaded.kind(), kind);
            let mut got: Vec<Point> = loaded.points().iter().map(|i| *i.point()).collect();
            got.sort_by(|a, b| a.x.total_cmp(&b.x));
            assert_eq!(got, points.to_vec());
        }
    }

    #[test]
    fn test_collect_twice_fails() {
        let ctx = quadtree();
        let chunk = Chunk::create(Arc::clone(&ctx), 2, Id::from(5u64), Id::from(16u64)).unwrap();
        chunk.collect().unwrap();
        assert!(matches!(chunk.collect(), Err(StrataError::AlreadyPersisted(_))));
    }

    #[test]
    fn test_flush_failure_keeps_data() {
        let ctx = quadtree();
        let endpoint = MemoryEndpoint::new();
        let chunk = Chunk::create(Arc::clone(&ctx), 2, Id::from(5u64), Id::from(16u64)).unwrap();
        put(&ctx, &chunk, Point::new(1.0, 1.0, 0.0), 2);
        chunk.collect().unwrap();

        endpoint.fail_next_puts(2);
        assert!(matches!(chunk.flush(&endpoint), Err(StrataError::PutFailed { .. })));
        assert!(!chunk.is_persisted());

        assert!(chunk.flush(&endpoint).unwrap());
        assert!(endpoint.contains("5"));
    }

    #[test]
    fn test_base_collect_is_noop() {
        let ctx = quadtree();
        let endpoint = MemoryEndpoint::new();
        let chunk = base(&ctx);
        put(&ctx, &chunk, Point::new(1.0, 1.0, 0.0), 1);

        chunk.collect().unwrap();
        assert!(!chunk.flush(&endpoint).unwrap());
        assert_eq!(chunk.num_points(), 1);
        assert_eq!(endpoint.put_count(), 0);
    }

    #[test]
    fn test_base_save_load() {
        let ctx = quadtree();
        let endpoint = MemoryEndpoint::new();
        let chunk = base(&ctx);
        assert_eq!(chunk.kind(), ChunkKind::Base);

        put(&ctx, &chunk, Point::new(50.0, 50.0, 0.0), 0);
        put(&ctx, &chunk, Point::new(10.0, 90.0, 0.0), 1);
        put(&ctx, &chunk, Point::new(90.0, 90.0, 0.0), 1);
        chunk.save(&endpoint).unwrap();
        assert!(matches!(chunk.save(&endpoint), Err(StrataError::AlreadyPersisted(_))));

        let loaded = ctx.load_chunk(&endpoint, &Id::zero()).unwrap();
        assert_eq!(loaded.kind(), ChunkKind::Base);
        assert_eq!(loaded.num_points(), 3);

        // Root first, then depth 1 in node order.
        let xs: Vec<f64> = loaded.points().iter().map(|i| i.point().x).collect();
        assert_eq!(xs, vec![50.0, 10.0, 90.0]);
    }

    #[test]
    fn test_base_records_carry_tube() {
        let ctx = ctx_with(
            StructureConfig {
                base_depth_end: 2,
                sparse_depth_begin: 3,
                max_depth: 5,
                chunk_points: 16,
                dimensions: 2,
                ..Default::default()
            },
            CompressionType::None,
        );
        let endpoint = MemoryEndpoint::new();
        let chunk = base(&ctx);
        put(&ctx, &chunk, Point::new(90.0, 90.0, 0.0), 1);
        chunk.save(&endpoint).unwrap();

        let mut data = endpoint.get("0").unwrap();
        let tail = pop_tail(&mut data);
        assert_eq!(tail, Tail::new(1, ChunkType::Contiguous));
        // Tag byte, then the tube offset of node 4.
        assert_eq!(data[1..9], 4u64.to_le_bytes());
    }

    #[test]
    fn test_base_bad_tube() {
        let ctx = ctx_with(
            StructureConfig {
                base_depth_end: 2,
                sparse_depth_begin: 3,
                max_depth: 5,
                chunk_points: 16,
                dimensions: 2,
                ..Default::default()
            },
            CompressionType::None,
        );
        let schema = ctx.celled_schema().clone();

        // A point in the upper-right quadrant stored under tube 1.
        let mut record = schema.make_record(&Point::new(90.0, 90.0, 0.0)).unwrap();
        schema.set_f64(&mut record, strata_common::TUBE_ID_DIM, 1.0).unwrap();
        let mut compressor = Compressor::new(&schema, 1, CompressionType::None);
        compressor.push(&record).unwrap();
        let mut data = compressor.finish().unwrap();
        push_tail(&mut data, Tail::new(1, ChunkType::Contiguous));

        let result = Chunk::from_bytes(Arc::clone(&ctx), 0, Id::zero(), Id::from(5u64), data);
        assert!(matches!(
            result,
            Err(StrataError::BadBaseTube { stored: 1, .. })
        ));
    }

    #[test]
    fn test_base_bad_point_count() {
        let ctx = quadtree();
        let schema = ctx.celled_schema().clone();
        let record = schema.make_record(&Point::new(50.0, 50.0, 0.0)).unwrap();
        let mut compressor = Compressor::new(&schema, 1, CompressionType::Lz4);
        compressor.push(&record).unwrap();
        let mut data = compressor.finish().unwrap();
        push_tail(&mut data, Tail::new(2, ChunkType::Contiguous));

        let result = Chunk::from_bytes(Arc::clone(&ctx), 0, Id::zero(), Id::from(5u64), data);
        assert!(matches!(result, Err(StrataError::BadBasePointCount { .. })));
    }

    #[test]
    fn test_invalid_tail() {
        let ctx = quadtree();
        let result = Chunk::from_bytes(Arc::clone(&ctx), 2, Id::from(5u64), Id::from(16u64), vec![1, 2]);
        assert!(matches!(result, Err(StrataError::InvalidTail { .. })));
    }

    fn empty_payload(schema: &Schema, count: u64, chunk_type: ChunkType) -> Vec<u8> {
        let mut data = Compressor::new(schema, 0, CompressionType::Lz4)
            .finish()
            .unwrap();
        push_tail(&mut data, Tail::new(count, chunk_type));
        data
    }

    #[test]
    fn test_huge_point_count_sparse() {
        let ctx = quadtree();
        for count in [u64::MAX / 4, 1 << 40] {
            let data = empty_payload(ctx.schema(), count, ChunkType::Sparse);
            let result =
                Chunk::from_bytes(Arc::clone(&ctx), 3, Id::from(21u64), Id::from(64u64), data);
            assert!(matches!(result, Err(StrataError::ChunkCorrupted { .. })));
        }
    }

    #[test]
    fn test_huge_point_count_base() {
        let ctx = quadtree();
        for count in [u64::MAX / 4, 1 << 40] {
            let data = empty_payload(ctx.celled_schema(), count, ChunkType::Contiguous);
            let result = Chunk::from_bytes(Arc::clone(&ctx), 0, Id::zero(), Id::from(5u64), data);
            assert!(matches!(
                result,
                Err(StrataError::BadBasePointCount { actual: 0, .. })
            ));
        }
    }

    #[test]
    fn test_load_collision_is_corruption() {
        let ctx = quadtree();
        let schema = ctx.schema().clone();
        let mut compressor = Compressor::new(&schema, 2, CompressionType::Lz4);
        for x in [1.0, 2.0] {
            compressor.push(&schema.make_record(&Point::new(x, 1.0, 0.0)).unwrap()).unwrap();
        }
        let mut data = compressor.finish().unwrap();
        push_tail(&mut data, Tail::new(2, ChunkType::Contiguous));

        let result = Chunk::from_bytes(Arc::clone(&ctx), 2, Id::from(5u64), Id::from(16u64), data);
        assert!(matches!(result, Err(StrataError::ChunkCorrupted { .. })));
        assert_eq!(ctx.pool().live(), 0);
    }

    #[test]
    fn test_merge_disjoint() {
        let ctx = quadtree();
        let mut a = base(&ctx);
        let b = base(&ctx);
        put(&ctx, &a, Point::new(10.0, 10.0, 0.0), 1);
        put(&ctx, &b, Point::new(90.0, 90.0, 0.0), 1);
        put(&ctx, &b, Point::new(50.0, 50.0, 0.0), 0);

        a.merge(b).unwrap();
        assert_eq!(a.num_points(), 3);
    }

    #[test]
    fn test_merge_conflict() {
        let ctx = quadtree();
        let mut a = base(&ctx);
        let b = base(&ctx);
        put(&ctx, &a, Point::new(10.0, 10.0, 0.0), 1);
        put(&ctx, &a, Point::new(90.0, 90.0, 0.0), 1);
        put(&ctx, &b, Point::new(60.0, 60.0, 0.0), 1);

        let err = a.merge(b).unwrap_err();
        assert!(matches!(err, StrataError::TubeConflict { tube: 4 }));
        assert_eq!(err.to_string(), "Tube mismatch at 4");
        assert_eq!(a.num_points(), 2);
    }

    #[test]
    fn test_tubular_chunk_separates_ticks() {
        let ctx = ctx_with(
            StructureConfig {
                base_depth_end: 1,
                sparse_depth_begin: 2,
                max_depth: 4,
                chunk_points: 16,
                dimensions: 2,
                tubular: true,
                ..Default::default()
            },
            CompressionType::Lz4,
        );
        let endpoint = MemoryEndpoint::new();
        let chunk = Chunk::create(Arc::clone(&ctx), 1, Id::from(1u64), Id::from(4u64)).unwrap();

        // Same xy node, z in different halves of the root height.
        put(&ctx, &chunk, Point::new(1.0, 1.0, 10.0), 1);
        put(&ctx, &chunk, Point::new(1.0, 1.0, 90.0), 1);
        assert_eq!(chunk.num_points(), 2);

        chunk.collect().unwrap();
        chunk.flush(&endpoint).unwrap();
        let loaded = ctx.load_chunk(&endpoint, &Id::from(1u64)).unwrap();
        let zs: Vec<f64> = loaded.points().iter().map(|i| i.point().z).collect();
        assert_eq!(zs, vec![10.0, 90.0]);
    }
}
