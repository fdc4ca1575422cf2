//! Shared point storage.
//!
//! Points are stored once in a segmented arena and referenced everywhere else
//! by a `PointHandle`. A handle packs the slot index with the slot's
//! generation, so a slot that is released and reused never compares equal to
//! a stale handle. Cells swap handles with compare-and-swap, and the
//! generation tag keeps those swaps free of ABA confusion.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use strata_common::{Point, Result, Schema};

/// Slots per arena segment.
const SEGMENT_SIZE: usize = 4096;

/// Bits of a handle holding the slot index.
const INDEX_BITS: u32 = 40;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Generations wrap within the remaining handle bits.
const GENERATION_MASK: u64 = (1 << (64 - INDEX_BITS)) - 1;

/// Raw value of the empty handle. Slot index 0 is never allocated.
pub(crate) const EMPTY_HANDLE: u64 = 0;

/// Tagged reference to a pooled point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointHandle(u64);

impl PointHandle {
    #[inline(always)]
    fn pack(index: u64, generation: u64) -> Self {
        Self((generation << INDEX_BITS) | (index & INDEX_MASK))
    }

    /// Slot index within the pool.
    #[inline]
    pub fn index(&self) -> u64 {
        self.0 & INDEX_MASK
    }

    /// Generation of the slot when this handle was issued.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.0 >> INDEX_BITS
    }

    #[inline(always)]
    pub(crate) fn as_raw(&self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub(crate) fn from_raw(raw: u64) -> Option<Self> {
        if raw == EMPTY_HANDLE {
            None
        } else {
            Some(Self(raw))
        }
    }
}

/// A point and its packed attribute record.
#[derive(Debug, Clone, PartialEq)]
pub struct PointInfo {
    point: Point,
    data: Bytes,
}

impl PointInfo {
    pub fn new(point: Point, data: Bytes) -> Self {
        Self { point, data }
    }

    /// Decodes the coordinates of a packed record.
    pub fn from_record(schema: &Schema, data: Bytes) -> Result<Self> {
        let point = schema.read_point(&data)?;
        Ok(Self { point, data })
    }

    #[inline]
    pub fn point(&self) -> &Point {
        &self.point
    }

    /// The packed record.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

struct Slot {
    generation: u64,
    info: Option<PointInfo>,
}

type Segment = Box<[Mutex<Slot>]>;

fn new_segment() -> Segment {
    (0..SEGMENT_SIZE)
        .map(|_| {
            Mutex::new(Slot {
                generation: 0,
                info: None,
            })
        })
        .collect()
}

/// Arena of points shared by every chunk of a build.
pub struct PointPool {
    segments: RwLock<Vec<Segment>>,
    next_index: AtomicU64,
    free: Mutex<Vec<u64>>,
    live: AtomicUsize,
}

impl PointPool {
    pub fn new() -> Self {
        Self {
            segments: RwLock::new(Vec::new()),
            next_index: AtomicU64::new(1),
            free: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
        }
    }

    /// Stores a point and returns its handle.
    pub fn allocate(&self, info: PointInfo) -> PointHandle {
        let index = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| self.next_index.fetch_add(1, Ordering::AcqRel));
        self.ensure_segment(index);

        let segments = self.segments.read();
        let (seg, off) = Self::locate(index);
        let mut slot = segments[seg][off].lock();
        slot.generation = (slot.generation + 1) & GENERATION_MASK;
        slot.info = Some(info);
        self.live.fetch_add(1, Ordering::AcqRel);

        PointHandle::pack(index, slot.generation)
    }

    /// Coordinates of a live point, or None if the handle is stale.
    pub fn point(&self, handle: PointHandle) -> Option<Point> {
        self.with_slot(handle, |slot| slot.info.as_ref().map(|i| i.point))
            .flatten()
    }

    /// Clones a live point, or None if the handle is stale.
    pub fn get(&self, handle: PointHandle) -> Option<PointInfo> {
        self.with_slot(handle, |slot| slot.info.clone()).flatten()
    }

    /// Removes a point from the pool, returning it if the handle was live.
    pub fn release(&self, handle: PointHandle) -> Option<PointInfo> {
        let info = self
            .with_slot(handle, |slot| slot.info.take())
            .flatten()?;
        self.free.lock().push(handle.index());
        self.live.fetch_sub(1, Ordering::AcqRel);
        Some(info)
    }

    /// Number of points currently stored.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn locate(index: u64) -> (usize, usize) {
        let index = index as usize;
        (index / SEGMENT_SIZE, index % SEGMENT_SIZE)
    }

    fn ensure_segment(&self, index: u64) {
        let (seg, _) = Self::locate(index);
        if seg < self.segments.read().len() {
            return;
        }
        let mut segments = self.segments.write();
        while segments.len() <= seg {
            segments.push(new_segment());
        }
    }

    fn with_slot<R>(&self, handle: PointHandle, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        let segments = self.segments.read();
        let (seg, off) = Self::locate(handle.index());
        let mut slot = segments.get(seg)?.get(off)?.lock();
        if slot.generation != handle.generation() {
            return None;
        }
        Some(f(&mut slot))
    }
}

impl Default for PointPool {
    fn default() -> Self {
        Self::new()
    }
}
