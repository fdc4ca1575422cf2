//! Single-point slots.

use crate::pool::{PointHandle, EMPTY_HANDLE};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free slot holding at most one point handle.
///
/// Every transition is a single atomic operation, so concurrent inserters
/// racing on the same cell never lose a point: exactly one of them wins each
/// compare-and-swap and the losers re-read and retry.
pub struct Cell {
    slot: AtomicU64,
}

impl Cell {
    pub const fn new() -> Self {
        Self {
            slot: AtomicU64::new(EMPTY_HANDLE),
        }
    }

    /// Current occupant.
    #[inline]
    pub fn load(&self) -> Option<PointHandle> {
        PointHandle::from_raw(self.slot.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.load(Ordering::Acquire) == EMPTY_HANDLE
    }

    /// Stores `handle` if the cell is empty.
    #[inline]
    pub fn swap_empty(&self, handle: PointHandle) -> bool {
        self.slot
            .compare_exchange(
                EMPTY_HANDLE,
                handle.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Replaces `expected` with `handle`. Fails if the occupant changed.
    #[inline]
    pub fn swap(&self, handle: PointHandle, expected: PointHandle) -> bool {
        self.slot
            .compare_exchange(
                expected.as_raw(),
                handle.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Takes the occupant, leaving the cell empty.
    #[inline]
    pub fn acquire(&self) -> Option<PointHandle> {
        PointHandle::from_raw(self.slot.swap(EMPTY_HANDLE, Ordering::AcqRel))
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell").field("occupant", &self.load()).finish()
    }
}
