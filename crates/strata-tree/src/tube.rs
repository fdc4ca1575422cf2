//! Vertical stacks of cells.

use crate::cell::Cell;
use crate::pool::PointHandle;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel for a primary cell not yet bound to a tick.
const UNASSIGNED: u64 = u64::MAX;

/// Cells of one node, keyed by tick.
///
/// Non-tubular trees only ever use tick 0, so the first tick to arrive claims
/// a lock-free primary cell and every later lookup of that tick is a single
/// atomic load. Other ticks fall back to a locked overflow map.
pub struct Tube {
    primary_tick: AtomicU64,
    primary: Arc<Cell>,
    overflow: Mutex<BTreeMap<u64, Arc<Cell>>>,
}

impl Tube {
    pub fn new() -> Self {
        Self {
            primary_tick: AtomicU64::new(UNASSIGNED),
            primary: Arc::new(Cell::new()),
            overflow: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the cell for `tick`, creating it if needed.
    pub fn cell_at(&self, tick: u64) -> Arc<Cell> {
        let current = self.primary_tick.load(Ordering::Acquire);
        if current == tick {
            return Arc::clone(&self.primary);
        }
        if current == UNASSIGNED {
            match self.primary_tick.compare_exchange(
                UNASSIGNED,
                tick,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Arc::clone(&self.primary),
                Err(actual) if actual == tick => return Arc::clone(&self.primary),
                Err(_) => {}
            }
        }
        Arc::clone(self.overflow.lock().entry(tick).or_default())
    }

    /// Takes every occupant, ordered by tick.
    pub fn drain(&self) -> Vec<(u64, PointHandle)> {
        let mut out = Vec::new();
        let primary_tick = self.primary_tick.load(Ordering::Acquire);
        if primary_tick != UNASSIGNED {
            if let Some(h) = self.primary.acquire() {
                out.push((primary_tick, h));
            }
        }
        for (tick, cell) in self.overflow.lock().iter() {
            if let Some(h) = cell.acquire() {
                out.push((*tick, h));
            }
        }
        out.sort_by_key(|(tick, _)| *tick);
        out
    }

    /// Current occupants, ordered by tick.
    pub fn occupied(&self) -> Vec<(u64, PointHandle)> {
        let mut out = Vec::new();
        let primary_tick = self.primary_tick.load(Ordering::Acquire);
        if primary_tick != UNASSIGNED {
            if let Some(h) = self.primary.load() {
                out.push((primary_tick, h));
            }
        }
        for (tick, cell) in self.overflow.lock().iter() {
            if let Some(h) = cell.load() {
                out.push((*tick, h));
            }
        }
        out.sort_by_key(|(tick, _)| *tick);
        out
    }

    /// Returns true if no cell holds a point.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.overflow.lock().values().all(|c| c.is_empty())
    }
}

impl Default for Tube {
    fn default() -> Self {
        Self::new()
    }
}
