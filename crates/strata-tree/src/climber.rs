//! Tree descent cursor.

use strata_common::{BBox, Id, Point, Structure};

/// Tracks the node a point is descending through: its id, depth and bounds.
#[derive(Debug, Clone)]
pub struct Climber {
    index: Id,
    depth: usize,
    bbox: BBox,
    root: BBox,
    factor: u64,
    is_3d: bool,
    tubular: bool,
    z: f64,
}

impl Climber {
    /// Creates a climber positioned at the root of `bbox`.
    pub fn new(structure: &Structure, bbox: BBox) -> Self {
        Self {
            index: Id::zero(),
            depth: 0,
            bbox,
            root: bbox,
            factor: structure.factor(),
            is_3d: structure.is_3d(),
            tubular: structure.tubular(),
            z: bbox.min.z,
        }
    }

    #[inline]
    pub fn index(&self) -> &Id {
        &self.index
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Bounds of the current node.
    #[inline]
    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    /// Returns to the root.
    pub fn reset(&mut self) {
        self.index = Id::zero();
        self.depth = 0;
        self.bbox = self.root;
        self.z = self.root.min.z;
    }

    /// Steps into the child containing `point`.
    pub fn magnify(&mut self, point: &Point) {
        let dir = self.bbox.direction(point, self.is_3d);
        self.index = self.index.child(self.factor, dir);
        self.bbox = self.bbox.go(dir, self.is_3d);
        self.depth += 1;
        self.z = point.z;
    }

    /// Descends toward `point` until reaching `depth`.
    pub fn magnify_to(&mut self, point: &Point, depth: usize) {
        while self.depth < depth {
            self.magnify(point);
        }
    }

    /// Tick of the last point stepped toward, at `z_depth` binary
    /// subdivisions of the root height. Always 0 for non-tubular trees.
    pub fn tick(&self, z_depth: usize) -> u64 {
        if !self.tubular || z_depth == 0 {
            return 0;
        }
        let height = self.root.height();
        if height <= 0.0 {
            return 0;
        }
        let ticks = 1u64 << z_depth;
        let t = ((self.z - self.root.min.z) / height * ticks as f64).floor();
        if t <= 0.0 {
            0
        } else {
            (t as u64).min(ticks - 1)
        }
    }
}
