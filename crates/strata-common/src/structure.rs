//! Tree addressing rules.
//!
//! Depths split into consecutive bands:
//!
//! ```text
//! [0, null_depth_end)                   no points stored
//! [null_depth_end, base_depth_end)      base chunk, always resident
//! [base_depth_end, max_depth)           cold chunks, paged on demand
//!     [sparse_depth_begin, max_depth)   cold chunks stored sparsely
//! ```
//!
//! Node ids are breadth-first flat addresses, so each band is a contiguous
//! id range and range membership alone decides routing.

use crate::error::{Result, StrataError};
use crate::types::Id;
use serde::{Deserialize, Serialize};

/// Deepest supported tick subdivision; ticks must fit below u64::MAX.
pub const MAX_TICK_DEPTH: usize = 62;

/// User-facing structure parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    /// First depth that stores points.
    pub null_depth_end: usize,
    /// First depth beyond the base chunk.
    pub base_depth_end: usize,
    /// First depth whose chunks are sparse.
    pub sparse_depth_begin: usize,
    /// Points reaching this depth are dropped.
    pub max_depth: usize,
    /// Nodes per cold chunk above the sparse depth.
    pub chunk_points: u64,
    /// 2 for a quadtree, 3 for an octree.
    pub dimensions: usize,
    /// Quantize z into ticks within each 2D node.
    pub tubular: bool,
    /// Upper bound on tick resolution, in binary subdivisions of z.
    pub max_tick_depth: usize,
    /// Prefix stored chunk paths with a short hash.
    pub prefix_ids: bool,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            null_depth_end: 0,
            base_depth_end: 4,
            sparse_depth_begin: 8,
            max_depth: 12,
            chunk_points: 4096,
            dimensions: 3,
            tubular: false,
            max_tick_depth: 20,
            prefix_ids: false,
        }
    }
}

/// Location of a cold node's chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Depth of the node and of its chunk.
    pub depth: usize,
    /// Id of the first node in the chunk.
    pub chunk_id: Id,
    /// Ordinal of the chunk within its depth.
    pub chunk_num: Id,
    /// Node capacity of the chunk.
    pub points_per_chunk: Id,
}

/// Validated, immutable addressing rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StructureConfig", into = "StructureConfig")]
pub struct Structure {
    config: StructureConfig,
    factor: u64,
    base_index_begin: Id,
    base_index_span: Id,
    cold_index_begin: Id,
    sparse_index_begin: Id,
    max_index: Id,
}

impl Structure {
    /// Validates the configuration and derives index boundaries.
    pub fn new(config: StructureConfig) -> Result<Self> {
        if config.dimensions != 2 && config.dimensions != 3 {
            return Err(StrataError::InvalidParameter {
                name: "dimensions".to_string(),
                value: config.dimensions.to_string(),
            });
        }
        if config.tubular && config.dimensions != 2 {
            return Err(StrataError::ConfigError(
                "tubular structures must be 2D".to_string(),
            ));
        }
        if config.max_depth == 0 {
            return Err(StrataError::InvalidParameter {
                name: "max_depth".to_string(),
                value: "0".to_string(),
            });
        }
        if config.chunk_points == 0 {
            return Err(StrataError::InvalidParameter {
                name: "chunk_points".to_string(),
                value: "0".to_string(),
            });
        }
        if config.max_tick_depth > MAX_TICK_DEPTH {
            return Err(StrataError::InvalidParameter {
                name: "max_tick_depth".to_string(),
                value: config.max_tick_depth.to_string(),
            });
        }
        // The root is either null or base: a cold chunk at depth 0 would be
        // indistinguishable from the base chunk.
        if config.base_depth_end == 0 {
            return Err(StrataError::ConfigError(
                "base depth must end at depth 1 or deeper".to_string(),
            ));
        }
        if config.null_depth_end > config.base_depth_end {
            return Err(StrataError::ConfigError(
                "null depth ends after base depth".to_string(),
            ));
        }
        if config.base_depth_end > config.max_depth {
            return Err(StrataError::ConfigError(
                "base depth ends after max depth".to_string(),
            ));
        }
        if config.base_depth_end > config.sparse_depth_begin {
            return Err(StrataError::ConfigError(
                "sparse depth begins inside the base".to_string(),
            ));
        }

        let factor = 1u64 << config.dimensions;
        let base_index_begin = index_begin(factor, config.null_depth_end);
        let cold_index_begin = index_begin(factor, config.base_depth_end);
        let base_index_span = &cold_index_begin - &base_index_begin;

        Ok(Self {
            factor,
            base_index_begin,
            base_index_span,
            cold_index_begin,
            sparse_index_begin: index_begin(factor, config.sparse_depth_begin),
            max_index: index_begin(factor, config.max_depth),
            config,
        })
    }

    /// The configuration this structure was built from.
    pub fn config(&self) -> &StructureConfig {
        &self.config
    }

    /// Children per node.
    #[inline]
    pub fn factor(&self) -> u64 {
        self.factor
    }

    #[inline]
    pub fn is_3d(&self) -> bool {
        self.config.dimensions == 3
    }

    #[inline]
    pub fn tubular(&self) -> bool {
        self.config.tubular
    }

    pub fn max_tick_depth(&self) -> usize {
        self.config.max_tick_depth
    }

    pub fn max_depth(&self) -> usize {
        self.config.max_depth
    }

    pub fn null_depth_end(&self) -> usize {
        self.config.null_depth_end
    }

    pub fn base_depth_end(&self) -> usize {
        self.config.base_depth_end
    }

    pub fn sparse_depth_begin(&self) -> usize {
        self.config.sparse_depth_begin
    }

    pub fn base_index_begin(&self) -> &Id {
        &self.base_index_begin
    }

    /// Number of nodes held by the base chunk.
    pub fn base_index_span(&self) -> &Id {
        &self.base_index_span
    }

    pub fn has_base(&self) -> bool {
        !self.base_index_span.is_zero()
    }

    pub fn cold_index_begin(&self) -> &Id {
        &self.cold_index_begin
    }

    pub fn sparse_index_begin(&self) -> &Id {
        &self.sparse_index_begin
    }

    /// First id past the deepest storable depth.
    pub fn max_index(&self) -> &Id {
        &self.max_index
    }

    pub fn has_cold(&self) -> bool {
        self.config.base_depth_end < self.config.max_depth
    }

    #[inline]
    pub fn is_within_base(&self, index: &Id) -> bool {
        *index >= self.base_index_begin && *index < self.cold_index_begin
    }

    #[inline]
    pub fn is_within_cold(&self, index: &Id) -> bool {
        *index >= self.cold_index_begin && *index < self.max_index
    }

    /// Returns true if a node at this index may hold a point.
    #[inline]
    pub fn in_range(&self, index: &Id) -> bool {
        *index < self.max_index
    }

    /// Id of the first node at `depth`.
    pub fn index_begin(&self, depth: usize) -> Id {
        index_begin(self.factor, depth)
    }

    /// Depth of the node with the given id.
    pub fn calc_depth(&self, index: &Id) -> usize {
        calc_depth(self.factor, index)
    }

    /// Locates the chunk holding a cold node.
    pub fn chunk_info(&self, index: &Id, depth: usize) -> ChunkInfo {
        let level_begin = self.index_begin(depth);
        let level_nodes = Id::pow(self.factor, depth);

        let mut points_per_chunk = Id::from(self.config.chunk_points);
        if depth > self.config.sparse_depth_begin {
            let growth = Id::pow(self.factor, depth - self.config.sparse_depth_begin);
            points_per_chunk = &points_per_chunk * &growth;
        }
        if points_per_chunk > level_nodes {
            points_per_chunk = level_nodes;
        }

        let offset = index - &level_begin;
        let chunk_num = &offset / &points_per_chunk;
        let chunk_id = &level_begin + &(&chunk_num * &points_per_chunk);

        ChunkInfo {
            depth,
            chunk_id,
            chunk_num,
            points_per_chunk,
        }
    }

    /// Storage path stem for a chunk id, optionally hash-prefixed so that
    /// object stores spread neighbouring chunks across partitions.
    pub fn maybe_prefix(&self, id: &Id) -> String {
        let s = id.to_string();
        if self.config.prefix_ids {
            let hash = crc32fast::hash(s.as_bytes()) & 0xffff;
            format!("{:04x}-{}", hash, s)
        } else {
            s
        }
    }
}

impl TryFrom<StructureConfig> for Structure {
    type Error = StrataError;

    fn try_from(config: StructureConfig) -> Result<Self> {
        Structure::new(config)
    }
}

impl From<Structure> for StructureConfig {
    fn from(structure: Structure) -> Self {
        structure.config
    }
}

/// Id of the first node at `depth` for the given branching factor:
/// `(factor^depth - 1) / (factor - 1)`.
pub fn index_begin(factor: u64, depth: usize) -> Id {
    let total = Id::pow(factor, depth);
    &(&total - &Id::from(1u64)) / (factor - 1)
}

/// Depth of the node with the given id.
pub fn calc_depth(factor: u64, index: &Id) -> usize {
    let mut depth = 0;
    let mut next_begin = Id::from(1u64);
    while *index >= next_begin {
        depth += 1;
        next_begin = next_begin.child(factor, 0);
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadtree() -> Structure {
        Structure::new(StructureConfig {
            null_depth_end: 0,
            base_depth_end: 1,
            sparse_depth_begin: 2,
            max_depth: 3,
            chunk_points: 4,
            dimensions: 2,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_index_begin() {
        assert_eq!(index_begin(4, 0), Id::zero());
        assert_eq!(index_begin(4, 1), Id::from(1u64));
        assert_eq!(index_begin(4, 2), Id::from(5u64));
        assert_eq!(index_begin(4, 3), Id::from(21u64));
        assert_eq!(index_begin(8, 2), Id::from(9u64));
        assert_eq!(index_begin(8, 3), Id::from(73u64));
    }

    #[test]
    fn test_calc_depth() {
        assert_eq!(calc_depth(4, &Id::zero()), 0);
        assert_eq!(calc_depth(4, &Id::from(1u64)), 1);
        assert_eq!(calc_depth(4, &Id::from(4u64)), 1);
        assert_eq!(calc_depth(4, &Id::from(5u64)), 2);
        assert_eq!(calc_depth(4, &Id::from(20u64)), 2);
        assert_eq!(calc_depth(8, &Id::from(73u64)), 3);

        let deep = index_begin(8, 40);
        assert_eq!(calc_depth(8, &deep), 40);
    }

    #[test]
    fn test_structure_ranges() {
        let s = quadtree();
        assert_eq!(s.factor(), 4);
        assert_eq!(*s.base_index_begin(), Id::zero());
        assert_eq!(*s.base_index_span(), Id::from(1u64));
        assert_eq!(*s.cold_index_begin(), Id::from(1u64));
        assert_eq!(*s.sparse_index_begin(), Id::from(5u64));
        assert_eq!(*s.max_index(), Id::from(21u64));

        assert!(s.is_within_base(&Id::zero()));
        assert!(!s.is_within_base(&Id::from(1u64)));
        assert!(s.is_within_cold(&Id::from(1u64)));
        assert!(s.is_within_cold(&Id::from(20u64)));
        assert!(!s.is_within_cold(&Id::from(21u64)));
        assert!(!s.in_range(&Id::from(21u64)));
        assert!(s.has_base());
        assert!(s.has_cold());
    }

    #[test]
    fn test_null_depth_excludes_shallow_nodes() {
        let s = Structure::new(StructureConfig {
            null_depth_end: 1,
            base_depth_end: 2,
            sparse_depth_begin: 3,
            max_depth: 4,
            chunk_points: 16,
            dimensions: 2,
            ..Default::default()
        })
        .unwrap();
        assert!(!s.is_within_base(&Id::zero()));
        assert!(!s.is_within_cold(&Id::zero()));
        assert_eq!(*s.base_index_begin(), Id::from(1u64));
        assert_eq!(*s.base_index_span(), Id::from(4u64));
    }

    #[test]
    fn test_chunk_info_contiguous_levels() {
        let s = Structure::new(StructureConfig {
            base_depth_end: 2,
            sparse_depth_begin: 4,
            max_depth: 6,
            chunk_points: 16,
            dimensions: 2,
            ..Default::default()
        })
        .unwrap();

        // Depth 2 holds 16 nodes, exactly one chunk.
        let info = s.chunk_info(&Id::from(7u64), 2);
        assert_eq!(info.chunk_id, Id::from(5u64));
        assert_eq!(info.chunk_num, Id::zero());
        assert_eq!(info.points_per_chunk, Id::from(16u64));

        // Depth 3 holds 64 nodes in four chunks.
        let info = s.chunk_info(&Id::from(21u64 + 40), 3);
        assert_eq!(info.chunk_num, Id::from(2u64));
        assert_eq!(info.chunk_id, Id::from(21u64 + 32));
    }

    #[test]
    fn test_chunk_info_sparse_levels_grow() {
        let s = Structure::new(StructureConfig {
            base_depth_end: 2,
            sparse_depth_begin: 3,
            max_depth: 6,
            chunk_points: 16,
            dimensions: 2,
            ..Default::default()
        })
        .unwrap();

        let at_sparse = s.chunk_info(&s.index_begin(3), 3);
        let below = s.chunk_info(&s.index_begin(4), 4);
        assert_eq!(at_sparse.points_per_chunk, Id::from(16u64));
        assert_eq!(below.points_per_chunk, Id::from(64u64));
    }

    #[test]
    fn test_structure_validation() {
        let bad_dims = Structure::new(StructureConfig {
            dimensions: 4,
            ..Default::default()
        });
        assert!(matches!(bad_dims, Err(StrataError::InvalidParameter { .. })));

        let bad_tubular = Structure::new(StructureConfig {
            tubular: true,
            dimensions: 3,
            ..Default::default()
        });
        assert!(matches!(bad_tubular, Err(StrataError::ConfigError(_))));

        let bad_order = Structure::new(StructureConfig {
            base_depth_end: 9,
            sparse_depth_begin: 8,
            ..Default::default()
        });
        assert!(bad_order.is_err());

        let cold_root = Structure::new(StructureConfig {
            base_depth_end: 0,
            ..Default::default()
        });
        assert!(matches!(cold_root, Err(StrataError::ConfigError(_))));

        let fine_ticks = Structure::new(StructureConfig {
            max_tick_depth: 63,
            ..Default::default()
        });
        assert!(matches!(
            fine_ticks,
            Err(StrataError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_maybe_prefix() {
        let plain = quadtree();
        assert_eq!(plain.maybe_prefix(&Id::from(42u64)), "42");

        let prefixed = Structure::new(StructureConfig {
            prefix_ids: true,
            ..Default::default()
        })
        .unwrap();
        let path = prefixed.maybe_prefix(&Id::from(42u64));
        assert!(path.ends_with("-42"));
        assert_eq!(path.len(), "0000-42".len());
    }

    #[test]
    fn test_structure_serde_roundtrip() {
        let original = quadtree();
        let json = serde_json::to_string(&original).unwrap();
        let back: Structure = serde_json::from_str(&json).unwrap();
        assert_eq!(original, back);
    }
}
