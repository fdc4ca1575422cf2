//! State shared by every chunk of one build.

use crate::chunk::Chunk;
use crate::climber::Climber;
use crate::pool::PointPool;
use std::sync::Arc;
use strata_common::{BBox, BuildConfig, CompressionType, Id, Result, Schema, Structure};
use strata_storage::Endpoint;

/// Immutable build parameters plus the point pool.
pub struct BuildContext {
    structure: Structure,
    schema: Schema,
    celled_schema: Schema,
    bbox: BBox,
    pool: PointPool,
    compression: CompressionType,
    postfix: String,
    put_attempts: usize,
    threads: usize,
}

impl BuildContext {
    pub fn new(schema: Schema, bbox: BBox, structure: Structure, config: &BuildConfig) -> Arc<Self> {
        Arc::new(Self {
            celled_schema: schema.celled(),
            structure,
            schema,
            bbox,
            pool: PointPool::new(),
            compression: config.compression,
            postfix: config.postfix(),
            put_attempts: config.put_attempts,
            threads: config.threads.max(1),
        })
    }

    #[inline]
    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Schema of base chunk records.
    #[inline]
    pub fn celled_schema(&self) -> &Schema {
        &self.celled_schema
    }

    #[inline]
    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    #[inline]
    pub fn pool(&self) -> &PointPool {
        &self.pool
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts
    }

    /// Insertion workers used by batch inserts.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// A climber at the root of the build bounds.
    pub fn climber(&self) -> Climber {
        Climber::new(&self.structure, self.bbox)
    }

    /// Storage path of the chunk starting at `id`.
    pub fn chunk_path(&self, id: &Id) -> String {
        format!("{}{}", self.structure.maybe_prefix(id), self.postfix)
    }

    /// Reads a persisted chunk back from `endpoint`.
    ///
    /// The base chunk is recognized by its id; any other id is treated as a
    /// cold chunk and sized from the structure.
    pub fn load_chunk(self: &Arc<Self>, endpoint: &dyn Endpoint, id: &Id) -> Result<Chunk> {
        let data = endpoint.get(&self.chunk_path(id))?;
        if id == self.structure.base_index_begin() && self.structure.has_base() {
            let span = self.structure.base_index_span().clone();
            return Chunk::from_bytes(Arc::clone(self), 0, id.clone(), span, data);
        }

        let depth = self.structure.calc_depth(id);
        let info = self.structure.chunk_info(id, depth);
        Chunk::from_bytes(Arc::clone(self), depth, id.clone(), info.points_per_chunk, data)
    }
}
