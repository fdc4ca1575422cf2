//! Strata common types, errors, and configuration.
//!
//! This crate provides shared definitions used by the storage and tree
//! crates: geometry, node ids, schemas, structure rules and metadata.

pub mod config;
pub mod error;
pub mod metadata;
pub mod schema;
pub mod structure;
pub mod types;

pub use config::{BuildConfig, CompressionType, Subset};
pub use error::{Result, StrataError};
pub use metadata::Metadata;
pub use schema::{DimInfo, DimType, Schema, TUBE_ID_DIM};
pub use structure::{ChunkInfo, Structure, StructureConfig};
pub use types::{BBox, Id, Point};
