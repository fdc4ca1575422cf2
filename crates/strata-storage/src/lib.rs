//! Storage collaborators for Strata.
//!
//! This crate provides:
//! - Blob endpoints (local filesystem and in-memory)
//! - Guaranteed puts with retry and backoff
//! - Chunk payload compression with checksums

mod compression;
mod endpoint;

pub use compression::{decompress, Compressor};
pub use endpoint::{ensure_put, Endpoint, FsEndpoint, FsEndpointConfig, MemoryEndpoint};
