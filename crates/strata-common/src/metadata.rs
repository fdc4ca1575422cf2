//! Index metadata document.

use crate::config::{CompressionType, Subset};
use crate::error::Result;
use crate::schema::Schema;
use crate::structure::Structure;
use crate::types::{BBox, Id};
use serde::{Deserialize, Serialize};

/// Description of a built index, stored as JSON next to its chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Point record layout.
    pub schema: Schema,
    /// Root bounds.
    pub bbox: BBox,
    /// Addressing rules.
    pub structure: Structure,
    /// Chunk payload codec.
    pub compression: CompressionType,
    /// Slice of a partitioned build, if any.
    #[serde(default)]
    pub subset: Option<Subset>,
    /// Cold chunks present in storage.
    #[serde(default)]
    pub ids: Vec<Id>,
    /// Points resident in the tree.
    #[serde(default)]
    pub num_points: u64,
    /// Points dropped by the depth ceiling.
    #[serde(default)]
    pub num_dropped: u64,
    /// Points rejected for lying outside the bounds.
    #[serde(default)]
    pub num_out_of_bounds: u64,
}

impl Metadata {
    /// Creates metadata for a fresh build.
    pub fn new(schema: Schema, bbox: BBox, structure: Structure, compression: CompressionType) -> Self {
        Self {
            schema,
            bbox,
            structure,
            compression,
            subset: None,
            ids: Vec::new(),
            num_points: 0,
            num_dropped: 0,
            num_out_of_bounds: 0,
        }
    }

    /// Serializes to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses metadata from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
