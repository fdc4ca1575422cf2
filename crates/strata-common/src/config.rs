//! Build configuration for Strata.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a single index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directory that receives chunk files and metadata.
    pub output_dir: PathBuf,
    /// Number of insertion worker threads.
    pub threads: usize,
    /// Codec for chunk payloads.
    pub compression: CompressionType,
    /// Enable fsync after each chunk write.
    pub fsync_enabled: bool,
    /// Attempts made by a guaranteed put before giving up.
    pub put_attempts: usize,
    /// Set when this build produces one slice of a partitioned index.
    pub subset: Option<Subset>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./index"),
            threads: num_cpus(),
            compression: CompressionType::Lz4,
            fsync_enabled: true,
            put_attempts: 8,
            subset: None,
        }
    }
}

impl BuildConfig {
    /// Suffix appended to every stored chunk path.
    pub fn postfix(&self) -> String {
        match &self.subset {
            Some(subset) => format!("-{}", subset.id),
            None => String::new(),
        }
    }
}

/// One slice of a partitioned build. Slices with distinct ids own disjoint
/// points and their base chunks can be merged afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
    /// 1-based slice number.
    pub id: u64,
    /// Total number of slices.
    pub of: u64,
}

/// Compression algorithm for chunk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionType {
    /// Records stored as-is.
    None,
    /// LZ4 frame (fast, moderate ratio).
    #[default]
    Lz4,
    /// Zstd frame (slower, better ratio).
    Zstd,
}

impl CompressionType {
    /// Tag byte written ahead of the compressed stream.
    pub fn tag(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
            CompressionType::Zstd => 2,
        }
    }

    /// Parses a stream tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            2 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

/// Returns the number of available CPUs.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_config_defaults() {
        let config = BuildConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("./index"));
        assert!(config.threads >= 1);
        assert_eq!(config.compression, CompressionType::Lz4);
        assert!(config.fsync_enabled);
        assert_eq!(config.put_attempts, 8);
        assert!(config.subset.is_none());
    }

    #[test]
    fn test_postfix() {
        let config = BuildConfig::default();
        assert_eq!(config.postfix(), "");

        let config = BuildConfig {
            subset: Some(Subset { id: 3, of: 4 }),
            ..Default::default()
        };
        assert_eq!(config.postfix(), "-3");
    }

    #[test]
    fn test_build_config_serde_roundtrip() {
        let original = BuildConfig {
            subset: Some(Subset { id: 1, of: 2 }),
            compression: CompressionType::None,
            ..Default::default()
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: BuildConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.output_dir, deserialized.output_dir);
        assert_eq!(original.compression, deserialized.compression);
        assert_eq!(original.subset, deserialized.subset);
    }

    #[test]
    fn test_compression_tags() {
        for compression in [CompressionType::None, CompressionType::Lz4, CompressionType::Zstd] {
            assert_eq!(CompressionType::from_tag(compression.tag()), Some(compression));
        }
        assert_eq!(CompressionType::from_tag(9), None);
    }
}
