//! Point attribute schema.
//!
//! A schema is an ordered list of named, typed dimensions packed back to back
//! with no padding. Points travel through the index as raw records in this
//! layout; only X, Y and Z are ever interpreted by the tree.

use crate::error::{Result, StrataError};
use crate::types::Point;
use serde::{Deserialize, Serialize};

/// Name of the dimension prepended to base chunk records.
pub const TUBE_ID_DIM: &str = "TubeId";

/// Storage class of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimType {
    Signed,
    Unsigned,
    Floating,
}

impl std::fmt::Display for DimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DimType::Signed => "signed",
            DimType::Unsigned => "unsigned",
            DimType::Floating => "floating",
        };
        write!(f, "{}", name)
    }
}

/// A single named dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub dim_type: DimType,
    pub size: usize,
}

impl DimInfo {
    pub fn new(name: impl Into<String>, dim_type: DimType, size: usize) -> Self {
        Self {
            name: name.into(),
            dim_type,
            size,
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match self.dim_type {
            DimType::Floating => matches!(self.size, 4 | 8),
            DimType::Signed | DimType::Unsigned => matches!(self.size, 1 | 2 | 4 | 8),
        };
        if ok {
            Ok(())
        } else {
            Err(StrataError::UnsupportedDimension {
                name: self.name.clone(),
                size: self.size,
            })
        }
    }
}

/// Ordered dimension layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<DimInfo>", into = "Vec<DimInfo>")]
pub struct Schema {
    dims: Vec<DimInfo>,
    offsets: Vec<usize>,
    point_size: usize,
}

impl Schema {
    /// Creates a schema, rejecting dimensions with unsupported sizes.
    pub fn new(dims: Vec<DimInfo>) -> Result<Self> {
        let mut offsets = Vec::with_capacity(dims.len());
        let mut point_size = 0;
        for dim in &dims {
            dim.validate()?;
            offsets.push(point_size);
            point_size += dim.size;
        }
        Ok(Self {
            dims,
            offsets,
            point_size,
        })
    }

    /// Schema of three 8-byte floating X, Y, Z dimensions followed by `extra`.
    pub fn xyz(extra: Vec<DimInfo>) -> Result<Self> {
        let mut dims = vec![
            DimInfo::new("X", DimType::Floating, 8),
            DimInfo::new("Y", DimType::Floating, 8),
            DimInfo::new("Z", DimType::Floating, 8),
        ];
        dims.extend(extra);
        Self::new(dims)
    }

    /// The schema used for base chunk records: one leading 8-byte unsigned
    /// tube id, then every dimension of `self`.
    pub fn celled(&self) -> Schema {
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(DimInfo::new(TUBE_ID_DIM, DimType::Unsigned, 8));
        dims.extend(self.dims.iter().cloned());
        let offsets = std::iter::once(0)
            .chain(self.offsets.iter().map(|o| o + 8))
            .collect();
        Schema {
            dims,
            offsets,
            point_size: self.point_size + 8,
        }
    }

    /// Size of one packed record in bytes.
    #[inline]
    pub fn point_size(&self) -> usize {
        self.point_size
    }

    /// The dimension list.
    pub fn dims(&self) -> &[DimInfo] {
        &self.dims
    }

    /// Returns the byte offset and description of a dimension.
    pub fn find(&self, name: &str) -> Option<(usize, &DimInfo)> {
        self.dims
            .iter()
            .position(|d| d.name == name)
            .map(|i| (self.offsets[i], &self.dims[i]))
    }

    /// Reads a dimension of a record as f64.
    pub fn get_f64(&self, record: &[u8], name: &str) -> Result<f64> {
        self.check_len(record)?;
        let (offset, dim) = self
            .find(name)
            .ok_or_else(|| StrataError::DimensionNotFound(name.to_string()))?;
        Ok(read_as_f64(&record[offset..offset + dim.size], dim))
    }

    /// Writes a dimension of a record from an f64, converting to its type.
    pub fn set_f64(&self, record: &mut [u8], name: &str, value: f64) -> Result<()> {
        self.check_len(record)?;
        let (offset, dim) = self
            .find(name)
            .ok_or_else(|| StrataError::DimensionNotFound(name.to_string()))?;
        write_from_f64(&mut record[offset..offset + dim.size], dim, value);
        Ok(())
    }

    /// Extracts the coordinates of a record. Z defaults to zero when the
    /// schema has no Z dimension.
    pub fn read_point(&self, record: &[u8]) -> Result<Point> {
        let x = self.get_f64(record, "X")?;
        let y = self.get_f64(record, "Y")?;
        let z = if self.find("Z").is_some() {
            self.get_f64(record, "Z")?
        } else {
            0.0
        };
        Ok(Point::new(x, y, z))
    }

    /// Builds a zeroed record holding the given coordinates.
    pub fn make_record(&self, point: &Point) -> Result<Vec<u8>> {
        let mut record = vec![0u8; self.point_size];
        self.set_f64(&mut record, "X", point.x)?;
        self.set_f64(&mut record, "Y", point.y)?;
        if self.find("Z").is_some() {
            self.set_f64(&mut record, "Z", point.z)?;
        }
        Ok(record)
    }

    fn check_len(&self, record: &[u8]) -> Result<()> {
        if record.len() != self.point_size {
            return Err(StrataError::PointSizeMismatch {
                expected: self.point_size,
                actual: record.len(),
            });
        }
        Ok(())
    }
}

impl TryFrom<Vec<DimInfo>> for Schema {
    type Error = StrataError;

    fn try_from(dims: Vec<DimInfo>) -> Result<Self> {
        Schema::new(dims)
    }
}

impl From<Schema> for Vec<DimInfo> {
    fn from(schema: Schema) -> Self {
        schema.dims
    }
}

fn read_as_f64(bytes: &[u8], dim: &DimInfo) -> f64 {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    match (dim.dim_type, dim.size) {
        (DimType::Floating, 4) => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        (DimType::Floating, _) => f64::from_le_bytes(raw),
        (DimType::Unsigned, _) => u64::from_le_bytes(raw) as f64,
        (DimType::Signed, size) => {
            // Sign-extend from the dimension width.
            let shift = 64 - size * 8;
            ((i64::from_le_bytes(raw) << shift) >> shift) as f64
        }
    }
}

fn write_from_f64(out: &mut [u8], dim: &DimInfo, value: f64) {
    let size = dim.size;
    match (dim.dim_type, size) {
        (DimType::Floating, 4) => out.copy_from_slice(&(value as f32).to_le_bytes()),
        (DimType::Floating, _) => out.copy_from_slice(&value.to_le_bytes()),
        (DimType::Unsigned, _) => out.copy_from_slice(&(value as u64).to_le_bytes()[..size]),
        (DimType::Signed, _) => out.copy_from_slice(&(value as i64).to_le_bytes()[..size]),
    }
}
