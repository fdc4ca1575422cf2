//! Trailer appended to every serialized chunk.
//!
//! Layout (9 bytes, at the very end of the blob):
//! - num_points: 8 bytes (u64 LE)
//! - chunk_type: 1 byte

/// Size of the trailer in bytes.
pub const TAIL_SIZE: usize = 9;

/// How a serialized chunk lays out its points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    /// Unreadable trailer.
    Invalid = 0,
    /// Nodes stored in a map keyed by node id.
    Sparse = 1,
    /// Nodes stored in a dense array.
    Contiguous = 2,
}

impl ChunkType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ChunkType::Sparse,
            2 => ChunkType::Contiguous,
            _ => ChunkType::Invalid,
        }
    }
}

/// Decoded trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tail {
    pub num_points: u64,
    pub chunk_type: ChunkType,
}

impl Tail {
    pub fn new(num_points: u64, chunk_type: ChunkType) -> Self {
        Self {
            num_points,
            chunk_type,
        }
    }

    fn invalid() -> Self {
        Self::new(0, ChunkType::Invalid)
    }
}

/// Appends the trailer to `data`.
pub fn push_tail(data: &mut Vec<u8>, tail: Tail) {
    data.extend_from_slice(&tail.num_points.to_le_bytes());
    data.push(tail.chunk_type as u8);
}

/// Strips and decodes the trailer.
///
/// An undersized buffer or unknown type byte yields an `Invalid` tail and
/// leaves `data` untouched.
pub fn pop_tail(data: &mut Vec<u8>) -> Tail {
    if data.len() < TAIL_SIZE {
        return Tail::invalid();
    }

    let type_pos = data.len() - 1;
    let chunk_type = ChunkType::from_u8(data[type_pos]);
    if chunk_type == ChunkType::Invalid {
        return Tail::invalid();
    }

    let count_pos = data.len() - TAIL_SIZE;
    let mut count = [0u8; 8];
    count.copy_from_slice(&data[count_pos..type_pos]);
    data.truncate(count_pos);

    Tail::new(u64::from_le_bytes(count), chunk_type)
}
