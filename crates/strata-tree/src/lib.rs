//! Strata point tree.
//!
//! Points descend a quadtree or octree from the root. Each node holds at most
//! one point per tick, the one closest to the node's center; farther points
//! are displaced downward. The top of the tree lives in an always-resident
//! base chunk, the rest in cold chunks that are paged to storage once no
//! inserter references them.
//!
//! Typical flow: build a `BuildContext`, create a `Registry`, insert from any
//! number of threads (one `Clipper` each, released when the thread is done),
//! then `Registry::save`.

pub mod cell;
pub mod chunk;
pub mod climber;
pub mod clip_pool;
pub mod clipper;
pub mod cold;
pub mod context;
pub mod pool;
pub mod registry;
pub mod tube;

pub use cell::Cell;
pub use chunk::{Chunk, ChunkKind, ChunkType, Tail};
pub use climber::Climber;
pub use clip_pool::ClipPool;
pub use clipper::Clipper;
pub use cold::Cold;
pub use context::BuildContext;
pub use pool::{PointHandle, PointInfo, PointPool};
pub use registry::{better, InsertStats, Registry};
pub use tube::Tube;
