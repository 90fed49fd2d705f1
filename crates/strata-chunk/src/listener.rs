//! Callback seam between a chunk and whatever owns it.
//!
//! The chunk never talks to the store type directly; it reports mutations
//! through this trait and the owner decides what to publish or schedule.

use strata_blocks::TopFlags;
use strata_world::ChunkLoc;

use crate::Block;

/// A committed block replacement inside a valid chunk.
#[derive(Debug, Clone, Copy)]
pub struct BlockChange {
    pub loc: ChunkLoc,
    pub lx: usize,
    pub ly: usize,
    pub old: Option<Block>,
    pub new: Option<Block>,
}

/// Hint that the top-of-column heights for `(chunk_x, local_x)` may have
/// moved because a block at `world_y` changed. `flags` is the union of the
/// old and new material's top flags, so it names every height kind the write
/// could have affected.
#[derive(Debug, Clone, Copy)]
pub struct ColumnHint {
    pub chunk_x: i32,
    pub local_x: usize,
    pub world_y: i32,
    pub flags: TopFlags,
}

/// Receives side effects of chunk mutations. Calls are made after the chunk's
/// cell lock has been released, so implementations may take their own locks
/// or re-enter the chunk.
pub trait ChunkListener: Send + Sync {
    /// A block was replaced in a valid chunk.
    fn block_changed(&self, change: BlockChange);
    /// Column heights near a write need re-derivation.
    fn column_hint(&self, hint: ColumnHint);
    /// A light emitter appeared or disappeared at a world position.
    fn light_source_changed(&self, wx: i32, wy: i32);
}
