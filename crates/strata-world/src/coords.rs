use serde::{Deserialize, Serialize};

/// Chunk coordinate pair. Packs into a single i64 key for map and file use:
/// x in the high 32 bits, y in the low 32.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkLoc {
    pub cx: i32,
    pub cy: i32,
}

impl ChunkLoc {
    #[inline]
    pub const fn new(cx: i32, cy: i32) -> Self {
        Self { cx, cy }
    }

    #[inline]
    pub const fn pack(self) -> i64 {
        ((self.cx as i64) << 32) | (self.cy as u32 as i64)
    }

    #[inline]
    pub const fn unpack(key: i64) -> Self {
        Self {
            cx: (key >> 32) as i32,
            cy: key as i32,
        }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            cx: self.cx + dx,
            cy: self.cy + dy,
        }
    }

    #[inline]
    pub fn distance_sq(self, other: ChunkLoc) -> i64 {
        let dx = i64::from(self.cx - other.cx);
        let dy = i64::from(self.cy - other.cy);
        dx * dx + dy * dy
    }
}

impl From<(i32, i32)> for ChunkLoc {
    fn from(value: (i32, i32)) -> Self {
        Self::new(value.0, value.1)
    }
}

impl From<ChunkLoc> for (i32, i32) {
    fn from(value: ChunkLoc) -> Self {
        (value.cx, value.cy)
    }
}

/// World -> chunk coordinate. Arithmetic shift, so negative coordinates floor.
#[inline]
pub const fn world_to_chunk(w: i32, edge_log2: u32) -> i32 {
    w >> edge_log2
}

/// World -> offset within the chunk, `0..edge`.
#[inline]
pub const fn world_to_local(w: i32, edge_log2: u32) -> usize {
    (w & ((1 << edge_log2) - 1)) as usize
}

/// Chunk -> world coordinate of its low edge.
#[inline]
pub const fn chunk_origin(c: i32, edge_log2: u32) -> i32 {
    c << edge_log2
}
