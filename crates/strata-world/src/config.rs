use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::coords::{ChunkLoc, chunk_origin, world_to_chunk, world_to_local};

/// Smallest accepted chunk edge.
pub const MIN_EDGE: usize = 4;
/// Largest accepted chunk edge; local coordinates must fit in a byte.
pub const MAX_EDGE: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("chunk edge {0} is not a power of two")]
    EdgeNotPowerOfTwo(usize),
    #[error("chunk edge {0} out of range ({MIN_EDGE}..={MAX_EDGE})")]
    EdgeOutOfRange(usize),
}

/// World sizing. The chunk edge must be a power of two so world<->chunk
/// conversion stays a bit shift (the packed-key convention depends on it).
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_chunk_edge")]
    pub chunk_edge: usize,
}

fn default_chunk_edge() -> usize {
    32
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self { chunk_edge: 32 }
    }
}

impl WorldConfig {
    pub fn validated(self) -> Result<Self, ConfigError> {
        if !(MIN_EDGE..=MAX_EDGE).contains(&self.chunk_edge) {
            return Err(ConfigError::EdgeOutOfRange(self.chunk_edge));
        }
        if !self.chunk_edge.is_power_of_two() {
            return Err(ConfigError::EdgeNotPowerOfTwo(self.chunk_edge));
        }
        Ok(self)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let cfg: WorldConfig = toml::from_str(toml_str)?;
        cfg.validated()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    #[inline]
    pub fn edge(&self) -> usize {
        self.chunk_edge
    }

    #[inline]
    pub fn edge_log2(&self) -> u32 {
        self.chunk_edge.trailing_zeros()
    }

    #[inline]
    pub fn chunk_of(&self, w: i32) -> i32 {
        world_to_chunk(w, self.edge_log2())
    }

    #[inline]
    pub fn local_of(&self, w: i32) -> usize {
        world_to_local(w, self.edge_log2())
    }

    #[inline]
    pub fn origin_of(&self, c: i32) -> i32 {
        chunk_origin(c, self.edge_log2())
    }

    #[inline]
    pub fn loc_of_world(&self, wx: i32, wy: i32) -> ChunkLoc {
        ChunkLoc::new(self.chunk_of(wx), self.chunk_of(wy))
    }
}
