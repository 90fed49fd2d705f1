//! World geometry: chunk coordinates, key packing, sizing, and the reference terrain field.
#![forbid(unsafe_code)]

pub mod config;
pub mod coords;
pub mod worldgen;

pub use config::{ConfigError, MAX_EDGE, MIN_EDGE, WorldConfig};
pub use coords::{ChunkLoc, chunk_origin, world_to_chunk, world_to_local};
pub use worldgen::{GenParams, TerrainGen};
