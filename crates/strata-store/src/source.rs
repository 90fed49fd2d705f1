//! Where chunks come from and go to.

use hashbrown::HashMap;
use parking_lot::Mutex;
use strata_chunk::{Chunk, DisposedWritePolicy, generate_chunk};
use strata_io::{ChunkSnapshot, SaveDir, SnapshotError};
use strata_world::{ChunkLoc, TerrainGen, WorldConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Stored data exists but cannot be used. The store reacts by retrying
    /// the location through `regenerate` instead of failing the load.
    #[error("corrupt chunk data at {0:?}: {1}")]
    Corrupt(ChunkLoc, String),
    #[error("source i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// A fetch result: the chunk plus whether it had to be generated.
pub struct Fetched {
    pub chunk: Chunk,
    pub newly_generated: bool,
}

/// Persistence collaborator. `fetch` and `regenerate` hand back
/// `Initializing` chunks; the store owns publication and validity.
/// `regenerate` must never consult saved data.
pub trait ChunkSource: Send + Sync {
    fn fetch(&self, loc: ChunkLoc) -> Result<Fetched, SourceError>;
    fn regenerate(&self, loc: ChunkLoc) -> Result<Fetched, SourceError>;
    fn save(&self, chunk: &Chunk) -> Result<(), SourceError>;
}

/// Terrain-backed source that keeps saves in memory. The default for tests
/// and headless runs.
pub struct MemorySource {
    cfg: WorldConfig,
    terrain: TerrainGen,
    policy: DisposedWritePolicy,
    saved: Mutex<HashMap<i64, ChunkSnapshot>>,
}

impl MemorySource {
    pub fn new(cfg: WorldConfig, terrain: TerrainGen, policy: DisposedWritePolicy) -> Self {
        Self {
            cfg,
            terrain,
            policy,
            saved: Mutex::new(HashMap::new()),
        }
    }

    pub fn saved_count(&self) -> usize {
        self.saved.lock().len()
    }

    pub fn has_saved(&self, loc: ChunkLoc) -> bool {
        self.saved.lock().contains_key(&loc.pack())
    }
}

impl ChunkSource for MemorySource {
    fn fetch(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        if let Some(snap) = self.saved.lock().get(&loc.pack()) {
            return Ok(Fetched {
                chunk: snap.restore(self.policy),
                newly_generated: false,
            });
        }
        self.regenerate(loc)
    }

    fn regenerate(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        Ok(Fetched {
            chunk: generate_chunk(&self.cfg, &self.terrain, loc, self.policy),
            newly_generated: true,
        })
    }

    fn save(&self, chunk: &Chunk) -> Result<(), SourceError> {
        let snap = ChunkSnapshot::capture(chunk);
        self.saved.lock().insert(chunk.packed_loc(), snap);
        Ok(())
    }
}

/// Disk-backed source: snapshots under a save directory, generation for
/// everything else.
pub struct DiskSource {
    cfg: WorldConfig,
    terrain: TerrainGen,
    policy: DisposedWritePolicy,
    saves: SaveDir,
}

impl DiskSource {
    pub fn new(
        cfg: WorldConfig,
        terrain: TerrainGen,
        policy: DisposedWritePolicy,
        saves: SaveDir,
    ) -> Self {
        Self {
            cfg,
            terrain,
            policy,
            saves,
        }
    }

    fn map_err(loc: ChunkLoc, err: SnapshotError) -> SourceError {
        match err {
            SnapshotError::Corrupt(why) => SourceError::Corrupt(loc, why),
            SnapshotError::Io(e) => SourceError::Io(e),
            SnapshotError::Encode(e) => SourceError::Other(e.to_string()),
        }
    }
}

impl ChunkSource for DiskSource {
    fn fetch(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        match self.saves.load(loc).map_err(|e| Self::map_err(loc, e))? {
            Some(snap) => {
                // a snapshot from a different world shape is unusable data
                if snap.edge as usize != self.cfg.edge() {
                    return Err(SourceError::Corrupt(
                        loc,
                        format!("edge {} but world uses {}", snap.edge, self.cfg.edge()),
                    ));
                }
                Ok(Fetched {
                    chunk: snap.restore(self.policy),
                    newly_generated: false,
                })
            }
            None => self.regenerate(loc),
        }
    }

    fn regenerate(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        Ok(Fetched {
            chunk: generate_chunk(&self.cfg, &self.terrain, loc, self.policy),
            newly_generated: true,
        })
    }

    fn save(&self, chunk: &Chunk) -> Result<(), SourceError> {
        let snap = ChunkSnapshot::capture(chunk);
        self.saves
            .save(&snap)
            .map_err(|e| Self::map_err(chunk.loc(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_blocks::MaterialCatalog;
    use strata_world::GenParams;

    fn world() -> (WorldConfig, TerrainGen) {
        let cfg = WorldConfig::default();
        let terrain = TerrainGen::new(GenParams::default(), &MaterialCatalog::builtin());
        (cfg, terrain)
    }

    #[test]
    fn memory_source_prefers_saved_data_over_generation() {
        let (cfg, terrain) = world();
        let src = MemorySource::new(cfg, terrain, DisposedWritePolicy::Ignore);
        let loc = ChunkLoc::new(0, 2);

        let first = src.fetch(loc).unwrap();
        assert!(first.newly_generated);
        src.save(&first.chunk).unwrap();

        let second = src.fetch(loc).unwrap();
        assert!(!second.newly_generated);
        assert_eq!(
            second.chunk.materials_snapshot(),
            first.chunk.materials_snapshot()
        );
    }

    #[test]
    fn disk_source_round_trips_and_flags_shape_mismatches() {
        let (cfg, terrain) = world();
        let dir = tempfile::tempdir().unwrap();
        let src = DiskSource::new(
            cfg,
            terrain,
            DisposedWritePolicy::Ignore,
            SaveDir::new(dir.path()),
        );
        let loc = ChunkLoc::new(-1, 1);

        let fetched = src.fetch(loc).unwrap();
        assert!(fetched.newly_generated);
        src.save(&fetched.chunk).unwrap();
        let again = src.fetch(loc).unwrap();
        assert!(!again.newly_generated);

        // same directory, different world shape
        let (_, terrain2) = world();
        let narrow = DiskSource::new(
            WorldConfig { chunk_edge: 16 },
            terrain2,
            DisposedWritePolicy::Ignore,
            SaveDir::new(dir.path()),
        );
        match narrow.fetch(loc) {
            Err(SourceError::Corrupt(l, _)) => assert_eq!(l, loc),
            other => panic!("expected corrupt, got {:?}", other.map(|f| f.newly_generated)),
        }
    }
}
