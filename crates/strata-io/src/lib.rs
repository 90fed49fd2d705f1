//! Chunk snapshots and the flat on-disk save directory.
#![forbid(unsafe_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use strata_blocks::MaterialId;
use strata_chunk::{Chunk, DisposedWritePolicy};
use strata_world::{ChunkLoc, MAX_EDGE, MIN_EDGE};

/// Bumped whenever the encoded layout changes; older data reads as corrupt
/// rather than silently misparsing.
pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Data was present but unusable. Callers treat this differently from
    /// `Io`: the slot is retried with generation instead of failing the load.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    #[error("snapshot encode failed: {0}")]
    Encode(#[source] bincode::Error),
}

/// Block contents of one chunk in a stable, light-free form. Light state is
/// deliberately absent: it is recomputed from materials after a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    pub version: u8,
    pub loc: ChunkLoc,
    pub edge: u32,
    /// Row-major material ids, `ly` major.
    pub cells: Vec<u16>,
}

impl ChunkSnapshot {
    pub fn capture(chunk: &Chunk) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            loc: chunk.loc(),
            edge: chunk.edge() as u32,
            cells: chunk.materials_snapshot().iter().map(|m| m.0).collect(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(SnapshotError::Encode)
    }

    /// Decodes and validates. Anything that does not add up is `Corrupt`.
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snap: ChunkSnapshot = bincode::deserialize(bytes)
            .map_err(|e| SnapshotError::Corrupt(format!("undecodable: {e}")))?;
        if snap.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Corrupt(format!(
                "version {} (supported {})",
                snap.version, SNAPSHOT_VERSION
            )));
        }
        let edge = snap.edge as usize;
        if !(MIN_EDGE..=MAX_EDGE).contains(&edge) || !edge.is_power_of_two() {
            return Err(SnapshotError::Corrupt(format!("edge {edge}")));
        }
        if snap.cells.len() != edge * edge {
            return Err(SnapshotError::Corrupt(format!(
                "{} cells for edge {edge}",
                snap.cells.len()
            )));
        }
        Ok(snap)
    }

    /// Rebuilds an `Initializing` chunk. Light starts dark; the owner
    /// schedules a full pass once the chunk goes valid.
    pub fn restore(&self, policy: DisposedWritePolicy) -> Chunk {
        let mats = self.cells.iter().map(|c| MaterialId(*c)).collect();
        Chunk::from_materials(self.loc, self.edge as usize, mats, policy)
    }
}

/// Flat directory of chunk snapshots, one file per packed location.
#[derive(Debug, Clone)]
pub struct SaveDir {
    root: PathBuf,
}

impl SaveDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, loc: ChunkLoc) -> PathBuf {
        self.root.join(format!("{}.chunk", loc.pack()))
    }

    pub fn save(&self, snapshot: &ChunkSnapshot) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.root)?;
        let bytes = snapshot.encode()?;
        fs::write(self.path_for(snapshot.loc), &bytes)?;
        debug!("saved chunk {:?} ({} bytes)", snapshot.loc, bytes.len());
        Ok(())
    }

    /// `Ok(None)` when no file exists for the location; decoding failures
    /// surface as [`SnapshotError::Corrupt`].
    pub fn load(&self, loc: ChunkLoc) -> Result<Option<ChunkSnapshot>, SnapshotError> {
        let path = self.path_for(loc);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        ChunkSnapshot::decode(&bytes).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_blocks::{AIR, MaterialCatalog};
    use strata_chunk::{Block, LightCell};

    fn sample_chunk() -> Chunk {
        let cat = MaterialCatalog::builtin();
        let chunk = Chunk::new(ChunkLoc::new(-3, 7), 16, DisposedWritePolicy::Ignore);
        for (name, lx, ly) in [("stone", 0, 0), ("torch", 5, 9), ("water", 15, 15)] {
            let id = cat.id_by_name(name).unwrap();
            chunk
                .set_block(&cat, Block::new(id, chunk.loc(), lx, ly))
                .unwrap();
        }
        chunk
    }

    #[test]
    fn snapshot_round_trips_materials_but_not_light() {
        let chunk = sample_chunk();
        // Give the source chunk some non-dark light to prove it is dropped.
        let pass = chunk.begin_light_pass();
        chunk.commit_light(pass, vec![(5, 9, LightCell::full_skylight())]);
        assert!(chunk.light(5, 9).unwrap().lit);

        let snap = ChunkSnapshot::capture(&chunk);
        let decoded = ChunkSnapshot::decode(&snap.encode().unwrap()).unwrap();
        assert_eq!(decoded, snap);

        let restored = decoded.restore(DisposedWritePolicy::Ignore);
        assert_eq!(restored.loc(), chunk.loc());
        assert_eq!(restored.materials_snapshot(), chunk.materials_snapshot());
        assert_eq!(restored.light(5, 9), Some(LightCell::dark()));
        assert_eq!(
            restored.state(),
            strata_chunk::ChunkState::Initializing
        );
    }

    #[test]
    fn save_dir_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let saves = SaveDir::new(dir.path());
        let snap = ChunkSnapshot::capture(&sample_chunk());

        saves.save(&snap).unwrap();
        let loaded = saves.load(snap.loc).unwrap().unwrap();
        assert_eq!(loaded, snap);

        assert!(saves.load(ChunkLoc::new(99, 99)).unwrap().is_none());
    }

    #[test]
    fn garbage_and_truncation_read_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let saves = SaveDir::new(dir.path());
        let loc = ChunkLoc::new(1, 2);

        fs::create_dir_all(saves.root()).unwrap();
        fs::write(saves.path_for(loc), b"not a snapshot").unwrap();
        assert!(matches!(
            saves.load(loc),
            Err(SnapshotError::Corrupt(_))
        ));

        let snap = ChunkSnapshot::capture(&sample_chunk());
        let mut bytes = snap.encode().unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(
            ChunkSnapshot::decode(&bytes),
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn shape_mismatches_are_corrupt() {
        let good = ChunkSnapshot {
            version: SNAPSHOT_VERSION,
            loc: ChunkLoc::new(0, 0),
            edge: 16,
            cells: vec![AIR.0; 256],
        };
        assert!(ChunkSnapshot::decode(&good.encode().unwrap()).is_ok());

        let wrong_version = ChunkSnapshot {
            version: SNAPSHOT_VERSION + 1,
            ..good.clone()
        };
        assert!(matches!(
            ChunkSnapshot::decode(&wrong_version.encode().unwrap()),
            Err(SnapshotError::Corrupt(_))
        ));

        let wrong_len = ChunkSnapshot {
            cells: vec![AIR.0; 200],
            ..good.clone()
        };
        assert!(matches!(
            ChunkSnapshot::decode(&wrong_len.encode().unwrap()),
            Err(SnapshotError::Corrupt(_))
        ));

        let wrong_edge = ChunkSnapshot {
            edge: 48,
            cells: vec![AIR.0; 48 * 48],
            ..good
        };
        assert!(matches!(
            ChunkSnapshot::decode(&wrong_edge.encode().unwrap()),
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn packed_names_distinguish_negative_axes() {
        let saves = SaveDir::new("saves");
        assert_ne!(
            saves.path_for(ChunkLoc::new(-1, 0)),
            saves.path_for(ChunkLoc::new(0, -1))
        );
    }
}
