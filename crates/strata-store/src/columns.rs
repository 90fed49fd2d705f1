//! Per-chunk-x column heights, derived lazily from loaded chunks.
//!
//! Each local x keeps two independent heights: the top collidable block
//! and the top light-blocking block. Writers race; a compare-and-set per
//! slot resolves who wins, and losers discard their work.

use parking_lot::Mutex;
use strata_blocks::TopFlags;
use thiserror::Error;

/// What a column knows about one height.
///
/// `Unknown` means the scans could not see enough loaded chunks to say.
/// `Absent` means a full window was scanned and held no qualifying block,
/// which is the open-to-the-sky case for the light-blocking height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TopHeight {
    #[default]
    Unknown,
    Absent,
    At(i32),
}

impl TopHeight {
    pub fn into_option(self) -> Option<i32> {
        match self {
            TopHeight::At(y) => Some(y),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColumnError {
    #[error("no flags requested")]
    NoFlags,
    #[error("expected exactly one of SOLID or OPAQUE, got {0:?}")]
    NotSingleFlag(TopFlags),
    #[error("local x {0} out of range for edge {1}")]
    OutOfRange(usize, usize),
    #[error("no height for {flags:?} at chunk x {chunk_x} local {local_x}")]
    HeightMissing {
        chunk_x: i32,
        local_x: usize,
        flags: TopFlags,
    },
}

/// Outcome of a height compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnCas {
    Applied { old: TopHeight },
    /// Stored value already equals the proposed one.
    Unchanged,
    /// Someone else wrote since the caller observed; their value stands.
    Raced { current: TopHeight },
}

#[derive(Debug, Clone, Copy, Default)]
struct ColumnSlot {
    collidable: TopHeight,
    blocking: TopHeight,
}

impl ColumnSlot {
    fn field(&self, flag: TopFlags) -> TopHeight {
        if flag == TopFlags::SOLID {
            self.collidable
        } else {
            self.blocking
        }
    }

    fn field_mut(&mut self, flag: TopFlags) -> &mut TopHeight {
        if flag == TopFlags::SOLID {
            &mut self.collidable
        } else {
            &mut self.blocking
        }
    }
}

pub struct ChunkColumn {
    chunk_x: i32,
    edge: usize,
    slots: Vec<Mutex<ColumnSlot>>,
}

impl ChunkColumn {
    pub fn new(chunk_x: i32, edge: usize) -> Self {
        let slots = (0..edge).map(|_| Mutex::new(ColumnSlot::default())).collect();
        Self {
            chunk_x,
            edge,
            slots,
        }
    }

    pub fn chunk_x(&self) -> i32 {
        self.chunk_x
    }

    pub fn edge(&self) -> usize {
        self.edge
    }

    fn check_single(&self, flag: TopFlags) -> Result<(), ColumnError> {
        if flag == TopFlags::SOLID || flag == TopFlags::OPAQUE {
            Ok(())
        } else {
            Err(ColumnError::NotSingleFlag(flag))
        }
    }

    fn slot(&self, local_x: usize) -> Result<&Mutex<ColumnSlot>, ColumnError> {
        self.slots
            .get(local_x)
            .ok_or(ColumnError::OutOfRange(local_x, self.edge))
    }

    /// The highest block matching any of `flags`. Errors when no flags are
    /// given or when a requested height is not known.
    pub fn top_block_height(&self, local_x: usize, flags: TopFlags) -> Result<i32, ColumnError> {
        if flags.is_empty() {
            return Err(ColumnError::NoFlags);
        }
        let slot = self.slot(local_x)?.lock();
        let mut best: Option<i32> = None;
        for flag in [TopFlags::SOLID, TopFlags::OPAQUE] {
            if !flags.contains(flag) {
                continue;
            }
            match slot.field(flag) {
                TopHeight::At(y) => best = Some(best.map_or(y, |b| b.max(y))),
                _ => {
                    return Err(ColumnError::HeightMissing {
                        chunk_x: self.chunk_x,
                        local_x,
                        flags,
                    });
                }
            }
        }
        best.ok_or(ColumnError::HeightMissing {
            chunk_x: self.chunk_x,
            local_x,
            flags,
        })
    }

    /// Reads one height without interpretation.
    pub fn height_kind(&self, local_x: usize, flag: TopFlags) -> Result<TopHeight, ColumnError> {
        self.check_single(flag)?;
        Ok(self.slot(local_x)?.lock().field(flag))
    }

    /// Applies `new` only if the stored height still equals `observed`.
    pub fn try_set(
        &self,
        local_x: usize,
        flag: TopFlags,
        observed: TopHeight,
        new: TopHeight,
    ) -> Result<ColumnCas, ColumnError> {
        self.check_single(flag)?;
        let mut slot = self.slot(local_x)?.lock();
        let cur = slot.field_mut(flag);
        if *cur != observed {
            return Ok(ColumnCas::Raced { current: *cur });
        }
        if *cur == new {
            return Ok(ColumnCas::Unchanged);
        }
        let old = *cur;
        *cur = new;
        Ok(ColumnCas::Applied { old })
    }
}
