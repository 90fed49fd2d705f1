//! Chunk buffer: a 2-D block grid with a lifecycle, a dirty bit, and
//! per-cell light state behind a single lock.
#![forbid(unsafe_code)]

pub mod light;
pub mod listener;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use strata_blocks::{AIR, MaterialCatalog, MaterialId, TopFlags};
use strata_world::{ChunkLoc, TerrainGen, WorldConfig, chunk_origin};

pub use light::{LIGHT_RES, LIGHT_SAMPLES, LightCell};
pub use listener::{BlockChange, ChunkListener, ColumnHint};

/// One placed block. Carries its own position so a write names its target
/// cell and the chunk can reject blocks aimed at somebody else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub material: MaterialId,
    pub chunk: ChunkLoc,
    pub lx: u8,
    pub ly: u8,
}

impl Block {
    #[inline]
    pub fn new(material: MaterialId, chunk: ChunkLoc, lx: usize, ly: usize) -> Self {
        Self {
            material,
            chunk,
            lx: lx as u8,
            ly: ly as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkState {
    /// Being bulk-filled; writes land without side effects.
    Initializing = 0,
    /// Live: writes notify the listener.
    Valid = 1,
    /// Torn down: storage released, writes follow [`DisposedWritePolicy`].
    Disposed = 2,
}

impl ChunkState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ChunkState::Initializing,
            1 => ChunkState::Valid,
            _ => ChunkState::Disposed,
        }
    }
}

/// What `set_block` does when the chunk is already disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposedWritePolicy {
    /// Log at debug level and report no change.
    #[default]
    Ignore,
    /// Return [`ChunkError::Disposed`].
    Fail,
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk {0:?} is disposed")]
    Disposed(ChunkLoc),
    #[error("block targets chunk {block:?} but was applied to {chunk:?}")]
    WrongChunk { chunk: ChunkLoc, block: ChunkLoc },
    #[error("local ({lx},{ly}) out of bounds for edge {edge}")]
    OutOfBounds { lx: usize, ly: usize, edge: usize },
    #[error("chunk {loc:?} is {found:?}, expected {expected:?}")]
    State {
        loc: ChunkLoc,
        expected: ChunkState,
        found: ChunkState,
    },
}

/// Result of applying a finished light pass back onto its chunk.
#[derive(Debug)]
pub enum LightCommit {
    /// Cells were written; the listed locals actually changed value.
    Applied(Vec<(usize, usize)>),
    /// A newer pass or disposal invalidated this one; nothing was written.
    Superseded,
}

struct Cells {
    blocks: Vec<Option<Block>>,
    light: Vec<LightCell>,
    /// `None` after an edit; recomputed on demand.
    all_air: Option<bool>,
}

/// A square block grid at one chunk location.
///
/// Block and light storage live behind one mutex; lifecycle state, the dirty
/// bit, and the light generation counter are atomics so readers never take
/// the lock just to ask what the chunk is.
pub struct Chunk {
    loc: ChunkLoc,
    edge: usize,
    edge_log2: u32,
    state: AtomicU8,
    dirty: AtomicBool,
    light_gen: AtomicU64,
    allowed_to_unload: AtomicBool,
    policy: DisposedWritePolicy,
    cells: Mutex<Cells>,
    listener: Mutex<Option<Arc<dyn ChunkListener>>>,
}

impl Chunk {
    /// An all-air `Initializing` chunk.
    pub fn new(loc: ChunkLoc, edge: usize, policy: DisposedWritePolicy) -> Self {
        Self::from_materials(loc, edge, Vec::new(), policy)
    }

    /// Builds an `Initializing` chunk from a row-major (`ly` major) material
    /// grid. Air entries become empty cells; a short grid is padded with air.
    pub fn from_materials(
        loc: ChunkLoc,
        edge: usize,
        mats: Vec<MaterialId>,
        policy: DisposedWritePolicy,
    ) -> Self {
        let mut mats = mats;
        mats.resize(edge * edge, AIR);
        let mut blocks = Vec::with_capacity(edge * edge);
        let mut any = false;
        for ly in 0..edge {
            for lx in 0..edge {
                let m = mats[ly * edge + lx];
                if m.is_air() {
                    blocks.push(None);
                } else {
                    any = true;
                    blocks.push(Some(Block::new(m, loc, lx, ly)));
                }
            }
        }
        Self {
            loc,
            edge,
            edge_log2: edge.trailing_zeros(),
            state: AtomicU8::new(ChunkState::Initializing as u8),
            dirty: AtomicBool::new(false),
            light_gen: AtomicU64::new(0),
            allowed_to_unload: AtomicBool::new(true),
            policy,
            cells: Mutex::new(Cells {
                blocks,
                light: vec![LightCell::dark(); edge * edge],
                all_air: Some(!any),
            }),
            listener: Mutex::new(None),
        }
    }

    #[inline]
    pub fn loc(&self) -> ChunkLoc {
        self.loc
    }

    #[inline]
    pub fn packed_loc(&self) -> i64 {
        self.loc.pack()
    }

    #[inline]
    pub fn edge(&self) -> usize {
        self.edge
    }

    #[inline]
    pub fn world_x(&self, lx: usize) -> i32 {
        chunk_origin(self.loc.cx, self.edge_log2) + lx as i32
    }

    #[inline]
    pub fn world_y(&self, ly: usize) -> i32 {
        chunk_origin(self.loc.cy, self.edge_log2) + ly as i32
    }

    #[inline]
    fn idx(&self, lx: usize, ly: usize) -> usize {
        ly * self.edge + lx
    }

    #[inline]
    pub fn state(&self) -> ChunkState {
        ChunkState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.state() == ChunkState::Disposed
    }

    pub fn allowed_to_unload(&self) -> bool {
        self.allowed_to_unload.load(Ordering::Acquire)
    }

    pub fn set_allowed_to_unload(&self, allowed: bool) {
        self.allowed_to_unload.store(allowed, Ordering::Release);
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clears and returns the dirty bit; save paths call this once per flush.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    fn listener(&self) -> Option<Arc<dyn ChunkListener>> {
        self.listener.lock().clone()
    }

    /// Replaces the cell named by `block` with `block`'s material; an air
    /// material clears the cell. Returns the displaced block, if any.
    ///
    /// Writing the material a cell already holds is a no-op: nothing is
    /// stored, the dirty bit stays put, and the listener hears nothing.
    /// While the chunk is `Initializing` the write lands but side effects
    /// are skipped; bulk fills rely on this.
    pub fn set_block(
        &self,
        catalog: &MaterialCatalog,
        block: Block,
    ) -> Result<Option<Block>, ChunkError> {
        if block.chunk != self.loc {
            return Err(ChunkError::WrongChunk {
                chunk: self.loc,
                block: block.chunk,
            });
        }
        let (lx, ly) = (block.lx as usize, block.ly as usize);
        if lx >= self.edge || ly >= self.edge {
            return Err(ChunkError::OutOfBounds {
                lx,
                ly,
                edge: self.edge,
            });
        }

        let old;
        let notify;
        {
            let mut cells = self.cells.lock();
            // State is re-read under the lock: dispose() flips it before it
            // clears the buffers, so a write can never land after the clear.
            if self.is_disposed() {
                return match self.policy {
                    DisposedWritePolicy::Ignore => {
                        debug!("ignoring write to disposed chunk {:?}", self.loc);
                        Ok(None)
                    }
                    DisposedWritePolicy::Fail => Err(ChunkError::Disposed(self.loc)),
                };
            }
            let i = self.idx(lx, ly);
            old = cells.blocks[i];
            let old_mat = old.map(|b| b.material).unwrap_or(AIR);
            if old_mat == block.material {
                return Ok(None);
            }
            cells.blocks[i] = if block.material.is_air() {
                None
            } else {
                Some(block)
            };
            cells.all_air = None;
            self.dirty.store(true, Ordering::Release);
            notify = self.state() == ChunkState::Valid;
        }

        if notify {
            if let Some(listener) = self.listener() {
                let old_mat = old.map(|b| b.material).unwrap_or(AIR);
                let flags = catalog.top_flags(old_mat) | catalog.top_flags(block.material);
                if !flags.is_empty() {
                    listener.column_hint(ColumnHint {
                        chunk_x: self.loc.cx,
                        local_x: lx,
                        world_y: self.world_y(ly),
                        flags,
                    });
                }
                listener.block_changed(BlockChange {
                    loc: self.loc,
                    lx,
                    ly,
                    old,
                    new: (!block.material.is_air()).then_some(block),
                });
                if catalog.is_emissive(old_mat) || catalog.is_emissive(block.material) {
                    listener.light_source_changed(self.world_x(lx), self.world_y(ly));
                }
            }
        }
        Ok(old)
    }

    /// Block at a local position; air and out-of-range locals read as `None`
    /// so scan loops can read ahead without pre-checks.
    pub fn block(&self, lx: usize, ly: usize) -> Option<Block> {
        if lx >= self.edge || ly >= self.edge {
            return None;
        }
        let cells = self.cells.lock();
        cells.blocks.get(self.idx(lx, ly)).copied().flatten()
    }

    pub fn light(&self, lx: usize, ly: usize) -> Option<LightCell> {
        if lx >= self.edge || ly >= self.edge {
            return None;
        }
        let cells = self.cells.lock();
        cells.light.get(self.idx(lx, ly)).copied()
    }

    /// All-air status, recomputed lazily after edits invalidate it.
    pub fn is_all_air(&self) -> bool {
        let mut cells = self.cells.lock();
        if let Some(v) = cells.all_air {
            return v;
        }
        let v = cells.blocks.iter().all(|b| b.is_none());
        cells.all_air = Some(v);
        v
    }

    /// Highest local y in column `lx` holding any of `flags`, or `None` if
    /// the column has no qualifying block.
    pub fn top_in_column(
        &self,
        catalog: &MaterialCatalog,
        lx: usize,
        flags: TopFlags,
    ) -> Option<usize> {
        if lx >= self.edge {
            return None;
        }
        let cells = self.cells.lock();
        for ly in (0..self.edge).rev() {
            if let Some(Some(b)) = cells.blocks.get(self.idx(lx, ly)) {
                if catalog.top_flags(b.material).intersects(flags) {
                    return Some(ly);
                }
            }
        }
        None
    }

    /// Row-major copy of the material grid, air where empty. Save and light
    /// paths both work from this; a disposed chunk snapshots as all air.
    pub fn materials_snapshot(&self) -> Vec<MaterialId> {
        let cells = self.cells.lock();
        if cells.blocks.len() != self.edge * self.edge {
            return vec![AIR; self.edge * self.edge];
        }
        cells
            .blocks
            .iter()
            .map(|b| b.map(|b| b.material).unwrap_or(AIR))
            .collect()
    }

    /// Flips `Initializing` to `Valid` and registers the listener. The owner
    /// schedules the first full light pass right after this returns.
    ///
    /// The transition settles first; a refused call leaves whatever
    /// listener is already registered untouched.
    pub fn finish_loading(&self, listener: Arc<dyn ChunkListener>) -> Result<(), ChunkError> {
        match self.state.compare_exchange(
            ChunkState::Initializing as u8,
            ChunkState::Valid as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                *self.listener.lock() = Some(listener);
                Ok(())
            }
            Err(found) => Err(ChunkError::State {
                loc: self.loc,
                expected: ChunkState::Initializing,
                found: ChunkState::from_u8(found),
            }),
        }
    }

    /// Tears the chunk down: cancels in-flight light passes, releases block
    /// and light storage, and unregisters the listener. Idempotent; returns
    /// whether this call performed the transition.
    pub fn dispose(&self) -> bool {
        let prev = self.state.swap(ChunkState::Disposed as u8, Ordering::AcqRel);
        if ChunkState::from_u8(prev) == ChunkState::Disposed {
            return false;
        }
        self.light_gen.fetch_add(1, Ordering::AcqRel);
        {
            let mut cells = self.cells.lock();
            cells.blocks = Vec::new();
            cells.light = Vec::new();
            cells.all_air = Some(true);
        }
        *self.listener.lock() = None;
        true
    }

    /// Stamps a new light pass. Passes carrying an older stamp abort at
    /// their next checkpoint and their commit is refused.
    pub fn begin_light_pass(&self) -> u64 {
        self.light_gen.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn light_generation(&self) -> u64 {
        self.light_gen.load(Ordering::Acquire)
    }

    /// Writes a finished pass's cells if `pass` is still current, reporting
    /// which locals actually changed value.
    pub fn commit_light(
        &self,
        pass: u64,
        new_cells: Vec<(usize, usize, LightCell)>,
    ) -> LightCommit {
        let mut cells = self.cells.lock();
        if self.light_generation() != pass {
            return LightCommit::Superseded;
        }
        let mut changed = Vec::new();
        for (lx, ly, cell) in new_cells {
            if lx >= self.edge || ly >= self.edge {
                continue;
            }
            let i = self.idx(lx, ly);
            if let Some(slot) = cells.light.get_mut(i) {
                if *slot != cell {
                    *slot = cell;
                    changed.push((lx, ly));
                }
            }
        }
        LightCommit::Applied(changed)
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("loc", &self.loc)
            .field("edge", &self.edge)
            .field("state", &self.state())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// Fills a fresh `Initializing` chunk from the terrain field.
pub fn generate_chunk(
    cfg: &WorldConfig,
    terrain: &TerrainGen,
    loc: ChunkLoc,
    policy: DisposedWritePolicy,
) -> Chunk {
    let edge = cfg.edge();
    let base_x = cfg.origin_of(loc.cx);
    let base_y = cfg.origin_of(loc.cy);
    let mut mats = vec![AIR; edge * edge];
    for ly in 0..edge {
        for lx in 0..edge {
            mats[ly * edge + lx] = terrain.material_at(base_x + lx as i32, base_y + ly as i32);
        }
    }
    Chunk::from_materials(loc, edge, mats, policy)
}
