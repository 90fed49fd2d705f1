//! Concurrent chunk map with asynchronous loading, derived column heights,
//! and background lighting.
//!
//! The store is the owner of every live [`Chunk`]. Lookups resolve through
//! a per-thread cache before touching the shared map, map locks are bounded
//! by timeouts that fail soft, and everything slow (loads, column scans,
//! light passes) runs on background workers coordinated over channels.

#![forbid(unsafe_code)]

pub mod cache;
pub mod columns;
pub mod events;
pub mod metrics;
pub mod source;
mod workers;

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use hashbrown::{HashMap, HashSet};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use strata_blocks::{AIR, MaterialCatalog, TopFlags};
use strata_chunk::{Block, BlockChange, Chunk, ChunkError, ChunkListener, ColumnHint};
use strata_lighting::{LightParams, LightScope, RING_OFFSETS, SkyTop, SkyTops};
use strata_world::{ChunkLoc, WorldConfig};
use thiserror::Error;
use thread_local::ThreadLocal;

use crate::cache::SlotCache;
use crate::columns::{ChunkColumn, ColumnCas, ColumnError, TopHeight};
use crate::events::EventBus;
use crate::metrics::{MetricsSnapshot, StoreMetrics};
use crate::source::SourceError;
use crate::workers::{StoreTask, Workers};

pub use crate::cache::SLOT_CAPACITY;
pub use crate::events::{EventEnvelope, SubscriptionHandle, WorldEvent};
pub use crate::source::{ChunkSource, DiskSource, Fetched, MemorySource};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The chunk map lock could not be taken in time. Soft: retry later.
    #[error("chunk map lock timed out")]
    LockTimeout,
    #[error("chunk {0:?} was displaced during publish")]
    Displaced(ChunkLoc),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Knobs for the store itself; world shape lives in [`WorldConfig`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Map lock bound during normal operation.
    pub lock_timeout: Duration,
    /// Map lock bound once teardown has begun, when losing a save hurts
    /// more than stalling does.
    pub teardown_lock_timeout: Duration,
    /// 0 means derive from available parallelism.
    pub load_workers: usize,
    pub light_workers: usize,
    /// Chunks scanned above and below the anchor when re-deriving a column
    /// height.
    pub column_window: i32,
    pub light: LightParams,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(50),
            teardown_lock_timeout: Duration::from_secs(2),
            load_workers: 0,
            light_workers: 0,
            column_window: 2,
            light: LightParams::default(),
        }
    }
}

/// How a publish resolved.
#[derive(Debug)]
pub enum PublishOutcome {
    /// Went into an empty slot; `ChunkLoaded` was announced.
    Fresh(Arc<Chunk>),
    /// Swapped over the expected previous instance, which was disposed.
    Replaced(Arc<Chunk>),
    /// The compare failed. The incoming chunk was disposed; carries the
    /// occupant that won.
    Lost(Option<Arc<Chunk>>),
}

pub struct ChunkStore {
    pub(crate) cfg: WorldConfig,
    pub(crate) catalog: Arc<MaterialCatalog>,
    pub(crate) store_cfg: StoreConfig,
    pub(crate) source: Arc<dyn ChunkSource>,
    pub(crate) chunks: RwLock<HashMap<i64, Arc<Chunk>>>,
    /// Locations with a load in flight. Entries guarantee at most one
    /// scheduled load per location; the publish CAS is the second guard.
    pending: Mutex<HashSet<i64>>,
    columns: RwLock<HashMap<i32, Arc<ChunkColumn>>>,
    thread_cache: ThreadLocal<RefCell<SlotCache>>,
    /// Emitter positions batched between ticks.
    pub(crate) pending_sources: Mutex<Vec<(i32, i32)>>,
    pub(crate) bus: EventBus,
    pub(crate) metrics: StoreMetrics,
    workers: Mutex<Option<Workers>>,
    weak_self: OnceLock<Weak<ChunkStore>>,
    teardown: AtomicBool,
}

impl ChunkStore {
    pub fn new(
        cfg: WorldConfig,
        catalog: Arc<MaterialCatalog>,
        store_cfg: StoreConfig,
        source: Arc<dyn ChunkSource>,
    ) -> Arc<ChunkStore> {
        let store = Arc::new(ChunkStore {
            cfg,
            catalog,
            store_cfg,
            source,
            chunks: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            columns: RwLock::new(HashMap::new()),
            thread_cache: ThreadLocal::new(),
            pending_sources: Mutex::new(Vec::new()),
            bus: EventBus::new(),
            metrics: StoreMetrics::default(),
            workers: Mutex::new(None),
            weak_self: OnceLock::new(),
            teardown: AtomicBool::new(false),
        });
        let _ = store.weak_self.set(Arc::downgrade(&store));
        *store.workers.lock() = Some(Workers::spawn(&store));
        store
    }

    pub fn world(&self) -> &WorldConfig {
        &self.cfg
    }

    pub fn catalog(&self) -> &Arc<MaterialCatalog> {
        &self.catalog
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Depth of the load and light queues, in that order.
    pub fn queue_depths(&self) -> (usize, usize) {
        self.workers
            .lock()
            .as_ref()
            .map(|w| w.queue_depths())
            .unwrap_or((0, 0))
    }

    /// Announces a world tick. The store uses ticks to flush batched light
    /// source changes.
    pub fn publish_tick(&self, tick: u64) {
        self.bus.publish(WorldEvent::WorldTicked { tick });
    }

    fn current_timeout(&self) -> Duration {
        if self.teardown.load(Ordering::Acquire) {
            self.store_cfg.teardown_lock_timeout
        } else {
            self.store_cfg.lock_timeout
        }
    }

    fn local_cache(&self) -> &RefCell<SlotCache> {
        self.thread_cache.get_or(|| RefCell::new(SlotCache::new()))
    }

    fn cache_store(&self, key: i64, chunk: Arc<Chunk>) {
        self.local_cache().borrow_mut().insert(key, chunk);
    }

    fn invalidate_cached(&self, key: i64) {
        if let Some(cache) = self.thread_cache.get() {
            cache.borrow_mut().invalidate(key);
        }
    }

    /// Resolves a chunk: per-thread cache, then the shared map under a
    /// bounded read lock, then (optionally) a scheduled load.
    ///
    /// `None` always means "try again later": the load is disabled or still
    /// in flight, or the lock timed out. Repolling is the contract.
    pub fn get_chunk(&self, loc: ChunkLoc, load: bool) -> Option<Arc<Chunk>> {
        let key = loc.pack();
        if let Some(chunk) = self.local_cache().borrow_mut().get(key) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(chunk);
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        let found = match self.chunks.try_read_for(self.current_timeout()) {
            Some(map) => map.get(&key).cloned(),
            None => {
                self.metrics.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!("chunk map read lock timed out for {loc:?}");
                return None;
            }
        };
        if let Some(chunk) = found {
            self.metrics.map_hits.fetch_add(1, Ordering::Relaxed);
            self.cache_store(key, chunk.clone());
            return Some(chunk);
        }
        if !load || self.teardown.load(Ordering::Acquire) {
            return None;
        }
        self.schedule_load(loc);
        None
    }

    /// Map lookup without caches or load scheduling.
    pub fn peek_loaded(&self, loc: ChunkLoc) -> Option<Arc<Chunk>> {
        match self.chunks.try_read_for(self.current_timeout()) {
            Some(map) => map.get(&loc.pack()).cloned(),
            None => {
                self.metrics.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!("chunk map read lock timed out for {loc:?}");
                None
            }
        }
    }

    /// The block at a world position, if its chunk is loaded.
    pub fn block_at(&self, wx: i32, wy: i32) -> Option<Block> {
        let chunk = self.peek_loaded(self.cfg.loc_of_world(wx, wy))?;
        chunk.block(self.cfg.local_of(wx), self.cfg.local_of(wy))
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded_snapshot().len()
    }

    pub fn loaded_locs(&self) -> Vec<ChunkLoc> {
        self.loaded_snapshot().into_iter().map(|(l, _)| l).collect()
    }

    pub(crate) fn loaded_snapshot(&self) -> Vec<(ChunkLoc, Arc<Chunk>)> {
        match self.chunks.try_read_for(self.current_timeout()) {
            Some(map) => map
                .iter()
                .map(|(k, v)| (ChunkLoc::unpack(*k), v.clone()))
                .collect(),
            None => {
                self.metrics.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!("chunk map read lock timed out for snapshot");
                Vec::new()
            }
        }
    }

    fn schedule_load(&self, loc: ChunkLoc) {
        let key = loc.pack();
        if !self.pending.lock().insert(key) {
            return; // already on its way
        }
        self.metrics.loads_scheduled.fetch_add(1, Ordering::Relaxed);
        if !self.submit_task(StoreTask::Load { loc }) {
            self.pending.lock().remove(&key);
        }
    }

    /// Fetches (or regenerates, when the stored data is corrupt), publishes,
    /// and returns the instance that ended up live. Blocking; the async path
    /// goes through [`ChunkStore::get_chunk`].
    pub fn load_chunk_now(&self, loc: ChunkLoc) -> Result<Arc<Chunk>, StoreError> {
        let key = loc.pack();
        if let Some(existing) = self.peek_loaded(loc) {
            self.pending.lock().remove(&key);
            return Ok(existing);
        }
        let fetched = match self.source.fetch(loc) {
            Ok(f) => f,
            Err(SourceError::Corrupt(l, why)) => {
                self.metrics.corrupt_retries.fetch_add(1, Ordering::Relaxed);
                warn!("corrupt chunk at {l:?}: {why}; regenerating");
                match self.source.regenerate(loc) {
                    Ok(f) => f,
                    Err(e) => {
                        self.pending.lock().remove(&key);
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                self.pending.lock().remove(&key);
                return Err(e.into());
            }
        };
        match self.publish_chunk(fetched.chunk, fetched.newly_generated, None)? {
            PublishOutcome::Fresh(c) | PublishOutcome::Replaced(c) => Ok(c),
            PublishOutcome::Lost(Some(c)) => Ok(c),
            PublishOutcome::Lost(None) => Err(StoreError::Displaced(loc)),
        }
    }

    /// Makes `chunk` live at its own location if the slot still holds
    /// `expected_previous` (compared by `Arc` identity; `None` means the
    /// slot must be empty). Exactly one of two racing publishers wins; the
    /// loser's chunk is disposed. `ChunkLoaded` fires only for a fresh
    /// insert, never for a swap or a lost race.
    pub fn publish_chunk(
        &self,
        chunk: Chunk,
        newly_generated: bool,
        expected_previous: Option<&Arc<Chunk>>,
    ) -> Result<PublishOutcome, StoreError> {
        let loc = chunk.loc();
        let key = loc.pack();
        let incoming = Arc::new(chunk);
        // Valid before visible: nothing reachable through the map may still
        // be Initializing. A refused transition releases the pending slot,
        // or the location could never load again.
        if let Err(e) = incoming.finish_loading(self.chunk_listener()) {
            incoming.dispose();
            self.pending.lock().remove(&key);
            return Err(e.into());
        }

        enum Slot {
            Fresh,
            Swapped(Arc<Chunk>),
            Lost(Option<Arc<Chunk>>),
        }
        let decision = {
            let mut map = match self.chunks.try_write_for(self.current_timeout()) {
                Some(m) => m,
                None => {
                    self.metrics.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!("chunk map write lock timed out publishing {loc:?}");
                    incoming.dispose();
                    self.pending.lock().remove(&key);
                    return Err(StoreError::LockTimeout);
                }
            };
            match map.get(&key).cloned() {
                Some(cur) => {
                    if expected_previous.is_some_and(|p| Arc::ptr_eq(&cur, p)) {
                        map.insert(key, incoming.clone());
                        Slot::Swapped(cur)
                    } else {
                        Slot::Lost(Some(cur))
                    }
                }
                None => {
                    if expected_previous.is_none() {
                        map.insert(key, incoming.clone());
                        Slot::Fresh
                    } else {
                        Slot::Lost(None)
                    }
                }
            }
        };
        self.pending.lock().remove(&key);

        match decision {
            Slot::Fresh => {
                self.metrics.loads_completed.fetch_add(1, Ordering::Relaxed);
                self.cache_store(key, incoming.clone());
                self.bus.publish(WorldEvent::ChunkLoaded {
                    loc,
                    newly_generated,
                });
                self.submit_task(StoreTask::DeriveChunkColumns { loc });
                self.submit_task(StoreTask::Light {
                    loc,
                    scope: LightScope::Full,
                });
                Ok(PublishOutcome::Fresh(incoming))
            }
            Slot::Swapped(old) => {
                old.dispose();
                self.metrics.loads_completed.fetch_add(1, Ordering::Relaxed);
                self.cache_store(key, incoming.clone());
                self.submit_task(StoreTask::DeriveChunkColumns { loc });
                self.submit_task(StoreTask::Light {
                    loc,
                    scope: LightScope::Full,
                });
                Ok(PublishOutcome::Replaced(incoming))
            }
            Slot::Lost(cur) => {
                self.metrics.loads_discarded.fetch_add(1, Ordering::Relaxed);
                debug!("discarding losing publish for {loc:?}");
                incoming.dispose();
                Ok(PublishOutcome::Lost(cur))
            }
        }
    }

    /// Removes and disposes `chunk` if it is still the live instance.
    /// Returns `false` when the chunk is pinned (and `force` is off), when
    /// a different instance occupies the slot, or when the lock timed out.
    pub fn unload_chunk(&self, chunk: &Arc<Chunk>, force: bool, save: bool) -> bool {
        if !(chunk.allowed_to_unload() || force) {
            return false;
        }
        let loc = chunk.loc();
        let key = chunk.packed_loc();
        {
            let mut map = match self.chunks.try_write_for(self.current_timeout()) {
                Some(m) => m,
                None => {
                    self.metrics.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!("chunk map write lock timed out unloading {loc:?}");
                    return false;
                }
            };
            match map.get(&key) {
                Some(cur) if Arc::ptr_eq(cur, chunk) => {
                    map.remove(&key);
                }
                _ => return false,
            }
        }
        if save && chunk.take_dirty() {
            if let Err(e) = self.source.save(chunk) {
                warn!("save failed for {loc:?}: {e}");
                chunk.mark_dirty();
            }
        }
        chunk.dispose();
        self.invalidate_cached(key);
        self.submit_task(StoreTask::DeriveChunkColumns { loc });
        true
    }

    /// Force-unloads everything, saving dirty chunks when asked. Returns
    /// how many chunks went away.
    pub fn unload_all(&self, save: bool) -> usize {
        let mut gone = 0;
        for (_, chunk) in self.loaded_snapshot() {
            if self.unload_chunk(&chunk, true, save) {
                gone += 1;
            }
        }
        gone
    }

    /// Stops the workers, then force-unloads every chunk. Idempotent.
    /// Lock bounds switch to the teardown timeout for the duration.
    pub fn shutdown(&self, save: bool) -> usize {
        if self.teardown.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let workers = self.workers.lock().take();
        if let Some(w) = workers {
            w.shutdown();
        }
        self.unload_all(save)
    }

    pub(crate) fn submit_task(&self, task: StoreTask) -> bool {
        match self.workers.lock().as_ref() {
            Some(w) => w.submit(task),
            None => false,
        }
    }

    fn chunk_listener(&self) -> Arc<dyn ChunkListener> {
        let weak = self.weak_self.get().cloned().unwrap_or_else(Weak::new);
        Arc::new(StoreListener { store: weak })
    }

    fn column_for(&self, chunk_x: i32) -> Arc<ChunkColumn> {
        if let Some(col) = self.columns.read().get(&chunk_x) {
            return col.clone();
        }
        self.columns
            .write()
            .entry(chunk_x)
            .or_insert_with(|| Arc::new(ChunkColumn::new(chunk_x, self.cfg.edge())))
            .clone()
    }

    /// The highest block matching any of `flags` in a world column, per the
    /// derived heights.
    pub fn top_block_height(
        &self,
        chunk_x: i32,
        local_x: usize,
        flags: TopFlags,
    ) -> Result<i32, ColumnError> {
        self.column_for(chunk_x).top_block_height(local_x, flags)
    }

    /// Re-derives the requested heights for one world column. `hint_y` is a
    /// position that just changed; `near_cy` anchors the scan window when no
    /// height is currently known.
    pub fn update_top_block(
        &self,
        chunk_x: i32,
        local_x: usize,
        hint_y: Option<i32>,
        near_cy: i32,
        flags: TopFlags,
    ) {
        for flag in [TopFlags::SOLID, TopFlags::OPAQUE] {
            if flags.contains(flag) {
                self.update_single_top(chunk_x, local_x, hint_y, near_cy, flag);
            }
        }
    }

    fn update_single_top(
        &self,
        chunk_x: i32,
        local_x: usize,
        hint_y: Option<i32>,
        near_cy: i32,
        flag: TopFlags,
    ) {
        let column = self.column_for(chunk_x);
        let Ok(observed) = column.height_kind(local_x, flag) else {
            debug!("column update skipped: local x {local_x} out of range");
            return;
        };
        // a qualifying hint above the known top raises it without a scan
        if let Some(hy) = hint_y {
            let above = match observed {
                TopHeight::At(cur) => hy > cur,
                _ => true,
            };
            if above && self.column_qualifies(chunk_x, local_x, hy, flag) == Some(true) {
                self.apply_top(&column, local_x, flag, observed, TopHeight::At(hy));
                return;
            }
        }
        // a top that still qualifies cannot have moved
        if let TopHeight::At(cur) = observed {
            if self.column_qualifies(chunk_x, local_x, cur, flag) == Some(true) {
                return;
            }
        }
        let anchor = match observed {
            TopHeight::At(cur) => self.cfg.chunk_of(cur),
            _ => near_cy,
        };
        let fresh = self.scan_top(chunk_x, local_x, flag, anchor);
        self.apply_top(&column, local_x, flag, observed, fresh);
    }

    /// Whether the block at `(chunk_x * edge + local_x, wy)` carries `flag`.
    /// `None` when the covering chunk is not loaded.
    fn column_qualifies(
        &self,
        chunk_x: i32,
        local_x: usize,
        wy: i32,
        flag: TopFlags,
    ) -> Option<bool> {
        let chunk = self.peek_loaded(ChunkLoc::new(chunk_x, self.cfg.chunk_of(wy)))?;
        let held = chunk.block(local_x, self.cfg.local_of(wy));
        Some(held.is_some_and(|b| self.catalog.top_flags(b.material).contains(flag)))
    }

    /// One ordered sweep from the top of the window down. First qualifying
    /// block wins. A window scanned clean is `Absent`; a window with
    /// unloaded gaps cannot assert absence and stays `Unknown`.
    fn scan_top(&self, chunk_x: i32, local_x: usize, flag: TopFlags, anchor_cy: i32) -> TopHeight {
        let w = self.store_cfg.column_window;
        let mut saw_gap = false;
        for cy in ((anchor_cy - w)..=(anchor_cy + w)).rev() {
            match self.peek_loaded(ChunkLoc::new(chunk_x, cy)) {
                Some(chunk) => {
                    if let Some(ly) = chunk.top_in_column(&self.catalog, local_x, flag) {
                        return TopHeight::At(chunk.world_y(ly));
                    }
                }
                None => saw_gap = true,
            }
        }
        if saw_gap {
            TopHeight::Unknown
        } else {
            TopHeight::Absent
        }
    }

    fn apply_top(
        &self,
        column: &ChunkColumn,
        local_x: usize,
        flag: TopFlags,
        observed: TopHeight,
        fresh: TopHeight,
    ) {
        if fresh == observed {
            return;
        }
        match column.try_set(local_x, flag, observed, fresh) {
            Ok(ColumnCas::Applied { old }) => {
                self.metrics.column_updates.fetch_add(1, Ordering::Relaxed);
                self.bus.publish(WorldEvent::ChunkColumnUpdated {
                    chunk_x: column.chunk_x(),
                    local_x,
                    new_height: fresh.into_option(),
                    old_height: old.into_option(),
                    flag,
                });
            }
            Ok(ColumnCas::Unchanged) => {}
            Ok(ColumnCas::Raced { current }) => {
                self.metrics.column_races.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "column ({}, {local_x}) {flag:?} raced: now {current:?}, discarding",
                    column.chunk_x()
                );
            }
            Err(e) => debug!("column update skipped: {e}"),
        }
    }

    /// Re-derives both flags for every column the chunk covers. Each flag
    /// carries the chunk's own topmost candidate as its hint; a record
    /// sitting below a freshly loaded chunk only rises through the hint
    /// path. After an unload the chunk is gone and the hints are `None`.
    pub(crate) fn derive_chunk_columns(&self, loc: ChunkLoc) {
        let chunk = self.peek_loaded(loc);
        for local_x in 0..self.cfg.edge() {
            for flag in [TopFlags::SOLID, TopFlags::OPAQUE] {
                let hint = chunk.as_ref().and_then(|c| {
                    c.top_in_column(&self.catalog, local_x, flag)
                        .map(|ly| c.world_y(ly))
                });
                self.update_single_top(loc.cx, local_x, hint, loc.cy, flag);
            }
        }
    }

    pub(crate) fn gather_ring(&self, loc: ChunkLoc) -> [Option<Arc<Chunk>>; 8] {
        std::array::from_fn(|i| {
            let (dx, dy) = RING_OFFSETS[i];
            self.peek_loaded(loc.offset(dx, dy))
        })
    }

    /// Sky knowledge for the 3-chunk-wide window around `loc`, read from
    /// the derived light-blocking heights.
    pub(crate) fn assemble_sky_tops(&self, loc: ChunkLoc) -> SkyTops {
        let edge = self.cfg.edge();
        let base_x = self.cfg.origin_of(loc.cx) - edge as i32;
        let mut tops = Vec::with_capacity(3 * edge);
        for cx in (loc.cx - 1)..=(loc.cx + 1) {
            let column = self.columns.read().get(&cx).cloned();
            for local_x in 0..edge {
                let top = match &column {
                    Some(col) => match col.height_kind(local_x, TopFlags::OPAQUE) {
                        Ok(TopHeight::At(y)) => SkyTop::Blocked(y),
                        Ok(TopHeight::Absent) => SkyTop::Open,
                        _ => SkyTop::Unknown,
                    },
                    None => SkyTop::Unknown,
                };
                tops.push(top);
            }
        }
        SkyTops::new(base_x, tops)
    }
}

/// Bridges chunk-side mutation callbacks onto the bus and the task queue.
/// Holds the store weakly so chunks never keep it alive.
struct StoreListener {
    store: Weak<ChunkStore>,
}

impl ChunkListener for StoreListener {
    fn block_changed(&self, change: BlockChange) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        store.bus.publish(WorldEvent::BlockChanged {
            loc: change.loc,
            lx: change.lx,
            ly: change.ly,
            old: change.old.map(|b| b.material).unwrap_or(AIR),
            new: change.new.map(|b| b.material).unwrap_or(AIR),
        });
    }

    fn column_hint(&self, hint: ColumnHint) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let near_cy = store.cfg.chunk_of(hint.world_y);
        store.submit_task(StoreTask::DeriveColumn {
            chunk_x: hint.chunk_x,
            local_x: hint.local_x,
            hint_y: Some(hint.world_y),
            near_cy,
            flags: hint.flags,
        });
    }

    fn light_source_changed(&self, wx: i32, wy: i32) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        store.pending_sources.lock().push((wx, wy));
    }
}

#[cfg(test)]
mod tests;
