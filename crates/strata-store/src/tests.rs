use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;
use rand::Rng;
use strata_blocks::{AIR, MaterialCatalog, MaterialId, TopFlags};
use strata_chunk::{
    Block, BlockChange, Chunk, ChunkListener, ChunkState, ColumnHint, DisposedWritePolicy,
};
use strata_io::ChunkSnapshot;
use strata_world::{ChunkLoc, WorldConfig};

use crate::events::WorldEvent;
use crate::source::{ChunkSource, Fetched, SourceError};
use crate::{ChunkStore, PublishOutcome, StoreConfig};

const EDGE: usize = 16;

/// Stone everywhere below world y 0, air above. Keeps its saves in memory.
struct SlabSource {
    cfg: WorldConfig,
    stone: MaterialId,
    saved: Mutex<HashMap<i64, ChunkSnapshot>>,
}

impl SlabSource {
    fn new() -> Self {
        let catalog = MaterialCatalog::builtin();
        Self {
            cfg: WorldConfig { chunk_edge: EDGE },
            stone: catalog.id_by_name("stone").unwrap(),
            saved: Mutex::new(HashMap::new()),
        }
    }

    fn has_saved(&self, loc: ChunkLoc) -> bool {
        self.saved.lock().contains_key(&loc.pack())
    }
}

impl ChunkSource for SlabSource {
    fn fetch(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        if let Some(snap) = self.saved.lock().get(&loc.pack()) {
            return Ok(Fetched {
                chunk: snap.restore(DisposedWritePolicy::Ignore),
                newly_generated: false,
            });
        }
        self.regenerate(loc)
    }

    fn regenerate(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        let edge = self.cfg.edge();
        let base_y = self.cfg.origin_of(loc.cy);
        let mut mats = vec![AIR; edge * edge];
        for ly in 0..edge {
            if base_y + ly as i32 >= 0 {
                continue;
            }
            for lx in 0..edge {
                mats[ly * edge + lx] = self.stone;
            }
        }
        Ok(Fetched {
            chunk: Chunk::from_materials(loc, edge, mats, DisposedWritePolicy::Ignore),
            newly_generated: true,
        })
    }

    fn save(&self, chunk: &Chunk) -> Result<(), SourceError> {
        self.saved
            .lock()
            .insert(chunk.packed_loc(), ChunkSnapshot::capture(chunk));
        Ok(())
    }
}

/// Reports its slab data as corrupt exactly once per poisoned location.
struct CorruptOnce {
    inner: SlabSource,
    poisoned: Mutex<Vec<i64>>,
}

impl CorruptOnce {
    fn poisoning(locs: &[ChunkLoc]) -> Self {
        Self {
            inner: SlabSource::new(),
            poisoned: Mutex::new(locs.iter().map(|l| l.pack()).collect()),
        }
    }
}

impl ChunkSource for CorruptOnce {
    fn fetch(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        let mut poisoned = self.poisoned.lock();
        if let Some(i) = poisoned.iter().position(|k| *k == loc.pack()) {
            poisoned.swap_remove(i);
            return Err(SourceError::Corrupt(loc, "checksum mismatch".into()));
        }
        drop(poisoned);
        self.inner.fetch(loc)
    }

    fn regenerate(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        self.inner.regenerate(loc)
    }

    fn save(&self, chunk: &Chunk) -> Result<(), SourceError> {
        self.inner.save(chunk)
    }
}

struct Quiet;

impl ChunkListener for Quiet {
    fn block_changed(&self, _change: BlockChange) {}
    fn column_hint(&self, _hint: ColumnHint) {}
    fn light_source_changed(&self, _wx: i32, _wy: i32) {}
}

/// Hands back a chunk that has already left `Initializing`, once per
/// poisoned location. The publish CAS must refuse such a delivery.
struct LiveOnce {
    inner: SlabSource,
    poisoned: Mutex<Vec<i64>>,
}

impl LiveOnce {
    fn poisoning(locs: &[ChunkLoc]) -> Self {
        Self {
            inner: SlabSource::new(),
            poisoned: Mutex::new(locs.iter().map(|l| l.pack()).collect()),
        }
    }
}

impl ChunkSource for LiveOnce {
    fn fetch(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        let mut poisoned = self.poisoned.lock();
        if let Some(i) = poisoned.iter().position(|k| *k == loc.pack()) {
            poisoned.swap_remove(i);
            drop(poisoned);
            let fetched = self.inner.fetch(loc)?;
            fetched.chunk.finish_loading(Arc::new(Quiet)).unwrap();
            return Ok(fetched);
        }
        drop(poisoned);
        self.inner.fetch(loc)
    }

    fn regenerate(&self, loc: ChunkLoc) -> Result<Fetched, SourceError> {
        self.inner.regenerate(loc)
    }

    fn save(&self, chunk: &Chunk) -> Result<(), SourceError> {
        self.inner.save(chunk)
    }
}

fn make_store(source: Arc<dyn ChunkSource>) -> Arc<ChunkStore> {
    let store_cfg = StoreConfig {
        load_workers: 2,
        light_workers: 2,
        ..StoreConfig::default()
    };
    ChunkStore::new(
        WorldConfig { chunk_edge: EDGE },
        Arc::new(MaterialCatalog::builtin()),
        store_cfg,
        source,
    )
}

fn slab_store() -> (Arc<SlabSource>, Arc<ChunkStore>) {
    let source = Arc::new(SlabSource::new());
    (source.clone(), make_store(source))
}

fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn patience() -> Duration {
    Duration::from_secs(5)
}

fn id(store: &ChunkStore, name: &str) -> MaterialId {
    store.catalog().id_by_name(name).unwrap()
}

#[test]
fn get_chunk_schedules_a_load_and_eventually_resolves() {
    let (_, store) = slab_store();
    let (_sub, rx) = store.events().subscribe();
    let loc = ChunkLoc::new(0, 0);

    assert!(store.get_chunk(loc, true).is_none());
    assert!(wait_until(patience(), || {
        rx.try_iter().any(|env| {
            matches!(
                env.event,
                WorldEvent::ChunkLoaded { loc: l, newly_generated: true } if l == loc
            )
        })
    }));
    let chunk = store.get_chunk(loc, true).unwrap();
    assert_eq!(chunk.state(), ChunkState::Valid);
    store.shutdown(false);
}

#[test]
fn get_chunk_with_load_disabled_never_loads() {
    let (_, store) = slab_store();
    let loc = ChunkLoc::new(3, 3);

    assert!(store.get_chunk(loc, false).is_none());
    thread::sleep(Duration::from_millis(50));
    assert!(store.peek_loaded(loc).is_none());
    assert_eq!(store.metrics().loads_scheduled, 0);
    store.shutdown(false);
}

#[test]
fn repeated_requests_schedule_one_load() {
    let (_, store) = slab_store();
    let loc = ChunkLoc::new(1, 0);

    for _ in 0..10 {
        store.get_chunk(loc, true);
    }
    assert_eq!(store.metrics().loads_scheduled, 1);
    assert!(wait_until(patience(), || {
        store.metrics().loads_completed == 1
    }));
    store.shutdown(false);
}

#[test]
fn concurrent_loads_publish_exactly_one_instance() {
    let (_, store) = slab_store();
    let (_sub, rx) = store.events().subscribe();
    let loc = ChunkLoc::new(-2, 1);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let jitter = rand::thread_rng().gen_range(0..200);
                thread::sleep(Duration::from_micros(jitter));
                store.load_chunk_now(loc).unwrap()
            })
        })
        .collect();
    let chunks: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for c in &chunks {
        assert!(Arc::ptr_eq(c, &chunks[0]));
    }
    let announcements = rx
        .try_iter()
        .filter(|env| matches!(env.event, WorldEvent::ChunkLoaded { .. }))
        .count();
    assert_eq!(announcements, 1);
    assert_eq!(store.loaded_count(), 1);
    store.shutdown(false);
}

#[test]
fn repeat_lookups_come_from_the_thread_cache() {
    let (_, store) = slab_store();
    let loc = ChunkLoc::new(0, -1);
    store.load_chunk_now(loc).unwrap();

    // publish seeded this thread's cache
    assert!(store.get_chunk(loc, false).is_some());
    assert!(store.get_chunk(loc, false).is_some());
    assert!(store.metrics().cache_hits >= 2);

    // a fresh thread misses its own cache and falls through to the map
    let other = store.clone();
    thread::spawn(move || {
        assert!(other.get_chunk(loc, false).is_some());
    })
    .join()
    .unwrap();
    assert!(store.metrics().map_hits >= 1);
    store.shutdown(false);
}

#[test]
fn unload_honors_pins_identity_and_force() {
    let (_, store) = slab_store();
    let loc = ChunkLoc::new(2, 2);
    let chunk = store.load_chunk_now(loc).unwrap();

    chunk.set_allowed_to_unload(false);
    assert!(!store.unload_chunk(&chunk, false, false));
    assert!(store.peek_loaded(loc).is_some());

    assert!(store.unload_chunk(&chunk, true, false));
    assert!(chunk.is_disposed());
    assert!(store.peek_loaded(loc).is_none());

    // a stale handle cannot unload the replacement instance
    let fresh = store.load_chunk_now(loc).unwrap();
    assert!(!Arc::ptr_eq(&fresh, &chunk));
    assert!(!store.unload_chunk(&chunk, true, false));
    assert!(store.peek_loaded(loc).is_some());
    store.shutdown(false);
}

#[test]
fn unload_with_save_round_trips_edits() {
    let (source, store) = slab_store();
    let loc = ChunkLoc::new(0, 0);
    let chunk = store.load_chunk_now(loc).unwrap();
    let torch = id(&store, "torch");
    chunk
        .set_block(store.catalog(), Block::new(torch, loc, 4, 4))
        .unwrap();

    assert!(store.unload_chunk(&chunk, true, true));
    assert!(source.has_saved(loc));

    let (_sub, rx) = store.events().subscribe();
    let again = store.load_chunk_now(loc).unwrap();
    assert_eq!(again.block(4, 4).map(|b| b.material), Some(torch));
    let from_disk = rx.try_iter().any(|env| {
        matches!(
            env.event,
            WorldEvent::ChunkLoaded { loc: l, newly_generated: false } if l == loc
        )
    });
    assert!(from_disk);
    store.shutdown(false);
}

#[test]
fn corrupt_saves_fall_back_to_regeneration() {
    let loc = ChunkLoc::new(5, -1);
    let store = make_store(Arc::new(CorruptOnce::poisoning(&[loc])));
    let (_sub, rx) = store.events().subscribe();

    let chunk = store.load_chunk_now(loc).unwrap();
    assert_eq!(chunk.state(), ChunkState::Valid);
    assert_eq!(store.metrics().corrupt_retries, 1);
    let regenerated = rx.try_iter().any(|env| {
        matches!(
            env.event,
            WorldEvent::ChunkLoaded { loc: l, newly_generated: true } if l == loc
        )
    });
    assert!(regenerated);
    store.shutdown(false);
}

#[test]
fn a_refused_publish_releases_the_pending_slot() {
    let loc = ChunkLoc::new(6, 0);
    let store = make_store(Arc::new(LiveOnce::poisoning(&[loc])));

    // the first delivery arrives already Valid and cannot be published;
    // the location must stay loadable afterwards
    assert!(store.get_chunk(loc, true).is_none());
    assert!(wait_until(patience(), || {
        store.get_chunk(loc, true).is_some()
    }));
    assert!(store.metrics().loads_scheduled >= 2);
    assert_eq!(store.loaded_count(), 1);
    store.shutdown(false);
}

#[test]
fn publish_swaps_only_the_expected_instance() {
    let (source, store) = slab_store();
    let loc = ChunkLoc::new(4, 4);
    let live = store.load_chunk_now(loc).unwrap();

    let replacement = source.regenerate(loc).unwrap().chunk;
    let fresh = match store.publish_chunk(replacement, false, Some(&live)) {
        Ok(PublishOutcome::Replaced(c)) => c,
        other => panic!("expected a swap, got {other:?}"),
    };
    assert!(live.is_disposed());
    assert!(Arc::ptr_eq(&store.peek_loaded(loc).unwrap(), &fresh));

    // the stale handle has lost its claim
    let too_late = source.regenerate(loc).unwrap().chunk;
    match store.publish_chunk(too_late, false, Some(&live)) {
        Ok(PublishOutcome::Lost(Some(current))) => {
            assert!(Arc::ptr_eq(&current, &fresh));
            assert!(!current.is_disposed());
        }
        other => panic!("expected a lost race, got {other:?}"),
    }
    store.shutdown(false);
}

#[test]
fn column_heights_track_the_loaded_terrain() {
    let (_, store) = slab_store();
    store.load_chunk_now(ChunkLoc::new(0, -1)).unwrap();
    store.load_chunk_now(ChunkLoc::new(0, 0)).unwrap();

    // derivation is asynchronous; the slab surface sits at world y -1
    assert!(wait_until(patience(), || {
        store.top_block_height(0, 3, TopFlags::SOLID) == Ok(-1)
    }));
    for lx in [0, 7, 15] {
        assert_eq!(store.top_block_height(0, lx, TopFlags::SOLID), Ok(-1));
        assert_eq!(store.top_block_height(0, lx, TopFlags::OPAQUE), Ok(-1));
    }
    store.shutdown(false);
}

#[test]
fn edits_raise_and_lower_the_derived_top() {
    let (_, store) = slab_store();
    store.load_chunk_now(ChunkLoc::new(0, -1)).unwrap();
    let above = store.load_chunk_now(ChunkLoc::new(0, 0)).unwrap();
    assert!(wait_until(patience(), || {
        store.top_block_height(0, 5, TopFlags::SOLID) == Ok(-1)
    }));

    let stone = id(&store, "stone");
    above
        .set_block(store.catalog(), Block::new(stone, above.loc(), 5, 3))
        .unwrap();
    assert!(wait_until(patience(), || {
        store.top_block_height(0, 5, TopFlags::SOLID) == Ok(3)
    }));

    // removing the block drops the top back through the loaded chunks
    above
        .set_block(store.catalog(), Block::new(AIR, above.loc(), 5, 3))
        .unwrap();
    assert!(wait_until(patience(), || {
        store.top_block_height(0, 5, TopFlags::SOLID) == Ok(-1)
    }));
    store.shutdown(false);
}

#[test]
fn loading_a_shelf_above_raises_the_settled_top() {
    let (_, store) = slab_store();
    store.load_chunk_now(ChunkLoc::new(0, -1)).unwrap();
    store.load_chunk_now(ChunkLoc::new(0, 0)).unwrap();
    assert!(wait_until(patience(), || {
        store.top_block_height(0, 8, TopFlags::SOLID) == Ok(-1)
    }));

    // a floating stone shelf delivered as a whole chunk, not block edits;
    // it sits two chunks above the settled slab surface
    let stone = id(&store, "stone");
    let mut mats = vec![AIR; EDGE * EDGE];
    for lx in 0..EDGE {
        mats[8 * EDGE + lx] = stone;
    }
    let shelf = Chunk::from_materials(ChunkLoc::new(0, 2), EDGE, mats, DisposedWritePolicy::Ignore);
    match store.publish_chunk(shelf, true, None) {
        Ok(PublishOutcome::Fresh(_)) => {}
        other => panic!("expected a fresh publish, got {other:?}"),
    }

    // chunk row 2 starts at world y 32, so local row 8 is y 40
    assert!(wait_until(patience(), || {
        store.top_block_height(0, 8, TopFlags::SOLID) == Ok(40)
    }));
    assert_eq!(store.top_block_height(0, 0, TopFlags::SOLID), Ok(40));
    assert_eq!(store.top_block_height(0, 0, TopFlags::OPAQUE), Ok(40));
    store.shutdown(false);
}

#[test]
fn column_updates_are_announced_once_per_real_change() {
    let (_, store) = slab_store();
    let (_sub, rx) = store.events().subscribe();
    store.load_chunk_now(ChunkLoc::new(0, -1)).unwrap();
    let above = store.load_chunk_now(ChunkLoc::new(0, 0)).unwrap();
    assert!(wait_until(patience(), || {
        store.top_block_height(0, 8, TopFlags::SOLID) == Ok(-1)
    }));

    let stone = id(&store, "stone");
    above
        .set_block(store.catalog(), Block::new(stone, above.loc(), 8, 2))
        .unwrap();
    assert!(wait_until(patience(), || {
        store.top_block_height(0, 8, TopFlags::SOLID) == Ok(2)
    }));

    let solid_moves: Vec<_> = rx
        .try_iter()
        .filter_map(|env| match env.event {
            WorldEvent::ChunkColumnUpdated {
                chunk_x: 0,
                local_x: 8,
                new_height,
                old_height,
                flag,
            } if flag == TopFlags::SOLID => Some((old_height, new_height)),
            _ => None,
        })
        .collect();
    // one move settling the slab top, one for the placed block
    assert!(solid_moves.contains(&(None, Some(-1))));
    assert!(solid_moves.contains(&(Some(-1), Some(2))));
    for (old, new) in solid_moves {
        assert_ne!(old, new);
    }
    store.shutdown(false);
}

#[test]
fn open_columns_reach_full_skylight() {
    let (_, store) = slab_store();
    store.load_chunk_now(ChunkLoc::new(0, -1)).unwrap();
    let above = store.load_chunk_now(ChunkLoc::new(0, 0)).unwrap();

    assert!(wait_until(patience(), || {
        above
            .light(8, 8)
            .is_some_and(|cell| cell.skylight && cell.avg == 1.0)
    }));
    store.shutdown(false);
}

#[test]
fn batched_sources_light_up_after_the_tick() {
    let (_, store) = slab_store();
    let below = store.load_chunk_now(ChunkLoc::new(0, -1)).unwrap();
    let (_sub, rx) = store.events().subscribe();

    // deep enough that the sky above the slab is out of reach
    let torch = id(&store, "torch");
    below
        .set_block(store.catalog(), Block::new(torch, below.loc(), 8, 4))
        .unwrap();
    store.publish_tick(1);

    assert!(wait_until(patience(), || {
        below.light(8, 4).is_some_and(|cell| cell.lit && cell.avg > 0.9)
    }));
    let edits: Vec<_> = rx
        .try_iter()
        .filter(|env| {
            matches!(
                env.event,
                WorldEvent::BlockChanged { new, .. } if new == torch
            )
        })
        .collect();
    assert_eq!(edits.len(), 1);
    store.shutdown(false);
}

#[test]
fn toggled_sources_converge_to_the_final_state() {
    let (_, store) = slab_store();
    let below = store.load_chunk_now(ChunkLoc::new(0, -1)).unwrap();
    let torch = id(&store, "torch");
    let stone = id(&store, "stone");

    let mut tick = 0;
    for _ in 0..10 {
        below
            .set_block(store.catalog(), Block::new(torch, below.loc(), 8, 4))
            .unwrap();
        tick += 1;
        store.publish_tick(tick);
        below
            .set_block(store.catalog(), Block::new(stone, below.loc(), 8, 4))
            .unwrap();
        tick += 1;
        store.publish_tick(tick);
    }

    // the last write wins: no torch, so the cavern goes dark again
    assert!(wait_until(patience(), || {
        below.light(8, 4).is_some_and(|cell| !cell.lit)
    }));
    assert!(store.metrics().light_passes >= 1);
    store.shutdown(false);
}

#[test]
fn map_lock_timeouts_fail_soft() {
    let (_, store) = slab_store();
    store.load_chunk_now(ChunkLoc::new(0, 0)).unwrap();

    let guard = store.chunks.write();
    let elsewhere = ChunkLoc::new(9, 9);
    let before = store.metrics().lock_timeouts;
    assert!(store.get_chunk(elsewhere, false).is_none());
    assert!(store.metrics().lock_timeouts > before);
    drop(guard);

    // back to normal once the lock frees up
    assert!(store.get_chunk(ChunkLoc::new(0, 0), false).is_some());
    store.shutdown(false);
}

#[test]
fn shutdown_saves_dirty_chunks_and_is_idempotent() {
    let (source, store) = slab_store();
    let loc = ChunkLoc::new(1, 1);
    let chunk = store.load_chunk_now(loc).unwrap();
    let stone = id(&store, "stone");
    chunk
        .set_block(store.catalog(), Block::new(stone, loc, 0, 0))
        .unwrap();

    assert_eq!(store.shutdown(true), 1);
    assert!(source.has_saved(loc));
    assert_eq!(store.loaded_count(), 0);
    assert!(chunk.is_disposed());
    assert_eq!(store.shutdown(true), 0);
}
