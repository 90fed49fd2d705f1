//! Demo wiring: config loading, store construction, and the tick loop.

use std::error::Error;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use strata_blocks::{AIR, MaterialCatalog, MaterialId, TopFlags};
use strata_chunk::{Block, DisposedWritePolicy};
use strata_io::SaveDir;
use strata_store::{ChunkSource, ChunkStore, DiskSource, MemorySource, StoreConfig, WorldEvent};
use strata_world::{ChunkLoc, GenParams, TerrainGen, WorldConfig};

use crate::Args;

const REPORT_EVERY: u64 = 25;
const TICK_PAUSE: Duration = Duration::from_millis(5);
const LOAD_WAIT: Duration = Duration::from_secs(10);

/// On-disk app config: world sizing at the top level, terrain tunables
/// under `[terrain]`. Every field defaults, so an empty file is valid.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AppConfig {
    #[serde(flatten)]
    world: WorldConfig,
    terrain: GenParams,
}

impl AppConfig {
    fn load(args: &Args) -> Result<Self, Box<dyn Error>> {
        let mut cfg = match &args.config {
            Some(path) => toml::from_str::<AppConfig>(&std::fs::read_to_string(path)?)?,
            None => AppConfig::default(),
        };
        cfg.world = cfg.world.validated()?;
        if let Some(seed) = args.seed {
            cfg.terrain.seed = seed;
        }
        Ok(cfg)
    }
}

/// Event counts drained from the bus since the last report.
#[derive(Debug, Default)]
struct EventTally {
    loads: u64,
    blocks: u64,
    columns: u64,
    light: u64,
}

impl EventTally {
    fn note(&mut self, event: &WorldEvent) {
        match event {
            WorldEvent::WorldTicked { .. } => {}
            WorldEvent::ChunkLoaded { .. } => self.loads += 1,
            WorldEvent::BlockChanged { .. } => self.blocks += 1,
            WorldEvent::ChunkColumnUpdated { .. } => self.columns += 1,
            WorldEvent::ChunkLightChanged { .. } => self.light += 1,
        }
    }
}

pub fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let cfg = AppConfig::load(args)?;
    let catalog = Arc::new(load_catalog());
    let stone = catalog
        .id_by_name("stone")
        .ok_or("material catalog is missing 'stone'")?;
    let torch = catalog
        .id_by_name("torch")
        .ok_or("material catalog is missing 'torch'")?;

    let seed = cfg.terrain.seed;
    let surface_y = cfg.terrain.surface_y;
    let terrain = TerrainGen::new(cfg.terrain, &catalog);
    let source: Arc<dyn ChunkSource> = match &args.save_dir {
        Some(dir) => {
            info!("persisting chunks under {}", dir.display());
            Arc::new(DiskSource::new(
                cfg.world,
                terrain,
                DisposedWritePolicy::Ignore,
                SaveDir::new(dir),
            ))
        }
        None => Arc::new(MemorySource::new(
            cfg.world,
            terrain,
            DisposedWritePolicy::Ignore,
        )),
    };

    let store = ChunkStore::new(cfg.world, catalog.clone(), StoreConfig::default(), source);
    let (_sub, events) = store.events().subscribe();

    load_disc(&store, args.radius, surface_y);

    let mut rng = StdRng::seed_from_u64(seed as u64);
    let span = args.radius.max(1) * cfg.world.edge() as i32;
    let mut tally = EventTally::default();
    for tick in 0..args.ticks {
        store.publish_tick(tick);
        let mut applied = 0u32;
        for _ in 0..args.edits_per_tick {
            if random_edit(&store, &catalog, &mut rng, span, surface_y, stone, torch) {
                applied += 1;
            }
        }
        for env in events.try_iter() {
            tally.note(&env.event);
        }
        if (tick + 1) % REPORT_EVERY == 0 {
            let window = std::mem::take(&mut tally);
            let (q_load, q_light) = store.queue_depths();
            info!(
                "tick {}: edits {applied}/{}, events loads={} blocks={} columns={} light={}, queued load={q_load} light={q_light}",
                tick + 1,
                args.edits_per_tick,
                window.loads,
                window.blocks,
                window.columns,
                window.light,
            );
            info!("metrics: {:?}", store.metrics());
        }
        thread::sleep(TICK_PAUSE);
    }

    survey_columns(&store);

    let save = args.save_dir.is_some();
    let unloaded = store.unload_all(save);
    info!("unloaded {unloaded} chunks (save={save})");
    store.shutdown(save);
    info!("final metrics: {:?}", store.metrics());
    Ok(())
}

fn load_catalog() -> MaterialCatalog {
    MaterialCatalog::from_path("assets/materials.toml").unwrap_or_else(|e| {
        warn!("failed to load assets/materials.toml ({e}), using builtin catalog");
        MaterialCatalog::builtin()
    })
}

/// Requests every chunk within `radius` of the spawn column, then repolls
/// until they are resident. `get_chunk` returning `None` means the load is
/// still in flight; asking again is the contract.
fn load_disc(store: &ChunkStore, radius: i32, surface_y: i32) {
    let center = ChunkLoc::new(0, store.world().chunk_of(surface_y));
    let r_sq = i64::from(radius) * i64::from(radius);
    let mut wanted = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let loc = center.offset(dx, dy);
            if loc.distance_sq(center) <= r_sq {
                wanted.push(loc);
            }
        }
    }

    info!("loading {} chunks around {center:?}", wanted.len());
    let started = Instant::now();
    loop {
        let missing = wanted
            .iter()
            .filter(|loc| store.get_chunk(**loc, true).is_none())
            .count();
        if missing == 0 {
            break;
        }
        if started.elapsed() > LOAD_WAIT {
            warn!("{missing} chunks still loading after {LOAD_WAIT:?}, continuing without them");
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    info!(
        "{} chunks resident after {:?}",
        store.loaded_count(),
        started.elapsed()
    );
}

/// One random edit near the surface: mostly place/remove stone, with the
/// occasional torch. Returns whether a block actually changed.
fn random_edit(
    store: &ChunkStore,
    catalog: &MaterialCatalog,
    rng: &mut StdRng,
    span: i32,
    surface_y: i32,
    stone: MaterialId,
    torch: MaterialId,
) -> bool {
    let wx = rng.gen_range(-span..span);
    let wy = surface_y + rng.gen_range(-12..=12);
    let material = if rng.gen_bool(0.1) {
        torch
    } else if rng.gen_bool(0.5) {
        stone
    } else {
        AIR
    };

    let cfg = store.world();
    let loc = cfg.loc_of_world(wx, wy);
    // peek only; edits should not force loads
    let Some(chunk) = store.get_chunk(loc, false) else {
        return false;
    };
    let (lx, ly) = (cfg.local_of(wx), cfg.local_of(wy));
    let before = chunk.block(lx, ly).map(|b| b.material).unwrap_or(AIR);
    match chunk.set_block(catalog, Block::new(material, loc, lx, ly)) {
        // a placement into air displaces nothing but still changed a cell
        Ok(_) => before != material,
        Err(e) => {
            debug!("edit at ({wx},{wy}) skipped: {e}");
            false
        }
    }
}

/// Logs the derived solid top and the light just above it for a few
/// world columns.
fn survey_columns(store: &ChunkStore) {
    let cfg = store.world();
    for wx in [-24, 0, 24] {
        match store.top_block_height(cfg.chunk_of(wx), cfg.local_of(wx), TopFlags::SOLID) {
            Ok(top) => {
                let above = store
                    .peek_loaded(cfg.loc_of_world(wx, top + 1))
                    .and_then(|c| c.light(cfg.local_of(wx), cfg.local_of(top + 1)));
                match above {
                    Some(cell) => {
                        info!("column x={wx}: solid top y={top}, light above {:.2}", cell.avg)
                    }
                    None => info!("column x={wx}: solid top y={top}"),
                }
            }
            Err(e) => info!("column x={wx}: no derived top ({e})"),
        }
    }
}
