//! Background machinery: a coordinator thread routing tasks and events,
//! plus dedicated pools for chunk loads and light passes.
//!
//! Workers hold only a `Weak` back-reference to the store so that dropping
//! the last external `Arc` lets everything wind down.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use log::{error, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use strata_blocks::TopFlags;
use strata_chunk::LightCommit;
use strata_lighting::{LightScope, Neighborhood, RING_OFFSETS, recalc_chunk};
use strata_world::ChunkLoc;

use crate::events::WorldEvent;
use crate::{ChunkStore, StoreConfig};

/// Vertical extent of a skylight rescope. Large enough to cover any loaded
/// chunk, small enough that scope rect arithmetic stays far from overflow.
const SKY_SCOPE_SPAN: i32 = 1 << 20;

#[derive(Debug)]
pub(crate) enum StoreTask {
    Load {
        loc: ChunkLoc,
    },
    Light {
        loc: ChunkLoc,
        scope: LightScope,
    },
    DeriveColumn {
        chunk_x: i32,
        local_x: usize,
        hint_y: Option<i32>,
        near_cy: i32,
        flags: TopFlags,
    },
    DeriveChunkColumns {
        loc: ChunkLoc,
    },
}

struct LightJob {
    loc: ChunkLoc,
    scope: LightScope,
}

/// Senders plus queue depth gauges, shared between the store-facing submit
/// path and the coordinator.
#[derive(Clone)]
struct Lanes {
    load_tx: Sender<ChunkLoc>,
    light_tx: Sender<LightJob>,
    q_load: Arc<AtomicUsize>,
    q_light: Arc<AtomicUsize>,
}

impl Lanes {
    fn submit_load(&self, loc: ChunkLoc) {
        self.q_load.fetch_add(1, Ordering::Relaxed);
        if self.load_tx.send(loc).is_err() {
            self.q_load.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn submit_light(&self, loc: ChunkLoc, scope: LightScope) {
        self.q_light.fetch_add(1, Ordering::Relaxed);
        if self.light_tx.send(LightJob { loc, scope }).is_err() {
            self.q_light.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

pub(crate) struct Workers {
    task_tx: Sender<StoreTask>,
    coordinator: JoinHandle<()>,
    load_pool: ThreadPool,
    light_pool: ThreadPool,
    q_load: Arc<AtomicUsize>,
    q_light: Arc<AtomicUsize>,
}

impl Workers {
    pub(crate) fn spawn(store: &Arc<ChunkStore>) -> Workers {
        let cfg = &store.store_cfg;
        let (w_load, w_light) = worker_split(cfg);
        let weak = Arc::downgrade(store);

        let (task_tx, task_rx) = unbounded::<StoreTask>();
        let (load_tx, load_rx) = unbounded::<ChunkLoc>();
        let (light_tx, light_rx) = unbounded::<LightJob>();
        let q_load = Arc::new(AtomicUsize::new(0));
        let q_light = Arc::new(AtomicUsize::new(0));
        let lanes = Lanes {
            load_tx,
            light_tx,
            q_load: q_load.clone(),
            q_light: q_light.clone(),
        };

        let load_pool = ThreadPoolBuilder::new()
            .num_threads(w_load)
            .thread_name(|i| format!("strata-load-{i}"))
            .build()
            .expect("load pool");
        for _ in 0..w_load {
            let rx = load_rx.clone();
            let weak = weak.clone();
            let q = lanes.q_load.clone();
            load_pool.spawn(move || load_worker(rx, weak, q));
        }

        let light_pool = ThreadPoolBuilder::new()
            .num_threads(w_light)
            .thread_name(|i| format!("strata-light-{i}"))
            .build()
            .expect("light pool");
        for _ in 0..w_light {
            let rx = light_rx.clone();
            let weak = weak.clone();
            let q = lanes.q_light.clone();
            light_pool.spawn(move || light_worker(rx, weak, q));
        }

        let (bus_handle, bus_rx) = store.bus.subscribe();
        let coordinator = thread::Builder::new()
            .name("strata-coord".into())
            .spawn(move || {
                coordinate(weak, task_rx, bus_rx, lanes);
                drop(bus_handle);
            })
            .expect("coordinator thread");

        Workers {
            task_tx,
            coordinator,
            load_pool,
            light_pool,
            q_load,
            q_light,
        }
    }

    pub(crate) fn submit(&self, task: StoreTask) -> bool {
        self.task_tx.send(task).is_ok()
    }

    pub(crate) fn queue_depths(&self) -> (usize, usize) {
        (
            self.q_load.load(Ordering::Relaxed),
            self.q_light.load(Ordering::Relaxed),
        )
    }

    /// Closes the task lane, waits for the coordinator, then drains the
    /// pools. In-flight loads and light passes finish; queued ones run too.
    pub(crate) fn shutdown(self) {
        let Workers {
            task_tx,
            coordinator,
            load_pool,
            light_pool,
            ..
        } = self;
        drop(task_tx);
        if coordinator.join().is_err() {
            error!("coordinator thread panicked");
        }
        drop(load_pool);
        drop(light_pool);
    }
}

fn worker_split(cfg: &StoreConfig) -> (usize, usize) {
    let n = thread::available_parallelism().map(|v| v.get()).unwrap_or(8);
    let auto = (n / 4).max(1);
    let w_load = if cfg.load_workers > 0 {
        cfg.load_workers
    } else {
        auto
    };
    let w_light = if cfg.light_workers > 0 {
        cfg.light_workers
    } else {
        auto
    };
    (w_load, w_light)
}

fn load_worker(rx: Receiver<ChunkLoc>, weak: Weak<ChunkStore>, q: Arc<AtomicUsize>) {
    while let Ok(loc) = rx.recv() {
        q.fetch_sub(1, Ordering::Relaxed);
        let Some(store) = weak.upgrade() else { break };
        if let Err(e) = store.load_chunk_now(loc) {
            warn!("load failed for {loc:?}: {e}");
        }
    }
}

fn light_worker(rx: Receiver<LightJob>, weak: Weak<ChunkStore>, q: Arc<AtomicUsize>) {
    while let Ok(job) = rx.recv() {
        q.fetch_sub(1, Ordering::Relaxed);
        let Some(store) = weak.upgrade() else { break };
        let loc = job.loc;
        // Requeues go back through the store so no worker owns a sender
        // into its own lane; teardown would never disconnect otherwise.
        match std::panic::catch_unwind(AssertUnwindSafe(|| run_light_job(&store, job))) {
            Ok(Some(scope)) => {
                let _ = store.submit_task(StoreTask::Light { loc, scope });
            }
            Ok(None) => {}
            Err(_) => {
                store.metrics.light_panics.fetch_add(1, Ordering::Relaxed);
                error!("light pass panicked for {loc:?}");
            }
        }
    }
}

fn coordinate(
    weak: Weak<ChunkStore>,
    task_rx: Receiver<StoreTask>,
    bus_rx: Receiver<crate::events::EventEnvelope>,
    lanes: Lanes,
) {
    loop {
        select! {
            recv(task_rx) -> msg => {
                let Ok(task) = msg else { break };
                let Some(store) = weak.upgrade() else { break };
                route_task(&store, &lanes, task);
            }
            recv(bus_rx) -> msg => {
                let Ok(env) = msg else { break };
                let Some(store) = weak.upgrade() else { break };
                handle_event(&store, &lanes, env.event);
            }
        }
    }
}

fn route_task(store: &Arc<ChunkStore>, lanes: &Lanes, task: StoreTask) {
    match task {
        StoreTask::Load { loc } => lanes.submit_load(loc),
        StoreTask::Light { loc, scope } => lanes.submit_light(loc, scope),
        StoreTask::DeriveColumn {
            chunk_x,
            local_x,
            hint_y,
            near_cy,
            flags,
        } => store.update_top_block(chunk_x, local_x, hint_y, near_cy, flags),
        StoreTask::DeriveChunkColumns { loc } => store.derive_chunk_columns(loc),
    }
}

fn handle_event(store: &Arc<ChunkStore>, lanes: &Lanes, event: WorldEvent) {
    match event {
        WorldEvent::WorldTicked { .. } => flush_light_sources(store, lanes),
        WorldEvent::ChunkLoaded { loc, .. } => extend_light_after_load(store, lanes, loc),
        WorldEvent::ChunkColumnUpdated {
            chunk_x,
            local_x,
            flag,
            ..
        } if flag == TopFlags::OPAQUE => rescope_skylight(store, lanes, chunk_x, local_x),
        _ => {}
    }
}

/// One light pass over one chunk. The generation stamp is taken here, at
/// execution start; anything that bumps it afterwards supersedes this pass.
/// A superseded pass hands its scope back so the cells it was meant to
/// cover are recomputed against the newer state.
fn run_light_job(store: &Arc<ChunkStore>, job: LightJob) -> Option<LightScope> {
    let chunk = store.peek_loaded(job.loc)?;
    if chunk.is_disposed() {
        return None;
    }
    let pass = chunk.begin_light_pass();
    let ring = store.gather_ring(job.loc);
    let sky = store.assemble_sky_tops(job.loc);
    let Some(view) = Neighborhood::assemble(chunk.clone(), pass, &ring, sky) else {
        store.metrics.light_superseded.fetch_add(1, Ordering::Relaxed);
        return Some(job.scope);
    };
    let Some(cells) = recalc_chunk(&view, &job.scope, &store.catalog, &store.store_cfg.light)
    else {
        store.metrics.light_superseded.fetch_add(1, Ordering::Relaxed);
        return Some(job.scope);
    };
    match chunk.commit_light(pass, cells) {
        LightCommit::Applied(changed) => {
            store.metrics.light_passes.fetch_add(1, Ordering::Relaxed);
            for (lx, ly) in changed {
                store.bus.publish(WorldEvent::ChunkLightChanged {
                    loc: job.loc,
                    lx,
                    ly,
                });
            }
            None
        }
        LightCommit::Superseded => {
            store.metrics.light_superseded.fetch_add(1, Ordering::Relaxed);
            Some(job.scope)
        }
    }
}

/// Drains the sources batched since the last tick and recomputes only the
/// cells within reach of one of them.
fn flush_light_sources(store: &Arc<ChunkStore>, lanes: &Lanes) {
    let mut points = std::mem::take(&mut *store.pending_sources.lock());
    if points.is_empty() {
        return;
    }
    points.sort_unstable();
    points.dedup();

    let edge = store.cfg.edge() as i32;
    let reach = store.store_cfg.light.radius + 1.0;
    for (loc, chunk) in store.loaded_snapshot() {
        if chunk.is_disposed() {
            continue;
        }
        let x0 = store.cfg.origin_of(loc.cx);
        let y0 = store.cfg.origin_of(loc.cy);
        let near: Vec<(i32, i32)> = points
            .iter()
            .copied()
            .filter(|&(px, py)| {
                let dx = (x0 - px).max(px - (x0 + edge - 1)).max(0);
                let dy = (y0 - py).max(py - (y0 + edge - 1)).max(0);
                ((dx * dx + dy * dy) as f32) < reach * reach
            })
            .collect();
        if !near.is_empty() {
            lanes.submit_light(loc, LightScope::Near(near));
        }
    }
}

/// A freshly published chunk changes what its neighbors can see: recompute
/// their cells bordering it.
fn extend_light_after_load(store: &Arc<ChunkStore>, lanes: &Lanes, loc: ChunkLoc) {
    let edge = store.cfg.edge() as i32;
    let min = (store.cfg.origin_of(loc.cx), store.cfg.origin_of(loc.cy));
    let max = (min.0 + edge - 1, min.1 + edge - 1);
    for (dx, dy) in RING_OFFSETS {
        let neighbor = loc.offset(dx, dy);
        if store.peek_loaded(neighbor).is_some() {
            lanes.submit_light(neighbor, LightScope::Region { min, max });
        }
    }
}

/// A moved light-blocking top shifts the sky for the whole vertical band
/// around that world column.
fn rescope_skylight(store: &Arc<ChunkStore>, lanes: &Lanes, chunk_x: i32, local_x: usize) {
    let wx = store.cfg.origin_of(chunk_x) + local_x as i32;
    let edge = store.cfg.edge() as i32;
    let reach = store.store_cfg.light.radius + 1.0;
    for (loc, _) in store.loaded_snapshot() {
        let x0 = store.cfg.origin_of(loc.cx);
        let dx = (x0 - wx).max(wx - (x0 + edge - 1)).max(0);
        if (dx as f32) >= reach {
            continue;
        }
        lanes.submit_light(
            loc,
            LightScope::Region {
                min: (wx, -SKY_SCOPE_SPAN),
                max: (wx, SKY_SCOPE_SPAN),
            },
        );
    }
}
