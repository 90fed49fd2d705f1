//! Brightness-field light recalculation over a chunk and its ring.
//!
//! The engine never waits on anything: it snapshots materials, computes, and
//! hands cells back for a generation-checked commit. A pass that observes a
//! newer generation at any checkpoint returns `None` and writes nothing.
#![forbid(unsafe_code)]

pub mod falloff;

use std::sync::Arc;

use rayon::prelude::*;

use strata_blocks::{AIR, MaterialCatalog, MaterialId};
use strata_chunk::{Chunk, LIGHT_RES, LIGHT_SAMPLES, LightCell};


/// Ring neighbor offsets in `(dx, dy)` chunk steps, west-to-east then
/// south-to-north; `Neighborhood::assemble` expects this order.
pub const RING_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

#[derive(Debug, Clone, Copy)]
pub struct LightParams {
    /// Source search radius in blocks.
    pub radius: f32,
}

impl Default for LightParams {
    fn default() -> Self {
        Self { radius: 8.0 }
    }
}

/// Which target cells a pass recomputes.
#[derive(Debug, Clone)]
pub enum LightScope {
    /// Every cell.
    Full,
    /// Cells within radius of any of these world positions.
    Near(Vec<(i32, i32)>),
    /// Cells within radius of an inclusive world-coordinate rectangle.
    Region { min: (i32, i32), max: (i32, i32) },
}

/// What is known about the light-blocking top of one world column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkyTop {
    /// Height not derivable (chunks unloaded); the column contributes no sky.
    Unknown,
    /// No light-blocking block; sky reaches every height.
    Open,
    /// Highest light-blocking block sits at this world y.
    Blocked(i32),
}

/// Per-column sky tops covering the neighborhood window.
#[derive(Debug, Clone)]
pub struct SkyTops {
    base_x: i32,
    tops: Vec<SkyTop>,
}

impl SkyTops {
    pub fn new(base_x: i32, tops: Vec<SkyTop>) -> Self {
        Self { base_x, tops }
    }

    /// All-unknown tops: no sky contribution anywhere.
    pub fn unknown(base_x: i32, span: usize) -> Self {
        Self {
            base_x,
            tops: vec![SkyTop::Unknown; span],
        }
    }

    #[inline]
    pub fn get(&self, wx: i32) -> SkyTop {
        let i = wx - self.base_x;
        if i < 0 || i as usize >= self.tops.len() {
            return SkyTop::Unknown;
        }
        self.tops[i as usize]
    }

    /// True when `wy` sits strictly above a known column top, or the column
    /// is known open. Unknown columns are never open.
    #[inline]
    pub fn open_above(&self, wx: i32, wy: i32) -> bool {
        match self.get(wx) {
            SkyTop::Unknown => false,
            SkyTop::Open => true,
            SkyTop::Blocked(top) => wy > top,
        }
    }
}

/// An emissive block found in the neighborhood grid.
#[derive(Debug, Clone, Copy)]
pub struct LightSource {
    pub wx: i32,
    pub wy: i32,
    /// Emission normalized into `(0, 1]`.
    pub strength: f32,
}

/// Material snapshot of a target chunk plus its eight neighbors, flattened
/// into one `(3*edge)^2` grid, with the sky tops covering the same window.
pub struct Neighborhood {
    target: Arc<Chunk>,
    pass: u64,
    edge: usize,
    span: usize,
    base_x: i32,
    base_y: i32,
    grid: Vec<MaterialId>,
    sky_tops: SkyTops,
}

impl Neighborhood {
    /// Snapshots the target and whichever ring chunks exist. Missing
    /// neighbors read as air. Bails with `None` when a newer pass starts
    /// while copying.
    pub fn assemble(
        target: Arc<Chunk>,
        pass: u64,
        ring: &[Option<Arc<Chunk>>; 8],
        sky_tops: SkyTops,
    ) -> Option<Self> {
        let edge = target.edge();
        let span = 3 * edge;
        let base_x = target.world_x(0) - edge as i32;
        let base_y = target.world_y(0) - edge as i32;
        let mut grid = vec![AIR; span * span];
        paste(&mut grid, span, edge, 1, 1, &target.materials_snapshot());
        if target.light_generation() != pass {
            return None;
        }
        for (i, (dx, dy)) in RING_OFFSETS.iter().enumerate() {
            if let Some(chunk) = &ring[i] {
                let tile = chunk.materials_snapshot();
                paste(
                    &mut grid,
                    span,
                    edge,
                    (dx + 1) as usize,
                    (dy + 1) as usize,
                    &tile,
                );
                if target.light_generation() != pass {
                    return None;
                }
            }
        }
        Some(Self {
            target,
            pass,
            edge,
            span,
            base_x,
            base_y,
            grid,
            sky_tops,
        })
    }

    #[inline]
    pub fn target(&self) -> &Arc<Chunk> {
        &self.target
    }

    #[inline]
    pub fn pass(&self) -> u64 {
        self.pass
    }

    #[inline]
    pub fn edge(&self) -> usize {
        self.edge
    }

    pub fn material_at(&self, wx: i32, wy: i32) -> MaterialId {
        let gx = wx - self.base_x;
        let gy = wy - self.base_y;
        if gx < 0 || gy < 0 || gx as usize >= self.span || gy as usize >= self.span {
            return AIR;
        }
        self.grid[gy as usize * self.span + gx as usize]
    }

    #[inline]
    fn stale(&self) -> bool {
        self.target.light_generation() != self.pass
    }
}

fn paste(
    grid: &mut [MaterialId],
    span: usize,
    edge: usize,
    tile_x: usize,
    tile_y: usize,
    mats: &[MaterialId],
) {
    for ly in 0..edge {
        let dst = (tile_y * edge + ly) * span + tile_x * edge;
        grid[dst..dst + edge].copy_from_slice(&mats[ly * edge..(ly + 1) * edge]);
    }
}

fn collect_emitters(view: &Neighborhood, catalog: &MaterialCatalog) -> Option<Vec<LightSource>> {
    let mut out = Vec::new();
    for gy in 0..view.span {
        if view.stale() {
            return None;
        }
        for gx in 0..view.span {
            let m = view.grid[gy * view.span + gx];
            if m.is_air() {
                continue;
            }
            let strength = catalog.emission_strength(m);
            if strength > 0.0 {
                out.push(LightSource {
                    wx: view.base_x + gx as i32,
                    wy: view.base_y + gy as i32,
                    strength,
                });
            }
        }
    }
    Some(out)
}

/// Folds one source into the sub-cell grid; returns whether any sample was
/// within range. Samples take the max of their current value and this
/// source's contribution, so the brightest source wins per sample.
#[inline]
fn accumulate(
    levels: &mut [f32; LIGHT_SAMPLES],
    wx: i32,
    wy: i32,
    src_x: f32,
    src_y: f32,
    strength: f32,
    radius: f32,
) -> bool {
    let cx = wx as f32 + 0.5;
    let cy = wy as f32 + 0.5;
    let slack = radius + 1.0;
    let dx = cx - src_x;
    let dy = cy - src_y;
    if dx * dx + dy * dy > slack * slack {
        return false;
    }
    let r2 = radius * radius;
    let mut hit = false;
    for sy in 0..LIGHT_RES {
        for sx in 0..LIGHT_RES {
            let px = wx as f32 + (sx as f32 + 0.5) / LIGHT_RES as f32;
            let py = wy as f32 + (sy as f32 + 0.5) / LIGHT_RES as f32;
            let ddx = px - src_x;
            let ddy = py - src_y;
            let nd = (ddx * ddx + ddy * ddy) / r2;
            // Strictly inside the radius; nd == 1.0 contributes nothing.
            if nd < 1.0 {
                hit = true;
                let v = falloff::scaled(nd, strength);
                let slot = &mut levels[sy * LIGHT_RES + sx];
                if v > *slot {
                    *slot = v;
                }
            }
        }
    }
    hit
}

fn compute_cell(
    view: &Neighborhood,
    params: &LightParams,
    emitters: &[LightSource],
    lx: usize,
    ly: usize,
) -> Option<LightCell> {
    if view.stale() {
        return None;
    }
    let wx = view.target.world_x(lx);
    let wy = view.target.world_y(ly);
    // Strictly above the column's light-blocking top: pinned to exactly 1.0.
    if view.sky_tops.open_above(wx, wy) {
        return Some(LightCell::full_skylight());
    }
    let mut levels = [0.0f32; LIGHT_SAMPLES];
    let mut lit = false;
    let mut sky = false;
    for src in emitters {
        if view.stale() {
            return None;
        }
        if accumulate(
            &mut levels,
            wx,
            wy,
            src.wx as f32 + 0.5,
            src.wy as f32 + 0.5,
            src.strength,
            params.radius,
        ) {
            lit = true;
        }
    }
    // Virtual sky sources: the nearest open-sky point of each column in
    // range, at full strength.
    let reach = params.radius.ceil() as i32;
    for col in (wx - reach)..=(wx + reach) {
        if view.stale() {
            return None;
        }
        let sky_y = match view.sky_tops.get(col) {
            SkyTop::Unknown => continue,
            SkyTop::Open => wy,
            SkyTop::Blocked(top) => {
                if wy > top {
                    wy
                } else {
                    top + 1
                }
            }
        };
        if accumulate(
            &mut levels,
            wx,
            wy,
            col as f32 + 0.5,
            sky_y as f32 + 0.5,
            1.0,
            params.radius,
        ) {
            lit = true;
            sky = true;
        }
    }
    let avg = levels.iter().sum::<f32>() / LIGHT_SAMPLES as f32;
    Some(LightCell {
        lit,
        skylight: sky,
        avg,
        levels,
    })
}

fn in_scope(scope: &LightScope, wx: i32, wy: i32, radius: f32) -> bool {
    // One block of slack covers sub-cell sample offsets on both ends.
    let reach = radius + 1.0;
    match scope {
        LightScope::Full => true,
        LightScope::Near(points) => points.iter().any(|&(px, py)| {
            let dx = (px - wx) as f32;
            let dy = (py - wy) as f32;
            dx * dx + dy * dy <= reach * reach
        }),
        LightScope::Region { min, max } => {
            let dx = (min.0 - wx).max(wx - max.0).max(0) as f32;
            let dy = (min.1 - wy).max(wy - max.1).max(0) as f32;
            dx * dx + dy * dy <= reach * reach
        }
    }
}

/// Computes light for every in-scope cell of the view's target chunk.
/// Returns `None` without side effects when the pass went stale; otherwise
/// the cells are ready for [`Chunk::commit_light`] under the same pass stamp.
pub fn recalc_chunk(
    view: &Neighborhood,
    scope: &LightScope,
    catalog: &MaterialCatalog,
    params: &LightParams,
) -> Option<Vec<(usize, usize, LightCell)>> {
    let emitters = collect_emitters(view, catalog)?;
    let edge = view.edge;
    match scope {
        LightScope::Full => {
            let rows: Option<Vec<Vec<(usize, usize, LightCell)>>> = (0..edge)
                .into_par_iter()
                .map(|ly| {
                    let mut row = Vec::with_capacity(edge);
                    for lx in 0..edge {
                        row.push((lx, ly, compute_cell(view, params, &emitters, lx, ly)?));
                    }
                    Some(row)
                })
                .collect();
            rows.map(|rows| rows.into_iter().flatten().collect())
        }
        scope => {
            let mut out = Vec::new();
            for ly in 0..edge {
                for lx in 0..edge {
                    let wx = view.target.world_x(lx);
                    let wy = view.target.world_y(ly);
                    if !in_scope(scope, wx, wy, params.radius) {
                        continue;
                    }
                    out.push((lx, ly, compute_cell(view, params, &emitters, lx, ly)?));
                }
            }
            Some(out)
        }
    }
}
