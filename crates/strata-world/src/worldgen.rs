//! Reference terrain field used when a chunk has no saved snapshot.

use fastnoise_lite::{FastNoiseLite, NoiseType};
use serde::Deserialize;
use strata_blocks::{AIR, MaterialCatalog, MaterialId};

fn default_seed() -> i32 {
    1337
}
fn default_surface_y() -> i32 {
    64
}
fn default_amplitude() -> f32 {
    24.0
}
fn default_height_frequency() -> f32 {
    0.008
}
fn default_cave_frequency() -> f32 {
    0.03
}
fn default_cave_threshold() -> f32 {
    0.62
}

/// Tunables for [`TerrainGen`]. All fields have serde defaults so a partial
/// `[terrain]` table in the app config is enough.
#[derive(Debug, Clone, Deserialize)]
pub struct GenParams {
    #[serde(default = "default_seed")]
    pub seed: i32,
    /// World y of the surface midline.
    #[serde(default = "default_surface_y")]
    pub surface_y: i32,
    /// Half-range of the surface swing around `surface_y`, in blocks.
    #[serde(default = "default_amplitude")]
    pub amplitude: f32,
    #[serde(default = "default_height_frequency")]
    pub height_frequency: f32,
    #[serde(default = "default_cave_frequency")]
    pub cave_frequency: f32,
    /// Cave noise above this value carves air; raise it for fewer caves.
    #[serde(default = "default_cave_threshold")]
    pub cave_threshold: f32,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            surface_y: default_surface_y(),
            amplitude: default_amplitude(),
            height_frequency: default_height_frequency(),
            cave_frequency: default_cave_frequency(),
            cave_threshold: default_cave_threshold(),
        }
    }
}

/// Deterministic 2-D material field: a noisy surface line with grass/dirt
/// banding over stone, and noise-carved caves below the dirt layer.
///
/// Material ids are resolved against the catalog once at construction so the
/// per-block path is just noise plus comparisons.
pub struct TerrainGen {
    params: GenParams,
    height: FastNoiseLite,
    cave: FastNoiseLite,
    grass: MaterialId,
    dirt: MaterialId,
    stone: MaterialId,
}

impl TerrainGen {
    pub fn new(params: GenParams, catalog: &MaterialCatalog) -> Self {
        let mut height = FastNoiseLite::with_seed(params.seed);
        height.set_noise_type(Some(NoiseType::OpenSimplex2));
        height.set_frequency(Some(params.height_frequency));
        let mut cave = FastNoiseLite::with_seed(params.seed ^ 0x5F37_59DF);
        cave.set_noise_type(Some(NoiseType::OpenSimplex2));
        cave.set_frequency(Some(params.cave_frequency));
        let grass = catalog.id_by_name("grass").unwrap_or(AIR);
        let dirt = catalog.id_by_name("dirt").unwrap_or(AIR);
        let stone = catalog.id_by_name("stone").unwrap_or(AIR);
        Self {
            params,
            height,
            cave,
            grass,
            dirt,
            stone,
        }
    }

    pub fn params(&self) -> &GenParams {
        &self.params
    }

    /// World y of the highest non-air block in column `wx`.
    pub fn surface_height(&self, wx: i32) -> i32 {
        let n = self.height.get_noise_2d(wx as f32, 0.0);
        self.params.surface_y + (n * self.params.amplitude).round() as i32
    }

    /// Material at a world position. Everything above the surface is air.
    pub fn material_at(&self, wx: i32, wy: i32) -> MaterialId {
        let surface = self.surface_height(wx);
        if wy > surface {
            return AIR;
        }
        let depth = surface - wy;
        // Never carve the top bands; caves would read as surface holes.
        if depth > 3 {
            let c = (self.cave.get_noise_2d(wx as f32, wy as f32) + 1.0) * 0.5;
            if c > self.params.cave_threshold {
                return AIR;
            }
        }
        match depth {
            0 => self.grass,
            1..=3 => self.dirt,
            _ => self.stone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terrain() -> TerrainGen {
        TerrainGen::new(GenParams::default(), &MaterialCatalog::builtin())
    }

    #[test]
    fn same_seed_samples_identically() {
        let a = terrain();
        let b = terrain();
        for wx in -40..40 {
            assert_eq!(a.surface_height(wx), b.surface_height(wx));
            for wy in 0..96 {
                assert_eq!(a.material_at(wx, wy), b.material_at(wx, wy));
            }
        }
    }

    #[test]
    fn surface_band_is_grass_over_dirt_and_air_above() {
        let g = terrain();
        let catalog = MaterialCatalog::builtin();
        for wx in [-17, 0, 3, 101] {
            let h = g.surface_height(wx);
            assert_eq!(g.material_at(wx, h + 1), AIR);
            assert_eq!(g.material_at(wx, h), g.grass);
            assert_eq!(
                catalog.get(g.material_at(wx, h - 1)).map(|m| m.name.as_str()),
                Some("dirt")
            );
        }
    }

    #[test]
    fn deep_columns_are_stone_or_carved_air() {
        let g = terrain();
        let mut stone_seen = false;
        for wx in -64..64 {
            let h = g.surface_height(wx);
            for wy in (h - 40)..(h - 4) {
                let m = g.material_at(wx, wy);
                assert!(m == g.stone || m == AIR, "unexpected material at depth");
                stone_seen |= m == g.stone;
            }
        }
        assert!(stone_seen);
    }

    #[test]
    fn surface_stays_within_amplitude() {
        let g = terrain();
        let p = g.params();
        for wx in -200..200 {
            let h = g.surface_height(wx);
            assert!((h - p.surface_y).abs() <= p.amplitude.ceil() as i32 + 1);
        }
    }
}
