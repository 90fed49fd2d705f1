//! Per-cell light payload shared by the chunk buffer and the recalc engine.

/// Side length of the sub-cell brightness grid inside one block cell.
pub const LIGHT_RES: usize = 4;

/// Number of sub-cell samples per block cell.
pub const LIGHT_SAMPLES: usize = LIGHT_RES * LIGHT_RES;

/// Light state of one block cell. `levels` holds a `LIGHT_RES` x `LIGHT_RES`
/// brightness grid in `[0, 1]`, row-major with sub-y major; `avg` is its mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightCell {
    pub lit: bool,
    pub skylight: bool,
    pub avg: f32,
    pub levels: [f32; LIGHT_SAMPLES],
}

impl LightCell {
    #[inline]
    pub const fn dark() -> Self {
        Self {
            lit: false,
            skylight: false,
            avg: 0.0,
            levels: [0.0; LIGHT_SAMPLES],
        }
    }

    /// Cell strictly above every light-blocking block in its column: all
    /// samples pinned to exactly 1.0 with no falloff applied.
    #[inline]
    pub const fn full_skylight() -> Self {
        Self {
            lit: true,
            skylight: true,
            avg: 1.0,
            levels: [1.0; LIGHT_SAMPLES],
        }
    }

    #[inline]
    pub fn sample(&self, sx: usize, sy: usize) -> f32 {
        self.levels[sy * LIGHT_RES + sx]
    }
}

impl Default for LightCell {
    fn default() -> Self {
        Self::dark()
    }
}
