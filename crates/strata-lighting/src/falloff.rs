//! Distance-to-brightness curve for point light sources.
//!
//! Distances arrive normalized: `nd = d^2 / r^2`, so `nd = 1` sits exactly at
//! the search radius. The curve has two regimes meeting at [`NEAR_SPLIT`]
//! with value 0.75: cells near a source get a flat boost above linear, far
//! cells fade to zero at the radius.

/// Normalized squared distance where the near regime hands over to the far.
pub const NEAR_SPLIT: f32 = 0.5;
/// Intercept of the near regime; values above 1.0 saturate after clamping.
pub const NEAR_BASE: f32 = 1.25;
/// Slope factor of the far regime.
pub const FAR_SCALE: f32 = 1.5;

/// Brightness multiplier for a source at normalized squared distance `nd`.
/// Callers only pass `nd < 1.0`; the far regime reaches zero at `nd = 1.0`.
#[inline]
pub fn falloff(nd: f32) -> f32 {
    if nd < NEAR_SPLIT {
        NEAR_BASE - nd
    } else {
        FAR_SCALE * (1.0 - nd)
    }
}

/// Falloff scaled by source strength and clamped into `[0, 1]`.
#[inline]
pub fn scaled(nd: f32, strength: f32) -> f32 {
    (falloff(nd) * strength).clamp(0.0, 1.0)
}
