//! Small vector helpers layered over `glam::Vec3`.
//!
//! glam already covers add/sub/scale/length/lerp/normalize. What the steering
//! code needs on top of that is a handful of zero-safe operations: none of
//! them may ever turn a zero vector into NaN.

pub use glam::Vec3;

/// Extension methods used throughout the behaviors and the integrator.
pub trait VecExt: Sized {
    /// Returns a vector pointing the same way with the given length.
    /// A zero vector stays zero.
    fn with_length(self, length: f32) -> Self;

    /// Clamps the length to `max`, leaving shorter vectors untouched.
    fn limit(self, max: f32) -> Self;

    /// Component-wise comparison with an absolute tolerance. NaN never matches.
    fn equals_with_tolerance(self, other: Self, tolerance: f32) -> bool;

    /// Clamps every component into `[min, max]`.
    fn constrained(self, min: Self, max: Self) -> Self;
}

impl VecExt for Vec3 {
    #[inline]
    fn with_length(self, length: f32) -> Self {
        self.normalize_or_zero() * length
    }

    #[inline]
    fn limit(self, max: f32) -> Self {
        if self.length_squared() > max * max {
            self.with_length(max)
        } else {
            self
        }
    }

    fn equals_with_tolerance(self, other: Self, tolerance: f32) -> bool {
        let diff = (self - other).abs();
        // `<=` is false for NaN, so a NaN component rejects the match.
        diff.x <= tolerance && diff.y <= tolerance && diff.z <= tolerance
    }

    #[inline]
    fn constrained(self, min: Self, max: Self) -> Self {
        self.max(min).min(max)
    }
}

/// Clamps a frame delta into `[0, 1]`. Large or irregular steps would
/// otherwise blow up both integrators.
#[inline]
pub fn clamp_dt(dt: f32) -> f32 {
    if dt.is_nan() {
        0.0
    } else {
        dt.clamp(0.0, 1.0)
    }
}
