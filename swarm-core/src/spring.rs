//! Interfaces for the pluggable constraint and sub-simulation layers.
//!
//! The world only schedules these; their force laws live with the caller.

use crate::entity::ParticleHandle;
use crate::particle::ParticleSet;

/// A constraint between two particles, relaxed iteratively after integration.
///
/// Handles that no longer resolve in `particles` mean one endpoint was removed
/// while the spring stayed registered. That is a caller error: implementations
/// may skip the update or do whatever else they see fit, but must not panic.
pub trait Spring: Send {
    fn endpoints(&self) -> (ParticleHandle, ParticleHandle);

    /// One relaxation pass. Called `spring_iterations` times per frame.
    fn update(&mut self, particles: &mut ParticleSet, dt: f32);

    /// Whether this spring joins `a` and `b`, in either order.
    fn connects(&self, a: ParticleHandle, b: ParticleHandle) -> bool {
        let (first, second) = self.endpoints();
        (first == a && second == b) || (first == b && second == a)
    }

    fn touches(&self, handle: ParticleHandle) -> bool {
        let (first, second) = self.endpoints();
        first == handle || second == handle
    }
}

/// An opaque sub-simulation updated once per frame after the springs.
pub trait Group: Send {
    fn update(&mut self, particles: &mut ParticleSet, dt: f32);
}
