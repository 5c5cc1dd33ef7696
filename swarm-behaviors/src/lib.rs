//! Steering and boundary behaviors for `swarm-core` worlds.
//!
//! Every behavior here adds at most one force per particle per frame and
//! leaves every other particle alone.

mod avoid;
mod boundary;
mod collision;
mod flocking;
mod seek;
mod seek_random;
mod wander;

pub use avoid::Avoid;
pub use boundary::{Bounce, Constrain, Wrap};
pub use collision::{collision_force, BatchCollider, Collision, CollisionParams, ParallelCollider};
pub use flocking::{Align, Cohesion, Separate};
pub use seek::{Easing, Seek, SeekEvent, SeekTransition};
pub use seek_random::SeekRandom;
pub use wander::Wander;

use rand::rngs::StdRng;
use rand::SeedableRng;
use swarm_core::{Particle, ParticleView, Vec3, VecExt};

/// Classic Reynolds steering: the change of velocity needed to reach
/// `desired`, capped at `max_force`.
#[inline]
pub(crate) fn steer(desired: Vec3, velocity: Vec3, max_force: f32) -> Vec3 {
    (desired - velocity).limit(max_force)
}

/// True when `view` is the particle's own entry in its neighborhood.
#[inline]
pub(crate) fn is_self(particle: &Particle, view: &ParticleView) -> bool {
    particle.handle() == Some(view.handle)
}

pub(crate) fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
