use log::trace;
use rand::rngs::StdRng;
use rand::Rng;
use swarm_core::{impl_behavior_base, Behavior, BehaviorSettings, Neighborhood, Particle, Vec3, VecExt};

use crate::{make_rng, steer};

/// Seeks a random point inside a box and picks a fresh one whenever it gets there.
///
/// The target is shared: every particle this behavior is applied to chases
/// the same point.
pub struct SeekRandom {
    settings: BehaviorSettings,
    pub max_speed: f32,
    pub max_force: f32,
    min_distance: f32,
    pub slow_down_distance: f32,
    min: Vec3,
    max: Vec3,
    target: Vec3,
    rng: StdRng,
}

impl SeekRandom {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self::build(min, max, None)
    }

    /// Same as [`new`](Self::new) with a reproducible target sequence.
    pub fn with_seed(min: Vec3, max: Vec3, seed: u64) -> Self {
        Self::build(min, max, Some(seed))
    }

    fn build(min: Vec3, max: Vec3, seed: Option<u64>) -> Self {
        let mut seek = SeekRandom {
            settings: BehaviorSettings::default(),
            max_speed: 3.5,
            max_force: 0.5,
            min_distance: 0.5,
            slow_down_distance: 0.0,
            min: min.min(max),
            max: min.max(max),
            target: Vec3::ZERO,
            rng: make_rng(seed),
        };
        seek.pick_target();
        seek
    }

    /// Sets speed and force limits. The arrival distance is raised to at
    /// least `max_force`, otherwise a particle could orbit the target forever.
    pub fn with_limits(mut self, max_speed: f32, max_force: f32) -> Self {
        self.max_speed = max_speed;
        self.max_force = max_force;
        self.min_distance = self.min_distance.max(max_force);
        self
    }

    pub fn with_distances(mut self, min_distance: f32, slow_down_distance: f32) -> Self {
        self.min_distance = min_distance.max(self.max_force);
        self.slow_down_distance = slow_down_distance;
        self
    }

    pub fn min_distance(&self) -> f32 {
        self.min_distance
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.min, self.max)
    }

    /// Moves the box and picks a new target inside it.
    pub fn set_bounds(&mut self, min: Vec3, max: Vec3) {
        self.min = min.min(max);
        self.max = min.max(max);
        self.pick_target();
    }

    fn pick_target(&mut self) {
        let unit = Vec3::new(self.rng.gen(), self.rng.gen(), self.rng.gen());
        self.target = self.min + (self.max - self.min) * unit;
        trace!("New random seek target {:?}", self.target);
    }

    fn force_for(&mut self, position: Vec3, velocity: Vec3) -> Vec3 {
        let mut desired = self.target - position;
        let mut distance = desired.length();
        if distance <= self.min_distance {
            self.pick_target();
            desired = self.target - position;
            distance = desired.length();
        }

        let speed = if distance < self.slow_down_distance {
            self.max_speed * distance / self.slow_down_distance
        } else {
            self.max_speed
        };
        steer(desired.with_length(speed), velocity, self.max_force)
    }
}

impl_behavior_base!(SeekRandom, "seek_random");

impl Behavior for SeekRandom {
    fn apply(&mut self, particle: &mut Particle, _neighbors: &Neighborhood<'_>) {
        let force = self.force_for(particle.position(), particle.velocity());
        particle.add_force(self.settings.weighted(force));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::Frame;

    fn inside(point: Vec3, min: Vec3, max: Vec3) -> bool {
        point.cmpge(min).all() && point.cmple(max).all()
    }

    #[test]
    fn min_distance_is_at_least_max_force() {
        let seek = SeekRandom::with_seed(Vec3::ZERO, Vec3::ONE, 1)
            .with_limits(2.0, 0.8)
            .with_distances(0.1, 0.0);
        assert_eq!(seek.min_distance(), 0.8);
    }

    #[test]
    fn targets_stay_inside_the_box() {
        let (min, max) = (Vec3::new(-5.0, 0.0, 2.0), Vec3::new(5.0, 1.0, 2.0));
        let mut seek = SeekRandom::with_seed(max, min, 7);
        assert_eq!(seek.bounds(), (min, max));
        for _ in 0..100 {
            assert!(inside(seek.target(), min, max));
            seek.pick_target();
        }
    }

    #[test]
    fn reaching_the_target_picks_another() {
        let frame = Frame::default();
        let mut seek = SeekRandom::with_seed(Vec3::splat(-100.0), Vec3::splat(100.0), 42);
        let first = seek.target();
        let mut particle = Particle::new(first);
        seek.apply(&mut particle, &Neighborhood::empty(&frame));

        assert_ne!(seek.target(), first);
        assert!(particle.force().length() > 0.0);
        assert!(particle.force().length() <= seek.max_force + 1e-5);
    }

    #[test]
    fn same_seed_same_targets() {
        let a = SeekRandom::with_seed(Vec3::ZERO, Vec3::splat(10.0), 3);
        let b = SeekRandom::with_seed(Vec3::ZERO, Vec3::splat(10.0), 3);
        assert_eq!(a.target(), b.target());
    }
}
