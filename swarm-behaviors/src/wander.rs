use rand::rngs::StdRng;
use rand::Rng;
use swarm_core::{impl_behavior_base, Behavior, BehaviorSettings, Neighborhood, Particle, Vec3, VecExt};

use crate::make_rng;

/// Random walk: a heading nudged by bounded noise every step. Ignores neighbors.
pub struct Wander {
    settings: BehaviorSettings,
    pub speed: f32,
    /// Width of the per-axis noise band, centered on zero.
    pub max_change: f32,
    pub max_force: f32,
    heading: Vec3,
    rng: StdRng,
}

impl Wander {
    pub fn new(speed: f32, max_change: f32, max_force: f32) -> Self {
        Self::build(speed, max_change, max_force, None)
    }

    pub fn with_seed(speed: f32, max_change: f32, max_force: f32, seed: u64) -> Self {
        Self::build(speed, max_change, max_force, Some(seed))
    }

    fn build(speed: f32, max_change: f32, max_force: f32, seed: Option<u64>) -> Self {
        Wander {
            settings: BehaviorSettings::default(),
            speed,
            max_change,
            max_force,
            heading: Vec3::ZERO,
            rng: make_rng(seed),
        }
    }

    pub fn heading(&self) -> Vec3 {
        self.heading
    }

    fn next_force(&mut self) -> Vec3 {
        let noise = Vec3::new(
            self.rng.gen::<f32>() - 0.5,
            self.rng.gen::<f32>() - 0.5,
            self.rng.gen::<f32>() - 0.5,
        );
        self.heading = self.heading.normalize_or_zero() + noise * self.max_change;
        (self.heading * self.speed).limit(self.max_force)
    }
}

impl Default for Wander {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

impl_behavior_base!(Wander, "wander");

impl Behavior for Wander {
    fn apply(&mut self, particle: &mut Particle, _neighbors: &Neighborhood<'_>) {
        let force = self.next_force();
        particle.add_force(self.settings.weighted(force));
    }
}
