use swarm_core::{impl_behavior_base, Behavior, BehaviorSettings, Neighborhood, Particle, Vec3, VecExt};

use crate::steer;

/// Repels particles from a point. The push fades linearly to nothing at
/// `max_distance`.
pub struct Avoid {
    settings: BehaviorSettings,
    pub target: Vec3,
    pub max_speed: f32,
    pub max_force: f32,
    pub max_distance: f32,
}

impl Avoid {
    pub fn new(target: Vec3, max_distance: f32) -> Self {
        Avoid {
            settings: BehaviorSettings::default(),
            target,
            max_speed: 3.5,
            max_force: 0.5,
            max_distance,
        }
    }

    pub fn with_limits(mut self, max_speed: f32, max_force: f32) -> Self {
        self.max_speed = max_speed;
        self.max_force = max_force;
        self
    }

    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn force_for(&self, position: Vec3, velocity: Vec3) -> Vec3 {
        let away = position - self.target;
        let distance_sq = away.length_squared();
        if distance_sq >= self.max_distance * self.max_distance {
            return Vec3::ZERO;
        }
        let speed = self.max_speed * (1.0 - distance_sq.sqrt() / self.max_distance);
        steer(away.with_length(speed), velocity, self.max_force)
    }
}

impl_behavior_base!(Avoid, "avoid");

impl Behavior for Avoid {
    fn apply(&mut self, particle: &mut Particle, _neighbors: &Neighborhood<'_>) {
        let force = self.force_for(particle.position(), particle.velocity());
        particle.add_force(self.settings.weighted(force));
    }
}
