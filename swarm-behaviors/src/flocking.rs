//! The three boids rules. Each looks only at neighbors strictly inside its
//! own `distance`, ignoring the particle itself and exact duplicates.

use swarm_core::{
    impl_behavior_base, Behavior, BehaviorSettings, Neighborhood, Particle, ParticleView, Vec3, VecExt,
};

use crate::{is_self, steer};

/// Neighbors within `distance`, with their squared distance.
fn in_range<'n>(
    particle: &'n Particle,
    neighbors: &'n Neighborhood<'_>,
    distance: f32,
) -> impl Iterator<Item = (&'n ParticleView, f32)> + 'n {
    let position = particle.position();
    let limit_sq = distance * distance;
    neighbors
        .iter()
        .filter(move |view| !is_self(particle, view))
        .map(move |view| (view, position.distance_squared(view.position)))
        .filter(move |(_, d2)| *d2 > 0.0 && *d2 < limit_sq)
}

macro_rules! flocking_params {
    ($name:ident, $label:expr, $distance:expr) => {
        impl $name {
            pub fn new(distance: f32) -> Self {
                $name {
                    settings: BehaviorSettings::default(),
                    distance,
                    max_speed: 3.0,
                    max_force: 0.05,
                }
            }

            pub fn with_limits(mut self, max_speed: f32, max_force: f32) -> Self {
                self.max_speed = max_speed;
                self.max_force = max_force;
                self
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new($distance)
            }
        }

        impl_behavior_base!($name, $label);
    };
}

/// Steers toward the average heading of nearby particles.
pub struct Align {
    settings: BehaviorSettings,
    pub distance: f32,
    pub max_speed: f32,
    pub max_force: f32,
}

flocking_params!(Align, "align", 50.0);

impl Behavior for Align {
    fn apply(&mut self, particle: &mut Particle, neighbors: &Neighborhood<'_>) {
        let mut sum = Vec3::ZERO;
        let mut count = 0;
        for (view, _) in in_range(particle, neighbors, self.distance) {
            sum += view.velocity;
            count += 1;
        }
        if count == 0 || sum.length_squared() == 0.0 {
            return;
        }
        let average = sum / count as f32;
        let force = steer(average.with_length(self.max_speed), particle.velocity(), self.max_force);
        particle.add_force(self.settings.weighted(force));
    }

    fn interaction_radius(&self) -> Option<f32> {
        Some(self.distance)
    }
}

/// Steers toward the centroid of nearby particles.
pub struct Cohesion {
    settings: BehaviorSettings,
    pub distance: f32,
    pub max_speed: f32,
    pub max_force: f32,
}

flocking_params!(Cohesion, "cohesion", 50.0);

impl Behavior for Cohesion {
    fn apply(&mut self, particle: &mut Particle, neighbors: &Neighborhood<'_>) {
        let mut sum = Vec3::ZERO;
        let mut count = 0;
        for (view, _) in in_range(particle, neighbors, self.distance) {
            sum += view.position;
            count += 1;
        }
        if count == 0 {
            return;
        }
        let centroid = sum / count as f32;
        let desired = (centroid - particle.position()).with_length(self.max_speed);
        let force = steer(desired, particle.velocity(), self.max_force);
        particle.add_force(self.settings.weighted(force));
    }

    fn interaction_radius(&self) -> Option<f32> {
        Some(self.distance)
    }
}

/// Steers away from crowding neighbors, closer ones counting more.
pub struct Separate {
    settings: BehaviorSettings,
    pub distance: f32,
    pub max_speed: f32,
    pub max_force: f32,
}

flocking_params!(Separate, "separate", 25.0);

impl Separate {
    /// Average of the away vectors, each `1 / distance` long. Zero when no
    /// neighbor is in range.
    pub fn separation(&self, particle: &Particle, neighbors: &Neighborhood<'_>) -> Vec3 {
        let position = particle.position();
        let mut sum = Vec3::ZERO;
        let mut count = 0;
        for (view, d2) in in_range(particle, neighbors, self.distance) {
            sum += (position - view.position).with_length(1.0 / d2.sqrt());
            count += 1;
        }
        if count == 0 {
            Vec3::ZERO
        } else {
            sum / count as f32
        }
    }
}

impl Behavior for Separate {
    fn apply(&mut self, particle: &mut Particle, neighbors: &Neighborhood<'_>) {
        let away = self.separation(particle, neighbors);
        if away.length_squared() == 0.0 {
            return;
        }
        let force = steer(away.with_length(self.max_speed), particle.velocity(), self.max_force);
        particle.add_force(self.settings.weighted(force));
    }

    fn interaction_radius(&self) -> Option<f32> {
        Some(self.distance)
    }
}
