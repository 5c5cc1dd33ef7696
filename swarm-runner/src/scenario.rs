//! Turns a loaded [`Config`] into a populated world.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use swarm_behaviors::{Align, Avoid, Bounce, Cohesion, Collision, Constrain, Seek, SeekRandom, Separate, Wander, Wrap};
use swarm_config::{BehaviorConfig, BehaviorKind, Config, IntegratorType, NeighborModeType, SpawnConfig, WorldConfig};
use swarm_core::{
    Behavior, BehaviorId, IntegrationScheme, NeighborMode, Particle, PhysicsError, PhysicsWorld, Vec3, WorldSettings,
};

pub fn world_settings(config: &WorldConfig) -> WorldSettings {
    WorldSettings {
        friction: config.friction,
        spring_iterations: config.spring_iterations,
        scheme: match config.integrator {
            IntegratorType::Euler => IntegrationScheme::SemiImplicitEuler,
            IntegratorType::Verlet => IntegrationScheme::Verlet,
        },
        neighbor_mode: match config.neighbors.mode {
            NeighborModeType::Grid => NeighborMode::Grid,
            NeighborModeType::All => NeighborMode::All,
        },
        cell_size: config.neighbors.cell_size,
        dedup_tolerance: config.dedup_tolerance,
    }
}

/// Instantiates one configured behavior. `seed` only matters for the random ones.
pub fn build_behavior(entry: &BehaviorConfig, seed: Option<u64>) -> Box<dyn Behavior> {
    let mut behavior: Box<dyn Behavior> = match entry.kind {
        BehaviorKind::Seek {
            target,
            max_speed,
            max_force,
            min_distance,
            slow_down_distance,
            arrive_distance,
        } => {
            let mut seek = Seek::new(Vec3::from(target))
                .with_limits(max_speed, max_force)
                .with_distances(min_distance, slow_down_distance);
            if let Some(distance) = arrive_distance {
                seek = seek.with_arrive_distance(distance);
            }
            Box::new(seek)
        }
        BehaviorKind::SeekRandom {
            min,
            max,
            max_speed,
            max_force,
            min_distance,
            slow_down_distance,
        } => {
            let (min, max) = (Vec3::from(min), Vec3::from(max));
            let seek = match seed {
                Some(seed) => SeekRandom::with_seed(min, max, seed),
                None => SeekRandom::new(min, max),
            };
            Box::new(
                seek.with_limits(max_speed, max_force)
                    .with_distances(min_distance, slow_down_distance),
            )
        }
        BehaviorKind::Avoid {
            target,
            max_distance,
            max_speed,
            max_force,
        } => Box::new(Avoid::new(Vec3::from(target), max_distance).with_limits(max_speed, max_force)),
        BehaviorKind::Align {
            distance,
            max_speed,
            max_force,
        } => Box::new(Align::new(distance).with_limits(max_speed, max_force)),
        BehaviorKind::Cohesion {
            distance,
            max_speed,
            max_force,
        } => Box::new(Cohesion::new(distance).with_limits(max_speed, max_force)),
        BehaviorKind::Separate {
            distance,
            max_speed,
            max_force,
        } => Box::new(Separate::new(distance).with_limits(max_speed, max_force)),
        BehaviorKind::Collision {
            max_force,
            offset,
            parallel,
            batch_size,
        } => {
            let collision = match (parallel, batch_size) {
                (true, _) => Collision::parallel(max_force),
                (false, Some(batch_size)) => Collision::new(max_force).with_batch_size(batch_size),
                (false, None) => Collision::new(max_force),
            };
            Box::new(collision.with_offset(offset))
        }
        BehaviorKind::Wander {
            speed,
            max_change,
            max_force,
        } => Box::new(match seed {
            Some(seed) => Wander::with_seed(speed, max_change, max_force, seed),
            None => Wander::new(speed, max_change, max_force),
        }),
        BehaviorKind::Bounce { min, max } => Box::new(Bounce::new(Vec3::from(min), Vec3::from(max))),
        BehaviorKind::Constrain { min, max } => Box::new(Constrain::new(Vec3::from(min), Vec3::from(max))),
        BehaviorKind::Wrap { min, max } => Box::new(Wrap::new(Vec3::from(min), Vec3::from(max))),
    };
    behavior.set_weight(entry.weight);
    behavior.set_enabled(entry.enabled);
    behavior
}

fn spawn(world: &mut PhysicsWorld, config: &SpawnConfig, rng: &mut StdRng) -> Result<(), PhysicsError> {
    let (min, max) = (Vec3::from(config.min), Vec3::from(config.max));
    for _ in 0..config.count {
        let unit = Vec3::new(rng.gen(), rng.gen(), rng.gen());
        let position = min + (max - min) * unit;

        let angle = rng.gen::<f32>() * std::f32::consts::TAU;
        let velocity = Vec3::new(angle.cos(), angle.sin(), 0.0) * config.speed;

        let mut particle = Particle::with_properties(position, config.mass, config.radius)?.with_velocity(velocity);
        if config.locked {
            particle.lock();
        }
        world.add_particle(particle);
    }
    Ok(())
}

/// A built world plus the registrations the run loop polls.
pub struct Scenario {
    pub world: PhysicsWorld,
    /// Seek behaviors with arrival signaling turned on.
    pub signaling_seeks: Vec<BehaviorId>,
}

impl Scenario {
    /// Empties every signaling seek's event queue, logging each transition.
    /// Returns how many events were drained.
    pub fn drain_seek_events(&mut self) -> usize {
        let mut drained = 0;
        for id in &self.signaling_seeks {
            if let Some(seek) = self.world.behavior_mut::<Seek>(*id) {
                for event in seek.take_events() {
                    debug!("Seek {:?}: {:?} {:?}", id, event.particle, event.transition);
                    drained += 1;
                }
            }
        }
        drained
    }
}

/// Builds the world, its behavior pipeline and its initial particles.
///
/// With a seed, particle placement and every random behavior are reproducible.
pub fn build_world(config: &Config, seed: Option<u64>) -> Result<Scenario, PhysicsError> {
    let mut world = PhysicsWorld::new(world_settings(&config.world))?;
    let mut signaling_seeks = Vec::new();

    for (i, entry) in config.behaviors.iter().enumerate() {
        let behavior_seed = seed.map(|s| s.wrapping_add(i as u64 + 1));
        info!("Adding behavior '{}' (weight {})", entry.kind.name(), entry.weight);
        let id = world.add_behavior(build_behavior(entry, behavior_seed));
        if let BehaviorKind::Seek {
            arrive_distance: Some(_),
            ..
        } = entry.kind
        {
            signaling_seeks.push(id);
        }
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    for batch in &config.spawn {
        info!("Spawning {} particles", batch.count);
        spawn(&mut world, batch, &mut rng)?;
    }
    Ok(Scenario { world, signaling_seeks })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> Config {
        Config::from_json(json).unwrap()
    }

    #[test]
    fn builds_world_from_config() {
        let config = config(
            r#"{
              "world": { "friction": 0.2, "integrator": "verlet" },
              "spawn": [
                { "count": 10, "min": [0, 0, 0], "max": [10, 10, 0], "speed": 1.0 },
                { "count": 2, "locked": true }
              ],
              "behaviors": [
                { "type": "separate", "weight": 2.0 },
                { "type": "wander", "enabled": false },
                { "type": "collision", "parallel": true }
              ]
            }"#,
        );
        let world = build_world(&config, Some(5)).unwrap().world;

        assert_eq!(world.particle_count(), 12);
        assert_eq!(world.behavior_count(), 3);
        assert_eq!(world.settings().friction, 0.2);
        assert_eq!(world.settings().scheme, IntegrationScheme::Verlet);
        assert_eq!(world.particles().filter(|(_, p)| p.is_locked()).count(), 2);
        for (_, particle) in world.particles().filter(|(_, p)| !p.is_locked()) {
            let p = particle.position();
            assert!(p.x >= 0.0 && p.x <= 10.0 && p.y >= 0.0 && p.y <= 10.0 && p.z == 0.0);
            assert!((particle.velocity().length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn collision_batch_size_reaches_the_behavior() {
        let config = config(r#"{ "behaviors": [ { "type": "collision", "batch_size": 32 } ] }"#);
        let mut world = PhysicsWorld::new(WorldSettings::default()).unwrap();
        let id = world.add_behavior(build_behavior(&config.behaviors[0], None));
        world.add_particle(Particle::new(Vec3::ZERO));
        world.update(1.0);
        assert_eq!(world.behavior_mut::<Collision>(id).unwrap().window(), Some(0..32));
    }

    #[test]
    fn weight_and_enabled_are_applied() {
        let config = config(r#"{ "behaviors": [ { "type": "align", "weight": 0.25, "enabled": false } ] }"#);
        let behavior = build_behavior(&config.behaviors[0], None);
        assert_eq!(behavior.weight(), 0.25);
        assert!(!behavior.is_enabled());
        assert_eq!(behavior.name(), "align");
    }

    #[test]
    fn seeded_builds_are_reproducible() {
        let config = config(
            r#"{
              "spawn": [ { "count": 20, "speed": 2.0 } ],
              "behaviors": [ { "type": "wander" }, { "type": "seek_random", "min": [-5, -5, 0], "max": [5, 5, 0] } ]
            }"#,
        );
        let mut a = build_world(&config, Some(99)).unwrap().world;
        let mut b = build_world(&config, Some(99)).unwrap().world;
        for _ in 0..10 {
            a.update(1.0);
            b.update(1.0);
        }
        let positions = |w: &PhysicsWorld| w.particles().map(|(_, p)| p.position()).collect::<Vec<_>>();
        assert_eq!(positions(&a), positions(&b));
    }

    #[test]
    fn seek_events_are_drained_each_poll() {
        let config = config(
            r#"{
              "spawn": [ { "count": 1, "min": [0.5, 0, 0], "max": [0.5, 0, 0] } ],
              "behaviors": [
                { "type": "seek", "target": [0, 0, 0], "max_speed": 0, "max_force": 0, "arrive_distance": 1.0 },
                { "type": "seek", "target": [50, 0, 0], "max_force": 0 }
              ]
            }"#,
        );
        let mut scenario = build_world(&config, Some(1)).unwrap();
        assert_eq!(scenario.signaling_seeks.len(), 1);

        scenario.world.update(1.0);
        assert_eq!(scenario.drain_seek_events(), 1);
        scenario.world.update(1.0);
        assert_eq!(scenario.drain_seek_events(), 0);

        let id = scenario.signaling_seeks[0];
        assert_eq!(scenario.world.behavior_mut::<Seek>(id).unwrap().pending_events(), 0);
    }
}
