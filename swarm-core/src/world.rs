//! The physics world: owns every particle, behavior, spring and group, and
//! advances them one frame at a time.

use glam::Vec3;
use log::{debug, trace, warn};

use crate::behavior::{Behavior, Frame, FrameContext, Neighborhood};
use crate::entity::{Arena, FollowerId, ParticleHandle};
use crate::error::PhysicsError;
use crate::particle::{IntegrationScheme, Particle, ParticleSet};
use crate::spatial::{SpatialIndex, DEFAULT_CELL_SIZE};
use crate::spring::{Group, Spring};

pub const DEFAULT_FRICTION: f32 = 0.95;
pub const DEFAULT_SPRING_ITERATIONS: u32 = 50;
pub const DEFAULT_DEDUP_TOLERANCE: f32 = 0.1;

/// How each particle's neighborhood is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NeighborMode {
    /// 3×3 block query against a grid rebuilt every frame.
    #[default]
    Grid,
    /// Every particle neighbors every other one. Quadratic; for small worlds.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldSettings {
    /// Velocity damping per frame, in `[0, 1]`.
    pub friction: f32,
    pub spring_iterations: u32,
    pub scheme: IntegrationScheme,
    pub neighbor_mode: NeighborMode,
    pub cell_size: f32,
    /// Per-axis distance within which a new particle collapses onto an
    /// existing constraint particle.
    pub dedup_tolerance: f32,
}

impl Default for WorldSettings {
    fn default() -> Self {
        WorldSettings {
            friction: DEFAULT_FRICTION,
            spring_iterations: DEFAULT_SPRING_ITERATIONS,
            scheme: IntegrationScheme::default(),
            neighbor_mode: NeighborMode::default(),
            cell_size: DEFAULT_CELL_SIZE,
            dedup_tolerance: DEFAULT_DEDUP_TOLERANCE,
        }
    }
}

impl WorldSettings {
    pub fn validate(&self) -> Result<(), PhysicsError> {
        validate_friction(self.friction)?;
        if !(self.dedup_tolerance >= 0.0 && self.dedup_tolerance.is_finite()) {
            return Err(PhysicsError::config(format!(
                "dedup tolerance must be non-negative and finite, got {}",
                self.dedup_tolerance
            )));
        }
        // Cell size is checked by the index itself.
        Ok(())
    }
}

fn validate_friction(friction: f32) -> Result<(), PhysicsError> {
    if (0.0..=1.0).contains(&friction) {
        Ok(())
    } else {
        Err(PhysicsError::config(format!(
            "friction must lie in [0, 1], got {}",
            friction
        )))
    }
}

macro_rules! world_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

world_id!(
    /// Registration of a world-level behavior.
    BehaviorId
);
world_id!(SpringId);
world_id!(GroupId);

/// Bookkeeping from the most recent `update`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Frames completed since the world was built.
    pub frame: u64,
    pub particles: usize,
    /// Particles that had behaviors applied this frame.
    pub active: usize,
    /// Mean neighborhood size over the active particles.
    pub average_neighbors: f32,
}

pub struct PhysicsWorld {
    settings: WorldSettings,
    particles: ParticleSet,
    constraints: Vec<ParticleHandle>,
    behaviors: Vec<(BehaviorId, Box<dyn Behavior>)>,
    springs: Vec<(SpringId, Box<dyn Spring>)>,
    groups: Vec<(GroupId, Box<dyn Group>)>,
    followers: Arena<FollowerId, Vec3>,
    index: SpatialIndex<ParticleHandle>,
    frame: Frame,
    stats: FrameStats,
    next_id: u64,
}

impl PhysicsWorld {
    pub fn new(settings: WorldSettings) -> Result<Self, PhysicsError> {
        settings.validate()?;
        let index = SpatialIndex::new(settings.cell_size)?;
        debug!(
            "Creating physics world: {:?} integration, {:?} neighbors, cell size {}",
            settings.scheme, settings.neighbor_mode, settings.cell_size
        );
        Ok(PhysicsWorld {
            settings,
            particles: ParticleSet::new(),
            constraints: Vec::new(),
            behaviors: Vec::new(),
            springs: Vec::new(),
            groups: Vec::new(),
            followers: Arena::new(),
            index,
            frame: Frame::default(),
            stats: FrameStats::default(),
            next_id: 0,
        })
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn set_friction(&mut self, friction: f32) -> Result<(), PhysicsError> {
        validate_friction(friction)?;
        self.settings.friction = friction;
        Ok(())
    }

    pub fn set_spring_iterations(&mut self, iterations: u32) {
        self.settings.spring_iterations = iterations;
    }

    /// Changes the grid cell size and rebuilds the index at current positions.
    pub fn set_cell_size(&mut self, cell_size: f32) -> Result<(), PhysicsError> {
        self.index.configure(cell_size)?;
        self.settings.cell_size = cell_size;
        if self.settings.neighbor_mode == NeighborMode::Grid {
            self.index
                .rebuild(self.particles.iter().map(|(h, p)| (h, p.position())));
        }
        self.check_interaction_radii();
        Ok(())
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    fn next_raw_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // --- particles ---

    /// Admits a particle and returns its canonical handle.
    ///
    /// If a constraint particle sits within the dedup tolerance of the
    /// candidate, the candidate is dropped and the constraint's handle is
    /// returned instead.
    pub fn add_particle(&mut self, particle: Particle) -> ParticleHandle {
        if let Some(existing) = self.find_constraint(particle.position()) {
            debug!("Particle at {:?} collapsed onto constraint {:?}", particle.position(), existing);
            return existing;
        }
        self.insert_particle(particle)
    }

    /// Admits a pinned particle that later candidates collapse onto.
    pub fn add_constraint(&mut self, mut particle: Particle) -> ParticleHandle {
        if let Some(existing) = self.find_constraint(particle.position()) {
            return existing;
        }
        particle.lock();
        let handle = self.insert_particle(particle);
        self.constraints.push(handle);
        handle
    }

    /// Stops treating a particle as a constraint. The particle stays in the world.
    pub fn remove_constraint(&mut self, handle: ParticleHandle) -> bool {
        let before = self.constraints.len();
        self.constraints.retain(|c| *c != handle);
        before != self.constraints.len()
    }

    pub fn has_constraint(&self, handle: ParticleHandle) -> bool {
        self.constraints.contains(&handle)
    }

    /// The constraint particle a candidate at `position` would collapse onto,
    /// if any. Inserts nothing.
    pub fn canonical(&self, position: Vec3) -> Option<ParticleHandle> {
        self.find_constraint(position)
    }

    fn find_constraint(&self, position: Vec3) -> Option<ParticleHandle> {
        let tolerance = self.settings.dedup_tolerance;
        self.constraints.iter().copied().find(|handle| {
            self.particles
                .get(*handle)
                .map_or(false, |c| c.equals_with_tolerance(position, tolerance))
        })
    }

    fn insert_particle(&mut self, mut particle: Particle) -> ParticleHandle {
        particle.adopt_scheme(self.settings.scheme);
        let position = particle.position();
        let handle = self.particles.insert(particle);
        if let Some(stored) = self.particles.get_mut(handle) {
            stored.handle = Some(handle);
        }
        if self.settings.neighbor_mode == NeighborMode::Grid {
            self.index.insert(handle, position);
        }
        trace!("Added particle {:?} at {:?}", handle, position);
        handle
    }

    /// Removes a particle and evicts it from the spatial index.
    ///
    /// Springs and groups still referring to it are not touched; keeping
    /// them consistent is up to the caller.
    pub fn remove_particle(&mut self, handle: ParticleHandle) -> bool {
        match self.particles.remove(handle) {
            Some(particle) => {
                self.index.remove(handle, particle.position());
                self.constraints.retain(|c| *c != handle);
                trace!("Removed particle {:?}", handle);
                true
            }
            None => false,
        }
    }

    pub fn has_particle(&self, handle: ParticleHandle) -> bool {
        self.particles.contains(handle)
    }

    pub fn particle(&self, handle: ParticleHandle) -> Option<&Particle> {
        self.particles.get(handle)
    }

    pub fn particle_mut(&mut self, handle: ParticleHandle) -> Option<&mut Particle> {
        self.particles.get_mut(handle)
    }

    pub fn particles(&self) -> impl Iterator<Item = (ParticleHandle, &Particle)> {
        self.particles.iter()
    }

    pub fn particle_set(&self) -> &ParticleSet {
        &self.particles
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Candidate neighbors of a point as of the last rebuild (grid mode) or
    /// every particle (all mode).
    pub fn neighbors_of(&self, position: Vec3) -> Vec<ParticleHandle> {
        match self.settings.neighbor_mode {
            NeighborMode::Grid => self.index.query(position),
            NeighborMode::All => self.particles.keys().collect(),
        }
    }

    pub fn spatial_index(&self) -> &SpatialIndex<ParticleHandle> {
        &self.index
    }

    /// Drops every particle, constraint and spring. Behaviors and groups stay.
    pub fn clear(&mut self) {
        debug!(
            "Clearing world: {} particles, {} springs",
            self.particles.len(),
            self.springs.len()
        );
        self.particles.clear();
        self.constraints.clear();
        self.springs.clear();
        self.index.clear();
        self.frame.clear();
    }

    // --- behaviors ---

    pub fn add_behavior(&mut self, behavior: Box<dyn Behavior>) -> BehaviorId {
        let id = BehaviorId(self.next_raw_id());
        debug!("Adding behavior '{}' as {:?}", behavior.name(), id);
        self.behaviors.push((id, behavior));
        self.check_interaction_radii();
        id
    }

    pub fn remove_behavior(&mut self, id: BehaviorId) -> Option<Box<dyn Behavior>> {
        let position = self.behaviors.iter().position(|(b, _)| *b == id)?;
        Some(self.behaviors.remove(position).1)
    }

    pub fn has_behavior(&self, id: BehaviorId) -> bool {
        self.behaviors.iter().any(|(b, _)| *b == id)
    }

    pub fn behavior(&self, id: BehaviorId) -> Option<&dyn Behavior> {
        self.behaviors
            .iter()
            .find(|(b, _)| *b == id)
            .map(|(_, behavior)| behavior.as_ref())
    }

    /// Typed access to a registered behavior, e.g. to retarget a seek.
    pub fn behavior_mut<T: Behavior + 'static>(&mut self, id: BehaviorId) -> Option<&mut T> {
        self.behaviors
            .iter_mut()
            .find(|(b, _)| *b == id)
            .and_then(|(_, behavior)| behavior.as_any_mut().downcast_mut::<T>())
    }

    pub fn behavior_count(&self) -> usize {
        self.behaviors.len()
    }

    fn check_interaction_radii(&self) {
        if self.settings.neighbor_mode != NeighborMode::Grid {
            return;
        }
        for (id, behavior) in &self.behaviors {
            if let Some(radius) = behavior.interaction_radius() {
                if radius > self.settings.cell_size {
                    warn!(
                        "Behavior '{}' ({:?}) reaches {} but grid cells are {} wide; distant neighbors will be missed",
                        behavior.name(),
                        id,
                        radius,
                        self.settings.cell_size
                    );
                }
            }
        }
    }

    // --- springs ---

    /// Registers a spring. If a spring already joins the same two particles,
    /// the new one is dropped and the existing id is returned.
    pub fn add_spring(&mut self, spring: Box<dyn Spring>) -> SpringId {
        let (a, b) = spring.endpoints();
        if let Some(existing) = self.spring_between(a, b) {
            debug!("Spring between {:?} and {:?} already registered as {:?}", a, b, existing);
            return existing;
        }
        let id = SpringId(self.next_raw_id());
        self.springs.push((id, spring));
        id
    }

    pub fn remove_spring(&mut self, id: SpringId) -> Option<Box<dyn Spring>> {
        let position = self.springs.iter().position(|(s, _)| *s == id)?;
        Some(self.springs.remove(position).1)
    }

    /// Removes a spring and both its endpoints. True only if all three were
    /// present and removed.
    pub fn remove_spring_elements(&mut self, id: SpringId) -> bool {
        let Some(spring) = self.remove_spring(id) else {
            return false;
        };
        let (a, b) = spring.endpoints();
        let removed_a = self.remove_particle(a);
        let removed_b = self.remove_particle(b);
        removed_a && removed_b
    }

    pub fn has_spring(&self, id: SpringId) -> bool {
        self.springs.iter().any(|(s, _)| *s == id)
    }

    pub fn spring_between(&self, a: ParticleHandle, b: ParticleHandle) -> Option<SpringId> {
        self.springs
            .iter()
            .find(|(_, spring)| spring.connects(a, b))
            .map(|(id, _)| *id)
    }

    /// Number of springs attached to `handle`.
    pub fn connection_count(&self, handle: ParticleHandle) -> usize {
        self.springs
            .iter()
            .filter(|(_, spring)| spring.touches(handle))
            .count()
    }

    pub fn spring_count(&self) -> usize {
        self.springs.len()
    }

    // --- groups ---

    pub fn add_group(&mut self, group: Box<dyn Group>) -> GroupId {
        let id = GroupId(self.next_raw_id());
        self.groups.push((id, group));
        id
    }

    pub fn remove_group(&mut self, id: GroupId) -> Option<Box<dyn Group>> {
        let position = self.groups.iter().position(|(g, _)| *g == id)?;
        Some(self.groups.remove(position).1)
    }

    pub fn has_group(&self, id: GroupId) -> bool {
        self.groups.iter().any(|(g, _)| *g == id)
    }

    // --- followers ---

    /// Allocates a follower slot at the origin. Register it on a particle
    /// with [`Particle::add_follower`] to have it mirror that particle.
    pub fn create_follower(&mut self) -> FollowerId {
        self.followers.insert(Vec3::ZERO)
    }

    /// Allocates a follower slot already mirroring `handle`.
    pub fn attach_follower(&mut self, handle: ParticleHandle) -> Option<FollowerId> {
        let position = self.particles.get(handle)?.position();
        let follower = self.followers.insert(position);
        if let Some(particle) = self.particles.get_mut(handle) {
            particle.add_follower(follower);
        }
        Some(follower)
    }

    pub fn follower(&self, id: FollowerId) -> Option<Vec3> {
        self.followers.get(id).copied()
    }

    /// Frees a follower slot and unregisters it from every particle.
    pub fn remove_follower(&mut self, id: FollowerId) -> bool {
        if self.followers.remove(id).is_none() {
            return false;
        }
        for (_, particle) in self.particles.iter_mut() {
            particle.remove_follower(id);
        }
        true
    }

    // --- stepping ---

    /// Advances the simulation by one frame.
    pub fn update(&mut self, dt: f32) {
        let PhysicsWorld {
            settings,
            particles,
            behaviors,
            springs,
            groups,
            followers,
            index,
            frame,
            stats,
            ..
        } = self;

        let grid = settings.neighbor_mode == NeighborMode::Grid;
        if grid {
            index.rebuild(particles.iter().map(|(h, p)| (h, p.position())));
        }

        frame.recapture(particles);
        let context = FrameContext {
            frame: &*frame,
            index: if grid { Some(&*index) } else { None },
        };
        for (_, behavior) in behaviors.iter_mut() {
            if behavior.is_enabled() {
                behavior.prepare(&context);
            }
        }
        for (_, particle) in particles.iter_mut() {
            for behavior in particle.behaviors.iter_mut() {
                if behavior.is_enabled() {
                    behavior.prepare(&context);
                }
            }
        }

        let mut active = 0usize;
        let mut neighbor_total = 0usize;
        for (_, particle) in particles.iter_mut() {
            if particle.is_locked() {
                continue;
            }
            let neighbors: Neighborhood<'_> = context.neighbors_of(particle.position());
            active += 1;
            neighbor_total += neighbors.len();

            for (_, behavior) in behaviors.iter_mut() {
                if behavior.is_enabled() {
                    behavior.apply(particle, &neighbors);
                }
            }

            let mut own = std::mem::take(&mut particle.behaviors);
            for behavior in own.iter_mut() {
                if behavior.is_enabled() {
                    behavior.apply(particle, &neighbors);
                }
            }
            // Anything a behavior attached mid-frame goes after the existing ones.
            own.append(&mut particle.behaviors);
            particle.behaviors = own;
        }

        for (_, particle) in particles.iter_mut() {
            if particle.is_locked() {
                particle.clear_force();
            } else {
                particle.damp(settings.friction);
                particle.integrate(dt);
            }
            let position = particle.position();
            for follower in particle.followers() {
                if let Some(slot) = followers.get_mut(*follower) {
                    *slot = position;
                }
            }
        }

        for _ in 0..settings.spring_iterations {
            for (_, spring) in springs.iter_mut() {
                spring.update(particles, dt);
            }
        }

        for (_, group) in groups.iter_mut() {
            group.update(particles, dt);
        }

        stats.frame += 1;
        stats.particles = particles.len();
        stats.active = active;
        stats.average_neighbors = if active > 0 {
            neighbor_total as f32 / active as f32
        } else {
            0.0
        };
        trace!(
            "Frame {}: {} particles, {} active, {:.1} neighbors on average",
            stats.frame,
            stats.particles,
            stats.active,
            stats.average_neighbors
        );
    }
}

impl std::fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("settings", &self.settings)
            .field("particles", &self.particles.len())
            .field("constraints", &self.constraints.len())
            .field("behaviors", &self.behaviors.len())
            .field("springs", &self.springs.len())
            .field("groups", &self.groups.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::behavior::{BehaviorSettings, ParticleView};
    use crate::impl_behavior_base;

    fn world(settings: WorldSettings) -> PhysicsWorld {
        PhysicsWorld::new(settings).unwrap()
    }

    fn frictionless() -> WorldSettings {
        WorldSettings {
            friction: 0.0,
            ..WorldSettings::default()
        }
    }

    struct Constant {
        settings: BehaviorSettings,
        force: Vec3,
    }

    impl_behavior_base!(Constant, "constant");

    impl Behavior for Constant {
        fn apply(&mut self, particle: &mut Particle, _neighbors: &Neighborhood<'_>) {
            particle.add_force(self.settings.weighted(self.force));
        }
    }

    fn constant(force: Vec3) -> Box<dyn Behavior> {
        Box::new(Constant {
            settings: BehaviorSettings::default(),
            force,
        })
    }

    /// Records what every particle saw of its neighbors.
    struct Observer {
        settings: BehaviorSettings,
        seen: Vec<Vec<ParticleView>>,
    }

    impl_behavior_base!(Observer, "observer");

    impl Behavior for Observer {
        fn apply(&mut self, particle: &mut Particle, neighbors: &Neighborhood<'_>) {
            self.seen.push(neighbors.iter().copied().collect());
            // Move the particle mid-frame; later particles must not notice.
            particle.translate(Vec3::new(1000.0, 0.0, 0.0));
        }
    }

    struct CountingSpring {
        ends: (ParticleHandle, ParticleHandle),
        calls: Arc<AtomicUsize>,
    }

    impl Spring for CountingSpring {
        fn endpoints(&self) -> (ParticleHandle, ParticleHandle) {
            self.ends
        }

        fn update(&mut self, _particles: &mut ParticleSet, _dt: f32) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spring(a: ParticleHandle, b: ParticleHandle, calls: &Arc<AtomicUsize>) -> Box<dyn Spring> {
        Box::new(CountingSpring {
            ends: (a, b),
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn rejects_invalid_settings() {
        for settings in [
            WorldSettings { friction: 1.5, ..WorldSettings::default() },
            WorldSettings { friction: -0.1, ..WorldSettings::default() },
            WorldSettings { cell_size: 0.0, ..WorldSettings::default() },
            WorldSettings { dedup_tolerance: -1.0, ..WorldSettings::default() },
        ] {
            assert!(PhysicsWorld::new(settings).is_err());
        }
        let mut w = world(WorldSettings::default());
        assert!(w.set_cell_size(-5.0).is_err());
        assert!(w.set_friction(2.0).is_err());
        assert_eq!(w.settings().friction, DEFAULT_FRICTION);
    }

    #[test]
    fn friction_damps_once_per_step() {
        let mut w = world(WorldSettings::default());
        let h = w.add_particle(Particle::new(Vec3::ZERO).with_velocity(Vec3::X));

        let mut expected_x = 0.0f32;
        for step in 1..=10 {
            w.update(1.0);
            expected_x += 0.05f32.powi(step);
            let p = w.particle(h).unwrap();
            assert!((p.position().x - expected_x).abs() < 1e-6, "step {}", step);
        }
        let speed = w.particle(h).unwrap().velocity().length();
        assert!((speed - 0.05f32.powi(10)).abs() < 1e-12);
    }

    #[test]
    fn resting_particles_stay_put() {
        for scheme in [IntegrationScheme::SemiImplicitEuler, IntegrationScheme::Verlet] {
            let mut w = world(WorldSettings { scheme, ..frictionless() });
            let h = w.add_particle(Particle::new(Vec3::new(4.0, 5.0, 6.0)));
            for dt in [0.5, 1.0, 3.0] {
                w.update(dt);
            }
            assert_eq!(w.particle(h).unwrap().position(), Vec3::new(4.0, 5.0, 6.0));
        }
    }

    #[test]
    fn particles_adopt_world_scheme_and_keep_velocity() {
        let mut w = world(WorldSettings {
            scheme: IntegrationScheme::Verlet,
            ..frictionless()
        });
        let h = w.add_particle(Particle::new(Vec3::ZERO).with_velocity(Vec3::new(2.0, 0.0, 0.0)));
        let p = w.particle(h).unwrap();
        assert_eq!(p.scheme(), IntegrationScheme::Verlet);
        assert_eq!(p.handle(), Some(h));

        w.update(1.0);
        assert!((w.particle(h).unwrap().position().x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut w = world(WorldSettings::default());
        let a = w.add_particle(Particle::new(Vec3::ZERO));
        assert!(w.remove_particle(a));
        assert!(!w.remove_particle(a));
        let b = w.add_particle(Particle::new(Vec3::ONE));

        assert_eq!(a.index(), b.index());
        assert!(!w.has_particle(a));
        assert!(w.particle(a).is_none());
        assert!(w.has_particle(b));
    }

    #[test]
    fn removal_evicts_from_index() {
        let mut w = world(WorldSettings::default());
        let a = w.add_particle(Particle::new(Vec3::new(1.0, 1.0, 0.0)));
        let b = w.add_particle(Particle::new(Vec3::new(2.0, 2.0, 0.0)));
        assert_eq!(w.spatial_index().len(), 2);

        w.remove_particle(a);
        assert_eq!(w.spatial_index().len(), 1);
        assert_eq!(w.neighbors_of(Vec3::ZERO), vec![b]);
    }

    #[test]
    fn candidates_collapse_onto_constraints() {
        let mut w = world(WorldSettings::default());
        let pin = w.add_constraint(Particle::new(Vec3::new(10.0, 10.0, 0.0)));
        assert!(w.particle(pin).unwrap().is_locked());
        assert!(w.has_constraint(pin));

        let same = w.add_particle(Particle::new(Vec3::new(10.05, 9.95, 0.0)));
        assert_eq!(same, pin);
        assert_eq!(w.particle_count(), 1);

        let other = w.add_particle(Particle::new(Vec3::new(10.5, 10.0, 0.0)));
        assert_ne!(other, pin);
        assert_eq!(w.particle_count(), 2);

        assert!(w.remove_constraint(pin));
        assert!(!w.remove_constraint(pin));
        assert!(w.has_particle(pin));
        let fresh = w.add_particle(Particle::new(Vec3::new(10.0, 10.0, 0.0)));
        assert_ne!(fresh, pin);
    }

    #[test]
    fn canonical_lookup_inserts_nothing() {
        let mut w = world(WorldSettings::default());
        assert_eq!(w.canonical(Vec3::ZERO), None);

        let pin = w.add_constraint(Particle::new(Vec3::new(3.0, 4.0, 0.0)));
        w.add_particle(Particle::new(Vec3::new(-20.0, 0.0, 0.0)));
        assert_eq!(w.canonical(Vec3::new(3.05, 4.0, 0.0)), Some(pin));
        assert_eq!(w.canonical(Vec3::new(-20.0, 0.0, 0.0)), None);
        assert_eq!(w.particle_count(), 2);
    }

    #[test]
    fn dedup_tolerance_is_configurable() {
        let mut w = world(WorldSettings {
            dedup_tolerance: 2.0,
            ..WorldSettings::default()
        });
        let pin = w.add_constraint(Particle::new(Vec3::ZERO));
        assert_eq!(w.add_particle(Particle::new(Vec3::new(1.5, -1.5, 0.0))), pin);
    }

    #[test]
    fn locked_particles_hold_still_but_drive_followers() {
        let mut w = world(frictionless());
        let h = w.add_particle(Particle::new(Vec3::new(3.0, 0.0, 0.0)));
        w.particle_mut(h).unwrap().lock();
        w.add_behavior(constant(Vec3::new(5.0, 0.0, 0.0)));
        let follower = w.attach_follower(h).unwrap();

        w.particle_mut(h).unwrap().set_position(Vec3::new(7.0, 0.0, 0.0));
        w.update(1.0);

        let p = w.particle(h).unwrap();
        assert_eq!(p.position(), Vec3::new(7.0, 0.0, 0.0));
        assert_eq!(p.force(), Vec3::ZERO);
        assert_eq!(w.follower(follower), Some(Vec3::new(7.0, 0.0, 0.0)));
    }

    #[test]
    fn followers_mirror_after_integration() {
        let mut w = world(frictionless());
        let h = w.add_particle(Particle::new(Vec3::ZERO).with_velocity(Vec3::new(0.0, 2.0, 0.0)));
        let f = w.create_follower();
        assert_eq!(w.follower(f), Some(Vec3::ZERO));
        assert!(w.particle_mut(h).unwrap().add_follower(f));

        w.update(1.0);
        assert_eq!(w.follower(f), Some(Vec3::new(0.0, 2.0, 0.0)));

        assert!(w.remove_follower(f));
        assert!(w.particle(h).unwrap().followers().is_empty());
        assert_eq!(w.follower(f), None);
    }

    #[test]
    fn behaviors_accumulate_and_skip_when_disabled() {
        let mut w = world(frictionless());
        let h = w.add_particle(Particle::new(Vec3::ZERO));
        w.add_behavior(constant(Vec3::new(1.0, 0.0, 0.0)));
        let second = w.add_behavior(constant(Vec3::new(0.0, 1.0, 0.0)));

        w.update(1.0);
        assert_eq!(w.particle(h).unwrap().velocity(), Vec3::new(1.0, 1.0, 0.0));

        w.behavior_mut::<Constant>(second).unwrap().set_enabled(false);
        w.update(1.0);
        assert_eq!(w.particle(h).unwrap().velocity(), Vec3::new(2.0, 1.0, 0.0));

        assert!(w.remove_behavior(second).is_some());
        assert!(!w.has_behavior(second));
        assert!(w.behavior_mut::<Constant>(second).is_none());
    }

    #[test]
    fn particle_behaviors_run_too() {
        let mut w = world(frictionless());
        let mover = w.add_particle(Particle::new(Vec3::ZERO));
        let idle = w.add_particle(Particle::new(Vec3::new(500.0, 0.0, 0.0)));
        w.particle_mut(mover)
            .unwrap()
            .add_behavior(constant(Vec3::new(0.0, 0.0, 3.0)));

        w.update(1.0);
        assert_eq!(w.particle(mover).unwrap().velocity(), Vec3::new(0.0, 0.0, 3.0));
        assert_eq!(w.particle(idle).unwrap().velocity(), Vec3::ZERO);
        assert_eq!(w.particle(mover).unwrap().behavior_count(), 1);
    }

    #[test]
    fn behaviors_see_start_of_frame_state() {
        let mut w = world(frictionless());
        w.add_particle(Particle::new(Vec3::new(1.0, 1.0, 0.0)));
        w.add_particle(Particle::new(Vec3::new(2.0, 2.0, 0.0)));
        let id = w.add_behavior(Box::new(Observer {
            settings: BehaviorSettings::default(),
            seen: Vec::new(),
        }));

        w.update(1.0);
        let observer = w.behavior_mut::<Observer>(id).unwrap();
        assert_eq!(observer.seen.len(), 2);
        for seen in &observer.seen {
            assert_eq!(seen.len(), 2);
            assert!(seen.iter().all(|v| v.position.x < 10.0));
        }
    }

    #[test]
    fn all_mode_neighbors_everyone() {
        let mut w = world(WorldSettings {
            neighbor_mode: NeighborMode::All,
            cell_size: 1.0,
            ..frictionless()
        });
        w.add_particle(Particle::new(Vec3::ZERO));
        w.add_particle(Particle::new(Vec3::new(500.0, 0.0, 0.0)));
        w.add_particle(Particle::new(Vec3::new(-500.0, 90.0, 0.0)));
        assert!(w.spatial_index().is_empty());

        w.update(1.0);
        assert_eq!(w.stats().average_neighbors, 3.0);

        let mut grid = world(WorldSettings { cell_size: 1.0, ..frictionless() });
        grid.add_particle(Particle::new(Vec3::ZERO));
        grid.add_particle(Particle::new(Vec3::new(500.0, 0.0, 0.0)));
        grid.update(1.0);
        assert_eq!(grid.stats().average_neighbors, 1.0);
        assert_eq!(grid.stats().frame, 1);
    }

    #[test]
    fn springs_relax_iteration_count_times() {
        let mut w = world(WorldSettings {
            spring_iterations: 7,
            ..WorldSettings::default()
        });
        let a = w.add_particle(Particle::new(Vec3::ZERO));
        let b = w.add_particle(Particle::new(Vec3::X));
        let c = w.add_particle(Particle::new(Vec3::Y));
        let calls = Arc::new(AtomicUsize::new(0));
        w.add_spring(spring(a, b, &calls));
        w.add_spring(spring(b, c, &calls));

        w.update(1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 14);

        w.set_spring_iterations(0);
        w.update(1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 14);
    }

    #[test]
    fn duplicate_springs_are_not_added() {
        let mut w = world(WorldSettings::default());
        let a = w.add_particle(Particle::new(Vec3::ZERO));
        let b = w.add_particle(Particle::new(Vec3::X));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = w.add_spring(spring(a, b, &calls));
        let again = w.add_spring(spring(b, a, &calls));
        assert_eq!(first, again);
        assert_eq!(w.spring_count(), 1);
        assert_eq!(w.spring_between(b, a), Some(first));
        assert_eq!(w.connection_count(a), 1);
    }

    #[test]
    fn remove_spring_elements_needs_all_three() {
        let mut w = world(WorldSettings::default());
        let a = w.add_particle(Particle::new(Vec3::ZERO));
        let b = w.add_particle(Particle::new(Vec3::X));
        let c = w.add_particle(Particle::new(Vec3::Y));
        let calls = Arc::new(AtomicUsize::new(0));

        let ab = w.add_spring(spring(a, b, &calls));
        assert!(w.remove_spring_elements(ab));
        assert!(!w.has_spring(ab));
        assert!(!w.has_particle(a) && !w.has_particle(b));

        // One endpoint already gone: the spring and the other endpoint are
        // still removed, but the call reports failure.
        let bc = w.add_spring(spring(b, c, &calls));
        assert!(!w.remove_spring_elements(bc));
        assert!(!w.has_spring(bc));
        assert!(!w.has_particle(c));

        assert!(!w.remove_spring_elements(bc));
    }

    #[test]
    fn groups_update_after_springs() {
        struct Lift;
        impl Group for Lift {
            fn update(&mut self, particles: &mut ParticleSet, _dt: f32) {
                for (_, p) in particles.iter_mut() {
                    p.translate(Vec3::Z);
                }
            }
        }

        let mut w = world(frictionless());
        let h = w.add_particle(Particle::new(Vec3::ZERO));
        let g = w.add_group(Box::new(Lift));
        w.update(1.0);
        assert_eq!(w.particle(h).unwrap().position(), Vec3::Z);

        assert!(w.remove_group(g).is_some());
        assert!(!w.has_group(g));
    }

    #[test]
    fn clear_drops_particles_and_springs_only() {
        let mut w = world(WorldSettings::default());
        let a = w.add_particle(Particle::new(Vec3::ZERO));
        let b = w.add_constraint(Particle::new(Vec3::X));
        let calls = Arc::new(AtomicUsize::new(0));
        w.add_spring(spring(a, b, &calls));
        let behavior = w.add_behavior(constant(Vec3::X));

        w.clear();
        assert_eq!(w.particle_count(), 0);
        assert_eq!(w.spring_count(), 0);
        assert!(!w.has_constraint(b));
        assert!(w.spatial_index().is_empty());
        assert!(w.has_behavior(behavior));
        w.update(1.0);
    }

    #[test]
    fn world_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<PhysicsWorld>();
    }
}
