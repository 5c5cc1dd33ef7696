//! Particle state and the two integration schemes.

use std::fmt;

use glam::Vec3;
use smallvec::SmallVec;

use crate::behavior::Behavior;
use crate::entity::{Arena, FollowerId, ParticleHandle};
use crate::error::PhysicsError;
use crate::math::{clamp_dt, VecExt};

/// Storage handed to springs and groups: every particle in a world, by handle.
pub type ParticleSet = Arena<ParticleHandle, Particle>;

/// Blend factor of the display-only smoothed velocity.
pub const VELOCITY_SMOOTHING: f32 = 0.05;

/// How a world advances particle positions. Fixed when the world is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationScheme {
    /// `velocity += force·dt/mass; position += velocity`.
    #[default]
    SemiImplicitEuler,
    /// Position-based: velocity is `position - previous`.
    Verlet,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kinematics {
    Euler { velocity: Vec3, smoothed: Vec3 },
    Verlet { previous: Vec3 },
}

impl Kinematics {
    fn at_rest(scheme: IntegrationScheme, position: Vec3) -> Self {
        match scheme {
            IntegrationScheme::SemiImplicitEuler => Kinematics::Euler {
                velocity: Vec3::ZERO,
                smoothed: Vec3::ZERO,
            },
            IntegrationScheme::Verlet => Kinematics::Verlet { previous: position },
        }
    }
}

/// A point mass driven by accumulated forces.
///
/// Particles are built by the caller and handed to
/// [`PhysicsWorld::add_particle`](crate::PhysicsWorld::add_particle), which
/// switches them to the world's integration scheme while keeping their
/// velocity.
pub struct Particle {
    position: Vec3,
    kinematics: Kinematics,
    force: Vec3,
    mass: f32,
    inv_mass: f32,
    radius: f32,
    friction: Option<f32>,
    max_speed: f32,
    locked: bool,
    collidable: bool,
    pub(crate) behaviors: Vec<Box<dyn Behavior>>,
    followers: SmallVec<[FollowerId; 2]>,
    pub(crate) handle: Option<ParticleHandle>,
}

impl Particle {
    /// Unit mass, unit radius, at rest.
    pub fn new(position: Vec3) -> Self {
        Particle {
            position,
            kinematics: Kinematics::at_rest(IntegrationScheme::default(), position),
            force: Vec3::ZERO,
            mass: 1.0,
            inv_mass: 1.0,
            radius: 1.0,
            friction: None,
            max_speed: f32::INFINITY,
            locked: false,
            collidable: true,
            behaviors: Vec::new(),
            followers: SmallVec::new(),
            handle: None,
        }
    }

    /// Builds a particle with explicit mass and radius.
    ///
    /// # Errors
    ///
    /// Returns [`PhysicsError::Configuration`] if `mass` is not strictly
    /// positive or `radius` is negative or non-finite.
    pub fn with_properties(position: Vec3, mass: f32, radius: f32) -> Result<Self, PhysicsError> {
        let mut particle = Particle::new(position);
        particle.set_mass(mass)?;
        particle.set_radius(radius)?;
        Ok(particle)
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.set_velocity(velocity);
        self
    }

    /// Caps the distance travelled per step, under either scheme.
    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.max_speed = max_speed;
        self
    }

    // --- position ---

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Moves the particle. Under Verlet the implied velocity changes with it;
    /// use [`translate`](Self::translate) to keep the velocity.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Shifts the particle by `offset` without changing its velocity.
    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
        if let Kinematics::Verlet { previous } = &mut self.kinematics {
            *previous += offset;
        }
    }

    pub fn distance_squared_to(&self, point: Vec3) -> f32 {
        self.position.distance_squared(point)
    }

    pub fn equals_with_tolerance(&self, point: Vec3, tolerance: f32) -> bool {
        self.position.equals_with_tolerance(point, tolerance)
    }

    pub fn constrain_x(&mut self, min: f32, max: f32) {
        self.position.x = self.position.x.max(min).min(max);
    }

    pub fn constrain_y(&mut self, min: f32, max: f32) {
        self.position.y = self.position.y.max(min).min(max);
    }

    pub fn constrain_z(&mut self, min: f32, max: f32) {
        self.position.z = self.position.z.max(min).min(max);
    }

    // --- velocity ---

    pub fn velocity(&self) -> Vec3 {
        match self.kinematics {
            Kinematics::Euler { velocity, .. } => velocity,
            Kinematics::Verlet { previous } => self.position - previous,
        }
    }

    pub fn set_velocity(&mut self, value: Vec3) {
        match &mut self.kinematics {
            Kinematics::Euler { velocity, .. } => *velocity = value,
            Kinematics::Verlet { previous } => *previous = self.position - value,
        }
    }

    /// Multiplies the velocity by `factor`.
    pub fn scale_velocity(&mut self, factor: f32) {
        let scaled = self.velocity() * factor;
        self.set_velocity(scaled);
    }

    pub fn clear_velocity(&mut self) {
        match &mut self.kinematics {
            Kinematics::Euler { velocity, smoothed } => {
                *velocity = Vec3::ZERO;
                *smoothed = Vec3::ZERO;
            }
            Kinematics::Verlet { previous } => *previous = self.position,
        }
    }

    /// Exponentially smoothed velocity for display. Under Verlet this is the
    /// raw velocity. Never used by the integrator.
    pub fn smoothed_velocity(&self) -> Vec3 {
        match self.kinematics {
            Kinematics::Euler { smoothed, .. } => smoothed,
            Kinematics::Verlet { .. } => self.velocity(),
        }
    }

    pub fn max_speed(&self) -> f32 {
        self.max_speed
    }

    pub fn set_max_speed(&mut self, max_speed: f32) {
        self.max_speed = max_speed;
    }

    pub fn scheme(&self) -> IntegrationScheme {
        match self.kinematics {
            Kinematics::Euler { .. } => IntegrationScheme::SemiImplicitEuler,
            Kinematics::Verlet { .. } => IntegrationScheme::Verlet,
        }
    }

    pub(crate) fn adopt_scheme(&mut self, scheme: IntegrationScheme) {
        if self.scheme() == scheme {
            return;
        }
        let velocity = self.velocity();
        self.kinematics = match scheme {
            IntegrationScheme::SemiImplicitEuler => Kinematics::Euler {
                velocity,
                smoothed: velocity,
            },
            IntegrationScheme::Verlet => Kinematics::Verlet {
                previous: self.position - velocity,
            },
        };
    }

    // --- force ---

    pub fn force(&self) -> Vec3 {
        self.force
    }

    pub fn add_force(&mut self, force: Vec3) -> &mut Self {
        self.force += force;
        self
    }

    pub fn clear_force(&mut self) -> &mut Self {
        self.force = Vec3::ZERO;
        self
    }

    // --- physical properties ---

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn inverse_mass(&self) -> f32 {
        self.inv_mass
    }

    pub fn set_mass(&mut self, mass: f32) -> Result<(), PhysicsError> {
        if !(mass > 0.0 && mass.is_finite()) {
            return Err(PhysicsError::config(format!(
                "mass must be positive and finite, got {}",
                mass
            )));
        }
        self.mass = mass;
        self.inv_mass = 1.0 / mass;
        Ok(())
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f32) -> Result<(), PhysicsError> {
        if !(radius >= 0.0 && radius.is_finite()) {
            return Err(PhysicsError::config(format!(
                "radius must be non-negative and finite, got {}",
                radius
            )));
        }
        self.radius = radius;
        Ok(())
    }

    /// Per-particle damping override; `None` means the world's friction applies.
    pub fn friction(&self) -> Option<f32> {
        self.friction
    }

    pub fn set_friction(&mut self, friction: Option<f32>) -> Result<(), PhysicsError> {
        if let Some(value) = friction {
            if !(0.0..=1.0).contains(&value) {
                return Err(PhysicsError::config(format!(
                    "friction must lie in [0, 1], got {}",
                    value
                )));
            }
        }
        self.friction = friction;
        Ok(())
    }

    /// Whether the Collision behavior pushes other particles away from this one.
    pub fn is_collidable(&self) -> bool {
        self.collidable
    }

    pub fn set_collidable(&mut self, collidable: bool) {
        self.collidable = collidable;
    }

    // --- lock state ---

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Pins the particle: no behaviors, no integration. Followers keep mirroring it.
    pub fn lock(&mut self) -> &mut Self {
        self.locked = true;
        self
    }

    /// Releases the particle at rest.
    pub fn unlock(&mut self) -> &mut Self {
        self.clear_velocity();
        self.locked = false;
        self
    }

    // --- behaviors & followers ---

    /// Adds a behavior applied to this particle only, after the world's behaviors.
    pub fn add_behavior(&mut self, behavior: Box<dyn Behavior>) -> &mut Self {
        self.behaviors.push(behavior);
        self
    }

    pub fn remove_behavior(&mut self, position: usize) -> Option<Box<dyn Behavior>> {
        if position < self.behaviors.len() {
            Some(self.behaviors.remove(position))
        } else {
            None
        }
    }

    pub fn behavior_count(&self) -> usize {
        self.behaviors.len()
    }

    /// Registers a follower slot. Returns `false` if it was already registered.
    pub fn add_follower(&mut self, follower: FollowerId) -> bool {
        if self.followers.contains(&follower) {
            return false;
        }
        self.followers.push(follower);
        true
    }

    pub fn remove_follower(&mut self, follower: FollowerId) -> bool {
        match self.followers.iter().position(|f| *f == follower) {
            Some(position) => {
                self.followers.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn followers(&self) -> &[FollowerId] {
        &self.followers
    }

    /// Handle assigned on admission to a world.
    pub fn handle(&self) -> Option<ParticleHandle> {
        self.handle
    }

    // --- stepping ---

    /// Applies `velocity *= 1 - friction`, using the particle's own friction
    /// when set and `world_friction` otherwise.
    pub fn damp(&mut self, world_friction: f32) {
        let friction = self.friction.unwrap_or(world_friction);
        if friction != 0.0 {
            self.scale_velocity(1.0 - friction);
        }
    }

    /// Advances one step with the accumulated force, then zeroes the force.
    /// Locked particles only drop their force.
    pub fn integrate(&mut self, dt: f32) {
        if self.locked {
            self.force = Vec3::ZERO;
            return;
        }
        let dt = clamp_dt(dt);
        match &mut self.kinematics {
            Kinematics::Euler { velocity, smoothed } => {
                *velocity += self.force * (dt * self.inv_mass);
                if self.max_speed.is_finite() {
                    *velocity = velocity.limit(self.max_speed);
                }
                self.position += *velocity;
                *smoothed = smoothed.lerp(*velocity, VELOCITY_SMOOTHING);
            }
            Kinematics::Verlet { previous } => {
                let mut step = (self.position - *previous) + self.force * (self.inv_mass * dt);
                if self.max_speed.is_finite() {
                    step = step.limit(self.max_speed);
                }
                *previous = self.position;
                self.position += step;
            }
        }
        self.force = Vec3::ZERO;
    }
}

impl fmt::Debug for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("handle", &self.handle)
            .field("position", &self.position)
            .field("velocity", &self.velocity())
            .field("force", &self.force)
            .field("mass", &self.mass)
            .field("radius", &self.radius)
            .field("locked", &self.locked)
            .field("behaviors", &self.behaviors.len())
            .field("followers", &self.followers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn rejects_bad_mass_and_radius() {
        assert!(Particle::with_properties(Vec3::ZERO, -1.0, 1.0).is_err());
        assert!(Particle::with_properties(Vec3::ZERO, 0.0, 1.0).is_err());
        assert!(Particle::with_properties(Vec3::ZERO, 1.0, -0.5).is_err());
        let p = Particle::with_properties(Vec3::ZERO, 4.0, 0.0).unwrap();
        assert_eq!(p.inverse_mass(), 0.25);
    }

    #[test]
    fn at_rest_without_force_stays_put() {
        for scheme in [IntegrationScheme::SemiImplicitEuler, IntegrationScheme::Verlet] {
            let mut p = Particle::new(Vec3::new(3.0, -2.0, 7.0));
            p.adopt_scheme(scheme);
            for dt in [0.0, 0.016, 1.0, 25.0] {
                p.damp(0.0);
                p.integrate(dt);
            }
            assert_eq!(p.position(), Vec3::new(3.0, -2.0, 7.0));
        }
    }

    #[test]
    fn euler_step_follows_formula() {
        let mut p = Particle::with_properties(Vec3::ZERO, 2.0, 1.0)
            .unwrap()
            .with_velocity(Vec3::new(1.0, 0.0, 0.0));
        p.add_force(Vec3::new(0.0, 4.0, 0.0));
        p.integrate(0.5);

        // velocity += (0, 4, 0) * 0.5 / 2
        assert!(approx(p.velocity(), Vec3::new(1.0, 1.0, 0.0)));
        assert!(approx(p.position(), Vec3::new(1.0, 1.0, 0.0)));
        assert_eq!(p.force(), Vec3::ZERO);
    }

    #[test]
    fn euler_clamps_speed_and_dt() {
        let mut p = Particle::new(Vec3::ZERO).with_max_speed(2.0);
        p.add_force(Vec3::new(100.0, 0.0, 0.0));
        p.integrate(10.0);
        assert!((p.velocity().length() - 2.0).abs() < 1e-5);

        let mut q = Particle::new(Vec3::ZERO);
        q.add_force(Vec3::new(3.0, 0.0, 0.0));
        q.integrate(10.0);
        assert!(approx(q.velocity(), Vec3::new(3.0, 0.0, 0.0)));
    }

    #[test]
    fn verlet_clamps_step_to_max_speed() {
        let mut p = Particle::new(Vec3::ZERO).with_max_speed(2.0);
        p.adopt_scheme(IntegrationScheme::Verlet);
        p.add_force(Vec3::new(100.0, 0.0, 0.0));
        p.integrate(1.0);
        assert!(approx(p.position(), Vec3::new(2.0, 0.0, 0.0)));
        assert!(approx(p.velocity(), Vec3::new(2.0, 0.0, 0.0)));

        // Coasting keeps the capped speed.
        p.integrate(1.0);
        assert!(approx(p.position(), Vec3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn smoothed_velocity_trails_actual_velocity() {
        let mut p = Particle::new(Vec3::ZERO).with_velocity(Vec3::new(1.0, 0.0, 0.0));
        p.integrate(1.0);
        assert!(approx(p.smoothed_velocity(), Vec3::new(0.05, 0.0, 0.0)));
        assert!(approx(p.position(), Vec3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn verlet_step_follows_formula() {
        let mut p = Particle::new(Vec3::ZERO).with_velocity(Vec3::new(1.0, 0.0, 0.0));
        p.adopt_scheme(IntegrationScheme::Verlet);
        assert!(approx(p.velocity(), Vec3::new(1.0, 0.0, 0.0)));

        p.add_force(Vec3::new(0.0, 2.0, 0.0));
        p.integrate(0.5);
        assert!(approx(p.position(), Vec3::new(1.0, 1.0, 0.0)));
        assert!(approx(p.velocity(), Vec3::new(1.0, 1.0, 0.0)));
        assert_eq!(p.force(), Vec3::ZERO);
    }

    #[test]
    fn schemes_agree_on_free_flight() {
        let mut euler = Particle::new(Vec3::ZERO).with_velocity(Vec3::new(0.5, -1.0, 2.0));
        let mut verlet = Particle::new(Vec3::ZERO).with_velocity(Vec3::new(0.5, -1.0, 2.0));
        verlet.adopt_scheme(IntegrationScheme::Verlet);
        for _ in 0..20 {
            euler.integrate(1.0);
            verlet.integrate(1.0);
        }
        assert!(approx(euler.position(), verlet.position()));
        assert!(approx(euler.position(), Vec3::new(10.0, -20.0, 40.0)));
    }

    #[test]
    fn damping_uses_override_before_world_friction() {
        let mut p = Particle::new(Vec3::ZERO).with_velocity(Vec3::new(2.0, 0.0, 0.0));
        p.damp(0.5);
        assert!(approx(p.velocity(), Vec3::new(1.0, 0.0, 0.0)));

        p.set_friction(Some(0.0)).unwrap();
        p.damp(0.5);
        assert!(approx(p.velocity(), Vec3::new(1.0, 0.0, 0.0)));

        assert!(p.set_friction(Some(1.5)).is_err());
    }

    #[test]
    fn translate_preserves_verlet_velocity() {
        let mut p = Particle::new(Vec3::ZERO).with_velocity(Vec3::new(1.0, 2.0, 0.0));
        p.adopt_scheme(IntegrationScheme::Verlet);
        p.translate(Vec3::new(100.0, 0.0, 0.0));
        assert!(approx(p.velocity(), Vec3::new(1.0, 2.0, 0.0)));
        assert!(approx(p.position(), Vec3::new(100.0, 0.0, 0.0)));
    }

    #[test]
    fn locked_particle_ignores_force_and_unlock_zeroes_velocity() {
        let mut p = Particle::new(Vec3::ZERO).with_velocity(Vec3::new(1.0, 0.0, 0.0));
        p.lock();
        p.add_force(Vec3::new(5.0, 5.0, 5.0));
        p.integrate(1.0);
        assert_eq!(p.position(), Vec3::ZERO);
        assert_eq!(p.force(), Vec3::ZERO);

        p.unlock();
        assert!(!p.is_locked());
        assert_eq!(p.velocity(), Vec3::ZERO);
    }

    #[test]
    fn followers_have_set_semantics() {
        let mut followers = Arena::<FollowerId, Vec3>::new();
        let a = followers.insert(Vec3::ZERO);
        let b = followers.insert(Vec3::ZERO);

        let mut p = Particle::new(Vec3::ZERO);
        assert!(p.add_follower(a));
        assert!(!p.add_follower(a));
        assert!(p.add_follower(b));
        assert!(p.remove_follower(a));
        assert!(!p.remove_follower(a));
        assert_eq!(p.followers(), &[b]);
    }
}
