//! Axis-aligned box boundaries. These move particles directly instead of
//! adding forces, so they ignore `weight`.

use swarm_core::{impl_behavior_base, Behavior, BehaviorSettings, Neighborhood, Particle, Vec3, VecExt};

fn ordered(min: Vec3, max: Vec3) -> (Vec3, Vec3) {
    (min.min(max), min.max(max))
}

/// Keeps particles in a box by clamping them to the wall they hit and
/// reflecting the velocity component across it.
///
/// A box with `min.z == max.z` is treated as planar: particles are pinned to
/// that z and lose their z velocity.
pub struct Bounce {
    settings: BehaviorSettings,
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounce {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        let (min, max) = ordered(min, max);
        Bounce {
            settings: BehaviorSettings::default(),
            min,
            max,
        }
    }

    fn is_flat(&self) -> bool {
        self.min.z == self.max.z
    }
}

impl_behavior_base!(Bounce, "bounce");

impl Behavior for Bounce {
    fn apply(&mut self, particle: &mut Particle, _neighbors: &Neighborhood<'_>) {
        let mut position = particle.position();
        let mut velocity = particle.velocity();
        let mut changed = false;

        let flat = self.is_flat();
        let axes = if flat { 2 } else { 3 };
        for axis in 0..axes {
            if position[axis] <= self.min[axis] {
                position[axis] = self.min[axis];
                velocity[axis] = velocity[axis].abs();
                changed = true;
            } else if position[axis] >= self.max[axis] {
                position[axis] = self.max[axis];
                velocity[axis] = -velocity[axis].abs();
                changed = true;
            }
        }
        if flat && (position.z != self.max.z || velocity.z != 0.0) {
            position.z = self.max.z;
            velocity.z = 0.0;
            changed = true;
        }

        if changed {
            particle.set_position(position);
            particle.set_velocity(velocity);
        }
    }
}

/// Clamps positions into a box. Velocity is left as it was.
pub struct Constrain {
    settings: BehaviorSettings,
    pub min: Vec3,
    pub max: Vec3,
}

impl Constrain {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        let (min, max) = ordered(min, max);
        Constrain {
            settings: BehaviorSettings::default(),
            min,
            max,
        }
    }
}

impl_behavior_base!(Constrain, "constrain");

impl Behavior for Constrain {
    fn apply(&mut self, particle: &mut Particle, _neighbors: &Neighborhood<'_>) {
        let position = particle.position();
        let clamped = position.constrained(self.min, self.max);
        if clamped != position {
            let velocity = particle.velocity();
            particle.set_position(clamped);
            particle.set_velocity(velocity);
        }
    }
}

/// Toroidal box: leaving through one face re-enters through the opposite one
/// with the same velocity. Axes where `min == max` are left alone.
pub struct Wrap {
    settings: BehaviorSettings,
    pub min: Vec3,
    pub max: Vec3,
}

impl Wrap {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        let (min, max) = ordered(min, max);
        Wrap {
            settings: BehaviorSettings::default(),
            min,
            max,
        }
    }
}

impl_behavior_base!(Wrap, "wrap");

impl Behavior for Wrap {
    fn apply(&mut self, particle: &mut Particle, _neighbors: &Neighborhood<'_>) {
        let position = particle.position();
        let mut wrapped = position;
        for axis in 0..3 {
            if self.min[axis] == self.max[axis] {
                continue;
            }
            if position[axis] > self.max[axis] {
                wrapped[axis] = self.min[axis];
            } else if position[axis] < self.min[axis] {
                wrapped[axis] = self.max[axis];
            }
        }
        if wrapped != position {
            particle.translate(wrapped - position);
        }
    }
}
