//! The steering behavior interface and the read-only per-frame views behaviors see.

use std::any::Any;

use glam::Vec3;

use crate::entity::ParticleHandle;
use crate::particle::ParticleSet;
use crate::spatial::SpatialIndex;

/// Shared switches every behavior carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorSettings {
    pub enabled: bool,
    pub weight: f32,
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        BehaviorSettings {
            enabled: true,
            weight: 1.0,
        }
    }
}

impl BehaviorSettings {
    /// Scales a computed force by the weight. A weight of exactly 1 leaves it alone.
    #[inline]
    pub fn weighted(&self, force: Vec3) -> Vec3 {
        if self.weight == 1.0 {
            force
        } else {
            force * self.weight
        }
    }
}

/// Boilerplate half of [`Behavior`]. Implement it with [`impl_behavior_base!`].
pub trait BehaviorBase: Send {
    fn settings(&self) -> &BehaviorSettings;
    fn settings_mut(&mut self) -> &mut BehaviorSettings;
    fn name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Implements [`BehaviorBase`] for a struct with a `settings: BehaviorSettings` field.
#[macro_export]
macro_rules! impl_behavior_base {
    ($t:ty, $name:expr) => {
        impl $crate::behavior::BehaviorBase for $t {
            fn settings(&self) -> &$crate::behavior::BehaviorSettings {
                &self.settings
            }

            fn settings_mut(&mut self) -> &mut $crate::behavior::BehaviorSettings {
                &mut self.settings
            }

            fn name(&self) -> &'static str {
                $name
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
}

/// A force generator composed additively with every other behavior.
///
/// `apply` reads the particle and its neighborhood and adds a force through
/// [`Particle::add_force`](crate::Particle::add_force). It must not depend on
/// what other behaviors added this frame.
pub trait Behavior: BehaviorBase {
    /// Called once per frame, before any `apply`, with every particle's state
    /// as of the start of the frame.
    fn prepare(&mut self, _frame: &FrameContext<'_>) {}

    fn apply(&mut self, particle: &mut crate::Particle, neighbors: &Neighborhood<'_>);

    /// Largest distance at which this behavior looks at neighbors, if any.
    /// The world warns when it exceeds the grid cell size.
    fn interaction_radius(&self) -> Option<f32> {
        None
    }

    fn is_enabled(&self) -> bool {
        self.settings().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.settings_mut().enabled = enabled;
    }

    fn weight(&self) -> f32 {
        self.settings().weight
    }

    fn set_weight(&mut self, weight: f32) {
        self.settings_mut().weight = weight;
    }
}

/// Start-of-frame state of one particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleView {
    pub handle: ParticleHandle,
    pub position: Vec3,
    pub velocity: Vec3,
    pub radius: f32,
    pub collidable: bool,
    pub locked: bool,
}

/// Immutable snapshot of every particle, indexed by arena slot.
///
/// Behaviors read neighbors from here, never from live particles, so no
/// behavior ever sees a position already integrated this frame.
#[derive(Debug, Default, Clone)]
pub struct Frame {
    views: Vec<Option<ParticleView>>,
    live: usize,
}

impl Frame {
    pub fn capture(particles: &ParticleSet) -> Self {
        let mut frame = Frame::default();
        frame.recapture(particles);
        frame
    }

    /// Refills the snapshot, keeping the allocation.
    pub fn recapture(&mut self, particles: &ParticleSet) {
        self.views.clear();
        self.views.resize(particles.slot_count(), None);
        self.live = 0;
        for (handle, particle) in particles.iter() {
            self.views[handle.index() as usize] = Some(ParticleView {
                handle,
                position: particle.position(),
                velocity: particle.velocity(),
                radius: particle.radius(),
                collidable: particle.is_collidable(),
                locked: particle.is_locked(),
            });
            self.live += 1;
        }
    }

    pub fn get(&self, handle: ParticleHandle) -> Option<&ParticleView> {
        self.views
            .get(handle.index() as usize)
            .and_then(Option::as_ref)
            .filter(|view| view.handle == handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticleView> {
        self.views.iter().flatten()
    }

    /// Raw slot table; entry `i` belongs to the live handle with index `i`, if any.
    pub fn slots(&self) -> &[Option<ParticleView>] {
        &self.views
    }

    /// Number of slots, live or not. Useful for sizing per-particle tables.
    pub fn slot_count(&self) -> usize {
        self.views.len()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub(crate) fn clear(&mut self) {
        self.views.clear();
        self.live = 0;
    }
}

/// What [`Behavior::prepare`] gets to look at.
#[derive(Clone, Copy)]
pub struct FrameContext<'a> {
    pub frame: &'a Frame,
    /// The rebuilt grid, or `None` when every particle neighbors every other.
    pub index: Option<&'a SpatialIndex<ParticleHandle>>,
}

impl<'a> FrameContext<'a> {
    /// Neighborhood of a point, resolved exactly as the world resolves it for
    /// particles during `apply`.
    pub fn neighbors_of(&self, position: Vec3) -> Neighborhood<'a> {
        match self.index {
            Some(index) => Neighborhood::listed(self.frame, index.query(position)),
            None => Neighborhood::all(self.frame),
        }
    }
}

enum Members {
    All,
    Listed(Vec<ParticleHandle>),
}

/// The candidate neighbors of one particle for one frame, the particle itself included.
///
/// Candidates come from the 3×3 grid block, so behaviors still filter by
/// their own distance.
pub struct Neighborhood<'a> {
    frame: &'a Frame,
    members: Members,
}

impl<'a> Neighborhood<'a> {
    /// Every particle in the frame.
    pub fn all(frame: &'a Frame) -> Self {
        Neighborhood {
            frame,
            members: Members::All,
        }
    }

    pub fn listed(frame: &'a Frame, handles: Vec<ParticleHandle>) -> Self {
        Neighborhood {
            frame,
            members: Members::Listed(handles),
        }
    }

    /// Neighborhood with nobody in it.
    pub fn empty(frame: &'a Frame) -> Self {
        Self::listed(frame, Vec::new())
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &'a ParticleView> + '_> {
        let frame = self.frame;
        match &self.members {
            Members::All => Box::new(frame.iter()),
            Members::Listed(handles) => Box::new(handles.iter().filter_map(move |h| frame.get(*h))),
        }
    }

    pub fn len(&self) -> usize {
        match &self.members {
            Members::All => self.frame.len(),
            Members::Listed(handles) => handles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame(&self) -> &'a Frame {
        self.frame
    }
}
