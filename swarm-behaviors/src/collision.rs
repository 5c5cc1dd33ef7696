//! Hard-radius repulsion, computed per particle from its neighborhood or read
//! from a table a batch solver filled for the whole frame.

use std::ops::Range;

use log::debug;
use rayon::prelude::*;
use swarm_core::{
    impl_behavior_base, Behavior, BehaviorSettings, FrameContext, Neighborhood, Particle, ParticleHandle,
    ParticleView, Vec3, VecExt,
};

/// Parameters of the collision force law.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionParams {
    /// Fraction by which the pushing particle's own radius is shrunk, in `[0, 1)`.
    pub offset: f32,
    pub max_force: f32,
}

impl Default for CollisionParams {
    fn default() -> Self {
        CollisionParams {
            offset: 0.0,
            max_force: 0.2,
        }
    }
}

/// Repulsion felt by a particle of `radius` at `position` from `neighbors`.
///
/// Every collidable neighbor closer than the summed radii `r` pushes along
/// the line of centers with strength `(r - d) / r`; the pushes are averaged
/// and capped at `max_force`. The particle's own entry (matched by `handle`)
/// is skipped.
pub fn collision_force<'v>(
    params: CollisionParams,
    handle: Option<ParticleHandle>,
    position: Vec3,
    radius: f32,
    neighbors: impl Iterator<Item = &'v ParticleView>,
) -> Vec3 {
    let own_radius = if params.offset == 0.0 {
        radius
    } else {
        radius * (1.0 - params.offset)
    };

    let mut sum = Vec3::ZERO;
    let mut count = 0;
    for view in neighbors {
        if Some(view.handle) == handle || !view.collidable {
            continue;
        }
        let delta = position - view.position;
        let distance_sq = delta.length_squared();
        let r = own_radius + view.radius;
        if distance_sq < r * r {
            sum += delta.with_length((r - distance_sq.sqrt()) / r);
            count += 1;
        }
    }

    if count == 0 {
        Vec3::ZERO
    } else {
        (sum / count as f32).limit(params.max_force)
    }
}

/// Computes collision forces for a whole frame in one go.
///
/// `forces` must end up with one entry per frame slot; entry `i` is the
/// force for the particle whose handle has index `i`.
pub trait BatchCollider: Send {
    fn compute(&mut self, context: &FrameContext<'_>, params: CollisionParams, forces: &mut Vec<Vec3>);
}

/// Batch collider spreading the frame over the rayon thread pool.
///
/// Each chunk of slots is owned by one task, and every task reads the same
/// immutable frame and grid.
#[derive(Debug, Clone)]
pub struct ParallelCollider {
    chunk_size: usize,
}

impl ParallelCollider {
    pub fn new(chunk_size: usize) -> Self {
        ParallelCollider {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for ParallelCollider {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl BatchCollider for ParallelCollider {
    fn compute(&mut self, context: &FrameContext<'_>, params: CollisionParams, forces: &mut Vec<Vec3>) {
        let slots = context.frame.slots();
        forces.clear();
        forces.resize(slots.len(), Vec3::ZERO);

        let chunk_size = self.chunk_size;
        forces
            .par_chunks_mut(chunk_size)
            .enumerate()
            .for_each(|(chunk, out)| {
                let start = chunk * chunk_size;
                for (offset, force) in out.iter_mut().enumerate() {
                    let Some(view) = &slots[start + offset] else {
                        continue;
                    };
                    if view.locked {
                        continue;
                    }
                    let neighbors = context.neighbors_of(view.position);
                    *force = collision_force(params, Some(view.handle), view.position, view.radius, neighbors.iter());
                }
            });
    }
}

enum Source {
    Neighbors,
    /// Caller-supplied table.
    Table,
    Batch(Box<dyn BatchCollider>),
}

/// Round-robin refresh: only slots inside the window recompute their force,
/// everyone else reuses the last one computed for them.
struct Rotation {
    batch_size: usize,
    start: usize,
    next: usize,
    cache: Vec<Option<(ParticleHandle, Vec3)>>,
}

impl Rotation {
    fn new(batch_size: usize) -> Self {
        Rotation {
            batch_size: batch_size.max(1),
            start: 0,
            next: 0,
            cache: Vec::new(),
        }
    }

    fn advance(&mut self, slot_count: usize) {
        self.cache.resize(slot_count, None);
        self.start = if self.next >= slot_count { 0 } else { self.next };
        self.next = self.start + self.batch_size;
        if self.next >= slot_count {
            self.next = 0;
        }
    }

    fn window(&self) -> Range<usize> {
        self.start..self.start + self.batch_size
    }
}

/// Pushes overlapping particles apart.
///
/// By default each particle's force is computed from its neighborhood
/// during `apply`. With a [`BatchCollider`] the whole frame is solved in
/// `prepare` instead, and with [`set_precomputed`](Self::set_precomputed)
/// the forces come straight from the caller.
///
/// [`with_batch_size`](Self::with_batch_size) spreads the neighborhood
/// computation over several frames.
pub struct Collision {
    settings: BehaviorSettings,
    pub params: CollisionParams,
    source: Source,
    table: Vec<Vec3>,
    rotation: Option<Rotation>,
}

impl Collision {
    pub fn new(max_force: f32) -> Self {
        Collision {
            settings: BehaviorSettings::default(),
            params: CollisionParams {
                max_force,
                ..CollisionParams::default()
            },
            source: Source::Neighbors,
            table: Vec::new(),
            rotation: None,
        }
    }

    /// Recomputes only `batch_size` slots per frame, moving the window along
    /// each frame and wrapping at the end. Particles outside the window keep
    /// the force last computed for them; a particle with no force computed
    /// yet gets one right away. Only affects neighborhood computation.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.rotation = Some(Rotation::new(batch_size));
        self
    }

    /// Slots refreshed this frame, when batching.
    pub fn window(&self) -> Option<Range<usize>> {
        self.rotation.as_ref().map(Rotation::window)
    }

    pub fn with_offset(mut self, offset: f32) -> Self {
        self.params.offset = offset;
        self
    }

    pub fn with_batch(mut self, collider: Box<dyn BatchCollider>) -> Self {
        self.source = Source::Batch(collider);
        self
    }

    /// Shorthand for the rayon-backed batch solver.
    pub fn parallel(max_force: f32) -> Self {
        Self::new(max_force).with_batch(Box::new(ParallelCollider::default()))
    }

    /// Uses `forces` (indexed by handle index) instead of computing anything.
    /// Slots missing from the table get no force.
    pub fn set_precomputed(&mut self, forces: Vec<Vec3>) {
        if !matches!(self.source, Source::Table) {
            debug!("Collision switching to a precomputed force table");
        }
        self.source = Source::Table;
        self.table = forces;
    }

    /// Goes back to computing forces from neighborhoods.
    pub fn use_neighbors(&mut self) {
        self.source = Source::Neighbors;
        self.table.clear();
    }

    /// The table `apply` reads from in batch and precomputed modes.
    pub fn precomputed(&self) -> &[Vec3] {
        &self.table
    }

    fn rotated_force(&mut self, particle: &Particle, neighbors: &Neighborhood<'_>) -> Vec3 {
        let params = self.params;
        let compute = || {
            collision_force(params, particle.handle(), particle.position(), particle.radius(), neighbors.iter())
        };
        let (Some(rotation), Some(handle)) = (self.rotation.as_mut(), particle.handle()) else {
            return compute();
        };
        let index = handle.index() as usize;
        let cached = rotation
            .cache
            .get(index)
            .copied()
            .flatten()
            .filter(|(owner, _)| *owner == handle);
        match cached {
            Some((_, force)) if !rotation.window().contains(&index) => force,
            _ => {
                let force = compute();
                if let Some(slot) = rotation.cache.get_mut(index) {
                    *slot = Some((handle, force));
                }
                force
            }
        }
    }

    fn lookup(&self, handle: Option<ParticleHandle>) -> Vec3 {
        handle
            .and_then(|h| self.table.get(h.index() as usize))
            .copied()
            .unwrap_or(Vec3::ZERO)
    }
}

impl_behavior_base!(Collision, "collision");

impl Behavior for Collision {
    fn prepare(&mut self, context: &FrameContext<'_>) {
        if let Source::Batch(collider) = &mut self.source {
            collider.compute(context, self.params, &mut self.table);
        }
        if let Some(rotation) = &mut self.rotation {
            rotation.advance(context.frame.slot_count());
        }
    }

    fn apply(&mut self, particle: &mut Particle, neighbors: &Neighborhood<'_>) {
        let force = match self.source {
            Source::Neighbors => self.rotated_force(particle, neighbors),
            Source::Table | Source::Batch(_) => self.lookup(particle.handle()),
        };
        particle.add_force(self.settings.weighted(force));
    }
}
