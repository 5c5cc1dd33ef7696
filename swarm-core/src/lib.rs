//! Particle simulation core: particles, integrators, the spatial grid, the
//! behavior interface and the world that drives them.

pub mod behavior;
pub mod entity;
pub mod error;
pub mod math;
pub mod particle;
pub mod spatial;
pub mod spring;
pub mod world;

pub use behavior::{Behavior, BehaviorBase, BehaviorSettings, Frame, FrameContext, Neighborhood, ParticleView};
pub use entity::{Arena, FollowerId, ParticleHandle};
pub use error::PhysicsError;
pub use math::{clamp_dt, Vec3, VecExt};
pub use particle::{IntegrationScheme, Particle, ParticleSet};
pub use spatial::{SpatialIndex, DEFAULT_CELL_SIZE};
pub use spring::{Group, Spring};
pub use world::{BehaviorId, FrameStats, GroupId, NeighborMode, PhysicsWorld, SpringId, WorldSettings};
