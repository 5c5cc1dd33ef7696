use std::collections::{HashSet, VecDeque};

use log::debug;
use swarm_core::{
    impl_behavior_base, Behavior, BehaviorSettings, FrameContext, Neighborhood, Particle, ParticleHandle, Vec3,
    VecExt,
};

use crate::steer;

/// Maps the normalized slow-down fraction in `[0, 1]` to a speed fraction.
pub type Easing = Box<dyn Fn(f32) -> f32 + Send + Sync>;

/// Undrained events kept by default; older ones are dropped first.
const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTransition {
    /// Came within `arrive_distance` of the target.
    Arrived,
    /// Left `arrive_distance` after having arrived.
    Departed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekEvent {
    pub particle: ParticleHandle,
    pub transition: SeekTransition,
}

/// Steers toward a target, slowing down over `slow_down_distance` and
/// stopping at `min_distance`.
pub struct Seek {
    settings: BehaviorSettings,
    pub target: Vec3,
    pub max_speed: f32,
    pub max_force: f32,
    pub min_distance: f32,
    pub slow_down_distance: f32,
    easing: Option<Easing>,
    arrive_distance: Option<f32>,
    /// Particles currently inside `arrive_distance`.
    arrived: HashSet<ParticleHandle>,
    events: VecDeque<SeekEvent>,
    event_capacity: usize,
    dropped_events: u64,
}

impl Seek {
    pub fn new(target: Vec3) -> Self {
        Seek {
            settings: BehaviorSettings::default(),
            target,
            max_speed: 3.5,
            max_force: 0.5,
            min_distance: 0.0,
            slow_down_distance: 100.0,
            easing: None,
            arrive_distance: None,
            arrived: HashSet::new(),
            events: VecDeque::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            dropped_events: 0,
        }
    }

    pub fn with_limits(mut self, max_speed: f32, max_force: f32) -> Self {
        self.max_speed = max_speed;
        self.max_force = max_force;
        self
    }

    pub fn with_distances(mut self, min_distance: f32, slow_down_distance: f32) -> Self {
        self.min_distance = min_distance;
        self.slow_down_distance = slow_down_distance;
        self
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = Some(easing);
        self
    }

    /// Turns on arrival signaling; see [`take_events`](Self::take_events).
    pub fn with_arrive_distance(mut self, arrive_distance: f32) -> Self {
        self.arrive_distance = Some(arrive_distance);
        self
    }

    /// Bounds the undrained event queue (1024 by default). Zero keeps no
    /// events at all.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self.events.truncate(capacity);
        self
    }

    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
    }

    /// Drains the arrival transitions recorded since the last call.
    pub fn take_events(&mut self) -> Vec<SeekEvent> {
        self.events.drain(..).collect()
    }

    /// Events queued and not yet taken.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Events discarded because the queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Number of particles currently counted as arrived.
    pub fn arrived_count(&self) -> usize {
        self.arrived.len()
    }

    /// The unweighted steering force for a particle at `position`.
    pub fn force_for(&self, position: Vec3, velocity: Vec3) -> Vec3 {
        let desired = self.target - position;
        let distance = desired.length();
        if distance <= self.min_distance {
            return Vec3::ZERO;
        }

        let speed = if distance < self.min_distance + self.slow_down_distance {
            let k = (distance - self.min_distance) / self.slow_down_distance;
            match &self.easing {
                Some(easing) => self.max_speed * easing(k),
                None => self.max_speed * k,
            }
        } else {
            self.max_speed
        };
        steer(desired.with_length(speed), velocity, self.max_force)
    }

    fn track_arrival(&mut self, particle: &Particle) {
        let (Some(arrive_distance), Some(handle)) = (self.arrive_distance, particle.handle()) else {
            return;
        };
        let inside = particle.distance_squared_to(self.target) < arrive_distance * arrive_distance;
        let transition = match (self.arrived.contains(&handle), inside) {
            (false, true) => {
                self.arrived.insert(handle);
                SeekTransition::Arrived
            }
            (true, false) => {
                self.arrived.remove(&handle);
                SeekTransition::Departed
            }
            _ => return,
        };
        self.push_event(SeekEvent {
            particle: handle,
            transition,
        });
    }

    fn push_event(&mut self, event: SeekEvent) {
        if self.event_capacity == 0 {
            self.dropped_events += 1;
            return;
        }
        if self.events.len() >= self.event_capacity {
            self.events.pop_front();
            self.dropped_events += 1;
            if self.dropped_events == 1 {
                debug!("Seek event queue full ({}), dropping oldest events", self.event_capacity);
            }
        }
        self.events.push_back(event);
    }
}

impl_behavior_base!(Seek, "seek");

impl Behavior for Seek {
    fn prepare(&mut self, context: &FrameContext<'_>) {
        // Forget particles that left the world; their slots may be reused.
        self.arrived.retain(|handle| context.frame.get(*handle).is_some());
    }

    fn apply(&mut self, particle: &mut Particle, _neighbors: &Neighborhood<'_>) {
        self.track_arrival(particle);
        let force = self.force_for(particle.position(), particle.velocity());
        particle.add_force(self.settings.weighted(force));
    }
}
