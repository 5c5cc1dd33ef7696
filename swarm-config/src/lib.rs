use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{fs, io};
use thiserror::Error;

// --- Error Type ---
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

// --- Enums for Choices ---
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntegratorType {
    #[default]
    Euler,
    Verlet,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NeighborModeType {
    #[default]
    Grid,
    All,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerializerType {
    #[default]
    Json,
    Binary,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    #[default]
    Stdio,
    File,
    Null,
}

// --- Configuration Sections ---

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct NeighborConfig {
    #[serde(default)]
    pub mode: NeighborModeType,
    #[serde(default = "default_cell_size")]
    pub cell_size: f32,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            mode: NeighborModeType::default(),
            cell_size: default_cell_size(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct WorldConfig {
    #[serde(default = "default_friction")]
    pub friction: f32,
    #[serde(default = "default_spring_iterations")]
    pub spring_iterations: u32,
    #[serde(default)]
    pub integrator: IntegratorType,
    #[serde(default)]
    pub neighbors: NeighborConfig,
    #[serde(default = "default_dedup_tolerance")]
    pub dedup_tolerance: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            friction: default_friction(),
            spring_iterations: default_spring_iterations(),
            integrator: IntegratorType::default(),
            neighbors: NeighborConfig::default(),
            dedup_tolerance: default_dedup_tolerance(),
        }
    }
}

fn default_framerate() -> u32 { 60 }
fn default_friction() -> f32 { 0.95 }
fn default_spring_iterations() -> u32 { 50 }
fn default_cell_size() -> f32 { 80.0 }
fn default_dedup_tolerance() -> f32 { 0.1 }

/// A batch of particles scattered uniformly inside a box.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SpawnConfig {
    pub count: u32,
    #[serde(default = "default_mass")]
    pub mass: f32,
    #[serde(default = "default_radius")]
    pub radius: f32,
    #[serde(default = "default_spawn_min")]
    pub min: [f32; 3],
    #[serde(default = "default_spawn_max")]
    pub max: [f32; 3],
    /// Initial speed, in a random planar direction.
    #[serde(default)]
    pub speed: f32,
    #[serde(default)]
    pub locked: bool,
}

fn default_mass() -> f32 { 1.0 }
fn default_radius() -> f32 { 1.0 }
fn default_spawn_min() -> [f32; 3] { [-100.0, -100.0, 0.0] }
fn default_spawn_max() -> [f32; 3] { [100.0, 100.0, 0.0] }

/// One entry of the behavior pipeline, in application order.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BehaviorConfig {
    #[serde(flatten)]
    pub kind: BehaviorKind,
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_weight() -> f32 { 1.0 }
fn default_enabled() -> bool { true }

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BehaviorKind {
    Seek {
        target: [f32; 3],
        #[serde(default = "default_seek_speed")]
        max_speed: f32,
        #[serde(default = "default_seek_force")]
        max_force: f32,
        #[serde(default)]
        min_distance: f32,
        #[serde(default = "default_slow_down_distance")]
        slow_down_distance: f32,
        #[serde(default)]
        arrive_distance: Option<f32>,
    },
    SeekRandom {
        min: [f32; 3],
        max: [f32; 3],
        #[serde(default = "default_seek_speed")]
        max_speed: f32,
        #[serde(default = "default_seek_force")]
        max_force: f32,
        #[serde(default = "default_random_min_distance")]
        min_distance: f32,
        #[serde(default)]
        slow_down_distance: f32,
    },
    Avoid {
        target: [f32; 3],
        #[serde(default = "default_avoid_distance")]
        max_distance: f32,
        #[serde(default = "default_seek_speed")]
        max_speed: f32,
        #[serde(default = "default_seek_force")]
        max_force: f32,
    },
    Align {
        #[serde(default = "default_flock_distance")]
        distance: f32,
        #[serde(default = "default_flock_speed")]
        max_speed: f32,
        #[serde(default = "default_flock_force")]
        max_force: f32,
    },
    Cohesion {
        #[serde(default = "default_flock_distance")]
        distance: f32,
        #[serde(default = "default_flock_speed")]
        max_speed: f32,
        #[serde(default = "default_flock_force")]
        max_force: f32,
    },
    Separate {
        #[serde(default = "default_separate_distance")]
        distance: f32,
        #[serde(default = "default_flock_speed")]
        max_speed: f32,
        #[serde(default = "default_flock_force")]
        max_force: f32,
    },
    Collision {
        #[serde(default = "default_collision_force")]
        max_force: f32,
        #[serde(default)]
        offset: f32,
        /// Solve the whole frame up front on the rayon pool.
        #[serde(default)]
        parallel: bool,
        /// Refresh only this many particles per frame, round-robin.
        #[serde(default)]
        batch_size: Option<usize>,
    },
    Wander {
        #[serde(default = "default_one")]
        speed: f32,
        #[serde(default = "default_one")]
        max_change: f32,
        #[serde(default = "default_one")]
        max_force: f32,
    },
    Bounce { min: [f32; 3], max: [f32; 3] },
    Constrain { min: [f32; 3], max: [f32; 3] },
    Wrap { min: [f32; 3], max: [f32; 3] },
}

// Defaults per behavior family
fn default_seek_speed() -> f32 { 3.5 }
fn default_seek_force() -> f32 { 0.5 }
fn default_slow_down_distance() -> f32 { 100.0 }
fn default_random_min_distance() -> f32 { 0.01 }
fn default_avoid_distance() -> f32 { 100.0 }
fn default_flock_distance() -> f32 { 50.0 }
fn default_separate_distance() -> f32 { 25.0 }
fn default_flock_speed() -> f32 { 3.0 }
fn default_flock_force() -> f32 { 0.05 }
fn default_collision_force() -> f32 { 0.2 }
fn default_one() -> f32 { 1.0 }

impl BehaviorKind {
    pub fn name(&self) -> &'static str {
        match self {
            BehaviorKind::Seek { .. } => "seek",
            BehaviorKind::SeekRandom { .. } => "seek_random",
            BehaviorKind::Avoid { .. } => "avoid",
            BehaviorKind::Align { .. } => "align",
            BehaviorKind::Cohesion { .. } => "cohesion",
            BehaviorKind::Separate { .. } => "separate",
            BehaviorKind::Collision { .. } => "collision",
            BehaviorKind::Wander { .. } => "wander",
            BehaviorKind::Bounce { .. } => "bounce",
            BehaviorKind::Constrain { .. } => "constrain",
            BehaviorKind::Wrap { .. } => "wrap",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let name = self.name();
        let non_negative = |field: &str, value: f32| {
            if value >= 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(invalid(format!("{}: {} must be non-negative, got {}", name, field, value)))
            }
        };
        match self {
            BehaviorKind::Seek { max_speed, max_force, min_distance, slow_down_distance, arrive_distance, .. } => {
                non_negative("max_speed", *max_speed)?;
                non_negative("max_force", *max_force)?;
                non_negative("min_distance", *min_distance)?;
                non_negative("slow_down_distance", *slow_down_distance)?;
                if let Some(arrive) = arrive_distance {
                    non_negative("arrive_distance", *arrive)?;
                }
            }
            BehaviorKind::SeekRandom { max_speed, max_force, min_distance, slow_down_distance, .. } => {
                non_negative("max_speed", *max_speed)?;
                non_negative("max_force", *max_force)?;
                non_negative("min_distance", *min_distance)?;
                non_negative("slow_down_distance", *slow_down_distance)?;
            }
            BehaviorKind::Avoid { max_distance, max_speed, max_force, .. } => {
                if !(*max_distance > 0.0) {
                    return Err(invalid(format!("{}: max_distance must be positive", name)));
                }
                non_negative("max_speed", *max_speed)?;
                non_negative("max_force", *max_force)?;
            }
            BehaviorKind::Align { distance, max_speed, max_force }
            | BehaviorKind::Cohesion { distance, max_speed, max_force }
            | BehaviorKind::Separate { distance, max_speed, max_force } => {
                non_negative("distance", *distance)?;
                non_negative("max_speed", *max_speed)?;
                non_negative("max_force", *max_force)?;
            }
            BehaviorKind::Collision { max_force, offset, parallel, batch_size } => {
                non_negative("max_force", *max_force)?;
                match batch_size {
                    Some(0) => return Err(invalid(format!("{}: batch_size cannot be zero", name))),
                    Some(_) if *parallel => {
                        return Err(invalid(format!("{}: batch_size does not apply to the parallel solver", name)));
                    }
                    _ => {}
                }
                if !(0.0..1.0).contains(offset) {
                    return Err(invalid(format!("{}: offset must lie in [0, 1), got {}", name, offset)));
                }
            }
            BehaviorKind::Wander { speed, max_change, max_force } => {
                non_negative("speed", *speed)?;
                non_negative("max_change", *max_change)?;
                non_negative("max_force", *max_force)?;
            }
            BehaviorKind::Bounce { min, max } | BehaviorKind::Constrain { min, max } | BehaviorKind::Wrap { min, max } => {
                check_box(name, min, max)?;
            }
        }
        Ok(())
    }
}

fn check_box(what: &str, min: &[f32; 3], max: &[f32; 3]) -> Result<(), ConfigError> {
    if min.iter().zip(max).all(|(lo, hi)| lo <= hi) {
        Ok(())
    } else {
        Err(invalid(format!("{}: min {:?} exceeds max {:?}", what, min, max)))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct OutputConfig {
    #[serde(default)]
    pub serializer: SerializerType,
    #[serde(default)]
    pub sender: SenderType,
    /// Destination for the `file` sender.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_every_n_frames")]
    pub every_n_frames: u32,
}

fn default_every_n_frames() -> u32 { 1 }

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            serializer: SerializerType::default(),
            sender: SenderType::default(),
            path: None,
            every_n_frames: default_every_n_frames(),
        }
    }
}

// --- Top-Level Config Struct ---

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub spawn: Vec<SpawnConfig>,
    #[serde(default)]
    pub behaviors: Vec<BehaviorConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Parses a JSON document and validates it.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document and validates it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.framerate == 0 {
            return Err(invalid("Framerate cannot be zero."));
        }

        let world = &self.world;
        if !(0.0..=1.0).contains(&world.friction) {
            return Err(invalid(format!("friction must lie in [0, 1], got {}", world.friction)));
        }
        if !(world.neighbors.cell_size > 0.0 && world.neighbors.cell_size.is_finite()) {
            return Err(invalid(format!(
                "cell_size must be positive, got {}",
                world.neighbors.cell_size
            )));
        }
        if !(world.dedup_tolerance >= 0.0) {
            return Err(invalid("dedup_tolerance must be non-negative"));
        }

        for (i, spawn) in self.spawn.iter().enumerate() {
            if !(spawn.mass > 0.0) {
                return Err(invalid(format!("spawn[{}]: mass must be positive, got {}", i, spawn.mass)));
            }
            if !(spawn.radius >= 0.0) {
                return Err(invalid(format!("spawn[{}]: radius must be non-negative, got {}", i, spawn.radius)));
            }
            if !(spawn.speed >= 0.0) {
                return Err(invalid(format!("spawn[{}]: speed must be non-negative", i)));
            }
            check_box(&format!("spawn[{}]", i), &spawn.min, &spawn.max)?;
        }

        for behavior in &self.behaviors {
            behavior.kind.validate()?;
        }

        if self.output.every_n_frames == 0 {
            return Err(invalid("output.every_n_frames cannot be zero."));
        }
        if self.output.sender == SenderType::File && self.output.path.is_none() {
            return Err(invalid("output.path is required for the file sender."));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            framerate: default_framerate(),
            world: WorldConfig::default(),
            spawn: Vec::new(),
            behaviors: Vec::new(),
            output: OutputConfig::default(),
        }
    }
}

// --- Loading Function ---

/// Loads a configuration file. `.toml` files are read as TOML, anything else as JSON.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    debug!("Loading {} config from {}", if is_toml { "TOML" } else { "JSON" }, path.display());
    if is_toml {
        Config::from_toml(&content)
    } else {
        Config::from_json(&content)
    }
}
