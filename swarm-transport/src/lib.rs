use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use swarm_core::PhysicsWorld;
use thiserror::Error;

// --- Error Type ---
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary serialization failed: {0}")]
    Binary(#[from] bincode::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// --- Snapshot ---

/// State of one particle as handed to a visualizer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ParticleState {
    pub index: u32,
    pub generation: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub radius: f32,
    pub locked: bool,
}

/// Everything a visualizer needs from one frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub frame: u64,
    pub particles: Vec<ParticleState>,
}

impl Snapshot {
    /// Reads particle positions after an `update`. Velocities are the smoothed
    /// display velocities.
    pub fn capture(world: &PhysicsWorld) -> Self {
        let particles = world
            .particles()
            .map(|(handle, particle)| {
                let position = particle.position();
                let velocity = particle.smoothed_velocity();
                ParticleState {
                    index: handle.index(),
                    generation: handle.generation(),
                    x: position.x,
                    y: position.y,
                    z: position.z,
                    vx: velocity.x,
                    vy: velocity.y,
                    vz: velocity.z,
                    radius: particle.radius(),
                    locked: particle.is_locked(),
                }
            })
            .collect();
        Snapshot {
            frame: world.stats().frame,
            particles,
        }
    }
}

// --- Traits ---
/// Turns a snapshot into bytes.
pub trait Serializer: Send + Sync {
    fn serialize(&self, snapshot: &Snapshot) -> Result<Vec<u8>, TransportError>;

    /// How a byte stream of these payloads is delimited.
    fn framing(&self) -> Framing;
}

/// Sends serialized data to a destination.
pub trait Sender: Send {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One payload per line.
    Lines,
    /// Each payload preceded by its length as a little-endian `u32`.
    LengthPrefixed,
}

fn write_framed(out: &mut impl Write, framing: Framing, data: &[u8]) -> io::Result<()> {
    match framing {
        Framing::Lines => {
            out.write_all(data)?;
            out.write_all(b"\n")
        }
        Framing::LengthPrefixed => {
            let len = u32::try_from(data.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload larger than 4 GiB"))?;
            out.write_all(&len.to_le_bytes())?;
            out.write_all(data)
        }
    }
}

// --- Implementations ---

/// Snapshots as compact JSON documents.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, snapshot: &Snapshot) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(snapshot)?)
    }

    fn framing(&self) -> Framing {
        Framing::Lines
    }
}

/// Snapshots in bincode's little-endian fixed-width encoding.
pub struct BinarySerializer;

impl Serializer for BinarySerializer {
    fn serialize(&self, snapshot: &Snapshot) -> Result<Vec<u8>, TransportError> {
        Ok(bincode::serialize(snapshot)?)
    }

    fn framing(&self) -> Framing {
        Framing::LengthPrefixed
    }
}

/// Sends data to standard output.
pub struct StdioSender {
    stdout: io::Stdout,
    framing: Framing,
}

impl StdioSender {
    pub fn new(framing: Framing) -> Self {
        StdioSender {
            stdout: io::stdout(),
            framing,
        }
    }
}

impl Default for StdioSender {
    fn default() -> Self {
        Self::new(Framing::Lines)
    }
}

impl Sender for StdioSender {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut out = self.stdout.lock();
        write_framed(&mut out, self.framing, data)?;
        out.flush()?; // Ensure it's written immediately
        Ok(())
    }
}

/// Appends payloads to a file through a buffer.
pub struct FileSender {
    writer: BufWriter<File>,
    framing: Framing,
}

impl FileSender {
    pub fn create(path: &Path, framing: Framing) -> Result<Self, TransportError> {
        debug!("Writing snapshots to {}", path.display());
        let file = File::create(path)?;
        Ok(FileSender {
            writer: BufWriter::new(file),
            framing,
        })
    }
}

impl Sender for FileSender {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        write_framed(&mut self.writer, self.framing, data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Discards everything, keeping count. Useful for benchmarking the simulation alone.
#[derive(Debug, Default)]
pub struct NullSender {
    pub messages: u64,
    pub bytes: u64,
}

impl Sender for NullSender {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.messages += 1;
        self.bytes += data.len() as u64;
        Ok(())
    }
}
