use clap::Parser;
use crossbeam_channel::{bounded, Receiver, TrySendError};
use env_logger::Env;
use hdrhistogram::Histogram;
use log::{debug, error, info, warn};
use swarm_config::{load_config, Config, SenderType, SerializerType};
use swarm_transport::{
    BinarySerializer, FileSender, Framing, JsonSerializer, NullSender, Sender, Serializer, Snapshot, StdioSender,
    TransportError,
};

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod scenario;

/// Frames waiting for the writer thread before new ones are dropped.
const OUTPUT_QUEUE: usize = 8;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the simulation configuration file (.json or .toml)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Stop after this many frames instead of running until interrupted
    #[arg(short, long)]
    frames: Option<u64>,

    /// Seed for particle placement and the random behaviors
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    info!("Using configuration from {}", args.config.display());

    let mut scenario = scenario::build_world(&config, args.seed)?;
    info!(
        "World ready: {} particles, {} behaviors",
        scenario.world.particle_count(),
        scenario.world.behavior_count()
    );

    let serializer = create_serializer(&config);
    let sender = create_sender(&config, serializer.framing())?;
    let (tx, rx) = bounded::<Vec<u8>>(OUTPUT_QUEUE);
    let writer = thread::Builder::new()
        .name("snapshot-writer".into())
        .spawn(move || write_snapshots(rx, sender))?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let frame_duration = Duration::from_secs_f64(1.0 / config.framerate as f64);
    // Update durations in microseconds.
    let mut timings = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)?;
    let mut dropped = 0u64;
    let mut arrivals = 0u64;
    let mut frame = 0u64;

    info!("Running simulation at {} FPS...", config.framerate);
    while running.load(Ordering::SeqCst) && args.frames.map_or(true, |limit| frame < limit) {
        let frame_start = Instant::now();

        // Forces and friction are tuned per frame, so a frame is one time unit.
        scenario.world.update(1.0);
        timings.saturating_record(frame_start.elapsed().as_micros() as u64);
        frame += 1;
        arrivals += scenario.drain_seek_events() as u64;

        if frame % u64::from(config.output.every_n_frames) == 0 {
            match serializer.serialize(&Snapshot::capture(&scenario.world)) {
                Ok(data) => match tx.try_send(data) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        debug!("Writer is behind, dropping frame {}", frame);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        error!("Snapshot writer stopped, ending the run");
                        break;
                    }
                },
                Err(e) => error!("Error serializing frame {}: {}", frame, e),
            }
        }

        // --- Frame Rate Control ---
        let elapsed = frame_start.elapsed();
        if elapsed < frame_duration {
            spin_sleep::sleep(frame_duration - elapsed);
        } else if config.framerate > 10 {
            // Only show warning if target framerate is high enough to matter
            warn!("Frame time exceeded budget: {:?} > {:?}", elapsed, frame_duration);
        }
    }

    drop(tx);
    match writer.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Snapshot writer failed: {}", e),
        Err(_) => error!("Snapshot writer panicked"),
    }

    let stats = scenario.world.stats();
    info!(
        "Stopped after {} frames ({} particles, {:.1} neighbors on average)",
        stats.frame, stats.particles, stats.average_neighbors
    );
    if timings.len() > 0 {
        info!(
            "Update time (us): p50 {} p90 {} p99 {} max {} mean {:.1}",
            timings.value_at_quantile(0.5),
            timings.value_at_quantile(0.9),
            timings.value_at_quantile(0.99),
            timings.max(),
            timings.mean()
        );
    }
    if !scenario.signaling_seeks.is_empty() {
        info!("{} seek arrival/departure events", arrivals);
    }
    if dropped > 0 {
        warn!("{} snapshots dropped because the writer fell behind", dropped);
    }
    Ok(())
}

fn write_snapshots(rx: Receiver<Vec<u8>>, mut sender: Box<dyn Sender>) -> Result<(), TransportError> {
    for data in rx {
        sender.send(&data)?;
    }
    sender.flush()
}

fn create_serializer(config: &Config) -> Box<dyn Serializer> {
    match config.output.serializer {
        SerializerType::Json => Box::new(JsonSerializer),
        SerializerType::Binary => Box::new(BinarySerializer),
    }
}

fn create_sender(config: &Config, framing: Framing) -> Result<Box<dyn Sender>, Box<dyn Error>> {
    let sender: Box<dyn Sender> = match config.output.sender {
        SenderType::Stdio => {
            info!("Sending simulation data to standard output");
            Box::new(StdioSender::new(framing))
        }
        SenderType::File => {
            let path = config
                .output
                .path
                .as_deref()
                .ok_or("output.path is required for the file sender")?;
            info!("Writing simulation data to {}", path.display());
            Box::new(FileSender::create(path, framing)?)
        }
        SenderType::Null => Box::new(NullSender::default()),
    };
    Ok(sender)
}
