// src/main.rs
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use hand_to_robot::actuator::{Actuator, ArmAdapter, DobotArm, SimulatedArm};
use hand_to_robot::commands::CommandSequence;
use hand_to_robot::config::AppConfig;
use hand_to_robot::converter::Converter;
use hand_to_robot::landmarks::{Handedness, TrackingRecord};
use hand_to_robot::live::LiveSession;
use hand_to_robot::mediapipe_bridge::MediaPipeBridge;
use hand_to_robot::playback::PlaybackEngine;
use hand_to_robot::service::RobotService;
use hand_to_robot::tracking::{HandTracker, TrackerConfig};
use hand_to_robot::video::{FrameSource, VideoFileReader};

#[derive(Parser, Debug)]
#[command(name = "hand_to_robot", version, about = "Drive a robot arm from hand tracking")]
struct Cli {
    /// JSON settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Track hands in a video and save the landmarks
    Track {
        video: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Turn a tracking file into robot commands
    Convert {
        tracking: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        hand: Option<Handedness>,
        #[arg(long)]
        window: Option<usize>,
        #[arg(long)]
        min_movement: Option<f64>,
        /// Also write a CSV next to the JSON
        #[arg(long)]
        csv: bool,
    },
    /// Export a command file as CSV
    ExportCsv {
        commands: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Play a command file on the arm
    Play {
        commands: PathBuf,
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long = "loop")]
        looping: bool,
        #[command(flatten)]
        arm: ArmArgs,
    },
    /// Follow a hand live from the camera, or from a video with --video
    Live {
        #[arg(long, default_value_t = 0)]
        camera: u32,
        #[arg(long)]
        video: Option<PathBuf>,
        #[arg(long)]
        hand: Option<Handedness>,
        #[command(flatten)]
        arm: ArmArgs,
    },
}

#[derive(clap::Args, Debug)]
struct ArmArgs {
    /// Serial port of the arm; auto-detected when omitted
    #[arg(long)]
    port: Option<String>,
    /// Use the simulated arm
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Cmd::Track { video, output } => track(&config, &video, output),
        Cmd::Convert { tracking, output, hand, window, min_movement, csv } => {
            if let Some(hand) = hand {
                config.converter.target_hand = hand;
            }
            if let Some(window) = window {
                config.converter.smoothing_window = window;
            }
            if let Some(min) = min_movement {
                config.converter.min_movement_mm = min;
            }
            convert(&config, &tracking, output, csv)
        }
        Cmd::ExportCsv { commands, output } => {
            let sequence = CommandSequence::load(&commands)?;
            let output = output.unwrap_or_else(|| commands.with_extension("csv"));
            let path = sequence.export_csv(&output)?;
            println!("Exported {} commands to {}", sequence.len(), path.display());
            Ok(())
        }
        Cmd::Play { commands, speed, looping, arm } => {
            apply_arm_args(&mut config, arm);
            let speed = speed.unwrap_or(config.playback.speed);
            let looping = looping || config.playback.loop_playback;
            play(&config, commands, speed, looping).await
        }
        Cmd::Live { camera, video, hand, arm } => {
            apply_arm_args(&mut config, arm);
            if hand.is_some() {
                config.live.target_hand = hand;
            }
            live(config, camera, video).await
        }
    }
}

fn apply_arm_args(config: &mut AppConfig, arm: ArmArgs) {
    if arm.port.is_some() {
        config.playback.port = arm.port;
    }
    config.playback.simulate |= arm.simulate;
}

fn build_engine(config: &AppConfig) -> PlaybackEngine {
    let arm: Box<dyn Actuator> = if config.playback.simulate {
        info!("Using simulated arm");
        Box::new(SimulatedArm::new())
    } else {
        Box::new(DobotArm::new(config.playback.move_timeout()))
    };
    PlaybackEngine::new(
        ArmAdapter::new(arm, config.playback.adapter_config()),
        config.playback.playback_config(),
    )
}

fn build_tracker(config: &AppConfig, tracker_config: TrackerConfig) -> Result<HandTracker> {
    let bridge = MediaPipeBridge::spawn(&config.detector).context("Hand detector unavailable")?;
    Ok(HandTracker::new(Box::new(bridge), tracker_config))
}

fn track(config: &AppConfig, video: &Path, output: Option<PathBuf>) -> Result<()> {
    let mut reader = VideoFileReader::open(video)?;
    let mut tracker = build_tracker(config, config.tracker.clone())?;
    let (record, summary) = tracker.track_source(&mut reader)?;

    let output = output.unwrap_or_else(|| config.session_path("tracking_data", "json"));
    record.save(&output)?;
    println!(
        "Tracked {} frames ({} with hands) -> {}",
        summary.frames,
        summary.frames_with_hands,
        output.display()
    );
    Ok(())
}

fn convert(config: &AppConfig, tracking: &Path, output: Option<PathBuf>, csv: bool) -> Result<()> {
    let record = TrackingRecord::load(tracking)?;
    let converter = Converter::new(config.workspace, config.converter.clone());
    let (sequence, report) = converter.process(&record.frames);
    if sequence.is_empty() {
        warn!("No {} hand found in {}", config.converter.target_hand.as_str(), tracking.display());
    }

    let output = output.unwrap_or_else(|| config.session_path("robot_commands", "json"));
    sequence.save(&output)?;
    if csv {
        sequence.export_csv(output.with_extension("csv"))?;
    }
    println!(
        "{} frames -> {} commands ({} before filtering) -> {}",
        report.frames_seen,
        report.filtered_commands,
        report.raw_commands,
        output.display()
    );
    Ok(())
}

async fn play(config: &AppConfig, commands: PathBuf, speed: f64, looping: bool) -> Result<()> {
    let service = RobotService::new(build_engine(config), config.workspace);

    let status = service.load_commands(commands).await;
    if !status.success {
        bail!(status.message);
    }
    let status = service.connect(config.playback.port.clone()).await;
    if !status.success {
        bail!(status.message);
    }
    info!("{}", status.message);

    let player = tokio::spawn({
        let service = service.clone();
        async move { service.play(speed, looping).await }
    });
    let stopper = tokio::spawn({
        let service = service.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping playback");
                service.stop();
            }
        }
    });

    let status = player.await?;
    stopper.abort();
    service.disconnect().await;
    if !status.success {
        bail!(status.message);
    }
    println!("{}", status.message);
    Ok(())
}

fn open_live_source(camera: u32, video: Option<PathBuf>) -> Result<Box<dyn FrameSource>> {
    if let Some(path) = video {
        return Ok(Box::new(VideoFileReader::open(path)?));
    }
    #[cfg(feature = "camera")]
    {
        Ok(Box::new(hand_to_robot::video::CameraSource::open(camera)?))
    }
    #[cfg(not(feature = "camera"))]
    {
        bail!("camera {} requested but this build has no camera support; rebuild with --features camera or pass --video", camera)
    }
}

async fn live(config: AppConfig, camera: u32, video: Option<PathBuf>) -> Result<()> {
    let mut engine = build_engine(&config);
    let control = engine.control();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping live control");
            control.stop();
        }
    });

    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut source = open_live_source(camera, video)?;
        let tracker_config = TrackerConfig {
            confidence_threshold: config.live.min_detection_confidence,
            ..config.tracker.clone()
        };
        let mut tracker = build_tracker(&config, tracker_config)?;

        engine.connect(config.playback.port.as_deref())?;
        let result = LiveSession::new(&mut engine, config.workspace, config.live.clone())
            .run(source.as_mut(), &mut tracker);
        engine.disconnect();
        Ok(result?)
    })
    .await??;

    println!(
        "Live session ended: {} frames, {} moves, {} gripper changes",
        report.frames, report.moves_sent, report.grips_sent
    );
    Ok(())
}
