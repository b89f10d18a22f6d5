// src/converter.rs - Batch conversion of tracked frames into a robot command sequence
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::commands::{CommandSequence, RobotCommand};
use crate::landmarks::{FrameRecord, Handedness};
use crate::mapping::{self, CameraBounds, Workspace};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub target_hand: Handedness,
    pub smoothing_window: usize,
    pub min_movement_mm: f64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            target_hand: Handedness::Right,
            smoothing_window: 3,
            min_movement_mm: 2.0,
        }
    }
}

/// Counters from one conversion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionReport {
    pub frames_seen: usize,
    pub frames_with_target: usize,
    pub malformed_skipped: usize,
    pub raw_commands: usize,
    pub filtered_commands: usize,
}

pub struct Converter {
    workspace: Workspace,
    config: ConverterConfig,
}

impl Converter {
    pub fn new(workspace: Workspace, config: ConverterConfig) -> Self {
        Self { workspace, config }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Map every frame that carries the target hand to one raw command.
    pub fn convert_frames(&self, frames: &[FrameRecord]) -> (Vec<RobotCommand>, ConversionReport) {
        let mut report = ConversionReport {
            frames_seen: frames.len(),
            ..Default::default()
        };
        let mut commands = Vec::new();

        for frame in frames {
            let hand = match frame.hand(self.config.target_hand) {
                None => continue,
                Some(Ok(hand)) => hand,
                Some(Err(e)) => {
                    warn!("Frame {}: {}, skipping", frame.frame_number, e);
                    report.malformed_skipped += 1;
                    continue;
                }
            };
            report.frames_with_target += 1;

            let p = mapping::map_hand(&hand, &self.workspace, &CameraBounds::FULL);
            let gripper = mapping::gripper_state(mapping::is_hand_open(&hand));

            commands.push(RobotCommand {
                frame: Some(frame.frame_number),
                timestamp: Some(frame.timestamp),
                x: mapping::round_mm(p.x),
                y: mapping::round_mm(p.y),
                z: mapping::round_mm(p.z),
                r: 0.0,
                gripper,
                confidence: Some(hand.wrist().visibility.unwrap_or(1.0)),
            });
        }

        report.raw_commands = commands.len();
        (commands, report)
    }

    /// Full pipeline: map, smooth, filter.
    pub fn process(&self, frames: &[FrameRecord]) -> (CommandSequence, ConversionReport) {
        let (raw, mut report) = self.convert_frames(frames);
        let smoothed = smooth_commands(&raw, self.config.smoothing_window);
        let filtered = filter_minimal_movement(&smoothed, self.config.min_movement_mm);
        report.filtered_commands = filtered.len();

        info!(
            "Converted {} frames into {} commands ({} before filtering, {} malformed hands skipped)",
            report.frames_seen, report.filtered_commands, report.raw_commands, report.malformed_skipped
        );

        let sequence = CommandSequence::new(filtered, self.workspace, Some(self.config.target_hand));
        (sequence, report)
    }
}

/// Centered moving average over x, y, z. Gripper and provenance are copied unchanged.
pub fn smooth_commands(commands: &[RobotCommand], window_size: usize) -> Vec<RobotCommand> {
    let half = window_size.max(1) / 2;

    (0..commands.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(commands.len());
            let window = &commands[start..end];

            let sum = window
                .iter()
                .fold(Vector3::zeros(), |acc: Vector3<f64>, c| acc + c.position());
            let avg = sum / window.len() as f64;

            RobotCommand {
                x: mapping::round_mm(avg.x),
                y: mapping::round_mm(avg.y),
                z: mapping::round_mm(avg.z),
                ..commands[i]
            }
        })
        .collect()
}

/// Greedy pass keeping commands that move far enough or change the gripper.
pub fn filter_minimal_movement(commands: &[RobotCommand], min_distance: f64) -> Vec<RobotCommand> {
    let mut filtered: Vec<RobotCommand> = Vec::with_capacity(commands.len());

    for cmd in commands {
        let keep = match filtered.last() {
            None => true,
            Some(last) => {
                exceeds_threshold(&last.position(), &cmd.position(), min_distance)
                    || cmd.gripper != last.gripper
            }
        };
        if keep {
            filtered.push(*cmd);
        } else {
            debug!("Dropping frame {:?}: below movement threshold", cmd.frame);
        }
    }

    filtered
}

/// Movement rule shared by the batch filter and the live gate.
pub fn exceeds_threshold(from: &Vector3<f64>, to: &Vector3<f64>, min_distance: f64) -> bool {
    (to - from).norm() > min_distance
}
