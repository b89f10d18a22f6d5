// src/live.rs - Camera-driven control: per-frame mapping, gating and dispatch
use std::collections::VecDeque;
use std::time::Instant;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::actuator::Pose;
use crate::converter::exceeds_threshold;
use crate::landmarks::{HandObservation, Handedness};
use crate::mapping::{self, CameraBounds, Workspace};
use crate::playback::{PlaybackEngine, PlaybackError};
use crate::tracking::HandTracker;
use crate::video::FrameSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Trailing frames averaged per position.
    pub history: usize,
    pub min_movement_mm: f64,
    /// Minimum time a gripper state is held before it may flip.
    pub gripper_dwell_secs: f64,
    pub camera_bounds: CameraBounds,
    /// `None` follows whichever hand is seen first.
    pub target_hand: Option<Handedness>,
    pub max_consecutive_failures: usize,
    pub min_detection_confidence: f64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            history: 2,
            min_movement_mm: 1.0,
            gripper_dwell_secs: 0.3,
            camera_bounds: CameraBounds::default(),
            target_hand: None,
            max_consecutive_failures: 5,
            min_detection_confidence: 0.7,
        }
    }
}

/// Debounces gripper transitions.
#[derive(Debug, Clone)]
pub struct GripperGate {
    min_dwell: f64,
    closed: Option<bool>,
    changed_at: f64,
}

impl GripperGate {
    pub fn new(min_dwell: f64) -> Self {
        Self {
            min_dwell,
            closed: None,
            changed_at: f64::NEG_INFINITY,
        }
    }

    pub fn state(&self) -> Option<bool> {
        self.closed
    }

    pub fn accepts(&self, closed: bool, now: f64) -> bool {
        match self.closed {
            None => true,
            Some(current) if current == closed => false,
            Some(_) => now - self.changed_at >= self.min_dwell,
        }
    }

    pub fn commit(&mut self, closed: bool, now: f64) {
        self.closed = Some(closed);
        self.changed_at = now;
    }
}

/// What one frame asks the arm to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
    pub position: Vector3<f64>,
    pub move_to: Option<Pose>,
    pub grip: Option<bool>,
}

pub struct LiveController {
    config: LiveConfig,
    workspace: Workspace,
    history: VecDeque<Vector3<f64>>,
    last_sent: Option<Vector3<f64>>,
    gripper: GripperGate,
    rotation: f64,
}

impl LiveController {
    pub fn new(workspace: Workspace, config: LiveConfig) -> Self {
        let gripper = GripperGate::new(config.gripper_dwell_secs);
        Self {
            config,
            workspace,
            history: VecDeque::new(),
            last_sent: None,
            gripper,
            rotation: 0.0,
        }
    }

    pub fn set_rotation(&mut self, r: f64) {
        self.rotation = r;
    }

    fn select<'a>(&self, hands: &'a [HandObservation]) -> Option<&'a HandObservation> {
        match self.config.target_hand {
            Some(target) => hands.iter().find(|h| h.handedness == target),
            None => hands.first(),
        }
    }

    /// Turn one frame's hands into gated proposals. `None` when the target hand is absent.
    pub fn step(&mut self, hands: &[HandObservation], now: f64) -> Option<Proposal> {
        let hand = self.select(hands)?;

        let raw = mapping::map_hand(hand, &self.workspace, &self.config.camera_bounds);
        self.history.push_back(raw);
        while self.history.len() > self.config.history.max(1) {
            self.history.pop_front();
        }
        let position = self.history.iter().sum::<Vector3<f64>>() / self.history.len() as f64;

        let move_to = match self.last_sent {
            Some(last) if !exceeds_threshold(&last, &position, self.config.min_movement_mm) => None,
            _ => Some(Pose::new(position.x, position.y, position.z, self.rotation)),
        };

        let closed = mapping::gripper_state(mapping::is_hand_open(hand)) == 1;
        let grip = self.gripper.accepts(closed, now).then_some(closed);

        Some(Proposal { position, move_to, grip })
    }

    pub fn commit_move(&mut self, position: Vector3<f64>) {
        self.last_sent = Some(position);
    }

    pub fn commit_grip(&mut self, closed: bool, now: f64) {
        self.gripper.commit(closed, now);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveReport {
    pub frames: usize,
    pub frames_with_hand: usize,
    pub moves_sent: usize,
    pub grips_sent: usize,
    pub failed_dispatches: usize,
}

/// Drives the engine from a frame source until stop, exhaustion or fault.
pub struct LiveSession<'a> {
    engine: &'a mut PlaybackEngine,
    controller: LiveController,
    max_consecutive_failures: usize,
}

impl<'a> LiveSession<'a> {
    pub fn new(engine: &'a mut PlaybackEngine, workspace: Workspace, config: LiveConfig) -> Self {
        let max_consecutive_failures = config.max_consecutive_failures.max(1);
        Self {
            engine,
            controller: LiveController::new(workspace, config),
            max_consecutive_failures,
        }
    }

    pub fn run(&mut self, source: &mut dyn FrameSource, tracker: &mut HandTracker) -> Result<LiveReport, PlaybackError> {
        let r = self.engine.start_live()?;
        self.controller.set_rotation(r);
        let control = self.engine.control();
        let start = Instant::now();
        let mut report = LiveReport::default();
        let mut consecutive_failures = 0usize;

        info!("Live control running, holding r = {:.1}", r);
        loop {
            if control.is_paused() {
                info!("Live control paused after {} frames", report.frames);
                self.engine.hold_while_paused();
            }
            if control.stop_requested() {
                info!("Live control stopped");
                break;
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    warn!("Frame capture failed: {:#}", e);
                    break;
                }
            };
            report.frames += 1;

            let hands = match tracker.observe(&frame) {
                Ok(hands) => hands,
                Err(e) => {
                    debug!("Detection failed on frame {}: {:#}", report.frames, e);
                    continue;
                }
            };
            let now = start.elapsed().as_secs_f64();
            let Some(proposal) = self.controller.step(&hands, now) else {
                continue;
            };
            report.frames_with_hand += 1;

            let mut failed = None;
            if let Some(pose) = proposal.move_to {
                match self.engine.live_move(pose) {
                    Ok(_) => {
                        self.controller.commit_move(proposal.position);
                        report.moves_sent += 1;
                    }
                    Err(e) => failed = Some(e),
                }
            }
            if let Some(closed) = proposal.grip {
                match self.engine.live_grip(closed) {
                    Ok(()) => {
                        self.controller.commit_grip(closed, now);
                        report.grips_sent += 1;
                        debug!("Gripper {}", if closed { "closed" } else { "opened" });
                    }
                    Err(e) => failed = failed.or(Some(e)),
                }
            }

            match failed {
                None => consecutive_failures = 0,
                Some(e) => {
                    consecutive_failures += 1;
                    report.failed_dispatches += 1;
                    warn!(
                        "Dispatch failed on frame {} ({}/{}): {}",
                        report.frames, consecutive_failures, self.max_consecutive_failures, e
                    );
                    if consecutive_failures >= self.max_consecutive_failures {
                        let index = report.frames - 1;
                        error!("Too many consecutive failures, faulting live session");
                        self.engine.finish_live(Some(index));
                        return Err(match e {
                            PlaybackError::Actuator(source) => PlaybackError::CommandFailed { index, source },
                            other => other,
                        });
                    }
                }
            }
        }

        self.engine.finish_live(None);
        info!(
            "Live session: {} frames, {} moves, {} gripper changes",
            report.frames, report.moves_sent, report.grips_sent
        );
        Ok(report)
    }
}
