// src/playback.rs - Sequential playback of a command sequence on the arm
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::actuator::{ActuatorError, ArmAdapter, MoveAck, Pose, SAFE_POSE};
use crate::commands::{CommandSequence, PersistError};

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 3.0;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no commands loaded")]
    SequenceEmpty,
    #[error("robot not connected")]
    NotConnected,
    #[error("failed to connect: {0}")]
    Connect(#[source] ActuatorError),
    #[error("homing failed: {0}")]
    HomingFailed(#[source] ActuatorError),
    #[error("command {index} failed: {source}")]
    CommandFailed {
        index: usize,
        #[source]
        source: ActuatorError,
    },
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Disconnected,
    Connected,
    Homing,
    Playing,
    Paused,
    Stopped,
    Faulted,
}

impl EngineState {
    pub fn is_connected(self) -> bool {
        self != EngineState::Disconnected
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStatus {
    pub state: EngineState,
    pub connected: bool,
    pub port: Option<String>,
    pub is_playing: bool,
    pub is_paused: bool,
    pub current_index: usize,
    pub total_commands: usize,
    /// Percent of the sequence already executed.
    pub progress: f64,
    pub last_pose: Option<Pose>,
    pub faulted_at: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackReport {
    pub outcome: PlaybackOutcome,
    pub commands_executed: usize,
    pub loops_completed: usize,
    pub unacknowledged_moves: usize,
}

#[derive(Default)]
struct Shared {
    state: Option<EngineState>,
    port: Option<String>,
    last_pose: Option<Pose>,
    faulted_at: Option<usize>,
}

struct ControlInner {
    playing: AtomicBool,
    paused: AtomicBool,
    stop_requested: AtomicBool,
    current_index: AtomicUsize,
    total: AtomicUsize,
    shared: Mutex<Shared>,
}

/// Cloneable handle for steering a running playback from other threads.
#[derive(Clone)]
pub struct PlaybackControl {
    inner: Arc<ControlInner>,
}

impl PlaybackControl {
    fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                playing: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                current_index: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
                shared: Mutex::new(Shared::default()),
            }),
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pause(&self) -> bool {
        if self.inner.playing.load(Ordering::SeqCst) {
            self.inner.paused.store(true, Ordering::SeqCst);
            info!("Playback pause requested");
            true
        } else {
            false
        }
    }

    pub fn resume(&self) -> bool {
        let was_paused = self.inner.paused.swap(false, Ordering::SeqCst);
        if was_paused {
            info!("Playback resumed");
        }
        was_paused
    }

    /// Ask the loop to stop before the next command.
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.inner.playing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    pub fn current_index(&self) -> usize {
        self.inner.current_index.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> EngineState {
        self.shared().state.unwrap_or(EngineState::Disconnected)
    }

    pub fn last_pose(&self) -> Option<Pose> {
        self.shared().last_pose
    }

    pub fn status(&self) -> PlaybackStatus {
        let shared = self.shared();
        let state = shared.state.unwrap_or(EngineState::Disconnected);
        let current_index = self.current_index();
        let total_commands = self.inner.total.load(Ordering::SeqCst);
        let progress = if total_commands > 0 {
            current_index.min(total_commands) as f64 / total_commands as f64 * 100.0
        } else {
            0.0
        };
        PlaybackStatus {
            state,
            connected: state.is_connected(),
            port: shared.port.clone(),
            is_playing: self.is_playing(),
            is_paused: self.is_paused(),
            current_index,
            total_commands,
            progress,
            last_pose: shared.last_pose,
            faulted_at: shared.faulted_at,
        }
    }

    fn set_state(&self, state: EngineState) {
        let mut shared = self.shared();
        if shared.state != Some(state) {
            debug!("Engine state: {:?} -> {:?}", shared.state, state);
            shared.state = Some(state);
        }
    }

    fn set_pose(&self, pose: Pose) {
        self.shared().last_pose = Some(pose);
    }

    fn set_index(&self, idx: usize) {
        self.inner.current_index.store(idx, Ordering::SeqCst);
    }

    fn begin(&self, total: usize) {
        self.inner.stop_requested.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.current_index.store(0, Ordering::SeqCst);
        self.inner.total.store(total, Ordering::SeqCst);
        self.shared().faulted_at = None;
    }

    fn fault(&self, index: usize) {
        let mut shared = self.shared();
        shared.faulted_at = Some(index);
        shared.state = Some(EngineState::Faulted);
    }

    fn clear_flags(&self) {
        self.inner.playing.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Pacing per command at speed 1.0.
    pub base_unit: Duration,
    pub pause_poll: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            base_unit: Duration::from_millis(100),
            pause_poll: Duration::from_millis(50),
        }
    }
}

/// Clamp a requested speed multiplier to the supported range.
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

pub struct PlaybackEngine {
    arm: ArmAdapter,
    sequence: Option<CommandSequence>,
    control: PlaybackControl,
    config: PlaybackConfig,
}

impl PlaybackEngine {
    pub fn new(arm: ArmAdapter, config: PlaybackConfig) -> Self {
        let control = PlaybackControl::new();
        control.set_state(EngineState::Disconnected);
        Self {
            arm,
            sequence: None,
            control,
            config,
        }
    }

    pub fn control(&self) -> PlaybackControl {
        self.control.clone()
    }

    pub fn state(&self) -> EngineState {
        self.control.state()
    }

    pub fn sequence(&self) -> Option<&CommandSequence> {
        self.sequence.as_ref()
    }

    pub fn connect(&mut self, port: Option<&str>) -> Result<String, PlaybackError> {
        info!("Connecting to robot (port: {})", port.unwrap_or("auto"));
        match self.arm.connect(port) {
            Ok(used) => {
                self.control.shared().port = Some(used.clone());
                self.control.set_state(EngineState::Connected);
                if let Ok(pose) = self.arm.pose() {
                    self.control.set_pose(pose);
                }
                Ok(used)
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                self.control.set_state(EngineState::Disconnected);
                Err(PlaybackError::Connect(e))
            }
        }
    }

    /// Best effort; never fails.
    pub fn disconnect(&mut self) {
        self.control.stop();
        self.control.clear_flags();
        if self.state().is_connected() {
            if let Err(e) = self.arm.close() {
                warn!("Error while closing the arm link: {}", e);
            }
        }
        self.control.shared().port = None;
        self.control.set_state(EngineState::Disconnected);
        info!("Robot disconnected");
    }

    pub fn load(&mut self, sequence: CommandSequence) {
        info!("Loaded {} commands", sequence.len());
        self.control.inner.total.store(sequence.len(), Ordering::SeqCst);
        self.control.set_index(0);
        self.sequence = Some(sequence);
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, PlaybackError> {
        let sequence = CommandSequence::load(path)?;
        let n = sequence.len();
        self.load(sequence);
        Ok(n)
    }

    fn ensure_connected(&self) -> Result<(), PlaybackError> {
        if self.state().is_connected() {
            Ok(())
        } else {
            Err(PlaybackError::NotConnected)
        }
    }

    fn home_inner(&mut self) -> Result<(), PlaybackError> {
        self.control.set_state(EngineState::Homing);
        info!("Homing robot");
        if let Err(e) = self.arm.home() {
            error!("Homing failed: {}", e);
            self.control.set_state(EngineState::Connected);
            return Err(PlaybackError::HomingFailed(e));
        }
        if let Ok(pose) = self.arm.pose() {
            self.control.set_pose(pose);
        }
        Ok(())
    }

    pub fn home(&mut self) -> Result<(), PlaybackError> {
        self.ensure_connected()?;
        self.home_inner()?;
        self.control.set_state(EngineState::Connected);
        Ok(())
    }

    /// Home, then run the loaded sequence to completion, stop or fault.
    pub fn play(&mut self, speed: f64, looping: bool) -> Result<PlaybackReport, PlaybackError> {
        let total = match &self.sequence {
            Some(seq) if !seq.is_empty() => seq.len(),
            _ => return Err(PlaybackError::SequenceEmpty),
        };
        self.ensure_connected()?;

        let speed = clamp_speed(speed);
        let delay = self.config.base_unit.div_f64(speed);
        info!("Starting playback of {} commands at {}x (loop: {})", total, speed, looping);

        self.control.begin(total);
        self.control.inner.playing.store(true, Ordering::SeqCst);
        if let Err(e) = self.home_inner() {
            self.control.clear_flags();
            return Err(e);
        }
        self.control.set_state(EngineState::Playing);

        let result = self.run_loop(total, delay, looping);
        self.control.clear_flags();
        match &result {
            Ok(report) => {
                self.control.set_state(EngineState::Stopped);
                info!(
                    "Playback finished ({:?}): {} commands, {} loops",
                    report.outcome, report.commands_executed, report.loops_completed
                );
            }
            Err(e) => error!("Playback aborted: {}", e),
        }
        result
    }

    fn run_loop(&mut self, total: usize, delay: Duration, looping: bool) -> Result<PlaybackReport, PlaybackError> {
        let mut report = PlaybackReport {
            outcome: PlaybackOutcome::Completed,
            commands_executed: 0,
            loops_completed: 0,
            unacknowledged_moves: 0,
        };
        let mut idx = 0;

        loop {
            if idx >= total {
                if !looping {
                    return Ok(report);
                }
                report.loops_completed += 1;
                debug!("Looping back to the first command");
                idx = 0;
                self.control.set_index(0);
            }

            if self.control.is_paused() {
                info!("Playback paused at command {}", idx);
                self.hold_while_paused();
            }
            if self.control.stop_requested() {
                info!("Playback stopped at command {}", idx);
                report.outcome = PlaybackOutcome::Stopped;
                return Ok(report);
            }

            let Some(cmd) = self.sequence.as_ref().and_then(|s| s.get(idx)).copied() else {
                return Err(PlaybackError::SequenceEmpty);
            };
            let pose = Pose::new(cmd.x, cmd.y, cmd.z, cmd.r);

            match self.arm.move_to(pose) {
                Ok(MoveAck::Confirmed) => {}
                Ok(MoveAck::Paced) => report.unacknowledged_moves += 1,
                Err(source) => return Err(self.fail(idx, source)),
            }
            if let Err(source) = self.arm.grip(cmd.gripper_closed()) {
                return Err(self.fail(idx, source));
            }
            self.control.set_pose(pose);
            report.commands_executed += 1;

            std::thread::sleep(delay);
            idx += 1;
            self.control.set_index(idx);
        }
    }

    /// Sit in `Paused` until resumed or stopped, then go back to `Playing`.
    pub(crate) fn hold_while_paused(&self) {
        self.control.set_state(EngineState::Paused);
        while self.control.is_paused() && !self.control.stop_requested() {
            std::thread::sleep(self.config.pause_poll);
        }
        self.control.set_state(EngineState::Playing);
    }

    fn fail(&mut self, index: usize, source: ActuatorError) -> PlaybackError {
        error!("Command {} failed: {}", index, source);
        self.control.fault(index);
        PlaybackError::CommandFailed { index, source }
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    /// Stop playback and drop everything queued on the device.
    pub fn emergency_stop(&mut self) -> Result<(), PlaybackError> {
        warn!("Emergency stop");
        self.control.stop();
        self.control.clear_flags();
        self.ensure_connected()?;
        self.arm.halt()?;
        self.control.set_state(EngineState::Stopped);
        Ok(())
    }

    pub fn move_to_safe_position(&mut self) -> Result<(), PlaybackError> {
        self.ensure_connected()?;
        info!("Moving to safe position");
        self.arm.move_to(SAFE_POSE)?;
        self.control.set_pose(SAFE_POSE);
        Ok(())
    }

    pub fn status(&self) -> PlaybackStatus {
        self.control.status()
    }

    /// Current pose, the last known one when the arm cannot be read, or the origin.
    pub fn position(&mut self) -> Pose {
        if self.state().is_connected() {
            match self.arm.pose() {
                Ok(pose) => {
                    self.control.set_pose(pose);
                    return pose;
                }
                Err(e) => debug!("Pose read failed, using last known: {}", e),
            }
        }
        self.control.last_pose().unwrap_or_default()
    }

    /// Home for a live session and return the rotation to hold.
    pub fn start_live(&mut self) -> Result<f64, PlaybackError> {
        self.ensure_connected()?;
        self.control.begin(0);
        self.control.inner.playing.store(true, Ordering::SeqCst);
        if let Err(e) = self.home_inner() {
            self.control.clear_flags();
            return Err(e);
        }
        self.control.set_state(EngineState::Playing);
        let r = match self.arm.pose() {
            Ok(pose) => pose.r,
            Err(e) => {
                warn!("Could not read pose after homing, holding r = 0: {}", e);
                0.0
            }
        };
        Ok(r)
    }

    pub fn live_move(&mut self, pose: Pose) -> Result<MoveAck, PlaybackError> {
        self.ensure_connected()?;
        let ack = self.arm.move_to(pose)?;
        self.control.set_pose(pose);
        Ok(ack)
    }

    pub fn live_grip(&mut self, closed: bool) -> Result<(), PlaybackError> {
        self.ensure_connected()?;
        self.arm.grip(closed)?;
        Ok(())
    }

    /// Close a live session; `faulted_at` is the frame that exhausted the retry budget.
    pub fn finish_live(&mut self, faulted_at: Option<usize>) {
        self.control.clear_flags();
        match faulted_at {
            Some(frame) => self.control.fault(frame),
            None => self.control.set_state(EngineState::Stopped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{Actuator, AdapterConfig};
    use crate::commands::RobotCommand;
    use crate::mapping::Workspace;
    use nalgebra::Vector3;

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
    }

    /// Records every call; fails moves whose 0-based count is `fail_move`.
    struct ScriptedArm {
        log: Arc<Mutex<Log>>,
        fail_move: Option<usize>,
        fail_home: bool,
        moves: usize,
        /// Pauses the given control when the gripper command of this 0-based move arrives.
        pause_on_grip: Option<(usize, Arc<Mutex<Option<PlaybackControl>>>)>,
    }

    impl ScriptedArm {
        fn new(log: Arc<Mutex<Log>>) -> Self {
            Self { log, fail_move: None, fail_home: false, moves: 0, pause_on_grip: None }
        }

        fn record(&self, call: String) {
            self.log.lock().unwrap().calls.push(call);
        }
    }

    impl Actuator for ScriptedArm {
        fn connect(&mut self, _port: Option<&str>) -> Result<String, ActuatorError> {
            self.record("connect".into());
            Ok("fake".into())
        }
        fn home(&mut self) -> Result<Option<u64>, ActuatorError> {
            self.record("home".into());
            if self.fail_home {
                return Err(ActuatorError::Protocol("limit switch".into()));
            }
            Ok(None)
        }
        fn wait_for(&mut self, _cmd_id: u64, _timeout: Duration) -> Result<(), ActuatorError> {
            Ok(())
        }
        fn move_to(&mut self, pose: Pose, _wait: bool) -> Result<(), ActuatorError> {
            let n = self.moves;
            self.moves += 1;
            if self.fail_move == Some(n) {
                return Err(ActuatorError::Io(std::io::Error::other("cable pulled")));
            }
            self.record(format!("move {}", pose.x));
            Ok(())
        }
        fn grip(&mut self, closed: bool, _wait: bool) -> Result<(), ActuatorError> {
            self.record(format!("grip {}", closed));
            if let Some((at, slot)) = &self.pause_on_grip {
                if self.moves == at + 1 {
                    if let Some(control) = slot.lock().unwrap().as_ref() {
                        assert!(control.pause());
                    }
                }
            }
            Ok(())
        }
        fn get_pose(&mut self) -> Result<Pose, ActuatorError> {
            Ok(Pose::new(250.0, 0.0, 150.0, 15.0))
        }
        fn halt(&mut self) -> Result<(), ActuatorError> {
            self.record("halt".into());
            Ok(())
        }
        fn close(&mut self) -> Result<(), ActuatorError> {
            Err(ActuatorError::Protocol("already gone".into()))
        }
    }

    fn engine_with(arm: ScriptedArm) -> PlaybackEngine {
        let adapter = ArmAdapter::new(
            Box::new(arm),
            AdapterConfig { home_timeout: Duration::from_millis(10), home_settle: Duration::ZERO },
        );
        PlaybackEngine::new(
            adapter,
            PlaybackConfig { base_unit: Duration::ZERO, pause_poll: Duration::from_millis(1) },
        )
    }

    fn sequence(n: usize) -> CommandSequence {
        let cmds = (0..n)
            .map(|i| RobotCommand::new(Vector3::new(200.0 + i as f64, 0.0, 100.0), 0.0, (i % 2) as u8))
            .collect();
        CommandSequence::new(cmds, Workspace::default(), None)
    }

    fn calls(log: &Arc<Mutex<Log>>) -> Vec<String> {
        log.lock().unwrap().calls.clone()
    }

    #[test]
    fn test_empty_sequence_never_touches_arm() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut engine = engine_with(ScriptedArm::new(log.clone()));

        assert!(matches!(engine.play(1.0, false), Err(PlaybackError::SequenceEmpty)));
        engine.load(sequence(0));
        assert!(matches!(engine.play(1.0, false), Err(PlaybackError::SequenceEmpty)));
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn test_play_requires_connection() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut engine = engine_with(ScriptedArm::new(log.clone()));
        engine.load(sequence(2));
        assert!(matches!(engine.play(1.0, false), Err(PlaybackError::NotConnected)));
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn test_full_run_homes_then_moves_and_grips_in_order() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut engine = engine_with(ScriptedArm::new(log.clone()));
        engine.connect(None).unwrap();
        engine.load(sequence(3));

        let report = engine.play(1.0, false).unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.commands_executed, 3);
        assert_eq!(
            calls(&log),
            vec!["connect", "home", "move 200", "grip false", "move 201", "grip true", "move 202", "grip false"]
        );
        let status = engine.status();
        assert_eq!(status.state, EngineState::Stopped);
        assert_eq!(status.progress, 100.0);
    }

    #[test]
    fn test_move_failure_faults_with_index() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut arm = ScriptedArm::new(log.clone());
        arm.fail_move = Some(2);
        let mut engine = engine_with(arm);
        engine.connect(None).unwrap();
        engine.load(sequence(5));

        match engine.play(1.0, false) {
            Err(PlaybackError::CommandFailed { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected a command failure, got {:?}", other),
        }
        assert_eq!(engine.state(), EngineState::Faulted);
        assert_eq!(engine.status().faulted_at, Some(2));

        // a later play from Faulted re-homes and runs from the start
        let report = engine.play(1.0, false).unwrap();
        assert_eq!(report.commands_executed, 5);
        assert_eq!(calls(&log).iter().filter(|c| *c == "home").count(), 2);
        assert_eq!(engine.status().faulted_at, None);
    }

    #[test]
    fn test_pause_during_last_command_still_completes() {
        let log = Arc::new(Mutex::new(Log::default()));
        let slot = Arc::new(Mutex::new(None));
        let mut arm = ScriptedArm::new(log.clone());
        arm.pause_on_grip = Some((2, slot.clone()));
        let mut engine = engine_with(arm);
        *slot.lock().unwrap() = Some(engine.control());
        engine.connect(None).unwrap();
        engine.load(sequence(3));

        let (tx, rx) = std::sync::mpsc::channel();
        let control = engine.control();
        std::thread::spawn(move || {
            let report = engine.play(1.0, false);
            let _ = tx.send((report.map(|r| r.outcome).ok(), engine.state()));
        });

        let finished = rx.recv_timeout(Duration::from_secs(2));
        control.resume();
        let (outcome, state) = finished.expect("playback waited for a resume with nothing left to run");
        assert_eq!(outcome, Some(PlaybackOutcome::Completed));
        assert_eq!(state, EngineState::Stopped);
        assert!(!control.is_paused());
    }

    #[test]
    fn test_homing_failure_returns_to_connected() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut arm = ScriptedArm::new(log.clone());
        arm.fail_home = true;
        let mut engine = engine_with(arm);
        engine.connect(None).unwrap();
        engine.load(sequence(2));

        assert!(matches!(engine.play(1.0, false), Err(PlaybackError::HomingFailed(_))));
        assert_eq!(engine.state(), EngineState::Connected);
        assert!(!calls(&log).iter().any(|c| c.starts_with("move")));
    }

    #[test]
    fn test_disconnect_never_fails() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut engine = engine_with(ScriptedArm::new(log));
        engine.connect(None).unwrap();
        engine.disconnect();
        assert_eq!(engine.state(), EngineState::Disconnected);
        engine.disconnect();
        assert!(engine.status().port.is_none());
    }

    #[test]
    fn test_speed_is_clamped() {
        assert_eq!(clamp_speed(0.0), MIN_SPEED);
        assert_eq!(clamp_speed(10.0), MAX_SPEED);
        assert_eq!(clamp_speed(1.5), 1.5);
        assert_eq!(clamp_speed(f64::NAN), 1.0);
    }

    #[test]
    fn test_position_falls_back_to_last_known() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut engine = engine_with(ScriptedArm::new(log));
        assert_eq!(engine.position(), Pose::default());
        engine.connect(None).unwrap();
        assert_eq!(engine.position().r, 15.0);
        engine.disconnect();
        assert_eq!(engine.position().r, 15.0);
    }

    #[test]
    fn test_emergency_stop_halts_queue() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut engine = engine_with(ScriptedArm::new(log.clone()));
        assert!(matches!(engine.emergency_stop(), Err(PlaybackError::NotConnected)));
        engine.connect(None).unwrap();
        engine.emergency_stop().unwrap();
        assert!(calls(&log).contains(&"halt".to_string()));
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
