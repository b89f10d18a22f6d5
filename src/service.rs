// src/service.rs - Async facade over the playback engine
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::actuator::Pose;
use crate::mapping::Workspace;
use crate::playback::{PlaybackControl, PlaybackEngine, PlaybackOutcome, PlaybackStatus, MAX_SPEED, MIN_SPEED};

/// Result of a service call, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStatus {
    pub success: bool,
    pub message: String,
}

impl OperationStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub min_speed: f64,
    pub max_speed: f64,
    pub workspace: Workspace,
    pub features: Vec<&'static str>,
    pub supported_file_formats: Vec<&'static str>,
}

/// Cloneable handle; the engine itself lives behind a mutex and is only
/// touched from tokio's blocking pool.
#[derive(Clone)]
pub struct RobotService {
    engine: Arc<Mutex<PlaybackEngine>>,
    control: PlaybackControl,
    workspace: Workspace,
}

impl RobotService {
    pub fn new(engine: PlaybackEngine, workspace: Workspace) -> Self {
        let control = engine.control();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            control,
            workspace,
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&mut PlaybackEngine) -> T + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = engine.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| format!("robot task failed: {}", e))
    }

    pub async fn connect(&self, port: Option<String>) -> OperationStatus {
        match self.blocking(move |e| e.connect(port.as_deref())).await {
            Ok(Ok(port)) => OperationStatus::ok(format!("Connected on {}", port)),
            Ok(Err(e)) => OperationStatus::failed(e.to_string()),
            Err(e) => OperationStatus::failed(e),
        }
    }

    pub async fn disconnect(&self) -> OperationStatus {
        self.control.stop();
        match self.blocking(|e| e.disconnect()).await {
            Ok(()) => OperationStatus::ok("Robot disconnected"),
            Err(e) => {
                warn!("Disconnect task failed: {}", e);
                OperationStatus::ok("Robot disconnected")
            }
        }
    }

    pub async fn home(&self) -> OperationStatus {
        match self.blocking(|e| e.home()).await {
            Ok(Ok(())) => OperationStatus::ok("Robot homed"),
            Ok(Err(e)) => OperationStatus::failed(e.to_string()),
            Err(e) => OperationStatus::failed(e),
        }
    }

    pub async fn load_commands(&self, path: PathBuf) -> OperationStatus {
        let shown = path.display().to_string();
        match self.blocking(move |e| e.load_file(&path)).await {
            Ok(Ok(n)) => OperationStatus::ok(format!("Loaded {} commands from {}", n, shown)),
            Ok(Err(e)) => OperationStatus::failed(e.to_string()),
            Err(e) => OperationStatus::failed(e),
        }
    }

    /// Run the loaded sequence; resolves when playback ends.
    pub async fn play(&self, speed: f64, looping: bool) -> OperationStatus {
        info!("Playback requested at {}x, loop={}", speed, looping);
        match self.blocking(move |e| e.play(speed, looping)).await {
            Ok(Ok(report)) => {
                let verb = match report.outcome {
                    PlaybackOutcome::Completed => "completed",
                    PlaybackOutcome::Stopped => "stopped",
                };
                OperationStatus::ok(format!(
                    "Playback {} after {} commands",
                    verb, report.commands_executed
                ))
            }
            Ok(Err(e)) => {
                error!("Playback failed: {}", e);
                OperationStatus::failed(e.to_string())
            }
            Err(e) => OperationStatus::failed(e),
        }
    }

    pub fn pause(&self) -> OperationStatus {
        if self.control.pause() {
            OperationStatus::ok("Playback paused")
        } else {
            OperationStatus::failed("Nothing is playing")
        }
    }

    pub fn resume(&self) -> OperationStatus {
        if self.control.resume() {
            OperationStatus::ok("Playback resumed")
        } else {
            OperationStatus::failed("Playback is not paused")
        }
    }

    pub fn stop(&self) -> OperationStatus {
        self.control.stop();
        OperationStatus::ok("Stop requested")
    }

    pub async fn emergency_stop(&self) -> OperationStatus {
        self.control.stop();
        match self.blocking(|e| e.emergency_stop()).await {
            Ok(Ok(())) => OperationStatus::ok("Emergency stop executed"),
            Ok(Err(e)) => OperationStatus::failed(e.to_string()),
            Err(e) => OperationStatus::failed(e),
        }
    }

    pub async fn move_to_safe_position(&self) -> OperationStatus {
        match self.blocking(|e| e.move_to_safe_position()).await {
            Ok(Ok(())) => OperationStatus::ok("Moved to safe position"),
            Ok(Err(e)) => OperationStatus::failed(e.to_string()),
            Err(e) => OperationStatus::failed(e),
        }
    }

    /// Never blocks on a running playback.
    pub fn status(&self) -> PlaybackStatus {
        self.control.status()
    }

    /// Live pose when the engine is idle, the last known pose otherwise.
    pub async fn position(&self) -> Pose {
        let engine = self.engine.clone();
        let control = self.control.clone();
        tokio::task::spawn_blocking(move || match engine.try_lock() {
            Ok(mut engine) => engine.position(),
            Err(_) => control.last_pose().unwrap_or_default(),
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Position task failed: {}", e);
            self.control.last_pose().unwrap_or_default()
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            min_speed: MIN_SPEED,
            max_speed: MAX_SPEED,
            workspace: self.workspace,
            features: vec![
                "position_control",
                "gripper_control",
                "smooth_movement",
                "command_playback",
                "live_control",
            ],
            supported_file_formats: vec!["json"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::{self, ThreadId};
    use std::time::Duration;

    use crate::actuator::{Actuator, ActuatorError, AdapterConfig, ArmAdapter, SimulatedArm};
    use crate::commands::{CommandSequence, RobotCommand};
    use crate::playback::{EngineState, PlaybackConfig};
    use nalgebra::Vector3;

    fn service_with(arm: Box<dyn Actuator>, base_unit: Duration) -> RobotService {
        let arm = ArmAdapter::new(
            arm,
            AdapterConfig { home_timeout: Duration::from_millis(10), home_settle: Duration::ZERO },
        );
        let engine = PlaybackEngine::new(arm, PlaybackConfig { base_unit, pause_poll: Duration::from_millis(2) });
        RobotService::new(engine, Workspace::default())
    }

    fn service(base_unit: Duration) -> RobotService {
        service_with(Box::new(SimulatedArm::new()), base_unit)
    }

    /// Arm with switchable hardware faults; records the threads that read its pose.
    #[derive(Default)]
    struct FaultyArm {
        no_device: bool,
        home_fails: bool,
        fail_move_at: Option<usize>,
        moves: usize,
        pose_readers: Arc<Mutex<Vec<ThreadId>>>,
    }

    impl Actuator for FaultyArm {
        fn connect(&mut self, _port: Option<&str>) -> Result<String, ActuatorError> {
            if self.no_device {
                return Err(ActuatorError::NoDevice("no candidate serial ports".into()));
            }
            Ok("fake".into())
        }
        fn home(&mut self) -> Result<Option<u64>, ActuatorError> {
            if self.home_fails {
                return Err(ActuatorError::Timeout(Duration::from_millis(10), "homing"));
            }
            Ok(None)
        }
        fn wait_for(&mut self, _cmd_id: u64, _timeout: Duration) -> Result<(), ActuatorError> {
            Ok(())
        }
        fn move_to(&mut self, _pose: Pose, _wait: bool) -> Result<(), ActuatorError> {
            let n = self.moves;
            self.moves += 1;
            if self.fail_move_at == Some(n) {
                return Err(ActuatorError::Io(std::io::Error::other("write timed out")));
            }
            Ok(())
        }
        fn grip(&mut self, _closed: bool, _wait: bool) -> Result<(), ActuatorError> {
            Ok(())
        }
        fn get_pose(&mut self) -> Result<Pose, ActuatorError> {
            self.pose_readers.lock().unwrap().push(thread::current().id());
            Ok(Pose::new(240.0, 10.0, 130.0, 0.0))
        }
        fn halt(&mut self) -> Result<(), ActuatorError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), ActuatorError> {
            Ok(())
        }
    }

    fn write_sequence(dir: &tempfile::TempDir, n: usize) -> PathBuf {
        let cmds = (0..n)
            .map(|i| RobotCommand::new(Vector3::new(210.0 + i as f64, 0.0, 120.0), 0.0, 1))
            .collect();
        let path = dir.path().join("robot_commands.json");
        CommandSequence::new(cmds, Workspace::default(), None).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_play_without_commands_reports_failure() {
        let svc = service(Duration::ZERO);
        assert!(svc.connect(None).await.success);
        let status = svc.play(1.0, false).await;
        assert!(!status.success);
        assert_eq!(status.message, "no commands loaded");
    }

    #[tokio::test]
    async fn test_load_and_play() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sequence(&dir, 4);
        let svc = service(Duration::ZERO);
        svc.connect(None).await;
        assert!(svc.load_commands(path).await.success);

        let status = svc.play(2.0, false).await;
        assert!(status.success, "{}", status.message);
        assert_eq!(svc.status().state, EngineState::Stopped);
        assert_eq!(svc.position().await.x, 213.0);
    }

    #[tokio::test]
    async fn test_missing_file_reported() {
        let svc = service(Duration::ZERO);
        let status = svc.load_commands(PathBuf::from("/nonexistent/commands.json")).await;
        assert!(!status.success);
    }

    #[tokio::test]
    async fn test_pause_resume_while_playing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sequence(&dir, 20);
        let svc = service(Duration::from_millis(10));
        svc.connect(None).await;
        svc.load_commands(path).await;

        assert!(!svc.pause().success);
        let player = tokio::spawn({
            let svc = svc.clone();
            async move { svc.play(1.0, false).await }
        });

        while svc.status().current_index < 3 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(svc.pause().success);
        while svc.status().state != EngineState::Paused {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let paused_at = svc.status().current_index;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(svc.status().current_index, paused_at);
        // engine is busy, so this falls back to the last pose
        assert_eq!(svc.position().await.x, 210.0 + paused_at as f64 - 1.0);

        assert!(svc.resume().success);
        let status = player.await.unwrap();
        assert!(status.success);
        assert_eq!(svc.status().progress, 100.0);
    }

    #[tokio::test]
    async fn test_connect_failure_reported() {
        let svc = service_with(Box::new(FaultyArm { no_device: true, ..Default::default() }), Duration::ZERO);
        let status = svc.connect(None).await;
        assert!(!status.success);
        assert!(status.message.contains("no arm found"), "{}", status.message);
        assert_eq!(svc.status().state, EngineState::Disconnected);
    }

    #[tokio::test]
    async fn test_home_failure_reported() {
        let svc = service_with(Box::new(FaultyArm { home_fails: true, ..Default::default() }), Duration::ZERO);
        assert!(svc.connect(None).await.success);
        let status = svc.home().await;
        assert!(!status.success);
        assert!(status.message.starts_with("homing failed"), "{}", status.message);
        assert_eq!(svc.status().state, EngineState::Connected);
    }

    #[tokio::test]
    async fn test_play_fault_names_failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sequence(&dir, 6);
        let arm = FaultyArm { fail_move_at: Some(3), ..Default::default() };
        let svc = service_with(Box::new(arm), Duration::ZERO);
        assert!(svc.connect(None).await.success);
        assert!(svc.load_commands(path).await.success);

        let status = svc.play(1.0, false).await;
        assert!(!status.success);
        assert!(status.message.starts_with("command 3 failed"), "{}", status.message);
        let engine_status = svc.status();
        assert_eq!(engine_status.state, EngineState::Faulted);
        assert_eq!(engine_status.faulted_at, Some(3));
    }

    #[tokio::test]
    async fn test_position_read_off_the_async_thread() {
        let readers = Arc::new(Mutex::new(Vec::new()));
        let arm = FaultyArm { pose_readers: readers.clone(), ..Default::default() };
        let svc = service_with(Box::new(arm), Duration::ZERO);
        assert!(svc.connect(None).await.success);
        readers.lock().unwrap().clear();

        assert_eq!(svc.position().await, Pose::new(240.0, 10.0, 130.0, 0.0));
        let readers = readers.lock().unwrap();
        assert_eq!(readers.len(), 1);
        assert_ne!(readers[0], thread::current().id());
    }

    #[test]
    fn test_capabilities_speed_range() {
        let caps = service(Duration::ZERO).capabilities();
        assert_eq!((caps.min_speed, caps.max_speed), (0.1, 3.0));
        assert_eq!(caps.workspace, Workspace::default());
    }
}
