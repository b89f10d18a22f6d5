// src/actuator/mod.rs - Arm interface, the call-shape adapter and a simulated arm
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod dobot;

pub use dobot::DobotArm;

/// Cartesian pose of the end effector: mm and degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, z: f64, r: f64) -> Self {
        Self { x, y, z, r }
    }
}

/// Center of the default workspace, lifted.
pub const SAFE_POSE: Pose = Pose::new(250.0, 0.0, 200.0, 0.0);

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("arm not connected")]
    NotConnected,
    #[error("no arm found: {0}")]
    NoDevice(String),
    #[error("call shape not supported: {0}")]
    Unsupported(&'static str),
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Raw driver surface. Drivers may reject the waiting call shape with
/// [`ActuatorError::Unsupported`]; [`ArmAdapter`] handles the retry.
pub trait Actuator: Send {
    /// Open the link; returns the port actually used.
    fn connect(&mut self, port: Option<&str>) -> Result<String, ActuatorError>;
    /// Start homing. Returns a queued command id when the device reports one.
    fn home(&mut self) -> Result<Option<u64>, ActuatorError>;
    fn wait_for(&mut self, cmd_id: u64, timeout: Duration) -> Result<(), ActuatorError>;
    fn move_to(&mut self, pose: Pose, wait: bool) -> Result<(), ActuatorError>;
    fn grip(&mut self, closed: bool, wait: bool) -> Result<(), ActuatorError>;
    fn get_pose(&mut self) -> Result<Pose, ActuatorError>;
    /// Abort whatever is queued on the device.
    fn halt(&mut self) -> Result<(), ActuatorError>;
    fn close(&mut self) -> Result<(), ActuatorError>;
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub home_timeout: Duration,
    /// Fixed wait when the device gives no way to observe homing.
    pub home_settle: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            home_timeout: Duration::from_secs(30),
            home_settle: Duration::from_secs(3),
        }
    }
}

/// How a move completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveAck {
    /// The device confirmed completion.
    Confirmed,
    /// Sent without confirmation; the caller's pacing covers the motion.
    Paced,
}

/// Single place where device quirks are absorbed.
pub struct ArmAdapter {
    arm: Box<dyn Actuator>,
    config: AdapterConfig,
    waits_supported: bool,
}

impl ArmAdapter {
    pub fn new(arm: Box<dyn Actuator>, config: AdapterConfig) -> Self {
        Self { arm, config, waits_supported: true }
    }

    pub fn connect(&mut self, port: Option<&str>) -> Result<String, ActuatorError> {
        self.waits_supported = true;
        self.arm.connect(port)
    }

    /// Home and block until the device reports completion, or settle for a fixed time.
    pub fn home(&mut self) -> Result<(), ActuatorError> {
        match self.arm.home() {
            Ok(Some(cmd_id)) => self.arm.wait_for(cmd_id, self.config.home_timeout),
            Ok(None) | Err(ActuatorError::Unsupported(_)) => {
                debug!("Home gave no command id, settling for {:?}", self.config.home_settle);
                std::thread::sleep(self.config.home_settle);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn move_to(&mut self, pose: Pose) -> Result<MoveAck, ActuatorError> {
        if self.waits_supported {
            match self.arm.move_to(pose, true) {
                Ok(()) => return Ok(MoveAck::Confirmed),
                Err(ActuatorError::Unsupported(what)) => {
                    warn!("Waiting move rejected ({}), falling back to unacknowledged moves", what);
                    self.waits_supported = false;
                }
                Err(e) => return Err(e),
            }
        }
        self.arm.move_to(pose, false)?;
        Ok(MoveAck::Paced)
    }

    /// Grip with the waiting shape first, then the plain one on any failure.
    pub fn grip(&mut self, closed: bool) -> Result<(), ActuatorError> {
        match self.arm.grip(closed, true) {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!("Gripper call failed ({}), retrying without wait", first);
                self.arm.grip(closed, false)
            }
        }
    }

    pub fn pose(&mut self) -> Result<Pose, ActuatorError> {
        self.arm.get_pose()
    }

    pub fn halt(&mut self) -> Result<(), ActuatorError> {
        self.arm.halt()
    }

    pub fn close(&mut self) -> Result<(), ActuatorError> {
        self.arm.close()
    }
}

/// In-process arm used for dry runs.
pub struct SimulatedArm {
    connected: bool,
    pose: Pose,
    gripper_closed: bool,
    acknowledges: bool,
    next_cmd: u64,
    home_pose: Pose,
}

impl SimulatedArm {
    pub fn new() -> Self {
        Self {
            connected: false,
            pose: Pose::default(),
            gripper_closed: false,
            acknowledges: true,
            next_cmd: 0,
            home_pose: SAFE_POSE,
        }
    }

    /// Arm that only accepts fire-and-forget calls.
    pub fn without_acknowledgment() -> Self {
        Self { acknowledges: false, ..Self::new() }
    }

    pub fn gripper_closed(&self) -> bool {
        self.gripper_closed
    }

    fn ensure_connected(&self) -> Result<(), ActuatorError> {
        if self.connected {
            Ok(())
        } else {
            Err(ActuatorError::NotConnected)
        }
    }
}

impl Default for SimulatedArm {
    fn default() -> Self {
        Self::new()
    }
}

impl Actuator for SimulatedArm {
    fn connect(&mut self, port: Option<&str>) -> Result<String, ActuatorError> {
        self.connected = true;
        let port = port.unwrap_or("sim://arm").to_string();
        info!("Simulated arm connected on {}", port);
        Ok(port)
    }

    fn home(&mut self) -> Result<Option<u64>, ActuatorError> {
        self.ensure_connected()?;
        self.pose = self.home_pose;
        if self.acknowledges {
            self.next_cmd += 1;
            Ok(Some(self.next_cmd))
        } else {
            Ok(None)
        }
    }

    fn wait_for(&mut self, cmd_id: u64, _timeout: Duration) -> Result<(), ActuatorError> {
        self.ensure_connected()?;
        if cmd_id <= self.next_cmd {
            Ok(())
        } else {
            Err(ActuatorError::Protocol(format!("unknown command id {}", cmd_id)))
        }
    }

    fn move_to(&mut self, pose: Pose, wait: bool) -> Result<(), ActuatorError> {
        self.ensure_connected()?;
        if wait && !self.acknowledges {
            return Err(ActuatorError::Unsupported("move_to with wait"));
        }
        self.pose = pose;
        Ok(())
    }

    fn grip(&mut self, closed: bool, wait: bool) -> Result<(), ActuatorError> {
        self.ensure_connected()?;
        if wait && !self.acknowledges {
            return Err(ActuatorError::Unsupported("grip with wait"));
        }
        self.gripper_closed = closed;
        Ok(())
    }

    fn get_pose(&mut self) -> Result<Pose, ActuatorError> {
        self.ensure_connected()?;
        Ok(self.pose)
    }

    fn halt(&mut self) -> Result<(), ActuatorError> {
        self.ensure_connected()
    }

    fn close(&mut self) -> Result<(), ActuatorError> {
        self.connected = false;
        Ok(())
    }
}
