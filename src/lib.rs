// src/lib.rs - Hand landmarks to robot arm commands, and their playback
pub mod actuator;
pub mod commands;
pub mod config;
pub mod converter;
pub mod landmarks;
pub mod live;
pub mod mapping;
pub mod mediapipe_bridge;
pub mod playback;
pub mod service;
pub mod tracking;
pub mod video;

pub use actuator::{Actuator, ActuatorError, ArmAdapter, Pose};
pub use commands::{CommandSequence, RobotCommand};
pub use converter::Converter;
pub use playback::{EngineState, PlaybackEngine, PlaybackError};
