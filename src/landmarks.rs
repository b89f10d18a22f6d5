// src/landmarks.rs - Hand landmark model, handedness and the tracking record file
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::commands::PersistError;

/// Number of landmarks in a complete hand skeleton.
pub const LANDMARK_COUNT: usize = 21;

/// MediaPipe hand landmark indices
pub mod index {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_MCP: usize = 5;
    pub const INDEX_PIP: usize = 6;
    pub const INDEX_DIP: usize = 7;
    pub const INDEX_TIP: usize = 8;
    pub const MIDDLE_MCP: usize = 9;
    pub const MIDDLE_PIP: usize = 10;
    pub const MIDDLE_DIP: usize = 11;
    pub const MIDDLE_TIP: usize = 12;
    pub const RING_MCP: usize = 13;
    pub const RING_PIP: usize = 14;
    pub const RING_DIP: usize = 15;
    pub const RING_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_DIP: usize = 19;
    pub const PINKY_TIP: usize = 20;
}

/// One landmark in normalized image space. `z` is the detector's relative depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: u8,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f64>,
}

impl Landmark {
    pub fn new(id: u8, x: f64, y: f64, z: f64) -> Self {
        Self { id, x, y, z, visibility: None }
    }
}

/// Handedness from the viewer's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl std::str::FromStr for Handedness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(format!("unknown hand '{}', expected left or right", other)),
        }
    }
}

/// Label exactly as reported by the hand detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorLabel {
    Left,
    Right,
}

impl DetectorLabel {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "Left" | "left" => Some(Self::Left),
            "Right" | "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// Map the detector's label to the viewer's hand.
///
/// The detector classifies as if looking through the subject's eyes, so on a
/// mirrored feed its "Left" is the hand on the viewer's right and vice versa.
pub fn viewer_handedness(label: DetectorLabel) -> Handedness {
    match label {
        DetectorLabel::Left => Handedness::Right,
        DetectorLabel::Right => Handedness::Left,
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("malformed {hand} hand observation: expected {LANDMARK_COUNT} landmarks, got {count}")]
pub struct MalformedObservation {
    pub hand: &'static str,
    pub count: usize,
}

/// Landmarks of one hand in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct HandObservation {
    pub handedness: Handedness,
    landmarks: Vec<Landmark>,
}

impl HandObservation {
    pub fn new(handedness: Handedness, landmarks: Vec<Landmark>) -> Result<Self, MalformedObservation> {
        if landmarks.len() != LANDMARK_COUNT {
            return Err(MalformedObservation {
                hand: handedness.as_str(),
                count: landmarks.len(),
            });
        }
        Ok(Self { handedness, landmarks })
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn landmark(&self, idx: usize) -> &Landmark {
        &self.landmarks[idx]
    }

    pub fn wrist(&self) -> &Landmark {
        &self.landmarks[index::WRIST]
    }
}

/// One video or camera frame of tracking output.
///
/// Hands are stored as raw landmark lists, so a truncated detection survives a
/// save/load cycle and is rejected later by [`FrameRecord::hand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_number: u64,
    pub timestamp: f64,
    #[serde(default)]
    pub left_hand: Option<Vec<Landmark>>,
    #[serde(default)]
    pub right_hand: Option<Vec<Landmark>>,
}

impl FrameRecord {
    pub fn new(frame_number: u64, fps: f64) -> Self {
        Self {
            frame_number,
            timestamp: frame_timestamp(frame_number, fps),
            left_hand: None,
            right_hand: None,
        }
    }

    pub fn has_hands(&self) -> bool {
        self.left_hand.is_some() || self.right_hand.is_some()
    }

    pub fn set_hand(&mut self, observation: HandObservation) {
        let slot = match observation.handedness {
            Handedness::Left => &mut self.left_hand,
            Handedness::Right => &mut self.right_hand,
        };
        if slot.is_some() {
            debug!(
                "Frame {}: second {} hand replaces the first",
                self.frame_number,
                observation.handedness.as_str()
            );
        }
        *slot = Some(observation.landmarks);
    }

    /// The validated observation for one hand, `None` when absent.
    pub fn hand(&self, hand: Handedness) -> Option<Result<HandObservation, MalformedObservation>> {
        let raw = match hand {
            Handedness::Left => self.left_hand.as_ref(),
            Handedness::Right => self.right_hand.as_ref(),
        }?;
        Some(HandObservation::new(hand, raw.clone()))
    }
}

/// Seconds since the first frame; ~30 fps is assumed when the rate is unknown.
pub fn frame_timestamp(frame_number: u64, fps: f64) -> f64 {
    if fps > 0.0 {
        frame_number as f64 / fps
    } else {
        frame_number as f64 * 0.033
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingMetadata {
    pub total_frames: usize,
    pub processing_timestamp: f64,
    #[serde(default)]
    pub fps: f64,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "MANO-style landmarks with 3D coordinates".to_string()
}

/// Per-frame landmarks of a processed video, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub metadata: TrackingMetadata,
    pub frames: Vec<FrameRecord>,
}

impl TrackingRecord {
    pub fn new(frames: Vec<FrameRecord>, fps: f64) -> Self {
        Self {
            metadata: TrackingMetadata {
                total_frames: frames.len(),
                processing_timestamp: crate::commands::unix_now(),
                fps,
                format: default_format(),
            },
            frames,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        info!("Tracking data saved to: {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PersistError::NotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let record: Self = serde_json::from_reader(reader)?;
        info!("Loaded {} frames from {}", record.frames.len(), path.display());
        Ok(record)
    }
}
