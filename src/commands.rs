// src/commands.rs - Robot command sequence, its JSON file and CSV export
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use csv::Writer;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::landmarks::Handedness;
use crate::mapping::Workspace;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Seconds since the Unix epoch, millisecond resolution.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// One playback step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub r: f64,
    /// 0 = open, 1 = closed
    #[serde(default)]
    pub gripper: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl RobotCommand {
    pub fn new(position: Vector3<f64>, r: f64, gripper: u8) -> Self {
        Self {
            frame: None,
            timestamp: None,
            x: position.x,
            y: position.y,
            z: position.z,
            r,
            gripper,
            confidence: None,
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn gripper_closed(&self) -> bool {
        self.gripper != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceMetadata {
    pub total_commands: usize,
    pub workspace: Workspace,
    pub generated_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_hand: Option<Handedness>,
}

/// Ordered commands plus the settings that produced them. Never edited after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSequence {
    metadata: SequenceMetadata,
    commands: Vec<RobotCommand>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandFile {
    Full {
        metadata: SequenceMetadata,
        commands: Vec<RobotCommand>,
    },
    Bare(Vec<RobotCommand>),
}

impl CommandSequence {
    pub fn new(commands: Vec<RobotCommand>, workspace: Workspace, target_hand: Option<Handedness>) -> Self {
        Self {
            metadata: SequenceMetadata {
                total_commands: commands.len(),
                workspace,
                generated_at: unix_now(),
                target_hand,
            },
            commands,
        }
    }

    pub fn metadata(&self) -> &SequenceMetadata {
        &self.metadata
    }

    pub fn commands(&self) -> &[RobotCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&RobotCommand> {
        self.commands.get(idx)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        info!("Robot commands saved to: {}", path.display());
        Ok(())
    }

    /// Load a command file; a bare JSON array gets default metadata.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PersistError::NotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let sequence = match serde_json::from_reader(reader)? {
            CommandFile::Full { metadata, commands } => Self { metadata, commands },
            CommandFile::Bare(commands) => Self::new(commands, Workspace::default(), None),
        };
        info!("Loaded {} commands from {}", sequence.len(), path.display());
        Ok(sequence)
    }

    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<PathBuf, PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = Writer::from_writer(File::create(path)?);
        for cmd in &self.commands {
            writer.serialize(CsvRecord::from(cmd))?;
        }
        writer.flush()?;
        info!("Exported {} commands to {}", self.len(), path.display());
        Ok(path.to_path_buf())
    }
}

#[derive(Debug, Serialize)]
struct CsvRecord {
    frame: Option<u64>,
    timestamp: Option<f64>,
    x: f64,
    y: f64,
    z: f64,
    r: f64,
    gripper: u8,
    confidence: Option<f64>,
}

impl From<&RobotCommand> for CsvRecord {
    fn from(c: &RobotCommand) -> Self {
        Self {
            frame: c.frame,
            timestamp: c.timestamp,
            x: c.x,
            y: c.y,
            z: c.z,
            r: c.r,
            gripper: c.gripper,
            confidence: c.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(frame: u64, x: f64, y: f64, z: f64, gripper: u8) -> RobotCommand {
        RobotCommand {
            frame: Some(frame),
            timestamp: Some(frame as f64 / 30.0),
            x,
            y,
            z,
            r: 0.0,
            gripper,
            confidence: Some(0.87),
        }
    }

    #[test]
    fn test_save_then_load_keeps_every_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("robot_commands.json");

        let seq = CommandSequence::new(
            vec![
                command(0, 231.17, -12.345678901234, 88.1, 1),
                command(7, 1.0 / 3.0, 0.1 + 0.2, 249.99999999999997, 0),
            ],
            Workspace::default(),
            Some(Handedness::Right),
        );
        seq.save(&path).unwrap();

        let loaded = CommandSequence::load(&path).unwrap();
        assert_eq!(loaded.metadata(), seq.metadata());
        for (a, b) in loaded.commands().iter().zip(seq.commands()) {
            assert_eq!(a.x.to_bits(), b.x.to_bits());
            assert_eq!(a.y.to_bits(), b.y.to_bits());
            assert_eq!(a.z.to_bits(), b.z.to_bits());
            assert_eq!(a.timestamp.map(f64::to_bits), b.timestamp.map(f64::to_bits));
        }
        assert_eq!(loaded, seq);
    }

    #[test]
    fn test_file_shape_matches_interchange_format() {
        let seq = CommandSequence::new(vec![command(0, 200.0, 0.0, 150.0, 1)], Workspace::default(), None);
        let value = serde_json::to_value(&seq).unwrap();
        assert_eq!(value["metadata"]["total_commands"], 1);
        assert_eq!(value["metadata"]["workspace"]["x_range"], serde_json::json!([200.0, 300.0]));
        assert_eq!(value["commands"][0]["gripper"], 1);
        assert_eq!(value["commands"][0]["frame"], 0);
    }

    #[test]
    fn test_bare_array_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.json");
        std::fs::write(&path, r#"[{"x": 250, "y": 0, "z": 150, "gripper": 1}]"#).unwrap();

        let seq = CommandSequence::load(&path).unwrap();
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.commands()[0].r, 0.0);
        assert!(seq.commands()[0].gripper_closed());
        assert_eq!(seq.metadata().workspace, Workspace::default());
    }

    #[test]
    fn test_missing_file_reported() {
        let err = CommandSequence::load("/nonexistent/robot_commands.json").unwrap_err();
        assert!(matches!(err, PersistError::NotFound(_)));
    }

    #[test]
    fn test_csv_export_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let seq = CommandSequence::new(
            vec![command(0, 200.0, 1.5, 150.0, 1), command(3, 210.0, 1.5, 150.0, 0)],
            Workspace::default(),
            None,
        );
        let path = seq.export_csv(dir.path().join("robot_commands.csv")).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("frame,timestamp,x,y,z,r,gripper,confidence"));
        assert_eq!(lines.count(), 2);
    }
}
