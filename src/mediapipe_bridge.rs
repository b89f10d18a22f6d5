// src/mediapipe_bridge.rs - MediaPipe hand landmarker running as a child process
//
// Line protocol: the child prints `READY` once, then for every
// `FRAME <w> <h>\n` + w*h*3 RGB bytes on stdin answers one JSON line
// `{"hands": [...], "error": null}` on stdout.
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::landmarks::{DetectorLabel, Landmark};
use crate::tracking::{DetectedHand, HandDetector};

/// How to launch the detector process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for DetectorCommand {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["hand_detect.py".to_string()],
        }
    }
}

#[derive(Deserialize, Debug)]
struct LandmarkJson {
    x: f64,
    y: f64,
    z: f64,
    #[serde(default)]
    visibility: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct HandJson {
    handedness: String,
    #[serde(default)]
    score: f64,
    landmarks: Vec<LandmarkJson>,
}

#[derive(Deserialize, Debug)]
struct DetectionResult {
    hands: Vec<HandJson>,
    #[serde(default)]
    error: Option<String>,
}

pub(crate) fn write_frame<W: Write>(out: &mut W, frame: &DynamicImage) -> Result<()> {
    let rgb = frame.to_rgb8();
    writeln!(out, "FRAME {} {}", rgb.width(), rgb.height())?;
    out.write_all(rgb.as_raw())?;
    out.flush()?;
    Ok(())
}

pub(crate) fn wait_ready<R: BufRead>(input: &mut R) -> Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            bail!("detector exited before signalling ready");
        }
        match line.trim() {
            "READY" => return Ok(()),
            "" => continue,
            other => debug!("detector: {}", other),
        }
    }
}

pub(crate) fn read_response<R: BufRead>(input: &mut R) -> Result<Vec<DetectedHand>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("detector closed its output");
    }
    let result: DetectionResult = serde_json::from_str(line.trim())
        .with_context(|| format!("Failed to parse detector response: {}", line.trim()))?;

    if let Some(error) = result.error {
        bail!("detector error: {}", error);
    }

    let mut hands = Vec::with_capacity(result.hands.len());
    for hand in result.hands {
        let Some(label) = DetectorLabel::parse(&hand.handedness) else {
            warn!("Unknown handedness label '{}', skipping hand", hand.handedness);
            continue;
        };
        let landmarks = hand
            .landmarks
            .iter()
            .enumerate()
            .map(|(i, lm)| Landmark {
                id: i as u8,
                x: lm.x,
                y: lm.y,
                z: lm.z,
                visibility: lm.visibility,
            })
            .collect();
        hands.push(DetectedHand { label, score: hand.score, landmarks });
    }
    Ok(hands)
}

pub struct MediaPipeBridge {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl MediaPipeBridge {
    pub fn spawn(command: &DetectorCommand) -> Result<Self> {
        info!("Starting hand detector: {} {}", command.program, command.args.join(" "));

        let mut process = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to start detector process '{}'", command.program))?;

        let stdin = process.stdin.take().context("Failed to get detector stdin")?;
        let stdout = process.stdout.take().context("Failed to get detector stdout")?;
        let mut stdout = BufReader::new(stdout);

        if let Err(e) = wait_ready(&mut stdout) {
            let _ = process.kill();
            return Err(e);
        }
        info!("Hand detector ready");

        Ok(Self { process, stdin, stdout })
    }
}

impl HandDetector for MediaPipeBridge {
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<DetectedHand>> {
        write_frame(&mut self.stdin, frame)?;
        read_response(&mut self.stdout)
    }
}

impl Drop for MediaPipeBridge {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_header_and_payload() {
        let mut out = Vec::new();
        write_frame(&mut out, &DynamicImage::new_rgb8(3, 2)).unwrap();
        let header = b"FRAME 3 2\n";
        assert_eq!(&out[..header.len()], header);
        assert_eq!(out.len(), header.len() + 3 * 2 * 3);
    }

    #[test]
    fn test_ready_after_banner() {
        let mut input = Cursor::new(b"loading model\n\nREADY\n".to_vec());
        wait_ready(&mut input).unwrap();
        assert!(wait_ready(&mut Cursor::new(Vec::new())).is_err());
    }

    #[test]
    fn test_response_parsing() {
        let lms: Vec<String> = (0..21).map(|i| format!(r#"{{"x":0.{},"y":0.5,"z":0.0}}"#, i + 10)).collect();
        let line = format!(
            r#"{{"hands":[{{"handedness":"Left","score":0.93,"landmarks":[{}]}},{{"handedness":"Both","score":0.9,"landmarks":[]}}],"error":null}}"#,
            lms.join(",")
        );
        let hands = read_response(&mut Cursor::new(format!("{}\n", line).into_bytes())).unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0].label, DetectorLabel::Left);
        assert_eq!(hands[0].landmarks.len(), 21);
        assert_eq!(hands[0].landmarks[20].id, 20);
        assert_eq!(hands[0].landmarks[0].x, 0.10);
    }

    #[test]
    fn test_error_response_is_an_error() {
        let mut input = Cursor::new(b"{\"hands\":[],\"error\":\"bad frame\"}\n".to_vec());
        assert!(read_response(&mut input).is_err());
        assert!(read_response(&mut Cursor::new(b"not json\n".to_vec())).is_err());
    }
}
