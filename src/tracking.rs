// src/tracking.rs - Hand detection over frames, handedness fix-up and timing metrics
use std::collections::VecDeque;
use std::time::Instant;

use anyhow::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::landmarks::{
    viewer_handedness, DetectorLabel, FrameRecord, HandObservation, Landmark, MalformedObservation,
    TrackingRecord,
};
use crate::video::FrameSource;

/// One hand as the detector reports it, before handedness inversion.
#[derive(Debug, Clone)]
pub struct DetectedHand {
    pub label: DetectorLabel,
    pub score: f64,
    pub landmarks: Vec<Landmark>,
}

impl DetectedHand {
    pub fn into_observation(self) -> Result<HandObservation, MalformedObservation> {
        HandObservation::new(viewer_handedness(self.label), self.landmarks)
    }
}

/// Black-box landmark detector.
pub trait HandDetector: Send {
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<DetectedHand>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub confidence_threshold: f64,
    pub metrics_window: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            metrics_window: 30,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub avg_fps: f32,
    pub avg_processing_time: f32,
    pub tracking_confidence: f32,
    frame_times: VecDeque<f32>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, elapsed: f32, confidence: f32, window: usize) {
        self.frame_times.push_front(elapsed);
        if self.frame_times.len() > window.max(1) {
            self.frame_times.pop_back();
        }
        self.avg_processing_time = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        self.avg_fps = if self.avg_processing_time > 0.0 {
            1.0 / self.avg_processing_time
        } else {
            0.0
        };
        self.tracking_confidence = confidence;
    }
}

/// Counters from one tracking pass over a video.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackingSummary {
    pub frames: usize,
    pub frames_with_hands: usize,
    pub malformed_hands: usize,
    pub failed_frames: usize,
}

pub struct HandTracker {
    detector: Box<dyn HandDetector>,
    config: TrackerConfig,
    metrics: PerformanceMetrics,
    malformed: usize,
}

impl HandTracker {
    pub fn new(detector: Box<dyn HandDetector>, config: TrackerConfig) -> Self {
        Self {
            detector,
            config,
            metrics: PerformanceMetrics::new(),
            malformed: 0,
        }
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    /// Detect, drop weak or truncated hands, and label the rest from the viewer's side.
    pub fn observe(&mut self, frame: &DynamicImage) -> Result<Vec<HandObservation>> {
        let start = Instant::now();
        let detected = self.detector.detect(frame)?;

        let mut hands = Vec::with_capacity(detected.len());
        let mut score_sum = 0.0;
        for hand in detected {
            if hand.score < self.config.confidence_threshold {
                debug!("Dropping {:?} hand with score {:.2}", hand.label, hand.score);
                continue;
            }
            let score = hand.score;
            match hand.into_observation() {
                Ok(obs) => {
                    score_sum += score;
                    hands.push(obs);
                }
                Err(e) => {
                    warn!("{}", e);
                    self.malformed += 1;
                }
            }
        }

        let confidence = if hands.is_empty() { 0.0 } else { score_sum / hands.len() as f64 };
        self.metrics
            .record(start.elapsed().as_secs_f32(), confidence as f32, self.config.metrics_window);
        Ok(hands)
    }

    /// Run the detector over every frame a source yields.
    pub fn track_source(&mut self, source: &mut dyn FrameSource) -> Result<(TrackingRecord, TrackingSummary)> {
        let fps = source.fps();
        let mut frames = Vec::new();
        let mut summary = TrackingSummary::default();
        let malformed_before = self.malformed;

        info!("Processing video at {:.2} fps", fps);
        while let Some(image) = source.next_frame()? {
            let n = frames.len() as u64;
            let mut record = FrameRecord::new(n, fps);
            match self.observe(&image) {
                Ok(hands) => {
                    for hand in hands {
                        record.set_hand(hand);
                    }
                }
                Err(e) => {
                    warn!("Frame {}: detection failed: {:#}", n, e);
                    summary.failed_frames += 1;
                }
            }
            if record.has_hands() {
                summary.frames_with_hands += 1;
            }
            frames.push(record);

            if frames.len() % 30 == 0 {
                info!(
                    "Processed {} frames ({:.1} fps detection)",
                    frames.len(),
                    self.metrics.avg_fps
                );
            }
        }

        summary.frames = frames.len();
        summary.malformed_hands = self.malformed - malformed_before;
        info!(
            "Tracking finished: {} frames, {} with hands, {} malformed hands dropped",
            summary.frames, summary.frames_with_hands, summary.malformed_hands
        );
        Ok((TrackingRecord::new(frames, fps), summary))
    }
}
