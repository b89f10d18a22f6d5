// src/mapping.rs - Hand geometry to robot workspace coordinates
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::landmarks::{index, HandObservation};

/// Hand span (normalized units) treated as "far" and "near".
pub const SPAN_FAR: f64 = 0.08;
pub const SPAN_NEAR: f64 = 0.25;

/// Openness above which the hand counts as open.
pub const OPEN_THRESHOLD: f64 = 0.6;

/// Closed range on one robot axis, in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

impl From<[f64; 2]> for AxisRange {
    fn from(r: [f64; 2]) -> Self {
        Self::new(r[0], r[1])
    }
}

impl From<AxisRange> for [f64; 2] {
    fn from(r: AxisRange) -> Self {
        [r.min, r.max]
    }
}

/// Reachable workspace: X forward/back, Y left/right, Z up/down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub x_range: AxisRange,
    pub y_range: AxisRange,
    pub z_range: AxisRange,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            x_range: AxisRange::new(200.0, 300.0),
            y_range: AxisRange::new(-100.0, 100.0),
            z_range: AxisRange::new(50.0, 250.0),
        }
    }
}

impl Workspace {
    pub fn clamp(&self, p: Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            self.x_range.clamp(p.x),
            self.y_range.clamp(p.y),
            self.z_range.clamp(p.z),
        )
    }
}

/// Sub-window of the image that spans the full lateral/vertical workspace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl CameraBounds {
    pub const FULL: CameraBounds = CameraBounds { x_min: 0.0, x_max: 1.0, y_min: 0.0, y_max: 1.0 };
}

impl Default for CameraBounds {
    fn default() -> Self {
        Self { x_min: 0.15, x_max: 0.85, y_min: 0.15, y_max: 0.85 }
    }
}

/// Piecewise-linear interpolation with clamping outside `domain`.
///
/// `domain` must be increasing; `range` may run either way.
pub fn interp(v: f64, domain: (f64, f64), range: (f64, f64)) -> f64 {
    let (d0, d1) = domain;
    let (r0, r1) = range;
    if v <= d0 {
        return r0;
    }
    if v >= d1 {
        return r1;
    }
    r0 + (v - d0) * (r1 - r0) / (d1 - d0)
}

/// Thumb-tip to pinky-tip distance in the image plane.
pub fn hand_span(hand: &HandObservation) -> f64 {
    let thumb = hand.landmark(index::THUMB_TIP);
    let pinky = hand.landmark(index::PINKY_TIP);
    ((thumb.x - pinky.x).powi(2) + (thumb.y - pinky.y).powi(2)).sqrt()
}

/// Depth axis: a larger span means the hand is nearer the camera, i.e. forward.
pub fn span_to_x(span: f64, workspace: &Workspace) -> f64 {
    let x = interp(span, (SPAN_FAR, SPAN_NEAR), (workspace.x_range.max, workspace.x_range.min));
    workspace.x_range.clamp(x)
}

/// Map one hand to a workspace point (mm).
pub fn map_hand(hand: &HandObservation, workspace: &Workspace, bounds: &CameraBounds) -> Vector3<f64> {
    let wrist = hand.wrist();
    let wrist_x = wrist.x.clamp(0.0, 1.0);
    let wrist_y = wrist.y.clamp(0.0, 1.0);

    let x = span_to_x(hand_span(hand), workspace);
    let y = interp(
        wrist_x,
        (bounds.x_min, bounds.x_max),
        (workspace.y_range.min, workspace.y_range.max),
    );
    // image y grows downward
    let z = interp(
        wrist_y,
        (bounds.y_min, bounds.y_max),
        (workspace.z_range.max, workspace.z_range.min),
    );

    workspace.clamp(Vector3::new(x, y, z))
}

/// Fraction of extended fingers, 0.0 (fist) to 1.0 (open palm).
///
/// The thumb test compares x only and assumes a right hand facing the camera
/// upright; mirrored or rotated hands are misclassified.
pub fn hand_openness(hand: &HandObservation) -> f64 {
    let lm = |i: usize| hand.landmark(i);

    let mut extended = 0u32;
    if lm(index::THUMB_TIP).x > lm(index::THUMB_MCP).x {
        extended += 1;
    }
    for (tip, pip) in [
        (index::INDEX_TIP, index::INDEX_PIP),
        (index::MIDDLE_TIP, index::MIDDLE_PIP),
        (index::RING_TIP, index::RING_PIP),
        (index::PINKY_TIP, index::PINKY_PIP),
    ] {
        if lm(tip).y < lm(pip).y {
            extended += 1;
        }
    }
    extended as f64 / 5.0
}

pub fn is_hand_open(hand: &HandObservation) -> bool {
    hand_openness(hand) > OPEN_THRESHOLD
}

/// Gripper value for a command: 1 closes on a fist, 0 opens on an open hand.
pub fn gripper_state(hand_open: bool) -> u8 {
    if hand_open {
        0
    } else {
        1
    }
}

/// Round to 0.01 mm.
pub fn round_mm(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::landmarks::{Handedness, Landmark, LANDMARK_COUNT};

    /// Synthetic hand with a chosen wrist, span and finger pose.
    pub(crate) fn synthetic_hand(wrist: (f64, f64), span: f64, open: bool) -> HandObservation {
        let mut lms: Vec<Landmark> = (0..LANDMARK_COUNT as u8)
            .map(|id| Landmark::new(id, wrist.0, wrist.1, 0.0))
            .collect();

        // thumb MCP left of the tip when open
        lms[index::THUMB_MCP].x = wrist.0;
        lms[index::THUMB_TIP].x = if open { wrist.0 + 0.01 } else { wrist.0 - 0.01 };
        lms[index::THUMB_TIP].y = wrist.1 - 0.1;
        // pinky tip sits `span` away from the thumb tip horizontally
        lms[index::PINKY_TIP].x = lms[index::THUMB_TIP].x + span;
        lms[index::PINKY_TIP].y = lms[index::THUMB_TIP].y;

        for (tip, pip) in [
            (index::INDEX_TIP, index::INDEX_PIP),
            (index::MIDDLE_TIP, index::MIDDLE_PIP),
            (index::RING_TIP, index::RING_PIP),
            (index::PINKY_TIP, index::PINKY_PIP),
        ] {
            lms[pip].y = wrist.1 - 0.05;
            lms[tip].y = if open { wrist.1 - 0.1 } else { wrist.1 - 0.02 };
        }
        // keep the pinky tip level with the thumb tip
        lms[index::THUMB_TIP].y = lms[index::PINKY_TIP].y;

        HandObservation::new(Handedness::Right, lms).unwrap()
    }

    #[test]
    fn test_interp_clamps_outside_domain() {
        assert_eq!(interp(-1.0, (0.0, 1.0), (10.0, 20.0)), 10.0);
        assert_eq!(interp(2.0, (0.0, 1.0), (10.0, 20.0)), 20.0);
        assert_eq!(interp(0.5, (0.0, 1.0), (20.0, 10.0)), 15.0);
    }

    #[test]
    fn test_span_extremes_hit_workspace_limits() {
        let ws = Workspace::default();
        for s in [0.0, 0.03, 0.08] {
            assert_eq!(span_to_x(s, &ws), 300.0);
        }
        for s in [0.25, 0.4, 1.5] {
            assert_eq!(span_to_x(s, &ws), 200.0);
        }
    }

    #[test]
    fn test_span_mapping_is_non_increasing() {
        let ws = Workspace::default();
        let mut last = f64::INFINITY;
        for i in 0..=100 {
            let x = span_to_x(0.05 + i as f64 * 0.0025, &ws);
            assert!(x <= last, "x rose from {} to {}", last, x);
            assert!(ws.x_range.contains(x));
            last = x;
        }
    }

    #[test]
    fn test_lateral_mapping_monotone_and_bounded() {
        let ws = Workspace::default();
        let mut last = f64::NEG_INFINITY;
        for i in 0..=50 {
            let wx = -0.2 + i as f64 * 0.03;
            let hand = synthetic_hand((wx, 0.5), 0.15, true);
            let p = map_hand(&hand, &ws, &CameraBounds::FULL);
            assert!(p.y >= last);
            assert!(ws.y_range.contains(p.y));
            last = p.y;
        }
    }

    #[test]
    fn test_vertical_axis_is_inverted() {
        let ws = Workspace::default();
        let top = map_hand(&synthetic_hand((0.5, 0.0), 0.15, true), &ws, &CameraBounds::FULL);
        let bottom = map_hand(&synthetic_hand((0.5, 1.0), 0.15, true), &ws, &CameraBounds::FULL);
        assert_eq!(top.z, 250.0);
        assert_eq!(bottom.z, 50.0);
    }

    #[test]
    fn test_center_wrist_maps_to_workspace_center() {
        let ws = Workspace::default();
        let p = map_hand(&synthetic_hand((0.5, 0.5), 0.3, false), &ws, &CameraBounds::FULL);
        assert_eq!(p, Vector3::new(200.0, 0.0, 150.0));
    }

    #[test]
    fn test_camera_bounds_stretch_the_window() {
        let ws = Workspace::default();
        let bounds = CameraBounds::default();
        let p = map_hand(&synthetic_hand((0.15, 0.85), 0.15, true), &ws, &bounds);
        assert_eq!(p.y, -100.0);
        assert_eq!(p.z, 50.0);
    }

    #[test]
    fn test_open_hand_opens_gripper() {
        let hand = synthetic_hand((0.5, 0.5), 0.2, true);
        assert_eq!(hand_openness(&hand), 1.0);
        assert_eq!(gripper_state(is_hand_open(&hand)), 0);
    }

    #[test]
    fn test_fist_closes_gripper() {
        let hand = synthetic_hand((0.5, 0.5), 0.2, false);
        assert_eq!(hand_openness(&hand), 0.0);
        assert_eq!(gripper_state(is_hand_open(&hand)), 1);
    }

    #[test]
    fn test_three_fingers_is_not_open() {
        let mut lms = synthetic_hand((0.5, 0.5), 0.2, true).landmarks().to_vec();
        // curl ring and pinky
        lms[index::RING_TIP].y = 0.6;
        lms[index::PINKY_TIP].y = 0.6;
        let hand = HandObservation::new(Handedness::Right, lms).unwrap();
        assert_eq!(hand_openness(&hand), 0.6);
        assert!(!is_hand_open(&hand));
    }
}
