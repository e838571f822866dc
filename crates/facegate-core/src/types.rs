use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classifier label assigned to one enrolled subject.
///
/// Persisted as its decimal string form (`"0"`, `"1"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Label {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Label)
    }
}

/// Bounding box of a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    /// Integer pixel rectangle `(x, y, w, h)` clipped to a `frame_w × frame_h` frame.
    ///
    /// Returns `None` when the box lies entirely outside the frame or is degenerate.
    pub fn clip(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(frame_w as f32);
        let y1 = (self.y + self.height).ceil().min(frame_h as f32);
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// A stored training image and the subject label it depicts.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub image: GrayImage,
    pub label: Label,
}

/// Classifier output for one face: nearest label and its distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    pub distance: f64,
}

/// Map a classifier distance onto a 0–100 confidence score.
///
/// `round(100 × (max − d) / max)`, with `d` clamped into `[0, max]`.
pub fn confidence(distance: f64, max_distance: f64) -> i32 {
    if max_distance <= 0.0 || distance.is_nan() {
        return 0;
    }
    let d = distance.clamp(0.0, max_distance);
    (100.0 * (max_distance - d) / max_distance).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_roundtrip_string() {
        let label: Label = "7".parse().unwrap();
        assert_eq!(label, Label(7));
        assert_eq!(label.to_string(), "7");
        assert!("s7".parse::<Label>().is_err());
    }

    #[test]
    fn test_confidence_endpoints() {
        assert_eq!(confidence(0.0, 250.0), 100);
        assert_eq!(confidence(250.0, 250.0), 0);
    }

    #[test]
    fn test_confidence_reference_values() {
        assert_eq!(confidence(50.0, 250.0), 80);
        assert_eq!(confidence(25.0, 250.0), 90);
    }

    #[test]
    fn test_confidence_clamped_outside_range() {
        assert_eq!(confidence(400.0, 250.0), 0);
        assert_eq!(confidence(-3.0, 250.0), 100);
    }

    #[test]
    fn test_confidence_monotonic() {
        let mut prev = confidence(0.0, 250.0);
        // steps of 2.5 are exactly one confidence point apart
        for step in 1..=100 {
            let c = confidence(step as f64 * 2.5, 250.0);
            assert!(c < prev, "confidence must drop: {c} !< {prev} at step {step}");
            prev = c;
        }
    }

    #[test]
    fn test_clip_inside_frame() {
        let b = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(b.clip(100, 100), Some((10, 20, 30, 40)));
    }

    #[test]
    fn test_clip_partially_outside() {
        let b = BoundingBox::new(-5.0, 90.0, 20.0, 20.0);
        assert_eq!(b.clip(100, 100), Some((0, 90, 15, 10)));
    }

    #[test]
    fn test_clip_fully_outside() {
        let b = BoundingBox::new(150.0, 150.0, 20.0, 20.0);
        assert_eq!(b.clip(100, 100), None);
    }
}
