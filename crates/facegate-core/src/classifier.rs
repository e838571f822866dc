//! Face classifier capability and the default LBPH backend.
//!
//! A classifier is trained from labelled grayscale samples, persisted as a
//! single blob, and scores a new face as `(nearest label, distance)`.

use crate::types::{Label, Prediction, TrainingSample};
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const LBPH_GRID: u32 = 8;
const LBPH_BINS: usize = 256;
/// Faces are normalised to this size before histogramming.
const LBPH_FACE_SIZE: u32 = 200;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier model not found: {0}")]
    ModelNotFound(String),
    #[error("corrupt classifier model: {0}")]
    CorruptModel(String),
    #[error("classifier has not been trained")]
    NotTrained,
    #[error("no training samples")]
    NoSamples,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Learns faces from labelled samples and scores new faces against them.
pub trait FaceClassifier: Send {
    /// Replace the model with one learned from `samples`.
    fn train(&mut self, samples: &[TrainingSample]) -> Result<(), ClassifierError>;
    fn save(&self, path: &Path) -> Result<(), ClassifierError>;
    /// Replace the model with a previously saved one.
    fn load(&mut self, path: &Path) -> Result<(), ClassifierError>;
    fn predict(&self, face: &GrayImage) -> Result<Prediction, ClassifierError>;
    fn is_trained(&self) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LbphEntry {
    label: Label,
    histogram: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LbphModel {
    grid: u32,
    entries: Vec<LbphEntry>,
}

/// Local Binary Patterns Histogram classifier (radius 1, 8 neighbours, 8×8 grid).
///
/// Distance is the symmetric chi-square distance between spatial histograms;
/// identical faces score 0.
#[derive(Debug, Default)]
pub struct LbphClassifier {
    model: Option<LbphModel>,
}

impl LbphClassifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FaceClassifier for LbphClassifier {
    fn train(&mut self, samples: &[TrainingSample]) -> Result<(), ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::NoSamples);
        }
        let entries = samples
            .iter()
            .map(|s| LbphEntry {
                label: s.label,
                histogram: spatial_histogram(&s.image, LBPH_GRID),
            })
            .collect();
        self.model = Some(LbphModel {
            grid: LBPH_GRID,
            entries,
        });
        tracing::info!(samples = samples.len(), "trained LBPH classifier");
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        let model = self.model.as_ref().ok_or(ClassifierError::NotTrained)?;
        let json =
            serde_json::to_vec(model).map_err(|e| ClassifierError::CorruptModel(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "saved classifier model");
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<(), ClassifierError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClassifierError::ModelNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let model: LbphModel =
            serde_json::from_slice(&raw).map_err(|e| ClassifierError::CorruptModel(e.to_string()))?;
        let expected = (model.grid * model.grid) as usize * LBPH_BINS;
        if model.entries.is_empty() || model.entries.iter().any(|e| e.histogram.len() != expected) {
            return Err(ClassifierError::CorruptModel(format!(
                "{}: inconsistent histogram layout",
                path.display()
            )));
        }
        self.model = Some(model);
        Ok(())
    }

    fn predict(&self, face: &GrayImage) -> Result<Prediction, ClassifierError> {
        let model = self.model.as_ref().ok_or(ClassifierError::NotTrained)?;
        let probe = spatial_histogram(face, model.grid);

        model
            .entries
            .iter()
            .map(|e| Prediction {
                label: e.label,
                distance: chi_square(&probe, &e.histogram),
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .ok_or(ClassifierError::NotTrained)
    }

    fn is_trained(&self) -> bool {
        self.model.is_some()
    }
}

/// LBP code image of an 8-bit grayscale face. Border pixels are left at 0.
fn lbp_codes(face: &GrayImage) -> GrayImage {
    const NEIGHBOURS: [(i32, i32); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];
    let (w, h) = face.dimensions();
    let mut codes = GrayImage::new(w, h);
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let centre = face.get_pixel(x, y).0[0];
            let mut code = 0u8;
            for (bit, (dx, dy)) in NEIGHBOURS.iter().enumerate() {
                let n = face.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32).0[0];
                if n >= centre {
                    code |= 1 << bit;
                }
            }
            codes.put_pixel(x, y, image::Luma([code]));
        }
    }
    codes
}

/// Concatenated per-cell LBP histograms, each cell normalised to sum 1.
fn spatial_histogram(face: &GrayImage, grid: u32) -> Vec<f32> {
    let face = if face.dimensions() == (LBPH_FACE_SIZE, LBPH_FACE_SIZE) {
        lbp_codes(face)
    } else {
        lbp_codes(&imageops::resize(face, LBPH_FACE_SIZE, LBPH_FACE_SIZE, FilterType::Triangle))
    };
    let cell = LBPH_FACE_SIZE / grid;
    let mut out = Vec::with_capacity((grid * grid) as usize * LBPH_BINS);
    for gy in 0..grid {
        for gx in 0..grid {
            let mut hist = [0f32; LBPH_BINS];
            for y in gy * cell..(gy + 1) * cell {
                for x in gx * cell..(gx + 1) * cell {
                    hist[face.get_pixel(x, y).0[0] as usize] += 1.0;
                }
            }
            let total = (cell * cell) as f32;
            out.extend(hist.iter().map(|v| v / total));
        }
    }
    out
}

fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let sum = (x + y) as f64;
            if sum > 0.0 {
                let diff = (x - y) as f64;
                2.0 * diff * diff / sum
            } else {
                0.0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(seed: u8) -> GrayImage {
        GrayImage::from_fn(200, 200, |x, y| {
            image::Luma([((x * (seed as u32 + 1) + y * 3) % 256) as u8])
        })
    }

    fn checker(size: u32) -> GrayImage {
        GrayImage::from_fn(200, 200, |x, y| {
            image::Luma([if (x / size + y / size) % 2 == 0 { 30 } else { 220 }])
        })
    }

    #[test]
    fn test_predict_requires_training() {
        let clf = LbphClassifier::new();
        assert!(!clf.is_trained());
        assert!(matches!(clf.predict(&gradient(1)), Err(ClassifierError::NotTrained)));
    }

    #[test]
    fn test_train_rejects_empty_corpus() {
        let mut clf = LbphClassifier::new();
        assert!(matches!(clf.train(&[]), Err(ClassifierError::NoSamples)));
    }

    #[test]
    fn test_identical_face_has_zero_distance() {
        let mut clf = LbphClassifier::new();
        clf.train(&[TrainingSample { image: checker(10), label: Label(4) }]).unwrap();
        let p = clf.predict(&checker(10)).unwrap();
        assert_eq!(p.label, Label(4));
        assert!(p.distance.abs() < 1e-9);
    }

    #[test]
    fn test_predicts_nearest_label() {
        let mut clf = LbphClassifier::new();
        clf.train(&[
            TrainingSample { image: checker(10), label: Label(0) },
            TrainingSample { image: gradient(2), label: Label(1) },
        ])
        .unwrap();
        assert_eq!(clf.predict(&gradient(2)).unwrap().label, Label(1));
        assert_eq!(clf.predict(&checker(10)).unwrap().label, Label(0));
    }

    #[test]
    fn test_non_square_probe_is_normalised() {
        let mut clf = LbphClassifier::new();
        clf.train(&[TrainingSample { image: checker(10), label: Label(0) }]).unwrap();
        let probe = GrayImage::from_pixel(64, 48, image::Luma([90]));
        assert!(clf.predict(&probe).is_ok());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model").join("trained_model.json");

        let mut clf = LbphClassifier::new();
        clf.train(&[TrainingSample { image: checker(20), label: Label(3) }]).unwrap();
        clf.save(&path).unwrap();

        let mut reloaded = LbphClassifier::new();
        reloaded.load(&path).unwrap();
        assert!(reloaded.is_trained());
        assert_eq!(reloaded.predict(&checker(20)).unwrap().label, Label(3));
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut clf = LbphClassifier::new();

        let missing = dir.path().join("absent.json");
        assert!(matches!(clf.load(&missing), Err(ClassifierError::ModelNotFound(_))));

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, b"{not json").unwrap();
        assert!(matches!(clf.load(&corrupt), Err(ClassifierError::CorruptModel(_))));
        assert!(!clf.is_trained());
    }
}
