//! Scripted capture backends for pipeline tests.

use crate::backend::CaptureBackend;
use crate::config::PipelineConfig;
use facegate_core::{
    BoundingBox, ClassifierError, DetectorError, FaceClassifier, FaceDetector, Label, Prediction,
    TrainingSample,
};
use facegate_hw::{Frame, FrameSource, SourceError};
use image::{GrayImage, Rgb, RgbImage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Config rooted at `dir` with both countdowns disabled.
pub fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        data_dir: dir.to_path_buf(),
        initial_countdown_secs: 0,
        pose_countdown_secs: 0,
        ..PipelineConfig::default()
    }
}

pub fn face() -> BoundingBox {
    BoundingBox::new(100.0, 60.0, 120.0, 150.0)
}

/// Call counters shared between a test and the fakes it hands out.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    reads: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    detections: Arc<AtomicUsize>,
    predictions: Arc<AtomicUsize>,
    trainings: Arc<AtomicUsize>,
}

impl Probe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn detections(&self) -> usize {
        self.detections.load(Ordering::SeqCst)
    }

    pub fn predictions(&self) -> usize {
        self.predictions.load(Ordering::SeqCst)
    }

    pub fn trainings(&self) -> usize {
        self.trainings.load(Ordering::SeqCst)
    }
}

/// Produces `frames` frames one second apart, then ends.
pub struct FakeSource {
    frames: usize,
    served: usize,
    start: Instant,
    interval: Duration,
    fail_at: Option<usize>,
    stop_at: Option<(usize, Arc<AtomicBool>)>,
    probe: Probe,
}

impl FrameSource for FakeSource {
    fn read(&mut self) -> Result<Frame, SourceError> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(self.served) {
            return Err(SourceError::Capture("scripted read failure".into()));
        }
        if self.served >= self.frames {
            return Err(SourceError::EndOfStream);
        }
        if let Some((at, flag)) = &self.stop_at {
            if *at == self.served {
                flag.store(true, Ordering::SeqCst);
            }
        }
        let shade = (self.served % 200) as u8;
        let image = RgbImage::from_fn(400, 300, |x, y| {
            Rgb([shade, (x % 256) as u8, (y % 256) as u8])
        });
        let frame = Frame {
            image,
            sequence: self.served as u32,
            timestamp: self.start + self.interval * self.served as u32,
        };
        self.served += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeDetector {
    pub faces: Vec<BoundingBox>,
    pub fail: bool,
    pub probe: Probe,
}

impl FaceDetector for FakeDetector {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        self.probe.detections.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DetectorError::InferenceFailed("scripted".into()));
        }
        Ok(self.faces.clone())
    }
}

/// Always predicts `label` at `distance` once trained or loaded.
pub struct FakeClassifier {
    pub label: Label,
    pub distance: f64,
    pub trained: bool,
    pub probe: Probe,
}

impl FaceClassifier for FakeClassifier {
    fn train(&mut self, samples: &[TrainingSample]) -> Result<(), ClassifierError> {
        self.probe.trainings.fetch_add(1, Ordering::SeqCst);
        if samples.is_empty() {
            return Err(ClassifierError::NoSamples);
        }
        self.trained = true;
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"fake-model")?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<(), ClassifierError> {
        match std::fs::read(path) {
            Ok(raw) if raw == b"fake-model" => {
                self.trained = true;
                Ok(())
            }
            Ok(_) => Err(ClassifierError::CorruptModel(path.display().to_string())),
            Err(_) => Err(ClassifierError::ModelNotFound(path.display().to_string())),
        }
    }

    fn predict(&self, _face: &GrayImage) -> Result<Prediction, ClassifierError> {
        self.probe.predictions.fetch_add(1, Ordering::SeqCst);
        if !self.trained {
            return Err(ClassifierError::NotTrained);
        }
        Ok(Prediction {
            label: self.label,
            distance: self.distance,
        })
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

/// Backend handing out the fakes above, all reporting to one [`Probe`].
pub struct FakeBackend {
    pub frames: usize,
    pub fail_at: Option<usize>,
    pub stop_at: Option<(usize, Arc<AtomicBool>)>,
    pub open_fails: bool,
    pub detector_load_fails: bool,
    pub faces: Vec<BoundingBox>,
    pub label: Label,
    pub distance: f64,
    pub probe: Probe,
}

impl FakeBackend {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            fail_at: None,
            stop_at: None,
            open_fails: false,
            detector_load_fails: false,
            faces: vec![face()],
            label: Label(0),
            distance: 25.0,
            probe: Probe::default(),
        }
    }

    pub fn detector_with(&self, faces: Vec<BoundingBox>) -> FakeDetector {
        FakeDetector {
            faces,
            fail: false,
            probe: self.probe.clone(),
        }
    }
}

impl CaptureBackend for FakeBackend {
    type Source = FakeSource;
    type Detector = FakeDetector;
    type Classifier = FakeClassifier;

    fn open_source(&self) -> Result<FakeSource, SourceError> {
        if self.open_fails {
            return Err(SourceError::DeviceUnavailable("scripted".into()));
        }
        Ok(FakeSource {
            frames: self.frames,
            served: 0,
            start: Instant::now(),
            interval: Duration::from_secs(1),
            fail_at: self.fail_at,
            stop_at: self.stop_at.clone(),
            probe: self.probe.clone(),
        })
    }

    fn detector(&self) -> Result<FakeDetector, DetectorError> {
        if self.detector_load_fails {
            return Err(DetectorError::ModelNotFound("scripted".into()));
        }
        Ok(self.detector_with(self.faces.clone()))
    }

    fn classifier(&self) -> FakeClassifier {
        FakeClassifier {
            label: self.label,
            distance: self.distance,
            trained: false,
            probe: self.probe.clone(),
        }
    }
}
