use crate::config::PipelineConfig;
use facegate_core::{DetectorError, FaceClassifier, FaceDetector, LbphClassifier, ScrfdDetector};
use facegate_hw::{Camera, FrameSource, SourceError};
use std::path::PathBuf;

/// Builds the device and capabilities a worker needs.
///
/// Everything is constructed on the worker thread, so a failure here is
/// reported to the host as a setup error rather than returned to the caller.
pub trait CaptureBackend: Send + 'static {
    type Source: FrameSource;
    type Detector: FaceDetector;
    type Classifier: FaceClassifier;

    fn open_source(&self) -> Result<Self::Source, SourceError>;
    fn detector(&self) -> Result<Self::Detector, DetectorError>;
    fn classifier(&self) -> Self::Classifier;
}

/// V4L2 camera, SCRFD detector and LBPH classifier.
#[derive(Debug, Clone)]
pub struct DeviceBackend {
    camera_device: String,
    detector_model: PathBuf,
}

impl DeviceBackend {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            camera_device: config.camera_device.clone(),
            detector_model: config.detector_model_path(),
        }
    }
}

impl CaptureBackend for DeviceBackend {
    type Source = Camera;
    type Detector = ScrfdDetector;
    type Classifier = LbphClassifier;

    fn open_source(&self) -> Result<Camera, SourceError> {
        Camera::open(&self.camera_device)
    }

    fn detector(&self) -> Result<ScrfdDetector, DetectorError> {
        ScrfdDetector::load(&self.detector_model)
    }

    fn classifier(&self) -> LbphClassifier {
        LbphClassifier::new()
    }
}
