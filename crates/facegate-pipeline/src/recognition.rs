//! Continuous recognition with a frame-skip cache.
//!
//! A fresh cycle detects every face, classifies it and replaces the cache.
//! The next `frame_skip` frames redraw the cached results without calling
//! the detector or classifier. While no identity is registered, frames pass
//! through untouched.

use crate::backend::CaptureBackend;
use crate::config::PipelineConfig;
use crate::message::{FaceAnnotation, HostMessage, HostSender, Overlay, RenderedFrame};
use crate::worker::{fail_setup, finish, next_frame, WorkerExit};
use facegate_core::prep;
use facegate_core::{
    confidence, BoundingBox, ClassifierError, CorpusError, DetectorError, FaceClassifier,
    FaceDetector, LabelRegistry, TrainingCorpus,
};
use facegate_hw::SourceGuard;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use thiserror::Error;

/// Pixels between a face and its drawn box.
const BOX_MARGIN: i32 = 10;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("face classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("training corpus: {0}")]
    Corpus(#[from] CorpusError),
}

#[derive(Debug, Clone)]
pub struct RecognitionSettings {
    pub confidence_threshold: i32,
    pub max_distance: f64,
    pub frame_skip: u32,
    pub sample_size: u32,
}

impl From<&PipelineConfig> for RecognitionSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            max_distance: config.max_distance,
            frame_skip: config.frame_skip,
            sample_size: config.sample_size,
        }
    }
}

/// One face from the last fresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFace {
    pub bbox: BoundingBox,
    pub confidence: i32,
    /// Set only when the confidence cleared the threshold.
    pub identity: Option<String>,
}

impl CachedFace {
    pub fn caption(&self) -> String {
        match &self.identity {
            Some(identity) => format!("ID: {identity} ({}%)", self.confidence),
            None => "UNKNOWN".to_string(),
        }
    }
}

/// Results of the last fresh cycle plus the skip counter.
///
/// A counter of 0 means the next frame runs a fresh cycle.
#[derive(Debug, Default)]
pub struct FrameCache {
    faces: Vec<CachedFace>,
    skip_counter: u32,
}

impl FrameCache {
    pub fn faces(&self) -> &[CachedFace] {
        &self.faces
    }

    pub fn fresh_due(&self) -> bool {
        self.skip_counter == 0
    }

    fn replace(&mut self, faces: Vec<CachedFace>, frame_skip: u32) {
        self.faces = faces;
        self.skip_counter = u32::from(frame_skip > 0);
    }

    fn reuse(&mut self, frame_skip: u32) {
        self.skip_counter += 1;
        if self.skip_counter > frame_skip {
            self.skip_counter = 0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Nobody is registered; the frame was forwarded as is.
    PassThrough,
    Fresh,
    Cached,
    /// The fresh cycle failed; the frame was forwarded unannotated.
    Failed,
}

#[derive(Debug)]
pub struct FrameResult {
    pub frame: RenderedFrame,
    /// `(identity, confidence)` for each face recognised on a fresh cycle.
    pub recognized: Vec<(String, i32)>,
    pub cycle: Cycle,
}

/// Where the classifier model came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOrigin {
    Loaded,
    Trained,
}

/// Per-frame recognition state: capabilities, registry and cache.
pub struct Recognizer<D, C> {
    detector: D,
    classifier: C,
    registry: LabelRegistry,
    corpus: TrainingCorpus,
    model_path: PathBuf,
    settings: RecognitionSettings,
    cache: FrameCache,
    model_ready: bool,
}

impl<D: FaceDetector, C: FaceClassifier> Recognizer<D, C> {
    pub fn new(
        detector: D,
        classifier: C,
        registry: LabelRegistry,
        corpus: TrainingCorpus,
        model_path: impl Into<PathBuf>,
        settings: RecognitionSettings,
    ) -> Self {
        Self {
            detector,
            classifier,
            registry,
            corpus,
            model_path: model_path.into(),
            settings,
            cache: FrameCache::default(),
            model_ready: false,
        }
    }

    pub fn registry(&self) -> &LabelRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn is_model_ready(&self) -> bool {
        self.model_ready
    }

    /// Re-read the persisted registry. An unreadable one counts as empty.
    pub fn reload_registry(&mut self) {
        let path = self.registry.path().to_path_buf();
        self.registry = match LabelRegistry::load(&path) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!(error = %e, "label registry unreadable; treating as empty");
                LabelRegistry::empty(path)
            }
        };
    }

    /// Load the persisted model, or train one from the corpus and save it.
    pub fn prepare_model(&mut self) -> Result<ModelOrigin, RecognitionError> {
        let origin = match self.classifier.load(&self.model_path) {
            Ok(()) => {
                tracing::info!(path = %self.model_path.display(), "loaded classifier model");
                ModelOrigin::Loaded
            }
            Err(e) => {
                tracing::info!(reason = %e, "no usable classifier model; training from corpus");
                let samples = self.corpus.load_all()?;
                self.classifier.train(&samples)?;
                if let Err(e) = self.classifier.save(&self.model_path) {
                    tracing::warn!(
                        error = %e,
                        path = %self.model_path.display(),
                        "saving classifier model failed"
                    );
                }
                ModelOrigin::Trained
            }
        };
        self.model_ready = true;
        Ok(origin)
    }

    /// Process one display frame.
    ///
    /// Never fails: a detector or classifier error forwards the frame
    /// unannotated and leaves the next frame due for a fresh cycle.
    pub fn process(&mut self, mut image: RgbImage) -> FrameResult {
        if self.registry.is_empty() {
            return FrameResult {
                frame: RenderedFrame::plain(image),
                recognized: Vec::new(),
                cycle: Cycle::PassThrough,
            };
        }

        let mut recognized = Vec::new();
        let cycle = if self.cache.fresh_due() {
            match self.detect_and_classify(&image) {
                Ok(faces) => {
                    recognized = faces
                        .iter()
                        .filter_map(|f| f.identity.clone().map(|id| (id, f.confidence)))
                        .collect();
                    tracing::debug!(faces = faces.len(), "fresh recognition cycle");
                    self.cache.replace(faces, self.settings.frame_skip);
                    Cycle::Fresh
                }
                Err(e) => {
                    tracing::warn!(error = %e, "recognition failed for frame");
                    return FrameResult {
                        frame: RenderedFrame::plain(image),
                        recognized,
                        cycle: Cycle::Failed,
                    };
                }
            }
        } else {
            tracing::debug!(faces = self.cache.faces.len(), "cached recognition cycle");
            self.cache.reuse(self.settings.frame_skip);
            Cycle::Cached
        };

        let mut overlay = Overlay::default();
        for face in &self.cache.faces {
            prep::draw_face_box(&mut image, &face.bbox, BOX_MARGIN);
            overlay.faces.push(FaceAnnotation {
                bbox: face.bbox,
                text: face.caption(),
            });
        }

        FrameResult {
            frame: RenderedFrame { image, overlay },
            recognized,
            cycle,
        }
    }

    fn detect_and_classify(
        &mut self,
        image: &RgbImage,
    ) -> Result<Vec<CachedFace>, RecognitionError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let Some(sample) = prep::face_sample(image, &bbox, self.settings.sample_size) else {
                continue;
            };
            let prediction = self.classifier.predict(&sample)?;
            let confidence = confidence(prediction.distance, self.settings.max_distance);
            let identity = if confidence > self.settings.confidence_threshold {
                self.registry.identity(prediction.label).map(str::to_string)
            } else {
                None
            };
            faces.push(CachedFace {
                bbox,
                confidence,
                identity,
            });
        }
        Ok(faces)
    }
}

/// Rebuild the classifier from the whole corpus and overwrite the persisted
/// model. Returns the number of samples trained on.
pub fn train_model<C: FaceClassifier>(
    classifier: &mut C,
    corpus: &TrainingCorpus,
    model_path: &Path,
) -> Result<usize, RecognitionError> {
    let samples = corpus.load_all()?;
    classifier.train(&samples)?;
    classifier.save(model_path)?;
    tracing::info!(
        samples = samples.len(),
        path = %model_path.display(),
        "classifier model rebuilt"
    );
    Ok(samples.len())
}

/// Delete the persisted model so the next recognition run retrains.
///
/// Returns `false` if there was no model.
pub fn discard_model(model_path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(model_path) {
        Ok(()) => {
            tracing::info!(path = %model_path.display(), "discarded stale classifier model");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Run recognition until stopped, the stream ends, or setup fails.
pub fn run_recognition<B: CaptureBackend>(
    backend: &B,
    config: &PipelineConfig,
    stop: &AtomicBool,
    host: &HostSender,
) -> WorkerExit {
    host.send(HostMessage::Loading);

    let source = match backend.open_source() {
        Ok(source) => source,
        Err(e) => return fail_setup(host, format!("opening camera: {e}")),
    };
    let mut guard = SourceGuard::new(source);

    let detector = match backend.detector() {
        Ok(detector) => detector,
        Err(e) => {
            tracing::error!(error = %e, "face detector unavailable");
            let exit = WorkerExit::Failed(format!("loading face detector: {e}"));
            return finish(&mut guard, host, exit);
        }
    };

    let mut recognizer = Recognizer::new(
        detector,
        backend.classifier(),
        LabelRegistry::empty(config.label_map_path()),
        TrainingCorpus::new(config.training_dir(), config.sample_size),
        config.model_path(),
        RecognitionSettings::from(config),
    );
    let display = (config.display_width, config.display_height);
    tracing::info!(
        threshold = config.confidence_threshold,
        frame_skip = config.frame_skip,
        "recognition started"
    );

    loop {
        let frame = match next_frame(&mut guard, stop) {
            Ok(frame) => frame,
            Err(exit) => return finish(&mut guard, host, exit),
        };
        let image = prep::downscale(frame.image, config.display_max_width, display);

        if !recognizer.is_model_ready() {
            recognizer.reload_registry();
            if !recognizer.registry().is_empty() {
                host.send(HostMessage::Loading);
                if let Err(e) = recognizer.prepare_model() {
                    tracing::error!(error = %e, "building classifier model failed");
                    let exit = WorkerExit::Failed(format!("building classifier model: {e}"));
                    return finish(&mut guard, host, exit);
                }
            }
        }

        let result = recognizer.process(image);
        for (identity, confidence) in result.recognized {
            tracing::info!(%identity, confidence, "identity recognized");
            host.send(HostMessage::IdentityRecognized { identity, confidence });
        }
        host.frame(result.frame);
    }
}
