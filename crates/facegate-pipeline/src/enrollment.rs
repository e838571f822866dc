//! Pose-sequenced enrollment.
//!
//! After an initial countdown the subject is walked through a fixed table
//! of poses. Each pose stores `samples_per_pose` face crops in the training
//! corpus; every pose but the first waits out its own countdown before it
//! starts capturing. The label registry is only touched once the last pose
//! is done.

use crate::backend::CaptureBackend;
use crate::config::PipelineConfig;
use crate::message::{HostMessage, HostSender, Overlay, RenderedFrame};
use crate::recognition::discard_model;
use crate::worker::{fail_setup, finish, next_frame, WorkerExit};
use facegate_core::prep;
use facegate_core::{CorpusError, FaceDetector, Label, LabelRegistry, TrainingCorpus};
use facegate_hw::SourceGuard;
use image::RgbImage;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

const REGISTERING_TEXT: &str = "Registering...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pose {
    Regular,
    Smile,
    Laugh,
    Frown,
    BendLeft,
    BendRight,
    HeadUp,
    HeadDown,
    TurnLeft,
    TurnRight,
}

#[derive(Debug, Clone, Copy)]
pub struct PoseDescriptor {
    pub pose: Pose,
    pub caption: &'static str,
    pub requires_countdown: bool,
}

const fn pose(pose: Pose, caption: &'static str, requires_countdown: bool) -> PoseDescriptor {
    PoseDescriptor {
        pose,
        caption,
        requires_countdown,
    }
}

/// Capture order.
pub const POSES: [PoseDescriptor; 10] = [
    pose(Pose::Regular, "Pose: Regular", false),
    pose(Pose::Smile, "Pose: Smile", true),
    pose(Pose::Laugh, "Pose: Laugh", true),
    pose(Pose::Frown, "Pose: Frown", true),
    pose(Pose::BendLeft, "Pose: Bend Head Left", true),
    pose(Pose::BendRight, "Pose: Bend Head Right", true),
    pose(Pose::HeadUp, "Pose: Head Up", true),
    pose(Pose::HeadDown, "Pose: Head Down", true),
    pose(Pose::TurnLeft, "Pose: Turn Head Left", true),
    pose(Pose::TurnRight, "Pose: Turn Head Right", true),
];

impl Pose {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn descriptor(self) -> &'static PoseDescriptor {
        &POSES[self.index()]
    }

    /// The pose after this one, or `None` for the last.
    pub fn next(self) -> Option<Pose> {
        POSES.get(self.index() + 1).map(|d| d.pose)
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentSettings {
    pub initial_countdown_secs: u64,
    pub pose_countdown_secs: u64,
    pub samples_per_pose: usize,
    pub sample_size: u32,
    pub pause_countdown_without_face: bool,
}

impl From<&PipelineConfig> for EnrollmentSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            initial_countdown_secs: config.initial_countdown_secs,
            pose_countdown_secs: config.pose_countdown_secs,
            samples_per_pose: config.samples_per_pose,
            sample_size: config.sample_size,
            pause_countdown_without_face: config.pause_countdown_without_face,
        }
    }
}

impl EnrollmentSettings {
    pub fn total_samples(&self) -> usize {
        self.samples_per_pose * POSES.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    InitialWait,
    Capturing { pose: Pose },
    Complete,
}

/// Pose countdown clock. Only counts time while running, so it can be held
/// on frames without a face.
#[derive(Debug, Clone, Copy)]
struct Countdown {
    elapsed: Duration,
    last_tick: Instant,
}

impl Countdown {
    fn start(now: Instant) -> Self {
        Self {
            elapsed: Duration::ZERO,
            last_tick: now,
        }
    }

    fn tick(&mut self, now: Instant, running: bool) {
        if running {
            self.elapsed += now.saturating_duration_since(self.last_tick);
        }
        self.last_tick = now;
    }

    fn whole_secs(&self) -> u64 {
        self.elapsed.as_secs()
    }
}

/// Result of feeding one frame to a session.
#[derive(Debug)]
pub struct StepOutcome {
    pub frame: RenderedFrame,
    /// Pose a sample was stored for on this frame.
    pub captured: Option<Pose>,
}

/// One enrollment run for one identity.
#[derive(Debug)]
pub struct EnrollmentSession {
    identity: String,
    label: Label,
    settings: EnrollmentSettings,
    state: EnrollmentState,
    started: Instant,
    countdown: Option<Countdown>,
    pose_samples: usize,
    samples_written: usize,
}

impl EnrollmentSession {
    pub fn new(
        identity: impl Into<String>,
        label: Label,
        settings: EnrollmentSettings,
        started: Instant,
    ) -> Self {
        Self {
            identity: identity.into(),
            label,
            settings,
            state: EnrollmentState::InitialWait,
            started,
            countdown: None,
            pose_samples: 0,
            samples_written: 0,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn state(&self) -> EnrollmentState {
        self.state
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written
    }

    pub fn is_complete(&self) -> bool {
        self.state == EnrollmentState::Complete
    }

    /// Process one display frame captured at `now`.
    ///
    /// Only a failed corpus write is an error. A detector failure forwards
    /// the frame unannotated and counts as a frame without a face for the
    /// countdown.
    pub fn step<D: FaceDetector + ?Sized>(
        &mut self,
        mut image: RgbImage,
        now: Instant,
        detector: &mut D,
        corpus: &TrainingCorpus,
    ) -> Result<StepOutcome, CorpusError> {
        let pose = match self.state {
            EnrollmentState::Complete => {
                return Ok(StepOutcome {
                    frame: RenderedFrame::plain(image),
                    captured: None,
                })
            }
            EnrollmentState::InitialWait => {
                let waited = now.saturating_duration_since(self.started).as_secs();
                let wait = self.settings.initial_countdown_secs;
                if waited <= wait {
                    prep::draw_status_bar(&mut image);
                    let overlay = Overlay {
                        status: Some(format!("Starting in {}", wait - waited + 1)),
                        pose: Some(Pose::Regular.descriptor().caption.to_string()),
                        faces: Vec::new(),
                    };
                    return Ok(StepOutcome {
                        frame: RenderedFrame { image, overlay },
                        captured: None,
                    });
                }
                self.enter(Pose::Regular, now);
                Pose::Regular
            }
            EnrollmentState::Capturing { pose } => pose,
        };

        let face = match detector.detect(&image) {
            Ok(faces) => faces.into_iter().next(),
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; forwarding frame unannotated");
                if let Some(countdown) = self.countdown.as_mut() {
                    countdown.tick(now, !self.settings.pause_countdown_without_face);
                }
                return Ok(StepOutcome {
                    frame: RenderedFrame::plain(image),
                    captured: None,
                });
            }
        };

        let descriptor = pose.descriptor();
        let (status, ready) = match self.countdown.as_mut() {
            Some(countdown) if descriptor.requires_countdown => {
                countdown.tick(now, face.is_some() || !self.settings.pause_countdown_without_face);
                let secs = countdown.whole_secs();
                let wait = self.settings.pose_countdown_secs;
                let status = if secs >= wait {
                    REGISTERING_TEXT.to_string()
                } else {
                    format!("Starting in {}", wait - secs)
                };
                (status, secs > wait)
            }
            _ => (REGISTERING_TEXT.to_string(), true),
        };

        let mut captured = None;
        if let Some(face) = &face {
            if ready {
                if let Some(sample) = prep::face_sample(&image, face, self.settings.sample_size) {
                    corpus.write_sample(self.label, self.samples_written, &sample)?;
                    self.samples_written += 1;
                    self.pose_samples += 1;
                    captured = Some(pose);
                }
            }
            prep::draw_face_box(&mut image, face, 0);
        }

        prep::draw_status_bar(&mut image);
        let overlay = Overlay {
            status: Some(status),
            pose: Some(descriptor.caption.to_string()),
            faces: Vec::new(),
        };

        if self.pose_samples >= self.settings.samples_per_pose {
            match pose.next() {
                Some(next) => self.enter(next, now),
                None => {
                    tracing::info!(
                        identity = %self.identity,
                        label = %self.label,
                        samples = self.samples_written,
                        "all poses captured"
                    );
                    self.state = EnrollmentState::Complete;
                }
            }
        }

        Ok(StepOutcome {
            frame: RenderedFrame { image, overlay },
            captured,
        })
    }

    fn enter(&mut self, pose: Pose, now: Instant) {
        let descriptor = pose.descriptor();
        tracing::info!(pose = descriptor.caption, "entering pose");
        self.state = EnrollmentState::Capturing { pose };
        self.pose_samples = 0;
        self.countdown = descriptor.requires_countdown.then(|| Countdown::start(now));
    }
}

/// Run one enrollment session to completion, stop, or failure.
///
/// The registry is loaded up front; an identity that is already registered
/// keeps its label and has its samples overwritten.
pub fn run_enrollment<B: CaptureBackend>(
    backend: &B,
    config: &PipelineConfig,
    identity: &str,
    stop: &AtomicBool,
    host: &HostSender,
) -> WorkerExit {
    host.send(HostMessage::Loading);

    let mut registry = match LabelRegistry::load(config.label_map_path()) {
        Ok(registry) => registry,
        Err(e) => return fail_setup(host, format!("loading label registry: {e}")),
    };
    let label = match registry.label_for(identity) {
        Some(label) => {
            tracing::info!(identity, %label, "identity already enrolled; reusing label");
            label
        }
        None => registry.next_label(config.label_policy),
    };

    let source = match backend.open_source() {
        Ok(source) => source,
        Err(e) => return fail_setup(host, format!("opening camera: {e}")),
    };
    let mut guard = SourceGuard::new(source);

    let mut detector = match backend.detector() {
        Ok(detector) => detector,
        Err(e) => {
            tracing::error!(error = %e, "face detector unavailable");
            let exit = WorkerExit::Failed(format!("loading face detector: {e}"));
            return finish(&mut guard, host, exit);
        }
    };

    let corpus = TrainingCorpus::new(config.training_dir(), config.sample_size);
    let settings = EnrollmentSettings::from(config);
    let display = (config.display_width, config.display_height);
    let mut session: Option<EnrollmentSession> = None;
    tracing::info!(identity, %label, "enrollment started");

    loop {
        let frame = match next_frame(&mut guard, stop) {
            Ok(frame) => frame,
            Err(exit) => return finish(&mut guard, host, exit),
        };
        let now = frame.timestamp;
        let session = session
            .get_or_insert_with(|| EnrollmentSession::new(identity, label, settings.clone(), now));
        let image = prep::downscale(frame.image, config.display_max_width, display);

        match session.step(image, now, &mut detector, &corpus) {
            Ok(outcome) => host.frame(outcome.frame),
            Err(e) => {
                tracing::error!(error = %e, "storing training sample failed");
                return finish(&mut guard, host, WorkerExit::Failed(e.to_string()));
            }
        }

        if session.is_complete() {
            if let Err(e) = registry.assign(label, identity) {
                tracing::error!(
                    error = %e,
                    "persisting label registry failed; keeping in-memory mapping"
                );
            }
            // the saved model predates these samples
            if let Err(e) = discard_model(&config.model_path()) {
                tracing::warn!(error = %e, "removing stale classifier model failed");
            }
            guard.release();
            host.send(HostMessage::EnrollmentComplete {
                label,
                identity: identity.to_string(),
            });
            host.send(HostMessage::IdleFrame);
            tracing::info!(identity, %label, "enrollment complete");
            return WorkerExit::Completed;
        }
    }
}
