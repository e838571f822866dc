//! facegate-pipeline — the enrollment and recognition workers.
//!
//! Each worker owns one frame source for its lifetime, runs on its own
//! thread and reports to the host over a [`HostMessage`] channel.

pub mod backend;
pub mod config;
pub mod enrollment;
pub mod message;
pub mod recognition;
pub mod worker;

#[cfg(test)]
mod testing;

pub use backend::{CaptureBackend, DeviceBackend};
pub use config::{default_config_path, ConfigError, PipelineConfig};
pub use enrollment::{
    run_enrollment, EnrollmentSession, EnrollmentSettings, EnrollmentState, Pose, POSES,
};
pub use message::{host_channel, FaceAnnotation, HostMessage, HostSender, Overlay, RenderedFrame};
pub use recognition::{
    discard_model, run_recognition, train_model, Cycle, FrameCache, ModelOrigin, RecognitionError,
    RecognitionSettings, Recognizer,
};
pub use worker::{spawn_enrollment, spawn_recognition, PipelineError, WorkerExit, WorkerHandle};
