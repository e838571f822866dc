//! facegate-core — the pieces of the face pipeline that do not touch a device.
//!
//! Label registry and training corpus persistence, frame preparation helpers,
//! and the detector/classifier capabilities the workers drive.

pub mod classifier;
pub mod corpus;
pub mod detector;
pub mod prep;
pub mod registry;
pub mod types;

pub use classifier::{ClassifierError, FaceClassifier, LbphClassifier};
pub use corpus::{CorpusError, TrainingCorpus};
pub use detector::{DetectorError, FaceDetector, ScrfdDetector};
pub use registry::{LabelPolicy, LabelRegistry, RegistryError};
pub use types::{confidence, BoundingBox, Label, Prediction, TrainingSample};
