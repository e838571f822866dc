//! facegate-hw — frame sources for the face pipeline.
//!
//! Provides the `FrameSource` abstraction, its release guard, and a
//! V4L2-backed camera implementation.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{device_path, Camera, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{FrameSource, SourceError, SourceGuard};
