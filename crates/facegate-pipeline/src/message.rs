//! Messages a worker sends to its host.
//!
//! Delivery is one-way over an unbounded channel: a send never blocks the
//! worker, and messages arrive in the order they were produced.

use facegate_core::{BoundingBox, Label};
use image::RgbImage;
use tokio::sync::mpsc;

/// Text attached to one face box.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnnotation {
    pub bbox: BoundingBox,
    pub text: String,
}

/// Text overlay for a rendered frame. Boxes and the status bar are already
/// drawn into the image; the host renders these strings in its own font.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    /// Notification shown in the status bar ("Registering...", "Starting in 4").
    pub status: Option<String>,
    /// Current pose caption ("Pose: Smile").
    pub pose: Option<String>,
    pub faces: Vec<FaceAnnotation>,
}

#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub image: RgbImage,
    pub overlay: Overlay,
}

impl RenderedFrame {
    pub fn plain(image: RgbImage) -> Self {
        Self {
            image,
            overlay: Overlay::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum HostMessage {
    /// Work is starting (device open, model build); show a placeholder.
    Loading,
    RenderedFrame(RenderedFrame),
    IdentityRecognized { identity: String, confidence: i32 },
    EnrollmentComplete { label: Label, identity: String },
    /// The worker stopped normally; show the idle camera view.
    IdleFrame,
    /// The worker could not run or lost the device.
    ConnectionErrorFrame { reason: String },
}

impl HostMessage {
    /// Whether this message ends the worker's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::IdleFrame | Self::ConnectionErrorFrame { .. })
    }
}

/// Worker side of the host channel.
#[derive(Debug, Clone)]
pub struct HostSender {
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl HostSender {
    /// Send without blocking. A host that has gone away is not an error for the worker.
    pub fn send(&self, msg: HostMessage) {
        if self.tx.send(msg).is_err() {
            tracing::trace!("host receiver dropped; message discarded");
        }
    }

    pub fn frame(&self, frame: RenderedFrame) {
        self.send(HostMessage::RenderedFrame(frame));
    }
}

pub fn host_channel() -> (HostSender, mpsc::UnboundedReceiver<HostMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HostSender { tx }, rx)
}
