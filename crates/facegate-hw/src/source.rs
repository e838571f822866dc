//! Frame source abstraction and its exactly-once release guard.

use crate::frame::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("end of stream")]
    EndOfStream,
    #[error("capture failed: {0}")]
    Capture(String),
}

/// An open video device producing frames.
///
/// `release` frees the device. Callers go through [`SourceGuard`], which
/// calls it exactly once.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Frame, SourceError>;
    fn release(&mut self);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn read(&mut self) -> Result<Frame, SourceError> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Owns an open source and releases it exactly once: on the first
/// [`release`](Self::release) call, or on drop if that never happens.
pub struct SourceGuard<S: FrameSource> {
    source: Option<S>,
}

impl<S: FrameSource> SourceGuard<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// Read the next frame. A released guard reports end of stream.
    pub fn read(&mut self) -> Result<Frame, SourceError> {
        match self.source.as_mut() {
            Some(source) => source.read(),
            None => Err(SourceError::EndOfStream),
        }
    }

    /// Release the device. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        match self.source.take() {
            Some(mut source) => {
                source.release();
                tracing::debug!("frame source released");
                true
            }
            None => false,
        }
    }
}

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        frames: usize,
        releases: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn read(&mut self) -> Result<Frame, SourceError> {
            if self.frames == 0 {
                return Err(SourceError::EndOfStream);
            }
            self.frames -= 1;
            Ok(Frame::new(RgbImage::new(4, 4), 0))
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn guard(frames: usize) -> (SourceGuard<CountingSource>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            frames,
            releases: releases.clone(),
        };
        (SourceGuard::new(source), releases)
    }

    #[test]
    fn test_explicit_release_then_drop() {
        let (mut g, releases) = guard(1);
        assert!(g.release());
        assert!(!g.release());
        drop(g);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let (g, releases) = guard(1);
        drop(g);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_after_release_is_end_of_stream() {
        let (mut g, _) = guard(3);
        assert!(g.read().is_ok());
        assert!(g.release());
        assert!(matches!(g.read(), Err(SourceError::EndOfStream)));
    }
}
