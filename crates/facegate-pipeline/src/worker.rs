//! Worker threads and their stop handles.
//!
//! Each protocol runs on its own named OS thread and talks to the host only
//! through the [`HostMessage`] channel. Stopping is cooperative: the flag is
//! checked once per frame, before the next read.

use crate::backend::CaptureBackend;
use crate::config::PipelineConfig;
use crate::enrollment::run_enrollment;
use crate::message::{host_channel, HostMessage, HostSender};
use crate::recognition::run_recognition;
use facegate_hw::{Frame, FrameSource, SourceError, SourceGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("spawning worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker thread panicked")]
    WorkerPanicked,
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Enrollment captured every pose.
    Completed,
    /// The stop flag was raised.
    Stopped,
    /// The source ran out of frames.
    EndOfStream,
    /// Setup or the device failed.
    Failed(String),
}

impl WorkerExit {
    /// Terminal message for the host.
    fn host_message(&self) -> HostMessage {
        match self {
            Self::Failed(reason) => HostMessage::ConnectionErrorFrame {
                reason: reason.clone(),
            },
            _ => HostMessage::IdleFrame,
        }
    }
}

/// Read the next frame unless a stop was requested.
pub(crate) fn next_frame<S: FrameSource>(
    guard: &mut SourceGuard<S>,
    stop: &AtomicBool,
) -> Result<Frame, WorkerExit> {
    if stop.load(Ordering::Acquire) {
        tracing::info!("stop requested");
        return Err(WorkerExit::Stopped);
    }
    match guard.read() {
        Ok(frame) => Ok(frame),
        Err(SourceError::EndOfStream) => {
            tracing::info!("frame source ended");
            Err(WorkerExit::EndOfStream)
        }
        Err(e) => {
            tracing::error!(error = %e, "frame read failed");
            Err(WorkerExit::Failed(e.to_string()))
        }
    }
}

/// Release the device, then send the terminal message.
pub(crate) fn finish<S: FrameSource>(
    guard: &mut SourceGuard<S>,
    host: &HostSender,
    exit: WorkerExit,
) -> WorkerExit {
    guard.release();
    host.send(exit.host_message());
    exit
}

/// Report a failure that happened before a device was opened.
pub(crate) fn fail_setup(host: &HostSender, reason: String) -> WorkerExit {
    tracing::error!(%reason, "worker setup failed");
    let exit = WorkerExit::Failed(reason);
    host.send(exit.host_message());
    exit
}

/// Control handle for a running worker. Dropping it requests a stop.
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<WorkerExit>>,
}

impl WorkerHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait for the worker thread to exit.
    pub fn join(mut self) -> Result<WorkerExit, PipelineError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| PipelineError::WorkerPanicked),
            None => Err(PipelineError::WorkerPanicked),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

type Spawned = (WorkerHandle, mpsc::UnboundedReceiver<HostMessage>);

fn spawn<F>(name: &str, run: F) -> Result<Spawned, PipelineError>
where
    F: FnOnce(&AtomicBool, &HostSender) -> WorkerExit + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let (host, rx) = host_channel();
    let flag = stop.clone();
    let thread = std::thread::Builder::new().name(name.to_string()).spawn(move || {
        tracing::info!("worker thread started");
        let exit = run(&flag, &host);
        tracing::info!(?exit, "worker thread exiting");
        exit
    })?;
    Ok((
        WorkerHandle {
            stop,
            thread: Some(thread),
        },
        rx,
    ))
}

/// Start an enrollment worker for `identity`.
pub fn spawn_enrollment<B: CaptureBackend>(
    backend: B,
    config: PipelineConfig,
    identity: String,
) -> Result<Spawned, PipelineError> {
    spawn("facegate-enroll", move |stop, host| {
        run_enrollment(&backend, &config, &identity, stop, host)
    })
}

/// Start a recognition worker.
pub fn spawn_recognition<B: CaptureBackend>(
    backend: B,
    config: PipelineConfig,
) -> Result<Spawned, PipelineError> {
    spawn("facegate-recognize", move |stop, host| {
        run_recognition(&backend, &config, stop, host)
    })
}
