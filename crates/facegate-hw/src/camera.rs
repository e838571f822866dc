//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::{FrameSource, SourceError};
use image::RgbImage;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb3,
    /// 8-bit grayscale (common IR camera output).
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"RGB3" => Some(Self::Rgb3),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Resolve a configured camera id: a bare index `N` means `/dev/videoN`.
pub fn device_path(device: &str) -> String {
    let device = device.trim();
    if !device.is_empty() && device.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{device}")
    } else {
        device.to_string()
    }
}

/// Streaming V4L2 camera. Dropping the stream stops capture and closes the device.
pub struct Camera {
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a camera by path (`/dev/video0`) or index (`0`) and start streaming.
    pub fn open(device: &str) -> Result<Self, SourceError> {
        let device_path = device_path(device);
        if !Path::new(&device_path).exists() {
            return Err(SourceError::DeviceUnavailable(format!("{device_path}: no such device")));
        }

        let dev = Device::with_path(&device_path)
            .map_err(|e| SourceError::DeviceUnavailable(format!("{device_path}: {e}")))?;

        let unavailable = |what: &str, e: std::io::Error| {
            SourceError::DeviceUnavailable(format!("{device_path}: {what}: {e}"))
        };
        let caps = dev.query_caps().map_err(|e| unavailable("query caps", e))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(SourceError::DeviceUnavailable(format!(
                "{device_path}: not a video capture device"
            )));
        }
        tracing::info!(
            device = %device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        // Prefer YUYV; accept RGB3 or GREY if the driver insists.
        let mut fmt = dev.format().map_err(|e| unavailable("get format", e))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;
        let negotiated = dev.set_format(&fmt).map_err(|e| unavailable("set format", e))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            SourceError::DeviceUnavailable(format!(
                "{device_path}: unsupported pixel format {:?} (need YUYV, RGB3 or GREY)",
                negotiated.fourcc
            ))
        })?;

        let stream = MmapStream::with_buffers(&dev, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| unavailable("mmap stream", e))?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "negotiated format"
        );

        Ok(Self {
            stream: Some(stream),
            width: negotiated.width,
            height: negotiated.height,
            device_path,
            pixel_format,
        })
    }

    fn decode(&self, buf: &[u8]) -> Result<RgbImage, SourceError> {
        let decoded = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Rgb3 => frame::rgb3_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height),
        };
        decoded.map_err(|e| SourceError::Capture(e.to_string()))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn read(&mut self) -> Result<Frame, SourceError> {
        let stream = self.stream.as_mut().ok_or(SourceError::EndOfStream)?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| {
                SourceError::Capture(format!("{}: dequeue buffer: {e}", self.device_path))
            })?;
        let sequence = meta.sequence;
        let buf = buf.to_vec();
        let image = self.decode(&buf)?;
        Ok(Frame::new(image, sequence))
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(device = %self.device_path, "released camera");
        }
    }
}
