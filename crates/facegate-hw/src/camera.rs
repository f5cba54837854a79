//! Webcam capture over V4L2.

use crate::frame::{self, Frame, FrameError};
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::{Capabilities, Flags};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Requested capture size. Drivers may answer with something else.
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("webcam access denied: {0}")]
    AccessDenied(String),
    #[error("no such webcam: {0}")]
    DeviceNotFound(String),
    #[error("webcam is in use by another process")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot capture video")]
    StreamingNotSupported,
}

impl CameraError {
    /// The platform refused camera access.
    pub fn is_denied(&self) -> bool {
        matches!(self, CameraError::AccessDenied(_))
    }
}

/// A live video source the engine samples frames from.
pub trait VideoSource: Send {
    /// Native frame size in pixels.
    fn dimensions(&self) -> (u32, u32);

    fn capture_frame(&mut self) -> Result<Frame, CameraError>;
}

/// A video capture device found on the system.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera can deliver and we can reduce to grayscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuyv,
    Grey,
    Rgb3,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            b"RGB3" => Some(PixelFormat::Rgb3),
            _ => None,
        }
    }

    fn to_grayscale(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        match self {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height),
            PixelFormat::Grey => frame::grey_plane(buf, width, height),
            PixelFormat::Rgb3 => frame::rgb_to_grayscale(buf, width, height),
        }
    }
}

/// Map an open() failure to a camera error, keeping a permission denial distinct.
fn open_error(device_path: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CameraError::AccessDenied(format!("{device_path}: {e}")),
        io::ErrorKind::NotFound => CameraError::DeviceNotFound(device_path.to_string()),
        _ if e.raw_os_error() == Some(EBUSY) => CameraError::DeviceBusy,
        _ => CameraError::CaptureFailed(format!("{device_path}: {e}")),
    }
}

fn can_capture(caps: &Capabilities) -> bool {
    caps.capabilities.contains(Flags::VIDEO_CAPTURE)
}

/// Ask for YUYV at the capture size and accept any format we can convert.
fn negotiate_format(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("query format: {e}")))?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = CAPTURE_WIDTH;
    fmt.height = CAPTURE_HEIGHT;

    let got = device
        .set_format(&fmt)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!("driver offered {}, need YUYV, GREY or RGB3", got.fourcc))
    })?;

    tracing::info!(width = got.width, height = got.height, fourcc = %got.fourcc, "capture format");
    Ok((got.width, got.height, pixel_format))
}

/// An open V4L2 webcam.
pub struct Camera {
    device: Device,
    path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open and configure a webcam by device path, e.g. `/dev/video0`.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;
        let caps = device.query_caps().map_err(|e| open_error(device_path, e))?;
        if !can_capture(&caps) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, card = %caps.card, driver = %caps.driver, "webcam opened");

        let (width, height, pixel_format) = negotiate_format(&device)?;
        Ok(Self {
            device,
            path: device_path.to_string(),
            width,
            height,
            pixel_format,
        })
    }

    /// Enumerate `/dev/video*` nodes that can capture video.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).and_then(|d| d.query_caps()).ok()?;
                can_capture(&caps).then(|| DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

impl VideoSource for Camera {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Dequeue one buffer and reduce it to grayscale.
    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: start stream: {e}", self.path)))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("{}: dequeue: {e}", self.path)))?;

        let gray = self
            .pixel_format
            .to_grayscale(buf, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("{:?} frame: {e}", self.pixel_format)))?;
        Ok(Frame::new(gray, self.width, self.height, meta.sequence))
    }
}
