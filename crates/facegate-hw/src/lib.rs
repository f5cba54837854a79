//! Webcam capture.
//!
//! Provides the [`VideoSource`] capability and its V4L2 implementation.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, VideoSource};
pub use frame::Frame;
