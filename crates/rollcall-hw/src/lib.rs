//! rollcall-hw — camera capture for the attendance pipeline.
//!
//! Opens V4L2 devices, negotiates a grayscale-convertible pixel format and
//! exposes the capture stream as a [`rollcall_core::FrameSource`].

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat, AUTO_PROBE_DEVICES};
pub use frame::{Frame, FrameError};
