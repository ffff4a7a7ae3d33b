//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use image::GrayImage;
use rollcall_core::FrameSource;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Device paths probed, in order, when no specific camera is configured.
pub const AUTO_PROBE_DEVICES: [&str; 4] = ["/dev/video0", "/dev/video1", "/dev/video2", "/dev/video3"];

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("no usable camera among: {0}")]
    NoCamera(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

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
    /// YUYV 4:2:2 packed (2 bytes/pixel, Y channel extracted).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

/// V4L2 camera device handle. The device is closed on drop.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera by path (e.g. "/dev/video0") and request
    /// `width` × `height`. The driver may negotiate a different size.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"Y16 ") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            ?pixel_format,
            "opened camera"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Open the first device in `candidates` that works.
    pub fn open_first(candidates: &[&str], width: u32, height: u32) -> Result<Self, CameraError> {
        for path in candidates {
            match Self::open(path, width, height) {
                Ok(camera) => return Ok(camera),
                Err(e) => tracing::debug!(device = path, error = %e, "camera candidate rejected"),
            }
        }
        Err(CameraError::NoCamera(candidates.join(", ")))
    }

    /// Open `device`, or probe [`AUTO_PROBE_DEVICES`] when it is `"auto"`.
    pub fn open_configured(device: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if device == "auto" {
            Self::open_first(&AUTO_PROBE_DEVICES, width, height)
        } else {
            Self::open(device, width, height)
        }
    }

    /// Start streaming. Frames are converted to grayscale and optionally mirrored.
    pub fn stream(&self, mirror: bool) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(FrameStream {
            camera: self,
            stream,
            mirror,
        })
    }

    /// Convert a raw buffer to grayscale based on the negotiated format.
    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;
        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(FrameError::InvalidLength {
                        expected: pixels,
                        actual: buf.len(),
                    }
                    .into());
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Y16 => Ok(frame::y16_to_grayscale(buf, self.width, self.height)?),
            PixelFormat::Yuyv => Ok(frame::yuyv_to_grayscale(buf, self.width, self.height)?),
        }
    }

    /// Capture-capable devices among `/dev/video0` .. `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16).filter_map(|i| describe(&format!("/dev/video{i}"))).collect()
    }
}

fn describe(path: &str) -> Option<DeviceInfo> {
    if !Path::new(path).exists() {
        return None;
    }
    let caps = Device::with_path(path).ok()?.query_caps().ok()?;
    caps.capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        .then(|| DeviceInfo {
            path: path.to_string(),
            name: caps.card,
            driver: caps.driver,
            bus: caps.bus,
        })
}

/// An active capture stream borrowing its camera.
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
    mirror: bool,
}

impl FrameStream<'_> {
    /// Dequeue the next frame as grayscale.
    pub fn next_raw(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let data = self.camera.buf_to_grayscale(buf)?;

        Ok(Frame {
            data,
            width: self.camera.width,
            height: self.camera.height,
            sequence,
        })
    }
}

impl FrameSource for FrameStream<'_> {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<GrayImage, CameraError> {
        let frame = self.next_raw()?;
        tracing::trace!(seq = frame.sequence, "captured frame");
        Ok(frame.into_image(self.mirror)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/rollcall-missing", 640, 480).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_open_first_reports_all_candidates() {
        let err = Camera::open_first(&["/dev/rollcall-a", "/dev/rollcall-b"], 640, 480)
            .err()
            .unwrap();
        match err {
            CameraError::NoCamera(tried) => assert_eq!(tried, "/dev/rollcall-a, /dev/rollcall-b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_open_configured_uses_explicit_path() {
        let err = Camera::open_configured("/dev/rollcall-missing", 640, 480).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
