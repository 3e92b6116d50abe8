//! Camera capability and its V4L2 implementation via the `v4l` crate.

use crate::frame::{self, Frame};
use chrono::Local;
use std::path::{Path, PathBuf};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Resolution requested from the driver; it may settle on something else.
const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("{0} cannot capture video")]
    StreamingNotSupported(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// An open frame source. Dropping it releases the device.
pub trait FrameSource: Send {
    /// Read the next frame.
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Opens frame sources by camera index.
pub trait CameraProvider: Send + Sync {
    fn open(&self, index: u32) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Opens `/dev/video<index>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Provider;

impl CameraProvider for V4l2Provider {
    fn open(&self, index: u32) -> Result<Box<dyn FrameSource>, CameraError> {
        let camera = Camera::open(format!("/dev/video{index}"))?;
        Ok(Box::new(camera))
    }
}

/// Capture formats we know how to turn into 8-bit luma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUYV 4:2:2; luma is every even byte.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    /// Extract `width * height` luma bytes from a raw driver buffer.
    pub fn to_luma(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
        let pixels = width as usize * height as usize;
        let short = |needed: usize| {
            CameraError::ReadFailed(format!(
                "{self:?} buffer holds {} bytes, {needed} needed",
                buf.len()
            ))
        };

        match self {
            Self::Grey => buf.get(..pixels).map(<[u8]>::to_vec).ok_or_else(|| short(pixels)),
            // High byte of each little-endian sample.
            Self::Y16 => buf
                .get(..pixels * 2)
                .map(|samples| samples.chunks_exact(2).map(|s| s[1]).collect())
                .ok_or_else(|| short(pixels * 2)),
            Self::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
                .map_err(|e| CameraError::ReadFailed(format!("YUYV conversion: {e}"))),
        }
    }
}

/// An open V4L2 capture device producing grayscale frames.
pub struct Camera {
    device: Device,
    path: PathBuf,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Camera {
    /// Open a device node such as `/dev/video0` and negotiate a capture format.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CameraError> {
        let path = path.into();
        let shown = path.display().to_string();
        if !Path::new(&path).exists() {
            return Err(CameraError::DeviceNotFound(shown));
        }

        let device = Device::with_path(&path).map_err(|e| match e.raw_os_error() {
            Some(16) => CameraError::DeviceBusy(shown.clone()),
            _ => CameraError::DeviceNotFound(format!("{shown}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::DeviceNotFound(format!("{shown}: query caps: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported(shown));
        }

        let mut requested = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("read format: {e}")))?;
        requested.fourcc = FourCC::new(b"YUYV");
        requested.width = REQUESTED_WIDTH;
        requested.height = REQUESTED_HEIGHT;

        let actual = device
            .set_format(&requested)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
        let format = PixelFormat::from_fourcc(actual.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "driver chose {}, need YUYV, GREY or Y16",
                actual.fourcc
            ))
        })?;

        tracing::info!(
            device = %shown,
            card = %caps.card,
            width = actual.width,
            height = actual.height,
            format = ?format,
            "camera opened"
        );

        Ok(Self {
            device,
            path,
            width: actual.width,
            height: actual.height,
            format,
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }
}

impl FrameSource for Camera {
    /// Dequeue one buffer through a short-lived mmap stream and convert it to luma.
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::ReadFailed(format!("mmap stream: {e}")))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::ReadFailed(format!("dequeue: {e}")))?;

        Ok(Frame {
            data: self.format.to_luma(buf, self.width, self.height)?,
            width: self.width,
            height: self.height,
            captured_at: Local::now(),
            sequence: meta.sequence,
        })
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.path.display(), "camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist").err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_provider_maps_index_to_path() {
        let err = V4l2Provider.open(4095).err().unwrap();
        assert!(err.to_string().contains("/dev/video4095"));
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_grey_trims_padding() {
        let luma = PixelFormat::Grey.to_luma(&[1, 2, 3, 4, 99], 2, 2).unwrap();
        assert_eq!(luma, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let luma = PixelFormat::Y16.to_luma(&[0x10, 0xAB, 0xFF, 0x01], 2, 1).unwrap();
        assert_eq!(luma, vec![0xAB, 0x01]);
    }

    #[test]
    fn test_short_buffer_is_read_failure() {
        let err = PixelFormat::Y16.to_luma(&[0; 3], 2, 1).unwrap_err();
        assert!(matches!(err, CameraError::ReadFailed(_)));
    }
}
