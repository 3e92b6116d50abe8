//! Frame type and pixel helpers: YUYV conversion, downsampling, image I/O.

use chrono::{DateTime, Local};
use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Local>,
    /// Driver sequence number (0 for frames that did not come from a camera).
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Wrap a grayscale buffer, stamping it with the current time.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Local::now(),
            sequence: 0,
        })
    }

    /// Decode an image file (any format the `image` crate understands) to grayscale.
    pub fn load(path: &Path) -> Result<Self, FrameError> {
        let gray = image::open(path)?.to_luma8();
        let (width, height) = gray.dimensions();
        Self::from_gray(gray.into_raw(), width, height)
    }

    /// Box-average downsample by an integer linear factor.
    ///
    /// A factor of 4 turns 640x480 into 160x120. Trailing rows/columns that do
    /// not fill a whole block are dropped. Factors of 0 or 1, or a factor
    /// larger than either dimension, return an unmodified copy.
    pub fn downsample(&self, factor: u32) -> Frame {
        if factor <= 1 || factor > self.width || factor > self.height {
            return self.clone();
        }

        let w = self.width as usize;
        let f = factor as usize;
        let out_w = w / f;
        let out_h = self.height as usize / f;
        let block = (f * f) as u32;

        let mut data = Vec::with_capacity(out_w * out_h);
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut sum = 0u32;
                for y in oy * f..(oy + 1) * f {
                    let row = y * w;
                    for x in ox * f..(ox + 1) * f {
                        sum += self.data[row + x] as u32;
                    }
                }
                data.push(((sum + block / 2) / block) as u8);
            }
        }

        Frame {
            data,
            width: out_w as u32,
            height: out_h as u32,
            captured_at: self.captured_at,
            sequence: self.sequence,
        }
    }

    fn to_image(&self) -> Result<GrayImage, FrameError> {
        GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected: (self.width as usize) * (self.height as usize),
                actual: self.data.len(),
            },
        )
    }

    /// Write the frame to `path` as a JPEG.
    pub fn write_jpeg(&self, path: &Path) -> Result<(), FrameError> {
        self.to_image()?.save_with_format(path, ImageFormat::Jpeg)?;
        Ok(())
    }

    /// Encode the frame in memory.
    pub fn encode(&self, format: ImageFormat) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::new();
        self.to_image()?.write_to(&mut Cursor::new(&mut buf), format)?;
        Ok(buf)
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid pixel buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}
