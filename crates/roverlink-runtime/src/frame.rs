//! [`FrameProcessor`] – per-frame image transformation applied before a
//! camera frame is forwarded downstream.
//!
//! The reference processor, [`GrayscaleProcessor`], decodes the frame,
//! converts it to single-channel luminance and re-encodes it in the container
//! format it arrived in.  JPEG and PNG are supported.
//!
//! # Example
//!
//! ```rust
//! use roverlink_runtime::frame::{FrameProcessor, GrayscaleProcessor};
//!
//! let err = GrayscaleProcessor.process_frame(b"definitely not an image");
//! assert!(err.is_err());
//! ```

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use roverlink_types::RelayError;

/// Transforms one encoded camera frame into the bytes sent downstream.
///
/// Implementations must be pure with respect to the frame: the same input
/// always yields the same output.
pub trait FrameProcessor: Send {
    /// # Errors
    ///
    /// [`RelayError::Decode`] when `frame` is not a readable image,
    /// [`RelayError::Encode`] when the result cannot be written back.
    fn process_frame(&self, frame: &[u8]) -> Result<Vec<u8>, RelayError>;
}

/// Converts frames to 8-bit grayscale, keeping the original container.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrayscaleProcessor;

impl FrameProcessor for GrayscaleProcessor {
    fn process_frame(&self, frame: &[u8]) -> Result<Vec<u8>, RelayError> {
        let format = image::guess_format(frame).map_err(|e| RelayError::Decode(e.to_string()))?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Err(RelayError::Decode(format!("unsupported frame format {format:?}")));
        }

        let decoded = image::load_from_memory_with_format(frame, format)
            .map_err(|e| RelayError::Decode(e.to_string()))?;
        // Alpha is dropped: JPEG cannot carry it and consumers expect one channel.
        let gray = DynamicImage::ImageLuma8(decoded.to_luma8());

        let mut out = Cursor::new(Vec::with_capacity(frame.len()));
        gray.write_to(&mut out, format)
            .map_err(|e| RelayError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }
}

/// Forwards frames untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessor;

impl FrameProcessor for PassthroughProcessor {
    fn process_frame(&self, frame: &[u8]) -> Result<Vec<u8>, RelayError> {
        Ok(frame.to_vec())
    }
}
