//! Frame type and the camera abstraction the capture loop reads from

use image::RgbaImage;

use crate::error::CaptureError;

/// A decoded RGBA frame at the camera's negotiated resolution
pub type Frame = RgbaImage;

/// Source of live frames (a camera, or a fake in tests)
///
/// Implementations hold the device exclusively until [`FrameSource::release`]
/// is called or the value is dropped.
pub trait FrameSource {
    /// Negotiated (width, height); may differ from what was requested
    fn resolution(&self) -> (u32, u32);

    /// Block until the next frame is available
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Give the device back. Must be safe to call more than once.
    fn release(&mut self);
}
