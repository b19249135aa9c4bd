//! Fixed region of interest, centered in the negotiated frame

use crate::error::CaptureError;

use super::Frame;

/// ROI rectangle in frame pixel coordinates
///
/// Offsets are signed so that an ROI larger than the frame is representable
/// (and rejected by [`Region::validate`]) instead of wrapping around.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge (exclusive)
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    /// Bottom edge (exclusive)
    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    /// Check if the whole region lies inside a frame of the given size
    pub fn contains(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.width > 0
            && self.height > 0
            && self.right() <= i64::from(frame_width)
            && self.bottom() <= i64::from(frame_height)
    }

    pub fn validate(&self, frame_width: u32, frame_height: u32) -> Result<(), CaptureError> {
        if self.contains(frame_width, frame_height) {
            Ok(())
        } else {
            Err(CaptureError::RegionOutOfBounds {
                region: *self,
                frame_width,
                frame_height,
            })
        }
    }
}

/// Center an ROI of `roi_width`x`roi_height` in the frame (floor division)
pub fn compute_region(frame_width: u32, frame_height: u32, roi_width: u32, roi_height: u32) -> Region {
    let x = (i64::from(frame_width) - i64::from(roi_width)).div_euclid(2);
    let y = (i64::from(frame_height) - i64::from(roi_height)).div_euclid(2);
    Region {
        x: x.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
        y: y.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
        width: roi_width,
        height: roi_height,
    }
}

/// Extract the ROI sub-image from a frame
pub fn crop(frame: &Frame, region: &Region) -> Result<Frame, CaptureError> {
    region.validate(frame.width(), frame.height())?;
    Ok(image::imageops::crop_imm(
        frame,
        region.x as u32,
        region.y as u32,
        region.width,
        region.height,
    )
    .to_image())
}
