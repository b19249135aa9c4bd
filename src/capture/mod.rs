//! Frame acquisition and region of interest handling
//!
//! This module consolidates:
//! - Frame type and source trait (frame.rs)
//! - ROI computation and cropping (region.rs)
//! - GStreamer camera source (camera.rs)

pub mod camera;
pub mod frame;
pub mod region;

pub use camera::Camera;
pub use frame::{Frame, FrameSource};
pub use region::{Region, compute_region, crop};
