//! Display side of the loop
//!
//! This module consolidates:
//! - Frame annotation (overlay.rs)
//! - Preview window and headless sink (window.rs)
//! - Exit signal (exit.rs)

pub mod exit;
pub mod overlay;
pub mod window;

pub use exit::ExitSignal;
pub use overlay::{draw_region_outline, draw_token_boxes};
pub use window::{Display, Headless, PreviewWindow, window_title};
