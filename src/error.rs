//! Error taxonomy for the capture pipeline
//!
//! Fatal variants end the run before or during initialization; the rest are
//! recovered inside a single cycle and only logged.

use std::path::PathBuf;
use std::time::Duration;

use crate::capture::Region;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Bad arguments or settings, nothing acquired yet
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("could not open camera {index}: {reason}")]
    DeviceUnavailable { index: u32, reason: String },

    /// Treated as end of stream by the loop
    #[error("failed to capture frame: {0}")]
    FrameRead(String),

    #[error("region {region:?} does not fit in a {frame_width}x{frame_height} frame")]
    RegionOutOfBounds {
        region: Region,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("recognition failed: {0}")]
    Recognition(String),

    #[error("recognition did not finish within {0:?}")]
    RecognitionTimeout(Duration),

    #[error("failed to publish {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("display error: {0}")]
    Display(String),
}

impl CaptureError {
    /// Process exit status for an error that ended the run
    pub fn exit_code(&self) -> u8 {
        match self {
            CaptureError::Configuration(_) | CaptureError::RegionOutOfBounds { .. } => 2,
            CaptureError::FrameRead(_) => 0,
            _ => 1,
        }
    }
}
