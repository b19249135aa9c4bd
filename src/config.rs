//! Startup configuration: positional CLI arguments and optional tunables

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::CaptureError;

/// Name of the optional tunables file, looked up next to the executable
pub const SETTINGS_FILE: &str = "roicap.json";

/// Camera and ROI parameters given on the command line
///
/// Built once at startup and handed to every component by reference.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(
    name = "roicap",
    version,
    about = "Capture live images, read text inside a centered ROI and publish it to disk",
    after_help = "e.g. roicap 0 CAM1 640 480 300 100 90"
)]
pub struct CaptureConfig {
    /// Camera index
    pub cam_index: u32,
    /// Display label for the camera (upper-cased)
    #[arg(value_parser = parse_label)]
    pub cam_name: String,
    /// Requested frame width
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub cam_width: u32,
    /// Requested frame height
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub cam_height: u32,
    /// ROI width
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub roi_width: u32,
    /// ROI height
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub roi_height: u32,
    /// Minimum confidence (exclusive, 0-100)
    #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
    pub confidence: u8,
}

fn parse_label(raw: &str) -> Result<String, String> {
    let label = raw.trim();
    if label.is_empty() {
        return Err("camera name must not be empty".to_string());
    }
    Ok(label.to_uppercase())
}

impl CaptureConfig {
    /// Confidence threshold on the engine's 0-100 scale
    pub fn threshold(&self) -> f32 {
        f32::from(self.confidence)
    }
}

/// What gets written when several tokens clear the threshold in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Every accepted token is written in engine order, the last one persists
    #[default]
    Last,
    /// Only the accepted token with the highest confidence is written
    HighestConfidence,
}

/// Tunables read from `roicap.json`; every field has a default
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on a single recognition call
    pub recognition_timeout_ms: u64,
    pub publish_policy: PublishPolicy,
    /// Tesseract language pack
    pub ocr_language: String,
    /// Tesseract page segmentation mode
    pub ocr_psm: Option<i32>,
    /// Tesseract OCR engine mode
    pub ocr_oem: Option<i32>,
    pub ocr_dpi: Option<i32>,
    /// Open the preview window (false runs headless)
    pub display: bool,
    pub exit_key: char,
    /// Overrides the `data` directory next to the executable
    pub data_dir: Option<PathBuf>,
    /// `{index}` is replaced with the camera index
    pub device_path_template: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recognition_timeout_ms: 5000,
            publish_policy: PublishPolicy::Last,
            ocr_language: "eng".to_string(),
            ocr_psm: Some(3),
            ocr_oem: Some(3),
            ocr_dpi: None,
            display: true,
            exit_key: 'q',
            data_dir: None,
            device_path_template: "/dev/video{index}".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        if !path.exists() {
            log::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: Settings = serde_json::from_str(&json).map_err(|e| {
            CaptureError::Configuration(format!("invalid settings in {}: {}", path.display(), e))
        })?;
        settings.validate()?;

        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    fn validate(&self) -> Result<(), CaptureError> {
        if self.recognition_timeout_ms == 0 {
            return Err(CaptureError::Configuration(
                "recognition_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.ocr_language.trim().is_empty() {
            return Err(CaptureError::Configuration(
                "ocr_language must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }

    /// Device node for a camera index
    pub fn device_path(&self, index: u32) -> String {
        self.device_path_template
            .replace("{index}", &index.to_string())
    }

    /// Where `init.txt` and `output.txt` live
    pub fn resolve_data_dir(&self, exec_dir: &Path) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| exec_dir.join("data"))
    }
}

/// Directory holding the running executable
pub fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
