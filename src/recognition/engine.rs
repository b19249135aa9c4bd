//! OCR engine interface and the rusty-tesseract backend

use std::collections::HashMap;

use rusty_tesseract::{Args, Image};

use super::{BoundingBox, RecognizedToken};
use crate::capture::Frame;
use crate::config::Settings;
use crate::error::CaptureError;

/// Turns an ROI image into word tokens
///
/// Calls may block for a long and variable time; the engine is moved onto a
/// worker thread, hence `Send`.
pub trait RecognitionEngine: Send {
    fn recognize(&self, image: &Frame) -> Result<Vec<RecognizedToken>, CaptureError>;
}

/// Tesseract via the system `tesseract` binary
pub struct TesseractEngine {
    args: Args,
}

impl TesseractEngine {
    pub fn new(settings: &Settings) -> Self {
        match rusty_tesseract::get_tesseract_version() {
            Ok(version) => log::info!("Using tesseract {}", version.trim()),
            Err(e) => log::error!("Tesseract is not available, recognition will fail: {}", e),
        }

        Self {
            args: Args {
                lang: settings.ocr_language.clone(),
                config_variables: HashMap::new(),
                dpi: settings.ocr_dpi,
                psm: settings.ocr_psm,
                oem: settings.ocr_oem,
            },
        }
    }
}

impl RecognitionEngine for TesseractEngine {
    fn recognize(&self, image: &Frame) -> Result<Vec<RecognizedToken>, CaptureError> {
        let dynamic_img = image::DynamicImage::ImageRgba8(image.clone());
        let tess_img = Image::from_dynamic_image(&dynamic_img).map_err(|e| {
            CaptureError::Recognition(format!("Failed to create tesseract image: {}", e))
        })?;

        let output = rusty_tesseract::image_to_data(&tess_img, &self.args)
            .map_err(|e| CaptureError::Recognition(format!("Tesseract OCR failed: {}", e)))?;

        log::debug!(
            "Tesseract returned {} data entries for {}x{} ROI",
            output.data.len(),
            image.width(),
            image.height()
        );

        // Rows come back in page/block/line/word order; keep it
        Ok(output
            .data
            .into_iter()
            .map(|d| {
                RecognizedToken::new(
                    d.text,
                    BoundingBox::new(d.left, d.top, d.width, d.height),
                    d.conf,
                )
            })
            .collect())
    }
}
