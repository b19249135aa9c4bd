//! Recognized text tokens

/// Pixel box of a token, relative to the image it was recognized in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Shift the box by the given offset (e.g. ROI origin to frame coordinates)
    pub fn translate(&self, dx: i32, dy: i32) -> BoundingBox {
        BoundingBox {
            left: self.left + dx,
            top: self.top + dy,
            ..*self
        }
    }
}

/// One word reported by the recognition engine
#[derive(Clone, Debug, PartialEq)]
pub struct RecognizedToken {
    pub text: String,
    /// Relative to the ROI origin
    pub bounding_box: BoundingBox,
    /// Engine certainty, 0-100 (structural rows report negative values)
    pub confidence: f32,
}

impl RecognizedToken {
    pub fn new(text: impl Into<String>, bounding_box: BoundingBox, confidence: f32) -> Self {
        Self {
            text: text.into(),
            bounding_box,
            confidence,
        }
    }

    /// Whether there is anything worth publishing
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}
