//! Annotation drawing onto live frames using tiny-skia

use tiny_skia::{LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform};

use crate::capture::{Frame, Region};
use crate::recognition::{BoundingBox, RecognizedToken};

/// ROI outline color (magenta) and width
pub const REGION_COLOR: [u8; 4] = [255, 0, 255, 255];
pub const REGION_THICKNESS: f32 = 2.0;

/// Accepted token box color (green) and width
pub const TOKEN_COLOR: [u8; 4] = [0, 255, 0, 255];
pub const TOKEN_THICKNESS: f32 = 1.0;

/// Convert the frame to a Pixmap, apply drawing function, and copy back
fn with_pixmap(img: &mut Frame, f: impl FnOnce(&mut Pixmap)) {
    let Some(size) = tiny_skia::IntSize::from_wh(img.width(), img.height()) else {
        return;
    };
    let Some(mut pixmap) = Pixmap::from_vec(img.as_raw().clone(), size) else {
        return;
    };

    f(&mut pixmap);

    img.copy_from_slice(pixmap.data());
}

fn stroke_rect(pixmap: &mut Pixmap, rect: (f32, f32, f32, f32), color: [u8; 4], thickness: f32) {
    // Stroke through pixel centers so edges land on whole pixels
    let (left, top, right, bottom) = (rect.0 + 0.5, rect.1 + 0.5, rect.2 + 0.5, rect.3 + 0.5);

    let mut pb = PathBuilder::new();
    pb.move_to(left, top);
    pb.line_to(right, top);
    pb.line_to(right, bottom);
    pb.line_to(left, bottom);
    pb.close();
    let Some(path) = pb.finish() else {
        return;
    };

    let [r, g, b, a] = color;
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, a);
    paint.anti_alias = false;

    let stroke = Stroke {
        width: thickness,
        line_cap: LineCap::Square,
        line_join: LineJoin::Miter,
        ..Default::default()
    };
    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
}

/// Outline the ROI on the full frame
pub fn draw_region_outline(img: &mut Frame, region: &Region) {
    with_pixmap(img, |pixmap| {
        let left = region.x as f32;
        let top = region.y as f32;
        stroke_rect(
            pixmap,
            (left, top, left + region.width as f32, top + region.height as f32),
            REGION_COLOR,
            REGION_THICKNESS,
        );
    });
}

/// Box each accepted token, translating from ROI to frame coordinates
pub fn draw_token_boxes(img: &mut Frame, tokens: &[RecognizedToken], region: &Region) {
    if tokens.is_empty() {
        return;
    }

    with_pixmap(img, |pixmap| {
        for token in tokens {
            let BoundingBox {
                left,
                top,
                width,
                height,
            } = token.bounding_box.translate(region.x, region.y);
            stroke_rect(
                pixmap,
                (
                    left as f32,
                    top as f32,
                    (left + width) as f32,
                    (top + height) as f32,
                ),
                TOKEN_COLOR,
                TOKEN_THICKNESS,
            );
        }
    });
}
