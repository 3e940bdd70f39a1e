//! Rectangle overlays for matched faces.

use crate::types::BoundingBox;
use image::{Rgb, RgbImage};

pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Outline thickness scaled to the image, at least 2 px.
fn line_width(image: &RgbImage) -> u32 {
    (image.width().max(image.height()) / 200).max(2)
}

/// Draw a hollow rectangle around `face`, clipped to the image.
///
/// Returns false if the box lies entirely outside the image.
pub fn draw_box(image: &mut RgbImage, face: &BoundingBox, color: Rgb<u8>) -> bool {
    let Some((x0, y0, x1, y1)) = face.clamp_to(image.width(), image.height()) else {
        return false;
    };
    let t = line_width(image).min(x1 - x0).min(y1 - y0);

    for y in y0..=y1 {
        for x in x0..=x1 {
            let on_edge = x < x0 + t || x + t > x1 || y < y0 + t || y + t > y1;
            if on_edge {
                image.put_pixel(x, y, color);
            }
        }
    }
    true
}

/// Copy `image` and outline every face in `faces`.
///
/// Returns `None` when nothing was drawn, so callers only persist
/// images that actually carry an annotation.
pub fn annotate<'a>(image: &RgbImage, faces: impl IntoIterator<Item = &'a BoundingBox>) -> Option<RgbImage> {
    let mut copy = image.clone();
    let mut drawn = 0usize;
    for face in faces {
        if draw_box(&mut copy, face, BOX_COLOR) {
            drawn += 1;
        }
    }
    (drawn > 0).then_some(copy)
}
