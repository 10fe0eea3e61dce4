// THEORY:
// Class colors exist only to make a classification legible to a human. They carry
// no business meaning, but they must be reproducible: the same class index renders
// the same color on every run and every platform, however many classes exist.
//
// Successive class indices step around the hue circle by the golden angle
// (360 * (1 - 1/phi), about 137.5 degrees). Because that step is irrational
// relative to the full circle, no two indices ever land on the same hue and each
// new index falls into one of the largest remaining gaps.

use image::{Rgb, RgbImage};

use crate::core_modules::label_map::LabelMap;

/// The golden angle in degrees, `360 * (1 - 1/phi)`.
pub const GOLDEN_ANGLE: f64 = 137.507_764_050_037_85;

/// Hue in degrees `[0, 360)` assigned to `class_index`.
pub fn hue_for(class_index: u32) -> f64 {
    (class_index as f64 * GOLDEN_ANGLE).rem_euclid(360.0)
}

/// Fully saturated, full brightness color for `class_index`.
///
/// `num_classes` does not influence the color; a class keeps its color as the
/// class list grows.
pub fn color_for(class_index: u32, num_classes: usize) -> Rgb<u8> {
    debug_assert!(num_classes == 0 || (class_index as usize) < num_classes);
    hsv_to_rgb(hue_for(class_index), 1.0, 1.0)
}

/// Standard HSV to RGB conversion. `hue` in degrees, `saturation` and `value` in `[0, 1]`.
pub fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Rgb<u8> {
    let chroma = value * saturation;
    let sector = hue.rem_euclid(360.0) / 60.0;
    let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let m = value - chroma;

    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };

    let to_byte = |c: f64| ((c + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([to_byte(r), to_byte(g), to_byte(b)])
}

/// Renders a label map as an RGB image, one color per class.
pub fn colorize(label_map: &LabelMap) -> RgbImage {
    let palette: Vec<Rgb<u8>> = (0..label_map.num_classes() as u32)
        .map(|i| color_for(i, label_map.num_classes()))
        .collect();
    RgbImage::from_fn(label_map.width(), label_map.height(), |x, y| {
        palette[label_map.get(x, y) as usize]
    })
}
