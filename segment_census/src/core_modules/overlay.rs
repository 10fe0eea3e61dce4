// THEORY:
// The overlay is the visual proof of the particle analysis: it shows exactly which
// regions of one class survived the minimum-area filter, drawn over the image that
// was classified. Pixels outside surviving blobs are copied untouched so the
// underlying image stays readable.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core_modules::blob_detector::{BlobRegion, Point};
use crate::error::{CensusError, Result};

/// How surviving blobs are marked on the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayStyle {
    /// Only blob pixels that touch the outside of the blob (4-neighbourhood) or
    /// the image border.
    #[default]
    Outline,
    /// Every blob pixel.
    Fill,
}

/// A blob overlay for one (image, class) pair.
#[derive(Debug, Clone)]
pub struct BlobOverlay {
    pub class_label: String,
    pub image: RgbImage,
}

/// Paints `blobs` in `color` over a copy of `source`.
pub fn composite(
    source: &RgbImage,
    blobs: &[BlobRegion],
    class_label: &str,
    color: Rgb<u8>,
    style: OverlayStyle,
) -> Result<BlobOverlay> {
    let (width, height) = source.dimensions();
    let mut image = source.clone();

    for blob in blobs {
        let members: HashSet<Point> = match style {
            OverlayStyle::Outline => blob.pixels.iter().copied().collect(),
            OverlayStyle::Fill => HashSet::new(),
        };

        for point in &blob.pixels {
            if point.x >= width || point.y >= height {
                return Err(CensusError::DimensionMismatch {
                    expected: (width, height),
                    actual: (point.x + 1, point.y + 1),
                });
            }
            if style == OverlayStyle::Outline && !is_edge(*point, &members, width, height) {
                continue;
            }
            image.put_pixel(point.x, point.y, color);
        }
    }

    Ok(BlobOverlay {
        class_label: class_label.to_string(),
        image,
    })
}

fn is_edge(point: Point, members: &HashSet<Point>, width: u32, height: u32) -> bool {
    if point.x == 0 || point.y == 0 || point.x + 1 == width || point.y + 1 == height {
        return true;
    }
    [
        Point { x: point.x - 1, y: point.y },
        Point { x: point.x + 1, y: point.y },
        Point { x: point.x, y: point.y - 1 },
        Point { x: point.x, y: point.y + 1 },
    ]
    .iter()
    .any(|n| !members.contains(n))
}
