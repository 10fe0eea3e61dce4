// THEORY:
// The `BlobDetector` is the engine of the particle analysis stage. For one class at
// a time it answers the question "how much of this class forms coherent regions of
// a meaningful size?", as opposed to the histogram, which counts every pixel.
//
// Key architectural principles & algorithm steps:
// 1.  **Binary Isolation**: Pixels equal to the requested class index are the
//     foreground; every other class is background. The detector never looks at two
//     classes at once.
// 2.  **Seeding by Raster Scan**: The map is scanned row by row. Every foreground
//     pixel not yet claimed by a region seeds a new region.
// 3.  **Region Growing**: From each seed, an iterative flood fill claims all
//     foreground pixels reachable through the 8-connected neighbourhood
//     (orthogonal and diagonal). The connectivity is fixed for the whole crate so
//     counts stay comparable across runs. Under 8-connectivity every foreground
//     pixel belongs to exactly one region, so no isolated pixel is ever lost.
// 4.  **Size Filtering**: Regions with `area < min_area` are discarded. A minimum
//     of 0 keeps every region.
// 5.  **Order-Independent Aggregation**: Count, total area, average size and
//     percent area are sums and ratios over the surviving regions, so they do not
//     depend on discovery order.
// 6.  **Stateless Utility**: Like the histogram, the detector remembers nothing
//     between calls.

use crate::core_modules::label_map::{percent_of, LabelMap};

/// A pixel coordinate on the label map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// A maximal 8-connected region of pixels that share one class index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRegion {
    /// Discovery index within one `find_blobs` call. Not persistent.
    pub id: u64,
    pub class_index: u32,
    /// Number of pixels in the region.
    pub area: u64,
    /// Every pixel of the region, in discovery order.
    pub pixels: Vec<Point>,
    /// Top-left and bottom-right corners, inclusive.
    pub bounding_box: (Point, Point),
}

/// Aggregate statistics over the blobs that survived the minimum-area filter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlobStatistics {
    pub count: u64,
    pub total_area: u64,
    /// `total_area / count`, or 0 when nothing survived.
    pub avg_size: f64,
    /// `total_area` as a percentage of the whole image.
    pub percent_area: f64,
}

impl BlobStatistics {
    pub fn from_blobs(blobs: &[BlobRegion], image_pixels: u64) -> Self {
        let count = blobs.len() as u64;
        let total_area: u64 = blobs.iter().map(|b| b.area).sum();
        let avg_size = if count == 0 {
            0.0
        } else {
            total_area as f64 / count as f64
        };
        Self {
            count,
            total_area,
            avg_size,
            percent_area: percent_of(total_area, image_pixels),
        }
    }
}

pub mod blob_detector {
    use super::*;

    /// Offsets of the 8-connected neighbourhood.
    const NEIGHBOURS: [(i64, i64); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];

    /// Finds every connected region of `class_index`, regardless of size.
    pub fn find_blobs(label_map: &LabelMap, class_index: u32) -> Vec<BlobRegion> {
        let width = label_map.width();
        let height = label_map.height();
        let labels = label_map.labels();
        let mut visited = vec![false; labels.len()];
        let mut blobs = Vec::new();
        let mut blob_id_counter = 0;

        for y in 0..height {
            for x in 0..width {
                let index = y as usize * width as usize + x as usize;
                if visited[index] || labels[index] != class_index {
                    continue;
                }
                let blob = grow_blob(Point { x, y }, label_map, class_index, &mut visited, blob_id_counter);
                blobs.push(blob);
                blob_id_counter += 1;
            }
        }

        blobs
    }

    /// Keeps only regions with at least `min_area` pixels.
    pub fn filter_blobs(blobs: Vec<BlobRegion>, min_area: u64) -> Vec<BlobRegion> {
        blobs.into_iter().filter(|b| b.area >= min_area).collect()
    }

    /// The regions of `class_index` that pass the minimum-area filter.
    pub fn find_filtered_blobs(label_map: &LabelMap, class_index: u32, min_area: u64) -> Vec<BlobRegion> {
        filter_blobs(find_blobs(label_map, class_index), min_area)
    }

    /// Runs the whole particle analysis for one class and aggregates the result.
    ///
    /// A class with no pixels and a class whose regions are all too small both
    /// yield `BlobStatistics::default()`.
    pub fn detect_blobs(label_map: &LabelMap, class_index: u32, min_area: u64) -> BlobStatistics {
        let blobs = find_filtered_blobs(label_map, class_index, min_area);
        BlobStatistics::from_blobs(&blobs, label_map.pixel_count())
    }

    /// Iterative flood fill from `seed` over the 8-connected neighbourhood.
    fn grow_blob(
        seed: Point,
        label_map: &LabelMap,
        class_index: u32,
        visited: &mut [bool],
        blob_id: u64,
    ) -> BlobRegion {
        let width = label_map.width() as i64;
        let height = label_map.height() as i64;
        let labels = label_map.labels();

        let mut pixels: Vec<Point> = Vec::new();
        let mut stack: Vec<Point> = vec![seed];
        visited[(seed.y as i64 * width + seed.x as i64) as usize] = true;

        let mut min = seed;
        let mut max = seed;

        while let Some(current) = stack.pop() {
            pixels.push(current);
            min.x = min.x.min(current.x);
            min.y = min.y.min(current.y);
            max.x = max.x.max(current.x);
            max.y = max.y.max(current.y);

            for (dx, dy) in NEIGHBOURS {
                let nx = current.x as i64 + dx;
                let ny = current.y as i64 + dy;
                if nx < 0 || nx >= width || ny < 0 || ny >= height {
                    continue;
                }
                let index = (ny * width + nx) as usize;
                if !visited[index] && labels[index] == class_index {
                    visited[index] = true;
                    stack.push(Point {
                        x: nx as u32,
                        y: ny as u32,
                    });
                }
            }
        }

        BlobRegion {
            id: blob_id,
            class_index,
            area: pixels.len() as u64,
            pixels,
            bounding_box: (min, max),
        }
    }
}
