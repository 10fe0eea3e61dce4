// THEORY:
// The `LabelMap` is the hand-off point between the external pixel classifier and
// every analysis component in this crate. It is a flat, row-major grid of class
// indices, one per pixel.
//
// Key architectural principles:
// 1.  **Validated on Construction**: A map can only be built if its buffer matches
//     its dimensions and every value lies inside the class range declared by its
//     producer. Downstream components never re-check either property.
// 2.  **Transient**: A map lives for exactly one image. It is produced by the
//     classifier, read by the analyzer and the blob detector, and then dropped.
// 3.  **Histogram as the Full-Area Measure**: The "complete area" of a class is a
//     single pass over the buffer counting occurrences. Unlike the blob statistics
//     it ignores connectivity, so it includes every tiny fragment.

use crate::error::{CensusError, Result};

/// A row-major grid of class indices produced by a pixel classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    width: u32,
    height: u32,
    /// The number of classes the producer declared. Every label is below this.
    num_classes: usize,
    labels: Vec<u32>,
}

impl LabelMap {
    pub fn new(width: u32, height: u32, num_classes: usize, labels: Vec<u32>) -> Result<Self> {
        let expected_len = width as usize * height as usize;
        if labels.len() != expected_len {
            return Err(CensusError::DimensionMismatch {
                expected: (width, height),
                actual: (labels.len() as u32, 1),
            });
        }
        if let Some(&value) = labels.iter().find(|&&v| v as usize >= num_classes) {
            return Err(CensusError::LabelOutOfRange { value, num_classes });
        }
        Ok(Self {
            width,
            height,
            num_classes,
            labels,
        })
    }

    /// Builds a map from nested rows. All rows must have the same length.
    pub fn from_rows(num_classes: usize, rows: &[&[u32]]) -> Result<Self> {
        let height = rows.len() as u32;
        let width = rows.first().map_or(0, |r| r.len()) as u32;
        let mut labels = Vec::with_capacity(width as usize * height as usize);
        for row in rows {
            if row.len() as u32 != width {
                return Err(CensusError::DimensionMismatch {
                    expected: (width, height),
                    actual: (row.len() as u32, height),
                });
            }
            labels.extend_from_slice(row);
        }
        Self::new(width, height, num_classes, labels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// The class index at `(x, y)`. Panics when out of bounds, like slice indexing.
    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.labels[y as usize * self.width as usize + x as usize]
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }
}

/// Per-class pixel counts for one label map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaHistogram {
    counts: Vec<u64>,
    total_pixels: u64,
}

impl AreaHistogram {
    pub fn pixel_count(&self, class_index: usize) -> u64 {
        self.counts.get(class_index).copied().unwrap_or(0)
    }

    /// `pixel_count / total_pixels * 100`, or 0 for an empty map.
    pub fn percent(&self, class_index: usize) -> f64 {
        percent_of(self.pixel_count(class_index), self.total_pixels)
    }

    pub fn total_pixels(&self) -> u64 {
        self.total_pixels
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }
}

/// Share of `part` in `whole` as a percentage. An empty whole yields 0 instead of NaN.
pub(crate) fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Counts the pixels of every class in `[0, num_classes)`.
///
/// Fails with `MissingClass` when the map's declared range is narrower than
/// `num_classes`, i.e. the classifier reports classes the map cannot contain, and
/// with `LabelOutOfRange` when a pixel carries a label at or above `num_classes`.
/// On success the counts always sum to the map's pixel count.
pub fn compute_area_histogram(label_map: &LabelMap, num_classes: usize) -> Result<AreaHistogram> {
    if label_map.num_classes() < num_classes {
        return Err(CensusError::MissingClass {
            expected: num_classes,
            available: label_map.num_classes(),
        });
    }

    let mut counts = vec![0u64; num_classes];
    for &label in label_map.labels() {
        let count = counts
            .get_mut(label as usize)
            .ok_or(CensusError::LabelOutOfRange { value: label, num_classes })?;
        *count += 1;
    }

    Ok(AreaHistogram {
        counts,
        total_pixels: label_map.pixel_count(),
    })
}
