// THEORY:
// The pixel classifier is an external capability. The batch only needs three things
// from it: the ordered class labels, the size of its training header, and a way to
// turn an image into a `LabelMap`. Everything else (training, feature stacks,
// inference engines) stays behind the `Classifier` trait.
//
// `PrototypeClassifier` is a deliberately small implementation of the contract so
// the batch can run end to end without an external engine: every pixel is assigned
// to the class whose RGB prototype is nearest.

use image::RgbImage;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::core_modules::label_map::LabelMap;
use crate::error::{CensusError, Result};

/// One class of a classifier, fixed for the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDefinition {
    pub index: u32,
    pub label: String,
}

/// A trained pixel classifier.
///
/// Implementations must be `Send + Sync` so the parallel pipeline can share one
/// instance across workers.
pub trait Classifier: Send + Sync {
    /// Class labels in classifier order. Unique, one per class.
    fn class_labels(&self) -> &[String];

    /// Number of attributes in the training header. Zero means untrained.
    fn num_attributes(&self) -> usize;

    /// Classifies every pixel. Values of the returned map are below `num_classes()`.
    fn apply_classifier(&self, image: &RgbImage) -> Result<LabelMap>;

    fn num_classes(&self) -> usize {
        self.class_labels().len()
    }

    fn class_definitions(&self) -> Vec<ClassDefinition> {
        self.class_labels()
            .iter()
            .enumerate()
            .map(|(index, label)| ClassDefinition {
                index: index as u32,
                label: label.clone(),
            })
            .collect()
    }
}

/// Loads a classifier from a file.
pub trait ClassifierLoader {
    fn load_classifier(&self, path: &Path) -> Result<Box<dyn Classifier>>;
}

#[derive(Debug, Deserialize)]
struct PrototypeModel {
    #[serde(default)]
    attributes: Vec<String>,
    classes: Vec<PrototypeClass>,
}

#[derive(Debug, Deserialize)]
struct PrototypeClass {
    label: String,
    prototype: [u8; 3],
}

/// Nearest-prototype classifier over RGB values.
#[derive(Debug, Clone)]
pub struct PrototypeClassifier {
    labels: Vec<String>,
    prototypes: Vec<[u8; 3]>,
    attributes: Vec<String>,
}

impl PrototypeClassifier {
    pub fn new(classes: Vec<(String, [u8; 3])>, attributes: Vec<String>) -> std::result::Result<Self, String> {
        if classes.is_empty() {
            return Err("classifier defines no classes".to_string());
        }
        let mut seen = HashSet::new();
        for (label, _) in &classes {
            if !seen.insert(label.as_str()) {
                return Err(format!("duplicate class label {:?}", label));
            }
        }
        let (labels, prototypes) = classes.into_iter().unzip();
        Ok(Self {
            labels,
            prototypes,
            attributes,
        })
    }

    /// Parses the JSON model format:
    /// `{ "attributes": [...], "classes": [{ "label": "...", "prototype": [r, g, b] }] }`.
    pub fn from_json(text: &str) -> std::result::Result<Self, String> {
        let model: PrototypeModel = serde_json::from_str(text).map_err(|e| e.to_string())?;
        Self::new(
            model.classes.into_iter().map(|c| (c.label, c.prototype)).collect(),
            model.attributes,
        )
    }

    fn nearest(&self, pixel: [u8; 3]) -> u32 {
        let distance = |p: &[u8; 3]| -> u32 {
            p.iter()
                .zip(pixel.iter())
                .map(|(&a, &b)| {
                    let d = a as i32 - b as i32;
                    (d * d) as u32
                })
                .sum()
        };
        // `min_by_key` keeps the first minimum, so ties go to the lower index.
        self.prototypes
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| distance(*p))
            .map_or(0, |(index, _)| index as u32)
    }
}

impl Classifier for PrototypeClassifier {
    fn class_labels(&self) -> &[String] {
        &self.labels
    }

    fn num_attributes(&self) -> usize {
        self.attributes.len()
    }

    fn apply_classifier(&self, image: &RgbImage) -> Result<LabelMap> {
        let labels = image.pixels().map(|p| self.nearest(p.0)).collect();
        LabelMap::new(image.width(), image.height(), self.num_classes(), labels)
    }
}

/// Loads `PrototypeClassifier` JSON model files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrototypeLoader;

impl ClassifierLoader for PrototypeLoader {
    fn load_classifier(&self, path: &Path) -> Result<Box<dyn Classifier>> {
        let load_error = |reason: String| CensusError::ClassifierLoad {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let classifier = PrototypeClassifier::from_json(&text).map_err(load_error)?;
        Ok(Box::new(classifier))
    }
}
