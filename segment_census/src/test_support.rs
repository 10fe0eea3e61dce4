//! In-memory fixtures shared by the orchestrator tests.

use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifacts::{Artifact, ArtifactSink, ImageSource, file_title};
use crate::classifier::{Classifier, ClassifierLoader, PrototypeClassifier};
use crate::error::{CensusError, Result};
use crate::pipeline::CancelFlag;

const DARK: Rgb<u8> = Rgb([0, 0, 0]);
const LIGHT: Rgb<u8> = Rgb([255, 255, 255]);

/// 4x4 image whose dark pixels form a blob of 8 and a blob of 2, and whose
/// light pixels form one blob of 6.
pub fn scenario_image() -> RgbImage {
    let rows: [[u8; 4]; 4] = [[0, 0, 0, 0], [0, 0, 0, 0], [1, 1, 1, 1], [1, 1, 0, 0]];
    RgbImage::from_fn(4, 4, |x, y| if rows[y as usize][x as usize] == 0 { DARK } else { LIGHT })
}

fn prototype(attributes: Vec<String>) -> PrototypeClassifier {
    PrototypeClassifier::new(
        vec![("dark".to_string(), DARK.0), ("light".to_string(), LIGHT.0)],
        attributes,
    )
    .unwrap()
}

pub fn black_white_classifier() -> Arc<dyn Classifier> {
    Arc::new(prototype(vec!["luminance".to_string()]))
}

pub struct MemorySource {
    images: HashMap<PathBuf, RgbImage>,
    cancel_after_first: Option<CancelFlag>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
            cancel_after_first: None,
        }
    }

    pub fn with(mut self, name: &str, image: RgbImage) -> Self {
        self.images.insert(PathBuf::from(name), image);
        self
    }

    pub fn cancel_after_first_load(mut self, cancel: CancelFlag) -> Self {
        self.cancel_after_first = Some(cancel);
        self
    }
}

impl ImageSource for MemorySource {
    fn load(&self, input: &Path) -> Result<(String, RgbImage)> {
        if let Some(cancel) = &self.cancel_after_first {
            cancel.cancel();
        }
        let image = self.images.get(input).cloned().ok_or_else(|| CensusError::ImageLoad {
            path: input.to_path_buf(),
            reason: "no such image".to_string(),
        })?;
        Ok((file_title(input), image))
    }
}

pub enum FixtureLoader {
    Trained,
    Untrained,
    Failing,
}

impl FixtureLoader {
    pub fn trained() -> Self {
        Self::Trained
    }

    pub fn untrained() -> Self {
        Self::Untrained
    }

    pub fn failing() -> Self {
        Self::Failing
    }
}

impl ClassifierLoader for FixtureLoader {
    fn load_classifier(&self, path: &Path) -> Result<Box<dyn Classifier>> {
        match self {
            Self::Trained => Ok(Box::new(prototype(vec!["luminance".to_string()]))),
            Self::Untrained => Ok(Box::new(prototype(Vec::new()))),
            Self::Failing => Err(CensusError::ClassifierLoad {
                path: path.to_path_buf(),
                reason: "not found".to_string(),
            }),
        }
    }
}

/// Records artifact titles instead of rendering them.
#[derive(Default)]
pub struct RecordingSink {
    pub shown: Vec<String>,
    pub saved: Vec<String>,
}

impl ArtifactSink for RecordingSink {
    fn save(&mut self, artifact: &Artifact) -> Result<()> {
        self.saved.push(artifact.title());
        Ok(())
    }

    fn show(&mut self, artifact: &Artifact) -> Result<()> {
        self.shown.push(artifact.title());
        Ok(())
    }
}
