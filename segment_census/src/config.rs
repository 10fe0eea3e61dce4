use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core_modules::overlay::OverlayStyle;
use crate::error::{CensusError, Result};

/// Independent show/save switches for each artifact kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactToggles {
    pub show_segmented: bool,
    pub save_segmented: bool,
    pub show_blobs: bool,
    pub save_blobs: bool,
}

impl Default for ArtifactToggles {
    fn default() -> Self {
        Self {
            show_segmented: false,
            save_segmented: true,
            show_blobs: false,
            save_blobs: true,
        }
    }
}

/// Settings for one batch run. Immutable once the batch starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub classifier_path: PathBuf,
    /// Blobs with fewer pixels than this are excluded from the particle statistics.
    #[serde(default)]
    pub min_particle_area: u64,
    #[serde(default)]
    pub result_file: Option<PathBuf>,
    /// Write the settings block after the table.
    #[serde(default = "default_true")]
    pub append_settings: bool,
    /// Folder for saved artifacts. Nothing is saved without one.
    #[serde(default)]
    pub output_folder: Option<PathBuf>,
    #[serde(default)]
    pub artifacts: ArtifactToggles,
    #[serde(default)]
    pub overlay_style: OverlayStyle,
    #[serde(default = "default_extension")]
    pub artifact_extension: String,
    /// `None` runs sequentially; `Some(0)` uses one worker per CPU.
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_true() -> bool {
    true
}

fn default_extension() -> String {
    "tif".to_string()
}

impl RunConfig {
    pub fn new(classifier_path: impl Into<PathBuf>) -> Self {
        Self {
            classifier_path: classifier_path.into(),
            min_particle_area: 0,
            result_file: None,
            append_settings: true,
            output_folder: None,
            artifacts: ArtifactToggles::default(),
            overlay_style: OverlayStyle::default(),
            artifact_extension: default_extension(),
            workers: None,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CensusError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| CensusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.artifact_extension.is_empty() || self.artifact_extension.contains(['.', '/', '\\']) {
            return Err(CensusError::Config(format!(
                "artifact extension {:?} must be a bare extension such as \"tif\"",
                self.artifact_extension
            )));
        }
        Ok(())
    }

    /// Whether the segmented image has to be rendered at all.
    pub fn wants_segmented(&self) -> bool {
        self.artifacts.show_segmented || self.saves_segmented()
    }

    /// Whether blob overlays have to be rendered at all.
    pub fn wants_blobs(&self) -> bool {
        self.artifacts.show_blobs || self.saves_blobs()
    }

    pub fn saves_segmented(&self) -> bool {
        self.artifacts.save_segmented && self.output_folder.is_some()
    }

    pub fn saves_blobs(&self) -> bool {
        self.artifacts.save_blobs && self.output_folder.is_some()
    }

    /// Worker count for the parallel pipeline, or `None` for sequential runs.
    pub fn resolved_workers(&self) -> Option<usize> {
        self.workers.map(|n| if n == 0 { num_cpus::get() } else { n })
    }
}
