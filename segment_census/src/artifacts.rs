// THEORY:
// The edges of the batch: where images come from and where visual artifacts go.
// The core components never touch the filesystem; they receive decoded images from
// an `ImageSource` and hand rendered artifacts to an `ArtifactSink`.
//
// "Show" and "save" are independent operations on the sink. The orchestrator
// decides, per artifact kind, which of the two to call.

use image::{ImageFormat, RgbImage};
use log::debug;
use std::path::{Path, PathBuf};

use crate::error::{CensusError, Result};

/// Produces decoded images for the batch, one per input.
pub trait ImageSource: Send + Sync {
    /// Returns the image title (its file name) and its pixels.
    fn load(&self, input: &Path) -> Result<(String, RgbImage)>;
}

/// Decodes images from disk with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn load(&self, input: &Path) -> Result<(String, RgbImage)> {
        let image = image::open(input).map_err(|e| CensusError::ImageLoad {
            path: input.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok((file_title(input), image.to_rgb8()))
    }
}

/// The file name of `path`, or the whole path when it has none.
pub fn file_title(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The whole label map rendered with class colors.
    Segmented,
    /// Surviving blobs of one class over the source image.
    BlobOverlay { class_label: String },
}

/// A rendered image produced while processing one input.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Title of the input image the artifact belongs to.
    pub source_name: String,
    pub kind: ArtifactKind,
    pub image: RgbImage,
    pub show: bool,
    pub save: bool,
}

impl Artifact {
    /// Human-readable title, e.g. `"a.png Classification"`.
    pub fn title(&self) -> String {
        match &self.kind {
            ArtifactKind::Segmented => format!("{} Classification", self.source_name),
            ArtifactKind::BlobOverlay { class_label } => {
                format!("{} Blobs of class: {}", self.source_name, class_label)
            }
        }
    }

    /// File name under the output folder, e.g. `a-blobs-cell.tif`.
    pub fn file_name(&self, extension: &str) -> String {
        artifact_file_name(&self.source_name, &self.kind, extension)
    }
}

/// `<base>-segmented.<ext>` or `<base>-blobs-<class>.<ext>`, where `<base>` is
/// the image title without its extension.
pub fn artifact_file_name(source_name: &str, kind: &ArtifactKind, extension: &str) -> String {
    let base = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_name.to_string());
    match kind {
        ArtifactKind::Segmented => format!("{}-segmented.{}", base, extension),
        ArtifactKind::BlobOverlay { class_label } => format!("{}-blobs-{}.{}", base, class_label, extension),
    }
}

/// Receives artifacts from the batch.
pub trait ArtifactSink {
    fn save(&mut self, artifact: &Artifact) -> Result<()>;

    /// Displays an artifact. Headless sinks ignore it.
    fn show(&mut self, _artifact: &Artifact) -> Result<()> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl ArtifactSink for NullSink {
    fn save(&mut self, _artifact: &Artifact) -> Result<()> {
        Ok(())
    }
}

/// Saves artifacts into a folder, encoding by extension.
#[derive(Debug, Clone)]
pub struct FolderArtifactSink {
    folder: PathBuf,
    extension: String,
    saved: Vec<PathBuf>,
}

impl FolderArtifactSink {
    pub fn new(folder: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            extension: extension.into(),
            saved: Vec::new(),
        }
    }

    /// Paths written so far, in order.
    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }
}

impl ArtifactSink for FolderArtifactSink {
    fn save(&mut self, artifact: &Artifact) -> Result<()> {
        let name = artifact.file_name(&self.extension);
        let path = self.folder.join(&name);
        save_image(&path, &artifact.image).map_err(|e| CensusError::Artifact {
            name,
            reason: e.to_string(),
        })?;
        debug!("Saved {}", path.display());
        self.saved.push(path);
        Ok(())
    }
}

/// Encodes `image` to `path` in the format implied by the path's extension.
pub fn save_image(path: &Path, image: &RgbImage) -> std::result::Result<(), image::ImageError> {
    let format = ImageFormat::from_path(path)?;
    image.save_with_format(path, format)
}
