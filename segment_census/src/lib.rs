// THEORY:
// This file is the main entry point for the `segment_census` library crate.
//
// The crate turns a batch of pixel-classified images into a per-image, per-class
// table of area statistics. The primary interface is the `BatchOrchestrator` (and
// its concurrent sibling, `ParallelPipeline`), together with the `Classifier`
// trait that isolates the external pixel classifier. The analysis stages live in
// `core_modules`:
//
// - `label_map`: the classifier's output and the full-area histogram.
// - `blob_detector`: 8-connected components of one class, filtered by size.
// - `colorizer`: golden-angle class colors and the segmented rendering.
// - `overlay`: surviving blobs drawn over the source image.
// - `results`: the fixed-schema results table and its CSV form.

pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

#[cfg(test)]
mod test_support;

pub use artifacts::{Artifact, ArtifactKind, ArtifactSink, FileImageSource, FolderArtifactSink, ImageSource, NullSink};
pub use classifier::{ClassDefinition, Classifier, ClassifierLoader, PrototypeClassifier, PrototypeLoader};
pub use config::{ArtifactToggles, RunConfig};
pub use core_modules::overlay::OverlayStyle;
pub use error::{CensusError, Result};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{
    AreaStatistics, BatchOrchestrator, BatchState, CancelFlag, OutputConflict, ResultsRow, ResultsTable,
    check_output_conflicts,
};
