// THEORY:
// A single error type covers the whole batch. The orchestrator's fail-fast policy
// means every failure simply propagates up with `?` until the batch is aborted, so
// the variants carry enough context (paths, file names, class counts) to be
// reported verbatim by whatever front end drives the batch.
//
// Output conflicts are deliberately absent: they are warnings returned as data by
// `pipeline::check_output_conflicts`, never errors.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CensusError>;

#[derive(Debug, Error)]
pub enum CensusError {
    /// The classifier file is unreadable or does not describe a valid classifier.
    #[error("could not load classifier from {path}: {reason}")]
    ClassifierLoad { path: PathBuf, reason: String },

    /// The classifier loaded but its training header has no attributes.
    #[error("classifier train header of {path} has no attributes, maybe training was not run?")]
    EmptyTrainingHeader { path: PathBuf },

    #[error("could not load image {path}: {reason}")]
    ImageLoad { path: PathBuf, reason: String },

    /// The label map declares fewer classes than the classifier reports.
    #[error("label map covers {available} classes but {expected} were expected")]
    MissingClass { expected: usize, available: usize },

    #[error("label value {value} is outside the declared range [0, {num_classes})")]
    LabelOutOfRange { value: u32, num_classes: usize },

    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("classifier failed on {file_name}: {reason}")]
    Classification { file_name: String, reason: String },

    #[error("results table is already finalized")]
    TableFinalized,

    #[error("could not write results to {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not emit artifact {name}: {reason}")]
    Artifact { name: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("batch cancelled")]
    Cancelled,

    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}
