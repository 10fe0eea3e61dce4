// THEORY:
// The `pipeline` module is the top-level API of the crate. It drives one batch of
// images through the full stack and hands back a finalized results table.
//
// Per batch the orchestrator walks a small state machine:
//
//   Init -> { Classify -> Analyze -> Visualize? } per image -> Finalize -> Done
//
// with `Aborted` reachable from every state before `Finalize`. The policy is
// fail-fast: a classifier that cannot be loaded, an untrained classifier, an
// unreadable image or a classifier error stops the batch and no result file is
// written. Cancellation is only observed between images.
//
// The per-image work (`analyze_image`) is a pure function of the classifier, the
// image and the configuration. The parallel pipeline reuses it unchanged.

use image::RgbImage;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::artifacts::{Artifact, ArtifactKind, ArtifactSink, ImageSource};
use crate::classifier::{ClassDefinition, Classifier, ClassifierLoader};
use crate::config::RunConfig;
use crate::core_modules::blob_detector::BlobStatistics;
use crate::core_modules::blob_detector::blob_detector::find_filtered_blobs;
use crate::core_modules::colorizer::{color_for, colorize};
use crate::core_modules::label_map::{AreaHistogram, compute_area_histogram};
use crate::core_modules::overlay::composite;
use crate::error::{CensusError, Result};

// Re-export key data structures for the public API.
pub use crate::core_modules::results::{AreaStatistics, ResultsRow, ResultsTable};

/// Where a batch currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Init,
    Classify { image_index: usize },
    Analyze { image_index: usize },
    Visualize { image_index: usize },
    Finalize,
    Done,
    Aborted,
}

/// A reason to ask the user before running. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputConflict {
    ResultFileExists(PathBuf),
    OutputFolderNotEmpty(PathBuf),
}

impl std::fmt::Display for OutputConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResultFileExists(path) => write!(f, "result file {} already exists", path.display()),
            Self::OutputFolderNotEmpty(path) => write!(f, "output folder {} is not empty", path.display()),
        }
    }
}

/// Reports an existing result file and a non-empty output folder.
///
/// The two checks are independent; an unreadable folder counts as empty.
pub fn check_output_conflicts(result_path: Option<&Path>, folder_path: Option<&Path>) -> Vec<OutputConflict> {
    let mut conflicts = Vec::new();
    if let Some(path) = result_path {
        if path.exists() {
            conflicts.push(OutputConflict::ResultFileExists(path.to_path_buf()));
        }
    }
    if let Some(folder) = folder_path {
        let non_empty = std::fs::read_dir(folder).is_ok_and(|mut entries| entries.next().is_some());
        if non_empty {
            conflicts.push(OutputConflict::OutputFolderNotEmpty(folder.to_path_buf()));
        }
    }
    conflicts
}

/// Cooperative cancellation, checked between images.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything produced for one input image.
#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    pub file_name: String,
    /// One row per class, in classifier order.
    pub rows: Vec<ResultsRow>,
    pub artifacts: Vec<Artifact>,
}

fn area_statistics(
    class_label: &str,
    histogram: &AreaHistogram,
    class_index: usize,
    blobs: &BlobStatistics,
) -> AreaStatistics {
    AreaStatistics {
        class_label: class_label.to_string(),
        full_area_pixels: histogram.pixel_count(class_index),
        full_area_percent: histogram.percent(class_index),
        particle_count: blobs.count,
        particle_total_area: blobs.total_area,
        particle_avg_size: blobs.avg_size,
        particle_percent_area: blobs.percent_area,
    }
}

/// Classifies, analyzes and (optionally) renders one image.
pub fn analyze_image(
    classifier: &dyn Classifier,
    file_name: &str,
    image: &RgbImage,
    config: &RunConfig,
) -> Result<ImageAnalysis> {
    // Stage 1: Classification
    info!("Classifying image {}", file_name);
    let label_map = classifier
        .apply_classifier(image)
        .map_err(|e| CensusError::Classification {
            file_name: file_name.to_string(),
            reason: e.to_string(),
        })?;
    if label_map.dimensions() != image.dimensions() {
        return Err(CensusError::DimensionMismatch {
            expected: image.dimensions(),
            actual: label_map.dimensions(),
        });
    }

    let labels = classifier.class_labels();
    let num_classes = labels.len();
    let mut artifacts = Vec::new();

    if config.wants_segmented() {
        artifacts.push(Artifact {
            source_name: file_name.to_string(),
            kind: ArtifactKind::Segmented,
            image: colorize(&label_map),
            show: config.artifacts.show_segmented,
            save: config.saves_segmented(),
        });
    }

    // Stage 2: Full area per class
    let histogram = compute_area_histogram(&label_map, num_classes)?;

    // Stage 3: Particle analysis per class
    let mut rows = Vec::with_capacity(num_classes);
    for (class_index, class_label) in labels.iter().enumerate() {
        debug!("Running particle analyzer on class {}", class_label);
        let blobs = find_filtered_blobs(&label_map, class_index as u32, config.min_particle_area);
        let blob_stats = BlobStatistics::from_blobs(&blobs, label_map.pixel_count());

        if config.wants_blobs() {
            let overlay = composite(
                image,
                &blobs,
                class_label,
                color_for(class_index as u32, num_classes),
                config.overlay_style,
            )?;
            artifacts.push(Artifact {
                source_name: file_name.to_string(),
                kind: ArtifactKind::BlobOverlay {
                    class_label: overlay.class_label,
                },
                image: overlay.image,
                show: config.artifacts.show_blobs,
                save: config.saves_blobs(),
            });
        }

        rows.push(ResultsRow {
            file_name: file_name.to_string(),
            stats: area_statistics(class_label, &histogram, class_index, &blob_stats),
        });
    }

    Ok(ImageAnalysis {
        file_name: file_name.to_string(),
        rows,
        artifacts,
    })
}

/// Loads one input and analyzes it.
pub(crate) fn process_input(
    classifier: &dyn Classifier,
    source: &dyn ImageSource,
    input: &Path,
    config: &RunConfig,
) -> Result<ImageAnalysis> {
    let (file_name, image) = source.load(input)?;
    analyze_image(classifier, &file_name, &image, config)
}

/// Hands artifacts to the sink according to their show/save flags.
pub(crate) fn emit_artifacts(sink: &mut dyn ArtifactSink, artifacts: &[Artifact]) -> Result<()> {
    for artifact in artifacts {
        if artifact.show {
            sink.show(artifact)?;
        }
        if artifact.save {
            sink.save(artifact)?;
        }
    }
    Ok(())
}

/// Checks that a loaded classifier can drive a batch.
pub(crate) fn validate_classifier(classifier: &dyn Classifier, path: &Path) -> Result<()> {
    if classifier.num_attributes() < 1 {
        return Err(CensusError::EmptyTrainingHeader {
            path: path.to_path_buf(),
        });
    }
    if classifier.num_classes() == 0 {
        return Err(CensusError::ClassifierLoad {
            path: path.to_path_buf(),
            reason: "classifier defines no classes".to_string(),
        });
    }
    Ok(())
}

/// Finalizes the table, attaches settings and persists it.
pub(crate) fn finish_table(table: &mut ResultsTable, config: &RunConfig) -> Result<ResultsTable> {
    table.finalize();
    table.optionally_append_settings(config);
    if let Some(path) = &config.result_file {
        table.write_csv(path)?;
        info!("Results saved to {}", path.display());
    }
    info!("Classification batch done ({} rows)", table.len());
    Ok(table.clone())
}

/// Sequential batch driver.
pub struct BatchOrchestrator {
    config: RunConfig,
    classifier: Arc<dyn Classifier>,
    state: BatchState,
    table: ResultsTable,
}

impl BatchOrchestrator {
    /// Loads and validates the classifier. Any failure happens before an image is touched.
    pub fn init(config: RunConfig, loader: &dyn ClassifierLoader) -> Result<Self> {
        config.validate()?;
        let classifier: Arc<dyn Classifier> = Arc::from(loader.load_classifier(&config.classifier_path)?);
        Self::with_classifier(config, classifier)
    }

    /// Uses an already loaded classifier.
    pub fn with_classifier(config: RunConfig, classifier: Arc<dyn Classifier>) -> Result<Self> {
        validate_classifier(classifier.as_ref(), &config.classifier_path)?;
        info!(
            "Loaded classifier {} with {} classes",
            config.classifier_path.display(),
            classifier.num_classes()
        );
        Ok(Self {
            config,
            classifier,
            state: BatchState::Init,
            table: ResultsTable::new(),
        })
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn classifier(&self) -> Arc<dyn Classifier> {
        Arc::clone(&self.classifier)
    }

    pub fn class_definitions(&self) -> Vec<ClassDefinition> {
        self.classifier.class_definitions()
    }

    /// Processes `inputs` in order and returns the finalized table.
    pub fn run(
        &mut self,
        inputs: &[PathBuf],
        source: &dyn ImageSource,
        sink: &mut dyn ArtifactSink,
        cancel: &CancelFlag,
    ) -> Result<ResultsTable> {
        if self.state != BatchState::Init {
            return Err(CensusError::Config(format!("batch cannot run from state {:?}", self.state)));
        }

        for (image_index, input) in inputs.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(self.abort(CensusError::Cancelled));
            }
            if let Err(e) = self.process_one(image_index, input, source, sink) {
                return Err(self.abort(e));
            }
        }

        self.state = BatchState::Finalize;
        let table = finish_table(&mut self.table, &self.config)?;
        self.state = BatchState::Done;
        Ok(table)
    }

    pub(crate) fn process_one(
        &mut self,
        image_index: usize,
        input: &Path,
        source: &dyn ImageSource,
        sink: &mut dyn ArtifactSink,
    ) -> Result<()> {
        self.state = BatchState::Classify { image_index };
        let (file_name, image) = source.load(input)?;

        self.state = BatchState::Analyze { image_index };
        let analysis = analyze_image(self.classifier.as_ref(), &file_name, &image, &self.config)?;

        if !analysis.artifacts.is_empty() {
            self.state = BatchState::Visualize { image_index };
            emit_artifacts(sink, &analysis.artifacts)?;
        }

        self.table.append_rows(analysis.rows)
    }

    fn abort(&mut self, error: CensusError) -> CensusError {
        warn!("Aborting batch in state {:?}: {}", self.state, error);
        self.state = BatchState::Aborted;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{FolderArtifactSink, NullSink};
    use crate::core_modules::label_map::LabelMap;
    use crate::test_support::*;

    #[test]
    fn scenario_rows_match_expected_statistics() {
        let source = MemorySource::new().with("scenario.png", scenario_image());
        let mut config = RunConfig::new("model.json");
        config.min_particle_area = 3;
        let mut orchestrator = BatchOrchestrator::with_classifier(config, black_white_classifier()).unwrap();

        let table = orchestrator
            .run(&[PathBuf::from("scenario.png")], &source, &mut NullSink, &CancelFlag::new())
            .unwrap();

        assert_eq!(orchestrator.state(), BatchState::Done);
        assert!(table.is_finalized());
        assert_eq!(table.len(), 2);

        let class_0 = &table.rows()[0].stats;
        assert_eq!(class_0.class_label, "dark");
        assert_eq!(class_0.full_area_pixels, 10);
        assert_eq!(class_0.full_area_percent, 62.5);
        assert_eq!(class_0.particle_count, 1);
        assert_eq!(class_0.particle_total_area, 8);
        assert_eq!(class_0.particle_avg_size, 8.0);
        assert_eq!(class_0.particle_percent_area, 50.0);

        let class_1 = &table.rows()[1].stats;
        assert_eq!(class_1.full_area_pixels, 6);
        assert_eq!(class_1.full_area_percent, 37.5);
        assert_eq!(class_1.particle_count, 1);
        assert_eq!(class_1.particle_total_area, 6);
        assert_eq!(class_1.particle_avg_size, 6.0);
        assert_eq!(class_1.particle_percent_area, 37.5);
    }

    #[test]
    fn rows_are_nested_image_then_class() {
        let source = MemorySource::new()
            .with("b.png", scenario_image())
            .with("a.png", scenario_image());
        let mut orchestrator =
            BatchOrchestrator::with_classifier(RunConfig::new("model.json"), black_white_classifier()).unwrap();
        let inputs = [PathBuf::from("b.png"), PathBuf::from("a.png")];
        let table = orchestrator.run(&inputs, &source, &mut NullSink, &CancelFlag::new()).unwrap();

        let order: Vec<(&str, &str)> = table
            .rows()
            .iter()
            .map(|r| (r.file_name.as_str(), r.stats.class_label.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("b.png", "dark"), ("b.png", "light"), ("a.png", "dark"), ("a.png", "light")]
        );
        for image_rows in table.rows().chunks(2) {
            let total: u64 = image_rows.iter().map(|r| r.stats.full_area_pixels).sum();
            assert_eq!(total, 16);
        }
    }

    #[test]
    fn empty_batch_yields_empty_finalized_table() {
        let mut orchestrator =
            BatchOrchestrator::with_classifier(RunConfig::new("model.json"), black_white_classifier()).unwrap();
        let table = orchestrator
            .run(&[], &MemorySource::new(), &mut NullSink, &CancelFlag::new())
            .unwrap();
        assert!(table.is_empty());
        assert!(table.is_finalized());
        assert_eq!(orchestrator.state(), BatchState::Done);
    }

    #[test]
    fn init_rejects_untrained_and_unloadable_classifiers() {
        let untrained = BatchOrchestrator::init(RunConfig::new("untrained.json"), &FixtureLoader::untrained());
        assert!(matches!(untrained, Err(CensusError::EmptyTrainingHeader { .. })));

        let missing = BatchOrchestrator::init(RunConfig::new("missing.json"), &FixtureLoader::failing());
        assert!(matches!(missing, Err(CensusError::ClassifierLoad { .. })));

        let trained = BatchOrchestrator::init(RunConfig::new("model.json"), &FixtureLoader::trained());
        assert!(trained.is_ok());
    }

    /// Labels every pixel with class 2 while reporting only two classes, or fails outright.
    struct MislabelingClassifier {
        labels: Vec<String>,
        fail: bool,
    }

    impl MislabelingClassifier {
        fn new(fail: bool) -> Self {
            Self {
                labels: vec!["dark".to_string(), "light".to_string()],
                fail,
            }
        }
    }

    impl Classifier for MislabelingClassifier {
        fn class_labels(&self) -> &[String] {
            &self.labels
        }

        fn num_attributes(&self) -> usize {
            1
        }

        fn apply_classifier(&self, image: &RgbImage) -> Result<LabelMap> {
            if self.fail {
                return Err(CensusError::Config("model is corrupt".to_string()));
            }
            let labels = vec![2; image.width() as usize * image.height() as usize];
            LabelMap::new(image.width(), image.height(), 3, labels)
        }
    }

    #[test]
    fn labels_outside_the_reported_classes_abort_the_image() {
        let err = analyze_image(
            &MislabelingClassifier::new(false),
            "a.png",
            &scenario_image(),
            &RunConfig::new("model.json"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CensusError::LabelOutOfRange {
                value: 2,
                num_classes: 2
            }
        ));
    }

    #[test]
    fn classifier_failure_names_the_image() {
        let err = analyze_image(
            &MislabelingClassifier::new(true),
            "a.png",
            &scenario_image(),
            &RunConfig::new("model.json"),
        )
        .unwrap_err();
        match err {
            CensusError::Classification { file_name, reason } => {
                assert_eq!(file_name, "a.png");
                assert!(reason.contains("model is corrupt"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn orchestrator_exposes_the_loaded_classifier() {
        let orchestrator = BatchOrchestrator::init(RunConfig::new("model.json"), &FixtureLoader::trained()).unwrap();
        assert_eq!(orchestrator.config().classifier_path, PathBuf::from("model.json"));
        assert_eq!(orchestrator.classifier().num_classes(), 2);
        let definitions = orchestrator.class_definitions();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[1].index, 1);
        assert_eq!(definitions[1].label, "light");
    }

    #[test]
    fn image_failure_aborts_without_writing_results() {
        let dir = tempfile::tempdir().unwrap();
        let result_file = dir.path().join("results.csv");
        let mut config = RunConfig::new("model.json");
        config.result_file = Some(result_file.clone());

        let source = MemorySource::new().with("a.png", scenario_image());
        let mut orchestrator = BatchOrchestrator::with_classifier(config, black_white_classifier()).unwrap();
        let inputs = [PathBuf::from("a.png"), PathBuf::from("missing.png")];
        let err = orchestrator
            .run(&inputs, &source, &mut NullSink, &CancelFlag::new())
            .unwrap_err();

        assert!(matches!(err, CensusError::ImageLoad { .. }));
        assert_eq!(orchestrator.state(), BatchState::Aborted);
        assert!(!result_file.exists());
    }

    #[test]
    fn cancellation_is_observed_between_images() {
        let dir = tempfile::tempdir().unwrap();
        let result_file = dir.path().join("results.csv");
        let mut config = RunConfig::new("model.json");
        config.result_file = Some(result_file.clone());

        let cancel = CancelFlag::new();
        let source = MemorySource::new()
            .with("a.png", scenario_image())
            .with("b.png", scenario_image())
            .cancel_after_first_load(cancel.clone());
        let mut orchestrator = BatchOrchestrator::with_classifier(config, black_white_classifier()).unwrap();
        let inputs = [PathBuf::from("a.png"), PathBuf::from("b.png")];
        let err = orchestrator.run(&inputs, &source, &mut NullSink, &cancel).unwrap_err();

        assert!(matches!(err, CensusError::Cancelled));
        assert_eq!(orchestrator.state(), BatchState::Aborted);
        assert!(!result_file.exists());
    }

    #[test]
    fn finished_batch_cannot_run_again() {
        let mut orchestrator =
            BatchOrchestrator::with_classifier(RunConfig::new("model.json"), black_white_classifier()).unwrap();
        orchestrator
            .run(&[], &MemorySource::new(), &mut NullSink, &CancelFlag::new())
            .unwrap();
        let again = orchestrator.run(&[], &MemorySource::new(), &mut NullSink, &CancelFlag::new());
        assert!(matches!(again, Err(CensusError::Config(_))));
    }

    #[test]
    fn results_and_artifacts_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let result_file = dir.path().join("results.csv");

        let mut config = RunConfig::new("model.json");
        config.min_particle_area = 3;
        config.result_file = Some(result_file.clone());
        config.output_folder = Some(out.clone());
        config.artifact_extension = "png".to_string();

        let source = MemorySource::new().with("scenario.png", scenario_image());
        let mut sink = FolderArtifactSink::new(&out, "png");
        let mut orchestrator = BatchOrchestrator::with_classifier(config, black_white_classifier()).unwrap();
        orchestrator
            .run(&[PathBuf::from("scenario.png")], &source, &mut sink, &CancelFlag::new())
            .unwrap();

        for name in ["scenario-segmented.png", "scenario-blobs-dark.png", "scenario-blobs-light.png"] {
            assert!(out.join(name).exists(), "{} missing", name);
        }

        let csv = std::fs::read_to_string(&result_file).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Class Label,Particle Count,Particle Total Area,Particle Average Size,Particle %Area,File,Complete Area,Complete %Area"
        );
        assert_eq!(lines.next().unwrap(), "dark,1,8,8.000,50.000,scenario.png,10,62.500");
        assert_eq!(lines.next().unwrap(), "light,1,6,6.000,37.500,scenario.png,6,37.500");
        assert_eq!(lines.next().unwrap(), "");
        assert_eq!(lines.next().unwrap(), "\"Setting\",\"Value\"");
        assert_eq!(lines.next().unwrap(), "\"Classifier file\",\"model.json\"");
        assert_eq!(lines.next().unwrap(), "\"Minimum blob area\",\"3\"");
    }

    #[test]
    fn show_and_save_are_independent() {
        let mut config = RunConfig::new("model.json");
        config.artifacts.show_segmented = true;
        config.artifacts.save_segmented = false;
        config.artifacts.show_blobs = false;
        config.artifacts.save_blobs = true;
        config.output_folder = Some(PathBuf::from("unused"));

        let source = MemorySource::new().with("a.png", scenario_image());
        let mut sink = RecordingSink::default();
        let mut orchestrator = BatchOrchestrator::with_classifier(config, black_white_classifier()).unwrap();
        orchestrator
            .run(&[PathBuf::from("a.png")], &source, &mut sink, &CancelFlag::new())
            .unwrap();

        assert_eq!(sink.shown, vec!["a.png Classification".to_string()]);
        assert_eq!(
            sink.saved,
            vec![
                "a.png Blobs of class: dark".to_string(),
                "a.png Blobs of class: light".to_string()
            ]
        );
    }

    #[test]
    fn output_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("results.csv");
        std::fs::write(&existing, "x").unwrap();
        let missing = dir.path().join("other.csv");
        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();

        assert_eq!(
            check_output_conflicts(Some(existing.as_path()), None),
            vec![OutputConflict::ResultFileExists(existing.clone())]
        );
        assert!(check_output_conflicts(Some(missing.as_path()), None).is_empty());
        assert!(check_output_conflicts(Some(missing.as_path()), Some(empty.as_path())).is_empty());
        // `dir` holds files, so it is a non-empty folder.
        assert_eq!(
            check_output_conflicts(Some(missing.as_path()), Some(dir.path())),
            vec![OutputConflict::OutputFolderNotEmpty(dir.path().to_path_buf())]
        );
        assert_eq!(check_output_conflicts(Some(existing.as_path()), Some(dir.path())).len(), 2);
    }
}
