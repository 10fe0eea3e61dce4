use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use segment_census::{
    Artifact, ArtifactSink, BatchOrchestrator, CancelFlag, FileImageSource, FolderArtifactSink, OverlayStyle,
    ParallelPipeline, PrototypeLoader, RunConfig, check_output_conflicts,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StyleArg {
    Outline,
    Fill,
}

/// Classifies a batch of images and tabulates per-class area and blob statistics.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input images, processed in the given order
    images: Vec<PathBuf>,

    /// Classifier model file (JSON prototype model)
    #[arg(short, long)]
    classifier: Option<PathBuf>,

    /// Start from a JSON run configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum blob area in pixels
    #[arg(short = 'm', long)]
    min_area: Option<u64>,

    /// Where to write the results CSV
    #[arg(short, long)]
    result_file: Option<PathBuf>,

    /// Folder for segmented images and blob overlays
    #[arg(short, long)]
    output_folder: Option<PathBuf>,

    /// Do not append the settings block to the results file
    #[arg(long)]
    no_append_settings: bool,

    #[arg(long)]
    show_segmented: bool,

    #[arg(long)]
    show_blobs: bool,

    #[arg(long)]
    no_save_segmented: bool,

    #[arg(long)]
    no_save_blobs: bool,

    #[arg(long, value_enum)]
    overlay_style: Option<StyleArg>,

    /// Artifact file extension, e.g. tif or png
    #[arg(long)]
    extension: Option<String>,

    /// Process images in parallel; 0 uses one worker per CPU
    #[arg(short, long)]
    workers: Option<usize>,

    /// Run even if the result file exists or the output folder is not empty
    #[arg(short, long)]
    force: bool,
}

/// Saves through a folder sink, if any, and "shows" artifacts by logging them.
struct RunnerSink {
    folder: Option<FolderArtifactSink>,
}

impl ArtifactSink for RunnerSink {
    fn save(&mut self, artifact: &Artifact) -> segment_census::Result<()> {
        match &mut self.folder {
            Some(folder) => folder.save(artifact),
            None => Ok(()),
        }
    }

    fn show(&mut self, artifact: &Artifact) -> segment_census::Result<()> {
        let (width, height) = artifact.image.dimensions();
        info!("[show] {} ({}x{})", artifact.title(), width, height);
        Ok(())
    }
}

fn build_config(args: &Args) -> anyhow::Result<RunConfig> {
    let mut config = match (&args.config, &args.classifier) {
        (Some(path), _) => RunConfig::from_json_file(path).with_context(|| format!("reading {}", path.display()))?,
        (None, Some(classifier)) => RunConfig::new(classifier),
        (None, None) => bail!("either --classifier or --config is required"),
    };

    if let Some(classifier) = &args.classifier {
        config.classifier_path = classifier.clone();
    }
    if let Some(min_area) = args.min_area {
        config.min_particle_area = min_area;
    }
    if args.result_file.is_some() {
        config.result_file = args.result_file.clone();
    }
    if args.output_folder.is_some() {
        config.output_folder = args.output_folder.clone();
    }
    if args.no_append_settings {
        config.append_settings = false;
    }
    config.artifacts.show_segmented |= args.show_segmented;
    config.artifacts.show_blobs |= args.show_blobs;
    if args.no_save_segmented {
        config.artifacts.save_segmented = false;
    }
    if args.no_save_blobs {
        config.artifacts.save_blobs = false;
    }
    if let Some(style) = args.overlay_style {
        config.overlay_style = match style {
            StyleArg::Outline => OverlayStyle::Outline,
            StyleArg::Fill => OverlayStyle::Fill,
        };
    }
    if let Some(extension) = &args.extension {
        config.artifact_extension = extension.clone();
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }

    config.validate()?;
    if image::ImageFormat::from_extension(&config.artifact_extension).is_none() {
        bail!("unsupported artifact extension {:?}", config.artifact_extension);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = build_config(&args)?;

    // --- 1. Pre-flight conflicts ---
    let conflicts = check_output_conflicts(config.result_file.as_deref(), config.output_folder.as_deref());
    if !conflicts.is_empty() && !args.force {
        for conflict in &conflicts {
            warn!("Output conflict: {}", conflict);
        }
        bail!("refusing to run with output conflicts; pass --force to continue");
    }

    let mut sink = RunnerSink {
        folder: config
            .output_folder
            .as_ref()
            .map(|folder| FolderArtifactSink::new(folder, config.artifact_extension.clone())),
    };
    if let Some(folder) = &config.output_folder {
        std::fs::create_dir_all(folder).with_context(|| format!("creating {}", folder.display()))?;
    }

    // --- 2. Run ---
    let cancel = CancelFlag::new();
    let ctrl_c_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current image");
            ctrl_c_flag.cancel();
        }
    });

    let table = match config.resolved_workers() {
        Some(workers) => {
            let mut pipeline = ParallelPipeline::init(config.clone(), &PrototypeLoader, workers)?;
            pipeline
                .run(&args.images, Arc::new(FileImageSource), &mut sink, &cancel)
                .await?
        }
        None => {
            let mut orchestrator = BatchOrchestrator::init(config.clone(), &PrototypeLoader)?;
            orchestrator.run(&args.images, &FileImageSource, &mut sink, &cancel)?
        }
    };

    if config.result_file.is_none() {
        warn!("No result file given; printing results to stdout");
        print!("{}", table.to_csv());
    }
    Ok(())
}
