// THEORY:
// The parallel pipeline runs the same per-image work as `pipeline` on a bounded
// pool of tokio workers. Workers never touch the results table: each one returns a
// self-contained `ImageAnalysis` through a oneshot channel, and the orchestrator
// awaits those replies strictly in input order before appending them. The table
// therefore ends up identical to the sequential one, whatever the scheduling.
//
// The heavy lifting (decode, classify, connected components) is blocking CPU work,
// so each worker hands it to `spawn_blocking` and only awaits the result.

use futures::future::join_all;
use log::{info, warn};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::artifacts::{ArtifactSink, ImageSource};
use crate::classifier::{Classifier, ClassifierLoader};
use crate::config::RunConfig;
use crate::error::{CensusError, Result};
use crate::pipeline::{
    BatchState, CancelFlag, ImageAnalysis, ResultsTable, emit_artifacts, finish_table, process_input,
    validate_classifier,
};

pub struct ImageTask {
    pub input: PathBuf,
    pub result_sender: oneshot::Sender<Result<ImageAnalysis>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<ImageTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        classifier: Arc<dyn Classifier>,
        source: Arc<dyn ImageSource>,
        config: Arc<RunConfig>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<ImageTask>();
        let mut workers = Vec::with_capacity(worker_count + 1);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<ImageTask>())
            .unzip();

        // Round-robin dispatcher.
        workers.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        }));

        for mut worker_receiver in worker_receivers {
            let classifier = Arc::clone(&classifier);
            let source = Arc::clone(&source);
            let config = Arc::clone(&config);

            workers.push(tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let classifier = Arc::clone(&classifier);
                    let source = Arc::clone(&source);
                    let config = Arc::clone(&config);
                    let input = task.input;

                    let analysis = tokio::task::spawn_blocking(move || {
                        process_input(classifier.as_ref(), source.as_ref(), &input, &config)
                    })
                    .await
                    .unwrap_or_else(|e| Err(CensusError::WorkerPool(e.to_string())));

                    let _ = task.result_sender.send(analysis);
                }
            }));
        }

        Self { task_sender, workers }
    }

    /// Queues one input. The receiver resolves once a worker has processed it.
    pub fn submit(&self, input: PathBuf) -> Result<oneshot::Receiver<Result<ImageAnalysis>>> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(ImageTask { input, result_sender })
            .map_err(|_| CensusError::WorkerPool("failed to send task to worker pool".to_string()))?;
        Ok(result_receiver)
    }

    /// Closes the task channel and waits for the dispatcher and workers to drain.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        for joined in join_all(self.workers).await {
            if let Err(e) = joined {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
    }
}

/// Batch driver that analyzes up to `worker_count` images at once.
pub struct ParallelPipeline {
    config: Arc<RunConfig>,
    classifier: Arc<dyn Classifier>,
    worker_count: usize,
    state: BatchState,
    table: ResultsTable,
}

impl ParallelPipeline {
    pub fn init(config: RunConfig, loader: &dyn ClassifierLoader, worker_count: usize) -> Result<Self> {
        config.validate()?;
        let classifier: Arc<dyn Classifier> = Arc::from(loader.load_classifier(&config.classifier_path)?);
        Self::with_classifier(config, classifier, worker_count)
    }

    pub fn with_classifier(config: RunConfig, classifier: Arc<dyn Classifier>, worker_count: usize) -> Result<Self> {
        validate_classifier(classifier.as_ref(), &config.classifier_path)?;
        Ok(Self {
            config: Arc::new(config),
            classifier,
            worker_count: worker_count.max(1),
            state: BatchState::Init,
            table: ResultsTable::new(),
        })
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub async fn run(
        &mut self,
        inputs: &[PathBuf],
        source: Arc<dyn ImageSource>,
        sink: &mut dyn ArtifactSink,
        cancel: &CancelFlag,
    ) -> Result<ResultsTable> {
        if self.state != BatchState::Init {
            return Err(CensusError::Config(format!("batch cannot run from state {:?}", self.state)));
        }
        info!("Processing {} images on {} workers", inputs.len(), self.worker_count);

        let pool = WorkerPool::new(
            self.worker_count,
            Arc::clone(&self.classifier),
            source,
            Arc::clone(&self.config),
        );

        let merged = self.merge_in_order(&pool, inputs, sink, cancel).await;
        pool.shutdown().await;
        if let Err(e) = merged {
            warn!("Aborting batch in state {:?}: {}", self.state, e);
            self.state = BatchState::Aborted;
            return Err(e);
        }

        self.state = BatchState::Finalize;
        let table = finish_table(&mut self.table, &self.config)?;
        self.state = BatchState::Done;
        Ok(table)
    }

    /// Keeps at most `worker_count` images in flight and appends their rows in input order.
    async fn merge_in_order(
        &mut self,
        pool: &WorkerPool,
        inputs: &[PathBuf],
        sink: &mut dyn ArtifactSink,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let mut pending = VecDeque::with_capacity(self.worker_count);
        let mut next_input = 0;

        loop {
            while pending.len() < self.worker_count && next_input < inputs.len() {
                if cancel.is_cancelled() {
                    return Err(CensusError::Cancelled);
                }
                pending.push_back((next_input, pool.submit(inputs[next_input].clone())?));
                next_input += 1;
            }

            let Some((image_index, receiver)) = pending.pop_front() else {
                return Ok(());
            };

            // The worker loads and classifies; the rows are merged here once it replies.
            self.state = BatchState::Classify { image_index };
            let analysis = receiver
                .await
                .map_err(|_| CensusError::WorkerPool("failed to receive result from worker".to_string()))??;

            self.state = BatchState::Analyze { image_index };

            if cancel.is_cancelled() {
                return Err(CensusError::Cancelled);
            }

            if !analysis.artifacts.is_empty() {
                self.state = BatchState::Visualize { image_index };
                emit_artifacts(sink, &analysis.artifacts)?;
            }
            self.table.append_rows(analysis.rows)?;
        }
    }
}
