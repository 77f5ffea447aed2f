// THEORY:
// The `parallel_pipeline` runs many independent comparisons at once, e.g. one per
// device form factor, or a batch of captures against one baseline. Comparisons
// share nothing but the artifact store; each writes only to its own session.
//
// A single dispatcher receives every task and hands them out round-robin to a fixed
// set of workers. Each worker moves the CPU-bound comparison onto tokio's blocking
// pool so the async runtime keeps serving, then answers on the task's oneshot
// channel.

use crate::core_modules::session::SessionKey;
use crate::error::CompareError;
use crate::pipeline::{ComparisonPipeline, ComparisonResult};
use futures::future::join_all;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,

    #[error("comparison worker failed: {0}")]
    WorkerPanicked(String),

    #[error(transparent)]
    Compare(#[from] CompareError),
}

pub struct ComparisonTask {
    pub before: RgbImage,
    pub after: RgbImage,
    pub session: SessionKey,
    pub result_sender: oneshot::Sender<Result<ComparisonResult, PoolError>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<ComparisonTask>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// One worker per logical CPU. Must be called from within a tokio runtime.
    pub fn new(pipeline: Arc<ComparisonPipeline>) -> Self {
        Self::with_workers(pipeline, num_cpus::get())
    }

    pub fn with_workers(pipeline: Arc<ComparisonPipeline>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<ComparisonTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<ComparisonTask>())
            .unzip();

        // Spawn dispatcher
        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if let Err(mpsc::error::SendError(task)) = worker_senders[worker_idx].send(task) {
                    let _ = task.result_sender.send(Err(PoolError::Closed));
                }
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        // Spawn workers
        let workers = worker_receivers
            .into_iter()
            .enumerate()
            .map(|(worker_id, mut worker_receiver)| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        let ComparisonTask {
                            before,
                            after,
                            session,
                            result_sender,
                        } = task;
                        debug!(worker_id, session = %session, "comparison picked up");

                        let pipeline = pipeline.clone();
                        let outcome = tokio::task::spawn_blocking(move || {
                            pipeline.compare(before, after, &session)
                        })
                        .await;
                        let result = match outcome {
                            Ok(result) => result.map_err(PoolError::from),
                            Err(join_error) => {
                                error!(worker_id, %join_error, "comparison worker failed");
                                Err(PoolError::WorkerPanicked(join_error.to_string()))
                            }
                        };
                        let _ = result_sender.send(result);
                    }
                })
            })
            .collect();

        Self {
            task_sender,
            dispatcher,
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn compare(
        &self,
        before: RgbImage,
        after: RgbImage,
        session: SessionKey,
    ) -> Result<ComparisonResult, PoolError> {
        let (result_sender, result_receiver) = oneshot::channel();

        let task = ComparisonTask {
            before,
            after,
            session,
            result_sender,
        };

        self.task_sender.send(task).map_err(|_| PoolError::Closed)?;

        result_receiver.await.map_err(|_| PoolError::Closed)?
    }

    /// Runs every job concurrently; results come back in job order.
    pub async fn compare_many(
        &self,
        jobs: Vec<(RgbImage, RgbImage, SessionKey)>,
    ) -> Vec<Result<ComparisonResult, PoolError>> {
        join_all(
            jobs.into_iter()
                .map(|(before, after, session)| self.compare(before, after, session)),
        )
        .await
    }

    /// Stops accepting work and waits for queued comparisons to finish.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        let _ = self.dispatcher.await;
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
