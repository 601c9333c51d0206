//! Worker pool
//!
//! Each worker is a tokio task draining its own bounded queue. Jobs that
//! belong to a connection always go to the same worker, so one client's
//! packets are handled in the order they arrived; custom jobs are spread
//! round-robin. Every job is executed once and then destroyed, whether or
//! not its handler succeeded.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Job, JobData};

/// Dispatcher errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatcher has shut down")]
    Closed,

    #[error("Worker pool needs at least one worker")]
    NoWorkers,

    #[error("Job failed: {0}")]
    Job(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Game logic run on the workers for client jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handle one job; the dispatcher destroys it afterwards
    async fn handle(&self, job: &Job) -> DispatchResult<()>;
}

/// Dispatcher statistics
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

/// Pool of workers executing jobs
pub struct Dispatcher {
    queues: RwLock<Vec<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    next: AtomicUsize,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Spawn `workers` workers, each with a queue of `queue_capacity` jobs
    pub fn start(
        workers: usize,
        queue_capacity: usize,
        handler: Arc<dyn JobHandler>,
    ) -> DispatchResult<Self> {
        if workers == 0 {
            return Err(DispatchError::NoWorkers);
        }

        let stats = Arc::new(DispatchStats::default());
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            queues.push(tx);
            handles.push(tokio::spawn(run_worker(
                index,
                rx,
                handler.clone(),
                stats.clone(),
            )));
        }

        tracing::info!("Started {} workers", workers);

        Ok(Self {
            queues: RwLock::new(queues),
            workers: Mutex::new(handles),
            worker_count: workers,
            next: AtomicUsize::new(0),
            stats,
        })
    }

    /// Number of workers
    pub fn workers(&self) -> usize {
        self.worker_count
    }

    /// Queue a job; waits while the chosen worker's queue is full
    pub async fn submit(&self, job: Job) -> DispatchResult<()> {
        let queue = {
            let queues = self.queues.read();
            if queues.is_empty() {
                return Err(DispatchError::Closed);
            }
            queues[self.route(&job, queues.len())].clone()
        };

        queue.send(job).await.map_err(|_| DispatchError::Closed)?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn route(&self, job: &Job, workers: usize) -> usize {
        match job.data().connection() {
            Some(connection) => (connection.id() % workers as u64) as usize,
            None => self.next.fetch_add(1, Ordering::Relaxed) % workers,
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(&self) {
        self.queues.write().clear();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Worker panicked: {}", e);
            }
        }

        tracing::info!(
            "Dispatcher stopped ({} jobs completed, {} failed)",
            self.stats.completed.load(Ordering::Relaxed),
            self.stats.failed.load(Ordering::Relaxed)
        );
    }
}

async fn run_worker(
    index: usize,
    mut rx: mpsc::Receiver<Job>,
    handler: Arc<dyn JobHandler>,
    stats: Arc<DispatchStats>,
) {
    tracing::debug!("Worker {} started", index);

    while let Some(job) = rx.recv().await {
        let kind = job.kind();
        let handler = handler.clone();

        // A panicking job takes down its own task, not the worker; the job
        // is dropped while unwinding
        let outcome = tokio::spawn(async move {
            let result = match job.data() {
                JobData::Custom(custom) => {
                    custom.run();
                    Ok(())
                }
                _ => handler.handle(&job).await,
            };
            job.destroy();
            result
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Worker {}: {:?} job failed: {}", index, kind, e);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Worker {}: {:?} job panicked: {}", index, kind, e);
            }
        }
    }

    tracing::debug!("Worker {} stopped", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CustomJob, JobType};
    use crate::network::ConnectionHandle;
    use crate::protocol::Packet;
    use std::collections::HashMap;

    /// Records the chat messages each connection sent, in handling order
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<HashMap<u64, Vec<String>>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: &Job) -> DispatchResult<()> {
            match job.data() {
                JobData::ClientProcess(process) => {
                    if let Packet::Chat { message } = &process.packet {
                        if message == "fail" {
                            return Err(DispatchError::Job("asked to fail".to_string()));
                        }
                        // Give other workers a chance to interleave
                        tokio::task::yield_now().await;
                        self.seen
                            .lock()
                            .entry(process.connection.id())
                            .or_default()
                            .push(message.clone());
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    fn chat(message: &str) -> Packet {
        Packet::Chat {
            message: message.to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_per_connection_order() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::start(4, 8, recorder.clone()).unwrap();

        let connections: Vec<_> = (0..6).map(ConnectionHandle::detached).collect();
        for i in 0..50 {
            for (handle, _) in &connections {
                dispatcher
                    .submit(Job::client_process(handle.clone(), chat(&i.to_string())))
                    .await
                    .unwrap();
            }
        }
        dispatcher.shutdown().await;

        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 6);
        for messages in seen.values() {
            assert_eq!(messages, &expected);
        }
    }

    #[tokio::test]
    async fn test_custom_jobs_run_once_and_are_destroyed() {
        let runs = Arc::new(AtomicUsize::new(0));
        let payload = Arc::new(());

        let dispatcher = Dispatcher::start(2, 4, Arc::new(Recorder::default())).unwrap();
        for _ in 0..10 {
            let runs = runs.clone();
            let job = CustomJob::new(
                move |_| {
                    runs.fetch_add(1, Ordering::SeqCst);
                },
                Some(Box::new(payload.clone())),
            );
            dispatcher.submit(Job::custom(job)).await.unwrap();
        }
        dispatcher.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 10);
        // Every job, and with it every payload clone, is gone
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[tokio::test]
    async fn test_failed_job_is_still_destroyed() {
        let (handle, _rx) = ConnectionHandle::detached(1);
        let shared = Arc::new(JobData::ClientProcess(crate::job::ClientProcessJob::new(
            handle,
            chat("fail"),
        )));

        let dispatcher = Dispatcher::start(1, 1, Arc::new(Recorder::default())).unwrap();
        dispatcher
            .submit(Job::external(JobType::ClientProcess, shared.clone()))
            .await
            .unwrap();

        dispatcher.shutdown().await;
        let stats = dispatcher.stats();

        assert_eq!(stats.failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.completed.load(Ordering::Relaxed), 0);
        // The external payload outlives the job
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_job() {
        let runs = Arc::new(AtomicUsize::new(0));
        let payload = Arc::new(());

        let dispatcher = Dispatcher::start(1, 4, Arc::new(Recorder::default())).unwrap();
        let job = CustomJob::new(|_| panic!("job blew up"), Some(Box::new(payload.clone())));
        dispatcher.submit(Job::custom(job)).await.unwrap();

        let job = CustomJob::new(
            {
                let runs = runs.clone();
                move |_| {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            },
            None,
        );
        dispatcher.submit(Job::custom(job)).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stats().failed.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.stats().completed.load(Ordering::Relaxed), 1);
        // The panicking job was still dropped exactly once
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let dispatcher = Dispatcher::start(1, 1, Arc::new(Recorder::default())).unwrap();
        dispatcher.shutdown().await;

        let job = Job::custom(CustomJob::new(|_| {}, None));
        let err = tokio_test::assert_err!(dispatcher.submit(job).await);
        assert!(matches!(err, DispatchError::Closed));
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        assert!(matches!(
            Dispatcher::start(0, 4, Arc::new(Recorder::default())),
            Err(DispatchError::NoWorkers)
        ));
    }
}
