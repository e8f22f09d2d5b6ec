use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::models::Job;

// type-erased job as it sits in the queue
struct QueuedJob {
    id: String,
    task: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct PoolCounters {
    in_flight: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub service: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub rejected: u64,
}

/// Fixed set of workers fed from a bounded queue.
///
/// Each idle worker hands its own job channel to the dispatch loop, which
/// pairs the next queued job with whichever worker freed up first.
pub struct WorkerPool {
    name: String,
    max_workers: usize,
    queue_tx: mpsc::Sender<QueuedJob>,
    queue_rx: Mutex<Option<mpsc::Receiver<QueuedJob>>>,
    quit: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, max_workers: usize, queue_size: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_size.max(1));
        Self {
            name: name.into(),
            max_workers: max_workers.max(1),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            quit: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the workers and the dispatch loop. Only the first call has effect.
    pub fn start(&self) {
        let Some(queue_rx) = self.queue_rx.lock().take() else {
            return;
        };
        let (idle_tx, idle_rx) = mpsc::channel(self.max_workers);

        let mut handles = self.handles.lock();
        for id in 0..self.max_workers {
            handles.push(tokio::spawn(run_worker(
                id,
                self.name.clone(),
                idle_tx.clone(),
                self.quit.clone(),
                Arc::clone(&self.counters),
            )));
        }
        handles.push(tokio::spawn(dispatch(
            self.name.clone(),
            queue_rx,
            idle_rx,
            self.quit.clone(),
        )));
        info!(service = %self.name, workers = self.max_workers, "worker pool started");
    }

    /// Signal every worker and the dispatch loop to exit. Queued jobs are
    /// dropped, closing their result channels; running jobs finish.
    pub fn stop(&self) {
        if !self.quit.is_cancelled() {
            self.quit.cancel();
            debug!(service = %self.name, "worker pool stopping");
        }
    }

    /// Stop and wait up to `grace` for the pool's tasks to exit.
    pub async fn stop_and_wait(&self, grace: Duration) {
        self.stop();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        let joined = tokio::time::timeout(grace, futures::future::join_all(handles)).await;
        if joined.is_err() {
            warn!(service = %self.name, "worker pool did not drain within grace period");
        }
    }

    /// Enqueue without waiting. A full queue is reported immediately.
    pub fn submit<T: Send + 'static>(&self, job: Job<T>) -> Result<()> {
        let Job {
            id,
            cancel,
            task,
            respond_to,
        } = job;
        let queued = QueuedJob {
            id,
            task: Box::pin(async move {
                let result = task(cancel).await;
                // receiver may have given up waiting
                let _ = respond_to.send(result);
            }),
        };
        match self.queue_tx.try_send(queued) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(service = %self.name, job = %job.id, "job queue full");
                Err(GatewayError::QueueFull(self.name.clone()))
            }
            Err(TrySendError::Closed(_)) => Err(GatewayError::PoolClosed(self.name.clone())),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            service: self.name.clone(),
            workers: self.max_workers,
            queue_capacity: self.queue_tx.max_capacity(),
            queued: self.queue_tx.max_capacity() - self.queue_tx.capacity(),
            in_flight: self.in_flight(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.quit.cancel();
    }
}

async fn run_worker(
    id: usize,
    service: String,
    idle_tx: mpsc::Sender<mpsc::Sender<QueuedJob>>,
    quit: CancellationToken,
    counters: Arc<PoolCounters>,
) {
    let (job_tx, mut job_rx) = mpsc::channel::<QueuedJob>(1);
    loop {
        // advertise as idle
        tokio::select! {
            biased;
            _ = quit.cancelled() => break,
            sent = idle_tx.send(job_tx.clone()) => {
                if sent.is_err() {
                    break;
                }
            }
        }

        let job = tokio::select! {
            biased;
            _ = quit.cancelled() => break,
            job = job_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        counters.in_flight.fetch_add(1, Ordering::Relaxed);
        debug!(service = %service, worker = id, job = %job.id, "executing job");
        job.task.await;
        counters.in_flight.fetch_sub(1, Ordering::Relaxed);
        counters.completed.fetch_add(1, Ordering::Relaxed);
    }
    debug!(service = %service, worker = id, "worker exited");
}

async fn dispatch(
    service: String,
    mut queue_rx: mpsc::Receiver<QueuedJob>,
    mut idle_rx: mpsc::Receiver<mpsc::Sender<QueuedJob>>,
    quit: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = quit.cancelled() => break,
            job = queue_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let worker = tokio::select! {
            biased;
            _ = quit.cancelled() => break,
            worker = idle_rx.recv() => match worker {
                Some(worker) => worker,
                None => break,
            },
        };

        if let Err(e) = worker.send(job).await {
            warn!(service = %service, job = %e.0.id, "worker went away before taking job");
        }
    }
    debug!(service = %service, "dispatch loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::sync::Semaphore;
    use tokio::time::sleep;

    fn blocking_job(
        gate: &Arc<Semaphore>,
        running: &Arc<AtomicUsize>,
        peak: &Arc<AtomicUsize>,
    ) -> (Job<usize>, tokio::sync::oneshot::Receiver<usize>) {
        let gate = Arc::clone(gate);
        let running = Arc::clone(running);
        let peak = Arc::clone(peak);
        Job::new("job", CancellationToken::new(), move |_| async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let _permit = gate.acquire().await;
            running.fetch_sub(1, Ordering::SeqCst);
            now
        })
    }

    #[tokio::test]
    async fn test_job_result_is_delivered() {
        let pool = WorkerPool::new("bilibili", 2, 10);
        pool.start();
        let (job, rx) = Job::new("j1", CancellationToken::new(), |_| async { "payload".to_string() });
        pool.submit(job).unwrap();
        assert_eq!(rx.await.unwrap(), "payload");
        sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_workers() {
        let pool = WorkerPool::new("zhihu", 3, 100);
        pool.start();
        let gate = Arc::new(Semaphore::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut receivers = Vec::new();
        for _ in 0..10 {
            let (job, rx) = blocking_job(&gate, &running, &peak);
            pool.submit(job).unwrap();
            receivers.push(rx);
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(running.load(Ordering::SeqCst), 3);
        assert_eq!(pool.in_flight(), 3);

        gate.add_permits(10);
        for rx in receivers {
            rx.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let pool = WorkerPool::new("gitee", 2, 3);
        pool.start();
        let gate = Arc::new(Semaphore::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        // saturate both workers, then let the dispatcher pick up one more
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (job, rx) = blocking_job(&gate, &running, &peak);
            pool.submit(job).unwrap();
            receivers.push(rx);
            sleep(Duration::from_millis(20)).await;
        }

        let started = Instant::now();
        let mut accepted = 0;
        let mut rejected = 0;
        for _ in 0..7 {
            let (job, rx) = blocking_job(&gate, &running, &peak);
            match pool.submit(job) {
                Ok(()) => {
                    accepted += 1;
                    receivers.push(rx);
                }
                Err(e) => {
                    assert!(matches!(e, GatewayError::QueueFull(ref name) if name == "gitee"));
                    rejected += 1;
                }
            }
        }
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(accepted, 3);
        assert_eq!(rejected, 4);
        assert_eq!(pool.stats().rejected, 4);
        assert_eq!(pool.stats().queued, 3);

        gate.add_permits(100);
        for rx in receivers {
            rx.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_stop_closes_queued_jobs_but_finishes_running() {
        let pool = WorkerPool::new("weibo", 1, 10);
        pool.start();
        let gate = Arc::new(Semaphore::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (first, first_rx) = blocking_job(&gate, &running, &peak);
        pool.submit(first).unwrap();
        sleep(Duration::from_millis(20)).await;
        let (second, second_rx) = blocking_job(&gate, &running, &peak);
        pool.submit(second).unwrap();
        let (third, third_rx) = blocking_job(&gate, &running, &peak);
        pool.submit(third).unwrap();

        pool.stop();
        gate.add_permits(10);

        assert_eq!(first_rx.await.unwrap(), 1);
        assert!(second_rx.await.is_err());
        assert!(third_rx.await.is_err());
        pool.stop_and_wait(Duration::from_secs(1)).await;
        assert!(matches!(
            pool.submit(Job::new("late", CancellationToken::new(), |_| async {}).0),
            Err(GatewayError::PoolClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_job_receives_its_cancel_token() {
        let pool = WorkerPool::new("douyu", 1, 1);
        pool.start();
        let token = CancellationToken::new();
        token.cancel();
        let (job, rx) = Job::new("j", token, |cancel| async move { cancel.is_cancelled() });
        pool.submit(job).unwrap();
        assert!(rx.await.unwrap());
    }
}
