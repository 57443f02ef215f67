//! Per-entity serialized write queue
//!
//! Each key owns a lane of pending async jobs. The first job enqueued on an
//! idle lane spawns a drain task; later jobs join that same drain. Jobs on one
//! lane never overlap. Lanes drain most-recent-first unless configured for
//! FIFO.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::config::DrainOrder;

/// Lane used when callers do not partition by entity.
pub const DEFAULT_LANE: &str = "default";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queued job was dropped before completing")]
    Dropped,

    #[error("Queue lock poisoned: {0}")]
    LockPoisoned(String),
}

struct Lane {
    pending: VecDeque<BoxFuture<'static, ()>>,
    draining: bool,
    idle: watch::Sender<bool>,
}

impl Lane {
    fn new() -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            pending: VecDeque::new(),
            draining: false,
            idle,
        }
    }
}

type Lanes = Arc<Mutex<HashMap<String, Lane>>>;

#[derive(Clone)]
pub struct UpdateQueue {
    lanes: Lanes,
    order: DrainOrder,
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new(DrainOrder::default())
    }
}

impl UpdateQueue {
    pub fn new(order: DrainOrder) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            order,
        }
    }

    pub fn order(&self) -> DrainOrder {
        self.order
    }

    /// Add a job to `key`'s lane, starting a drain if the lane is idle.
    pub fn enqueue<F>(&self, key: &str, job: F) -> Result<(), QueueError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut lanes = self
            .lanes
            .lock()
            .map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
        let lane = lanes.entry(key.to_string()).or_insert_with(Lane::new);
        lane.pending.push_back(Box::pin(job));

        if !lane.draining {
            lane.draining = true;
            lane.idle.send_replace(false);
            tokio::spawn(drain(self.lanes.clone(), key.to_string(), self.order));
        }
        Ok(())
    }

    /// Enqueue a job and wait for its result.
    pub async fn run<F, T>(&self, key: &str, job: F) -> Result<T, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue(key, async move {
            let _ = tx.send(job.await);
        })?;
        rx.await.map_err(|_| QueueError::Dropped)
    }

    /// Resolve once `key`'s lane has nothing pending or running.
    pub async fn flush(&self, key: &str) -> Result<(), QueueError> {
        let mut idle = {
            let lanes = self
                .lanes
                .lock()
                .map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
            match lanes.get(key) {
                Some(lane) => lane.idle.subscribe(),
                None => return Ok(()),
            }
        };
        idle.wait_for(|idle| *idle)
            .await
            .map_err(|_| QueueError::Dropped)?;
        Ok(())
    }

    /// Flush every lane known at the time of the call.
    pub async fn flush_all(&self) -> Result<(), QueueError> {
        let keys: Vec<String> = self
            .lanes
            .lock()
            .map_err(|e| QueueError::LockPoisoned(e.to_string()))?
            .keys()
            .cloned()
            .collect();
        for key in keys {
            self.flush(&key).await?;
        }
        Ok(())
    }

    pub fn is_idle(&self, key: &str) -> bool {
        match self.lanes.lock() {
            Ok(lanes) => lanes.get(key).map_or(true, |lane| !lane.draining),
            Err(_) => false,
        }
    }
}

async fn drain(lanes: Lanes, key: String, order: DrainOrder) {
    loop {
        let job = {
            let mut lanes = match lanes.lock() {
                Ok(lanes) => lanes,
                Err(e) => {
                    log::error!("Update queue lock poisoned while draining {key}: {e}");
                    return;
                }
            };
            let lane = match lanes.get_mut(&key) {
                Some(lane) => lane,
                None => return,
            };
            let next = match order {
                DrainOrder::Lifo => lane.pending.pop_back(),
                DrainOrder::Fifo => lane.pending.pop_front(),
            };
            match next {
                Some(job) => job,
                None => {
                    lane.draining = false;
                    lane.idle.send_replace(true);
                    return;
                }
            }
        };

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            log::error!("Queued write on lane {key} panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn recorder() -> Arc<Mutex<Vec<usize>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Arc<Mutex<Vec<usize>>>, n: usize) -> impl Future<Output = ()> + Send + 'static {
        let log = log.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            log.lock().unwrap().push(n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifo_drain_runs_newest_first() {
        let queue = UpdateQueue::new(DrainOrder::Lifo);
        let log = recorder();
        for n in 0..3 {
            queue.enqueue(DEFAULT_LANE, record(&log, n)).unwrap();
        }

        queue.flush(DEFAULT_LANE).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_drain_runs_oldest_first() {
        let queue = UpdateQueue::new(DrainOrder::Fifo);
        let log = recorder();
        for n in 0..3 {
            queue.enqueue(DEFAULT_LANE, record(&log, n)).unwrap();
        }

        queue.flush(DEFAULT_LANE).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_job_runs_exactly_once() {
        let queue = UpdateQueue::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..25 {
            let count = count.clone();
            queue
                .enqueue("subject", async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        queue.flush("subject").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 25);
        assert!(queue.is_idle("subject"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_enqueued_while_draining_join_the_drain() {
        let queue = UpdateQueue::new(DrainOrder::Fifo);
        let log = recorder();

        let inner_queue = queue.clone();
        let inner_log = log.clone();
        queue
            .enqueue(DEFAULT_LANE, async move {
                inner_queue
                    .enqueue(DEFAULT_LANE, record(&inner_log, 2))
                    .unwrap();
                inner_log.lock().unwrap().push(1);
            })
            .unwrap();

        queue.flush(DEFAULT_LANE).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_lanes_are_independent() {
        let queue = UpdateQueue::default();
        let a = queue.run("a", async { 1 }).await.unwrap();
        let b = queue.run("b", async { 2 }).await.unwrap();
        assert_eq!(a + b, 3);
        queue.flush_all().await.unwrap();
        assert!(queue.is_idle("a") && queue.is_idle("b"));
    }

    #[tokio::test]
    async fn test_flush_of_unknown_lane_is_immediate() {
        let queue = UpdateQueue::default();
        queue.flush("nothing").await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stall_lane() {
        let queue = UpdateQueue::new(DrainOrder::Fifo);
        queue
            .enqueue(DEFAULT_LANE, async { panic!("boom") })
            .unwrap();
        let value = queue.run(DEFAULT_LANE, async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }
}
