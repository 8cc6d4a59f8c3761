//! Bounded worker pool for outbound notification sends
//!
//! The dispatch cycle never writes to a connection itself. It submits a
//! [`SendJob`] and moves on; a fixed set of workers performs the sends. The
//! backlog is bounded: when it is full the job is dropped and counted, so a
//! stalled subscriber can neither block the dispatch cycle nor grow memory
//! without limit.
//!
//! ```text
//! dispatch cycle ──try_send──▶ [ backlog (bounded) ] ──▶ worker 1 ──▶ ConnectionHandle::send
//!                    │                               ──▶ worker 2
//!                  Full ──▶ drop + count             ──▶ worker N
//! ```

use crate::server::exposure::websocket::connection::ConnectionHandle;
use crate::server::exposure::websocket::protocol::ServerMessage;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

/// One notification bound for one connection
#[derive(Debug)]
pub struct SendJob {
    pub connection: ConnectionHandle,
    pub message: ServerMessage,
}

/// Fixed-size pool of send workers with a bounded backlog
///
/// Must be created inside a Tokio runtime. Workers exit once the pool is
/// dropped and the backlog is empty.
pub struct SendPool {
    tx: mpsc::Sender<SendJob>,
    workers: usize,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl SendPool {
    /// Spawn `workers` send tasks sharing a backlog of `capacity` jobs
    ///
    /// Both values are clamped to at least one.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers {
            let rx = rx.clone();
            tokio::spawn(async move {
                run_worker(worker, rx).await;
            });
        }

        tracing::debug!(workers, capacity, "Send pool started");

        Self {
            tx,
            workers,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Pool sized to the number of available processing units
    pub fn with_available_parallelism(capacity: usize) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(workers, capacity)
    }

    /// Submit a job without waiting
    ///
    /// Returns `false` if the job was rejected because the backlog is full
    /// (or the workers are gone).
    pub fn submit(&self, job: SendJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    connection_id = %job.connection.id(),
                    capacity = self.capacity,
                    "Send backlog full, dropping notification"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::error!(
                    connection_id = %job.connection.id(),
                    "Send pool is shut down, dropping notification"
                );
                false
            }
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of jobs rejected because the backlog was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_worker(worker: usize, rx: Arc<Mutex<mpsc::Receiver<SendJob>>>) {
    loop {
        // Hold the lock only while waiting for the next job
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            tracing::debug!(worker, "Send worker stopping");
            break;
        };

        if let Err(e) = job.connection.send(job.message) {
            tracing::debug!(
                worker,
                connection_id = %job.connection.id(),
                error = %e,
                "Failed to deliver notification"
            );
        }
    }
}
