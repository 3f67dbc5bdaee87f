//! Serialized delivery of host callbacks.
//!
//! The host runtime is not reentrant, so every call into it goes through one
//! bounded FIFO queue drained by a single dedicated thread. Producers await
//! when the queue is full; nothing is dropped.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{GatewayError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
}

impl Dispatcher {
    /// Spawn the consumer thread. It exits once every `Dispatcher` clone is
    /// dropped and the queue is drained.
    pub fn spawn(capacity: usize) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));

        thread::Builder::new()
            .name("whatsgate-dispatch".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Event handler panicked");
                    }
                }
                debug!("Dispatch queue closed");
            })
            .map_err(|_| GatewayError::DispatchClosed)?;

        Ok(Self { tx })
    }

    /// Enqueue `job`, waiting for a free slot if the queue is full.
    pub async fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.tx
            .send(Box::new(job))
            .await
            .map_err(|_| GatewayError::DispatchClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let dispatcher = Dispatcher::spawn(4).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        for i in 0..32 {
            let seen = seen.clone();
            dispatcher
                .dispatch(move || seen.lock().unwrap().push(i))
                .await
                .unwrap();
        }
        dispatcher
            .dispatch(move || {
                let _ = done_tx.send(());
            })
            .await
            .unwrap();

        done_rx.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_one_job_at_a_time() {
        let dispatcher = Dispatcher::spawn(16).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        for _ in 0..8 {
            let running = running.clone();
            let max_seen = max_seen.clone();
            dispatcher
                .dispatch(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(2));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }
        dispatcher
            .dispatch(move || {
                let _ = done_tx.send(());
            })
            .await
            .unwrap();

        done_rx.await.unwrap();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_queue() {
        let dispatcher = Dispatcher::spawn(4).unwrap();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        dispatcher.dispatch(|| panic!("boom")).await.unwrap();
        dispatcher
            .dispatch(move || {
                let _ = done_tx.send(());
            })
            .await
            .unwrap();

        done_rx.await.unwrap();
    }
}
