//! Single-slot execution gate with a bounded FIFO waiting room.
//!
//! The controller drives one browser execution context, so at most one task
//! runs at a time. Admission is decided synchronously in [`ConcurrencyLimiter::submit`]:
//! a full queue is rejected right away instead of making the caller wait.

use futures::FutureExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tabrelay_core::{Error, Result};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
struct Inner {
    queue: VecDeque<Job>,
    in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyStats {
    pub in_flight: usize,
    pub queued: usize,
    pub utilization: f64,
}

#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Mutex<Inner>>,
    max_queue_size: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize, max_queue_size: usize) -> Self {
        if max_concurrent != 1 {
            warn!(
                max_concurrent,
                "ConcurrencyLimiter only supports a single in-flight task; ignoring maxConcurrent"
            );
        }
        info!(max_queue_size, "ConcurrencyLimiter initialized");
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_queue_size,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admits `task` or rejects it with [`Error::Overloaded`].
    ///
    /// Must be called from within a tokio runtime. The returned handle
    /// resolves once the task has run.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let outcome = AssertUnwindSafe(task)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Error::Other(format!("Task panicked: {}", panic_message(&*panic)))));
            let _ = tx.send(outcome);
        });

        let start = {
            let mut inner = self.inner();
            if inner.queue.len() >= self.max_queue_size {
                warn!(queued = inner.queue.len(), capacity = self.max_queue_size, "Queue full, rejecting task");
                return Err(Error::Overloaded {
                    capacity: self.max_queue_size,
                });
            }
            if inner.in_flight {
                inner.queue.push_back(job);
                debug!(queued = inner.queue.len(), "Task queued");
                None
            } else {
                inner.in_flight = true;
                Some(job)
            }
        };

        if let Some(job) = start {
            tokio::spawn(drain(self.inner.clone(), job));
        }
        Ok(TaskHandle { rx })
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(task)?.await
    }

    pub fn stats(&self) -> ConcurrencyStats {
        let inner = self.inner();
        let in_flight = usize::from(inner.in_flight);
        ConcurrencyStats {
            in_flight,
            queued: inner.queue.len(),
            utilization: in_flight as f64,
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            in_flight = stats.in_flight,
            queued = stats.queued,
            utilization = stats.utilization,
            "Concurrency stats"
        );
    }
}

/// Runs the admitted job, then keeps pulling from the queue until it is empty.
/// `in_flight` is cleared in the same critical section that finds the queue
/// empty, so a concurrent `submit` either sees the slot busy and enqueues, or
/// sees it free and starts its own worker.
async fn drain(inner: Arc<Mutex<Inner>>, mut job: Job) {
    loop {
        job.await;
        let next = {
            let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
            match guard.queue.pop_front() {
                Some(next) => next,
                None => {
                    guard.in_flight = false;
                    return;
                }
            }
        };
        job = next;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Completion of a task admitted by [`ConcurrencyLimiter::submit`].
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(Error::Other("Task dropped before completion".to_string())))
        })
    }
}
