use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::config::BatchConfig;

struct Pending<I, O> {
    correlation_id: u64,
    input: I,
    reply: oneshot::Sender<O>,
}

/// Time/size-bounded batching queue for batch-tolerant targets (spec.md
/// §4.6). Callers `submit` an input and await the returned receiver; a
/// driver loop (started separately via [`BatchQueue::run`]) drains the
/// queue when it reaches `max_items` or `window` elapses, whichever first,
/// and fans results back out by correlation id.
pub struct BatchQueue<I, O> {
    config: BatchConfig,
    pending: Mutex<Vec<Pending<I, O>>>,
    next_correlation_id: Mutex<u64>,
    notify: Notify,
}

impl<I: Send + 'static, O: Send + 'static> BatchQueue<I, O> {
    pub fn new(config: BatchConfig) -> Arc<Self> {
        Arc::new(BatchQueue {
            config,
            pending: Mutex::new(Vec::new()),
            next_correlation_id: Mutex::new(0),
            notify: Notify::new(),
        })
    }

    /// Enqueues `input`, returning a receiver for its eventual output and
    /// the correlation id assigned to it.
    pub fn submit(&self, input: I) -> (u64, oneshot::Receiver<O>) {
        let (tx, rx) = oneshot::channel();
        let correlation_id = {
            let mut next = self.next_correlation_id.lock();
            let id = *next;
            *next += 1;
            id
        };

        let should_notify = {
            let mut pending = self.pending.lock();
            pending.push(Pending {
                correlation_id,
                input,
                reply: tx,
            });
            pending.len() >= self.config.max_items
        };
        if should_notify {
            self.notify.notify_one();
        }
        (correlation_id, rx)
    }

    fn drain(&self) -> Vec<Pending<I, O>> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drains whatever is queued and calls `executor` with `(correlation_id,
    /// input)` pairs; `executor` must return outputs in the same order.
    /// Intended to be invoked directly in tests; [`BatchQueue::run`] wraps
    /// this with the timer/size-triggered background loop.
    pub fn flush_now<F>(&self, executor: F)
    where
        F: FnOnce(Vec<(u64, I)>) -> Vec<O>,
    {
        let batch = self.drain();
        if batch.is_empty() {
            return;
        }
        let (ids_and_inputs, replies): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|p| ((p.correlation_id, p.input), p.reply))
            .unzip();
        let outputs = executor(ids_and_inputs);
        for (reply, output) in replies.into_iter().zip(outputs) {
            let _ = reply.send(output);
        }
    }

    /// Runs the background flush loop until the task is aborted. Wakes
    /// either when `max_items` have accumulated (via `notify`) or every
    /// `window`, whichever comes first.
    pub async fn run<F>(self: Arc<Self>, mut executor: F)
    where
        F: FnMut(Vec<(u64, I)>) -> Vec<O>,
    {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.window) => {}
            }
            self.flush_now(&mut executor);
        }
    }

    /// Like [`BatchQueue::run`], but `executor` itself drives async work
    /// (spec.md §4.6 batch-tolerant dispatch, where flushing a batch means
    /// calling through each item's resilience-wrapped handler).
    pub async fn run_async<F, Fut>(self: Arc<Self>, mut executor: F)
    where
        F: FnMut(Vec<(u64, I)>) -> Fut,
        Fut: Future<Output = Vec<O>>,
    {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.window) => {}
            }
            let batch = self.drain();
            if batch.is_empty() {
                continue;
            }
            let (ids_and_inputs, replies): (Vec<_>, Vec<_>) = batch
                .into_iter()
                .map(|p| ((p.correlation_id, p.input), p.reply))
                .unzip();
            let outputs = executor(ids_and_inputs).await;
            for (reply, output) in replies.into_iter().zip(outputs) {
                let _ = reply.send(output);
            }
        }
    }
}
