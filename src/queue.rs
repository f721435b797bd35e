//! Activity queues behind a uniform enqueue/dequeue/done surface
//!
//! Three backends cover the three scheduling models: a plain FIFO for the
//! sequential run loop, a condvar-based FIFO for worker threads, and a
//! notify-based FIFO whose dequeue/join are suspension points for
//! cooperative workers. `done` acknowledges a previously dequeued activity;
//! at the end of a run the done count matches the number of successful
//! dequeues, which is what `join` waits on.

use crate::activity::Activity;
use crate::error::{LoomError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<Arc<Activity>>,
    unfinished: usize,
}

fn lock(mutex: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poison) => {
            tracing::warn!("queue mutex was poisoned, recovering");
            poison.into_inner()
        }
    }
}

/// Single-threaded FIFO; no blocking semantics.
#[derive(Debug, Default)]
pub struct SequentialQueue {
    inner: Mutex<Inner>,
    maxsize: usize,
}

impl SequentialQueue {
    /// `maxsize` of zero means unbounded.
    pub fn new(maxsize: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            maxsize,
        }
    }

    pub fn enqueue(&self, activity: Arc<Activity>) -> Result<()> {
        let mut inner = lock(&self.inner);
        if self.maxsize > 0 && inner.items.len() >= self.maxsize {
            return Err(LoomError::Other("queue is full".to_string()));
        }
        inner.items.push_back(activity);
        inner.unfinished += 1;
        Ok(())
    }

    pub fn dequeue(&self) -> Option<Arc<Activity>> {
        lock(&self.inner).items.pop_front()
    }

    pub fn size(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.maxsize > 0 && self.size() >= self.maxsize
    }

    /// Acknowledge a dequeued activity as processed.
    pub fn done(&self) {
        let mut inner = lock(&self.inner);
        inner.unfinished = inner.unfinished.saturating_sub(1);
    }

    pub fn unfinished(&self) -> usize {
        lock(&self.inner).unfinished
    }
}

/// Thread-safe FIFO with blocking enqueue/dequeue and a `join` barrier.
#[derive(Debug, Default)]
pub struct ConcurrentQueue {
    inner: Mutex<Inner>,
    maxsize: usize,
    not_empty: Condvar,
    not_full: Condvar,
    all_done: Condvar,
}

impl ConcurrentQueue {
    /// `maxsize` of zero means unbounded.
    pub fn new(maxsize: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            maxsize,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    fn wait<'a>(
        &self,
        cv: &Condvar,
        guard: MutexGuard<'a, Inner>,
        timeout: Option<Duration>,
    ) -> Result<MutexGuard<'a, Inner>> {
        match timeout {
            None => Ok(cv.wait(guard).unwrap_or_else(|p| p.into_inner())),
            Some(duration) => {
                let (guard, result) = cv
                    .wait_timeout(guard, duration)
                    .unwrap_or_else(|p| p.into_inner());
                if result.timed_out() {
                    return Err(LoomError::QueueTimeout(duration));
                }
                Ok(guard)
            }
        }
    }

    pub fn enqueue(
        &self,
        activity: Arc<Activity>,
        block: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut inner = lock(&self.inner);
        while self.maxsize > 0 && inner.items.len() >= self.maxsize {
            if !block {
                return Err(LoomError::Other("queue is full".to_string()));
            }
            inner = self.wait(&self.not_full, inner, timeout)?;
        }
        inner.items.push_back(activity);
        inner.unfinished += 1;
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn dequeue(&self, block: bool, timeout: Option<Duration>) -> Result<Option<Arc<Activity>>> {
        let mut inner = lock(&self.inner);
        loop {
            if let Some(activity) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(Some(activity));
            }
            if !block {
                return Ok(None);
            }
            inner = self.wait(&self.not_empty, inner, timeout)?;
        }
    }

    pub fn size(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.maxsize > 0 && self.size() >= self.maxsize
    }

    /// Acknowledge a dequeued activity; wakes `join` when the outstanding
    /// count reaches zero.
    pub fn done(&self) {
        let mut inner = lock(&self.inner);
        inner.unfinished = inner.unfinished.saturating_sub(1);
        if inner.unfinished == 0 {
            self.all_done.notify_all();
        }
    }

    pub fn unfinished(&self) -> usize {
        lock(&self.inner).unfinished
    }

    /// Block until every enqueued activity has been acknowledged.
    pub fn join(&self) {
        let mut inner = lock(&self.inner);
        while inner.unfinished > 0 {
            inner = self
                .all_done
                .wait(inner)
                .unwrap_or_else(|p| p.into_inner());
        }
    }
}

/// FIFO for interleaved logical workers on one thread.
///
/// `dequeue` and `join` are suspension points; there is no locking beyond a
/// short critical section around the item list.
#[derive(Debug, Default)]
pub struct CooperativeQueue {
    inner: Mutex<Inner>,
    maxsize: usize,
    done_notify: Notify,
}

impl CooperativeQueue {
    /// `maxsize` of zero means unbounded.
    pub fn new(maxsize: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            maxsize,
            done_notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, activity: Arc<Activity>) -> Result<()> {
        let mut inner = lock(&self.inner);
        if self.maxsize > 0 && inner.items.len() >= self.maxsize {
            return Err(LoomError::Other("queue is full".to_string()));
        }
        inner.items.push_back(activity);
        inner.unfinished += 1;
        Ok(())
    }

    pub fn try_dequeue(&self) -> Option<Arc<Activity>> {
        lock(&self.inner).items.pop_front()
    }

    /// Yield to the scheduler, then pop. Returns `None` once the queue has
    /// drained.
    pub async fn dequeue(&self) -> Option<Arc<Activity>> {
        tokio::task::yield_now().await;
        self.try_dequeue()
    }

    pub fn size(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.maxsize > 0 && self.size() >= self.maxsize
    }

    pub fn done(&self) {
        let mut inner = lock(&self.inner);
        inner.unfinished = inner.unfinished.saturating_sub(1);
        if inner.unfinished == 0 {
            self.done_notify.notify_waiters();
        }
    }

    pub fn unfinished(&self) -> usize {
        lock(&self.inner).unfinished
    }

    /// Suspend until every enqueued activity has been acknowledged.
    pub async fn join(&self) {
        loop {
            let notified = self.done_notify.notified();
            if self.unfinished() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Queue selection by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Sequential,
    Concurrent,
    Cooperative,
}

impl QueueKind {
    /// Resolve a queue kind from its configured name.
    ///
    /// `multi-processing` maps onto the joinable concurrent queue;
    /// cross-process semantics are not provided.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sequential" | "basic" => Ok(QueueKind::Sequential),
            "default" | "multi-threading" | "multi-processing" => Ok(QueueKind::Concurrent),
            "asyncio" | "async" => Ok(QueueKind::Cooperative),
            other => Err(LoomError::Other(format!(
                "unsupported queue type '{}'",
                other
            ))),
        }
    }

    pub fn build(self, maxsize: usize) -> QueueBackend {
        match self {
            QueueKind::Sequential => QueueBackend::Sequential(SequentialQueue::new(maxsize)),
            QueueKind::Concurrent => QueueBackend::Concurrent(ConcurrentQueue::new(maxsize)),
            QueueKind::Cooperative => QueueBackend::Cooperative(CooperativeQueue::new(maxsize)),
        }
    }
}

/// The queue a pipeline feeds during `collect` and drains during `run`.
#[derive(Debug)]
pub enum QueueBackend {
    Sequential(SequentialQueue),
    Concurrent(ConcurrentQueue),
    Cooperative(CooperativeQueue),
}

impl QueueBackend {
    pub fn enqueue(&self, activity: Arc<Activity>) -> Result<()> {
        match self {
            QueueBackend::Sequential(q) => q.enqueue(activity),
            QueueBackend::Concurrent(q) => q.enqueue(activity, true, None),
            QueueBackend::Cooperative(q) => q.enqueue(activity),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            QueueBackend::Sequential(q) => q.size(),
            QueueBackend::Concurrent(q) => q.size(),
            QueueBackend::Cooperative(q) => q.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            QueueBackend::Sequential(q) => q.is_empty(),
            QueueBackend::Concurrent(q) => q.is_empty(),
            QueueBackend::Cooperative(q) => q.is_empty(),
        }
    }
}
