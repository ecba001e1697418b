//! Generic worker pool runner
//!
//! A [`WorkerPool`] owns a fixed number of OS threads that all run the same
//! [`Stage`] loop body against one shared input queue. Pools are chained
//! with [`WorkerPool::connect`], which points a pool's output at the next
//! pool's input queue.

use crate::pool::queue::{PopError, QueueError, WorkQueue};
use crate::state::Signals;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Input queue size per worker thread when no capacity is given
pub const QUEUE_SLOTS_PER_WORKER: usize = 5;

/// Errors raised by the pool lifecycle
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker for pool '{pool}': {source}")]
    Spawn {
        pool: String,
        source: std::io::Error,
    },

    #[error("pool '{0}' is already running")]
    AlreadyRunning(String),
}

/// The loop body of one pipeline stage
///
/// Every worker thread of a pool calls [`Stage::work`] exactly once and
/// terminates when it returns. Implementations must not depend on the
/// liveness of sibling workers, only on queue and signal state.
pub trait Stage: Send + Sync + 'static {
    /// Items consumed from the pool's input queue
    type Input: Send + 'static;
    /// Items pushed to the connected output queue
    type Output: Send + 'static;
    /// Per-run configuration shared by all workers
    type Options: Send + Sync + 'static;

    /// Runs one worker until a terminal condition is reached
    fn work(&self, worker: &Worker<Self::Input, Self::Output>, options: &Self::Options);

    /// Hook called once per `start`, before any worker is spawned
    fn on_start(&self, _options: &Self::Options) {}
}

/// Outcome of a backpressure-aware push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// The item was queued
    Delivered,
    /// The stop condition fired before the item could be queued
    Stopped,
    /// The item could not be queued at all and was dropped
    Dropped,
}

/// Handle given to each worker thread
pub struct Worker<I, O> {
    name: String,
    index: usize,
    pool_size: usize,
    in_queue: WorkQueue<I>,
    out_queue: Option<WorkQueue<O>>,
    signals: Arc<Signals>,
}

impl<I, O> Worker<I, O> {
    /// Thread name, e.g. `parser-002`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Zero-based position of this worker in its pool
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn in_queue(&self) -> &WorkQueue<I> {
        &self.in_queue
    }

    /// Pops the next input item
    pub fn pop(&self, timeout: Duration) -> Result<I, PopError> {
        self.in_queue.pop(timeout)
    }

    /// Marks the last popped input item as processed
    pub fn task_done(&self) {
        self.in_queue.task_done();
    }

    /// Pushes to the connected output queue
    pub fn output(&self, item: O, timeout: Duration) -> Result<(), QueueError<O>> {
        match &self.out_queue {
            Some(queue) => queue.push(item, timeout),
            None => Err(QueueError::NotConnected(item)),
        }
    }

    /// Pushes back onto this pool's own input queue
    pub fn input(&self, item: I, timeout: Duration) -> Result<(), QueueError<I>> {
        self.in_queue.push(item, timeout)
    }

    /// Pushes to the output queue, sleeping and retrying while it is full
    ///
    /// `stop` is consulted before every attempt; the item is never dropped
    /// because of backpressure alone.
    pub fn emit_output<F>(&self, item: O, backoff: Duration, stop: F) -> Emission
    where
        F: Fn(&Signals) -> bool,
    {
        self.push_with_backoff(item, backoff, stop, |item, timeout| {
            self.output(item, timeout)
        })
    }

    /// Pushes onto the own input queue, waiting at most `backoff` for room
    ///
    /// Only this pool's workers drain that queue, so a worker that kept
    /// retrying here could be waiting on itself. A queue still full after
    /// `backoff` drops the item.
    pub fn emit_input<F>(&self, item: I, backoff: Duration, stop: F) -> Emission
    where
        F: Fn(&Signals) -> bool,
    {
        if stop(&self.signals) {
            return Emission::Stopped;
        }
        match self.input(item, backoff) {
            Ok(()) => Emission::Delivered,
            Err(e) => {
                tracing::warn!("{}: dropping requeued item: {}", self.name, e);
                Emission::Dropped
            }
        }
    }

    fn push_with_backoff<T, F, P>(&self, item: T, backoff: Duration, stop: F, push: P) -> Emission
    where
        F: Fn(&Signals) -> bool,
        P: Fn(T, Duration) -> Result<(), QueueError<T>>,
    {
        let mut item = item;
        loop {
            if stop(&self.signals) {
                return Emission::Stopped;
            }
            match push(item, backoff) {
                Ok(()) => return Emission::Delivered,
                Err(QueueError::Full(back)) => {
                    tracing::debug!("{}: queue full, retrying in {:?}", self.name, backoff);
                    item = back;
                    thread::sleep(backoff);
                }
                Err(e) => {
                    tracing::error!("{}: dropping item: {}", self.name, e);
                    return Emission::Dropped;
                }
            }
        }
    }
}

/// A fixed-size group of threads sharing one input queue and loop body
pub struct WorkerPool<S: Stage> {
    name: String,
    thread_num: usize,
    stage: Arc<S>,
    in_queue: WorkQueue<S::Input>,
    out_queue: Option<WorkQueue<S::Output>>,
    signals: Arc<Signals>,
    workers: Vec<JoinHandle<()>>,
}

impl<S: Stage> WorkerPool<S> {
    /// Creates a pool whose input queue holds five items per worker
    pub fn new(name: &str, thread_num: usize, stage: S, signals: Arc<Signals>) -> Self {
        let thread_num = thread_num.max(1);
        Self::with_capacity(name, thread_num, thread_num * QUEUE_SLOTS_PER_WORKER, stage, signals)
    }

    /// Creates a pool with an explicit input queue capacity
    pub fn with_capacity(
        name: &str,
        thread_num: usize,
        capacity: usize,
        stage: S,
        signals: Arc<Signals>,
    ) -> Self {
        Self {
            name: name.to_string(),
            thread_num: thread_num.max(1),
            stage: Arc::new(stage),
            in_queue: WorkQueue::new(capacity),
            out_queue: None,
            signals,
            workers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_num(&self) -> usize {
        self.thread_num
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn signals(&self) -> &Arc<Signals> {
        &self.signals
    }

    pub fn in_queue(&self) -> &WorkQueue<S::Input> {
        &self.in_queue
    }

    /// Spawns the worker threads and returns without waiting for them
    pub fn start(&mut self, options: S::Options) -> Result<(), PoolError> {
        if self.is_alive() {
            return Err(PoolError::AlreadyRunning(self.name.clone()));
        }
        self.reap();

        let options = Arc::new(options);
        self.stage.on_start(&options);

        for index in 0..self.thread_num {
            let worker = Worker {
                name: format!("{}-{:03}", self.name, index + 1),
                index,
                pool_size: self.thread_num,
                in_queue: self.in_queue.clone(),
                out_queue: self.out_queue.clone(),
                signals: Arc::clone(&self.signals),
            };
            let stage = Arc::clone(&self.stage);
            let options = Arc::clone(&options);

            let handle = thread::Builder::new()
                .name(worker.name.clone())
                .spawn(move || {
                    stage.work(&worker, &options);
                    tracing::info!("thread {} exit", worker.name);
                })
                .map_err(|source| PoolError::Spawn {
                    pool: self.name.clone(),
                    source,
                })?;
            self.workers.push(handle);
        }

        tracing::debug!("Started {} {} workers", self.thread_num, self.name);
        Ok(())
    }

    /// True while at least one worker has not terminated
    pub fn is_alive(&self) -> bool {
        self.workers.iter().any(|handle| !handle.is_finished())
    }

    /// Points this pool's output at `next`'s input queue and returns `next`
    pub fn connect<'a, N>(&mut self, next: &'a mut WorkerPool<N>) -> &'a mut WorkerPool<N>
    where
        N: Stage<Input = S::Output>,
    {
        self.out_queue = Some(next.in_queue.clone());
        next
    }

    /// Points this pool's output at an arbitrary queue
    pub fn set_output(&mut self, queue: WorkQueue<S::Output>) {
        self.out_queue = Some(queue);
    }

    pub fn output(&self, item: S::Output, timeout: Duration) -> Result<(), QueueError<S::Output>> {
        match &self.out_queue {
            Some(queue) => queue.push(item, timeout),
            None => Err(QueueError::NotConnected(item)),
        }
    }

    pub fn input(&self, item: S::Input, timeout: Duration) -> Result<(), QueueError<S::Input>> {
        self.in_queue.push(item, timeout)
    }

    /// Empties the input queue
    ///
    /// With `discard_remaining` the items are dropped and nothing is
    /// returned; otherwise they are handed back for a final drain pass.
    pub fn clear_buffer(&self, discard_remaining: bool) -> Vec<S::Input> {
        let items = self.in_queue.drain();
        if discard_remaining {
            if !items.is_empty() {
                tracing::info!("{}: discarded {} queued items", self.name, items.len());
            }
            Vec::new()
        } else {
            tracing::debug!("{}: drained {} queued items", self.name, items.len());
            items
        }
    }

    /// Joins finished workers and detaches the ones still running
    pub fn reap(&mut self) {
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::error!("Worker {} panicked", name);
                }
            } else {
                tracing::warn!("Worker {} still running, detaching", name);
            }
        }
    }
}
