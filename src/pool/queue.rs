//! Bounded FIFO queue linking the worker pools
//!
//! A `WorkQueue` owns both ends of a bounded crossbeam channel, so it never
//! disconnects while any handle is alive. Producers and consumers block up
//! to a caller-supplied timeout. An unfinished-item counter mirrors the
//! `task_done` bookkeeping of a classic job queue.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors returned when pushing an item; the item is handed back
#[derive(Error)]
pub enum QueueError<T> {
    #[error("queue is full")]
    Full(T),

    #[error("queue is disconnected")]
    Disconnected(T),

    #[error("no output queue is connected")]
    NotConnected(T),
}

impl<T> QueueError<T> {
    /// Recovers the item that could not be queued
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Disconnected(item) | Self::NotConnected(item) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

impl<T> fmt::Debug for QueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Disconnected(_) => f.write_str("Disconnected(..)"),
            Self::NotConnected(_) => f.write_str("NotConnected(..)"),
        }
    }
}

/// Errors returned when popping an item
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    #[error("timed out waiting for an item")]
    Timeout,

    #[error("queue is disconnected")]
    Disconnected,
}

/// Bounded multi-producer multi-consumer FIFO queue
pub struct WorkQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
    unfinished: Arc<AtomicUsize>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            capacity: self.capacity,
            unfinished: Arc::clone(&self.unfinished),
        }
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("unfinished", &self.unfinished())
            .finish()
    }
}

impl<T> WorkQueue<T> {
    /// Creates a queue holding at most `capacity` items (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            unfinished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pushes an item, blocking up to `timeout` while the queue is full
    pub fn push(&self, item: T, timeout: Duration) -> Result<(), QueueError<T>> {
        // Count before sending so a fast consumer can never see task_done
        // for an item that was not yet counted.
        self.unfinished.fetch_add(1, Ordering::AcqRel);
        match self.sender.send_timeout(item, timeout) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.release(1);
                match err {
                    SendTimeoutError::Timeout(item) => Err(QueueError::Full(item)),
                    SendTimeoutError::Disconnected(item) => Err(QueueError::Disconnected(item)),
                }
            }
        }
    }

    /// Pops the oldest item, blocking up to `timeout` while the queue is empty
    pub fn pop(&self, timeout: Duration) -> Result<T, PopError> {
        self.receiver.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => PopError::Timeout,
            RecvTimeoutError::Disconnected => PopError::Disconnected,
        })
    }

    /// Pops an item if one is immediately available
    pub fn try_pop(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Marks one previously popped item as fully processed
    pub fn task_done(&self) {
        self.release(1);
    }

    /// Number of items pushed but not yet marked done
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::Acquire)
    }

    /// Removes every queued item, counting them as done
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.receiver.try_iter().collect();
        self.release(items.len());
        items
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let _ = self
            .unfinished
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(n))
            });
    }
}
