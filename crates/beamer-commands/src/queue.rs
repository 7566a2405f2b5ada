//! Command queue for outgoing projector commands.
//!
//! Bounded FIFO shared between the dispatcher (single consumer, also a
//! producer through the poll scheduler) and external producers. Every
//! operation is non-blocking; a full queue rejects the command instead of
//! waiting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::command::Command;

/// Queue statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of commands currently queued
    pub total_count: usize,
    /// Fixed capacity
    pub capacity: usize,
    /// Commands accepted since construction
    pub accepted_count: u64,
    /// Commands rejected because the queue was full
    pub dropped_count: u64,
    /// Commands handed to the consumer
    pub dequeued_count: u64,
}

/// Inner queue data.
#[derive(Debug)]
struct QueueInner {
    /// Pending commands, oldest first
    queue: VecDeque<Command>,
    /// Queue size limit
    max_size: usize,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    dequeued: AtomicU64,
}

/// Bounded FIFO command queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    /// Inner queue data
    inner: Arc<Mutex<QueueInner>>,
    /// Lifetime counters
    counters: Arc<Counters>,
}

impl CommandQueue {
    /// Create a new command queue.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                queue: VecDeque::with_capacity(max_size),
                max_size,
            })),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Enqueue a command.
    ///
    /// Returns [`QueueError::Full`] without touching the queued commands
    /// when the queue is at capacity.
    pub fn enqueue(&self, command: Command) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();

        if inner.queue.len() >= inner.max_size {
            drop(inner);
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Full);
        }

        inner.queue.push_back(command);
        drop(inner);

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Try to dequeue the oldest command (non-blocking).
    pub fn try_dequeue(&self) -> Option<Command> {
        let command = self.inner.lock().queue.pop_front();
        if command.is_some() {
            self.counters.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        command
    }

    /// Get queue statistics.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();

        QueueStats {
            total_count: inner.queue.len(),
            capacity: inner.max_size,
            accepted_count: self.counters.accepted.load(Ordering::Relaxed),
            dropped_count: self.counters.dropped.load(Ordering::Relaxed),
            dequeued_count: self.counters.dequeued.load(Ordering::Relaxed),
        }
    }

    /// Get the current queue size.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Check if queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Fixed capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.inner.lock().max_size
    }

    /// Clear all commands from the queue.
    pub fn clear(&self) {
        self.inner.lock().queue.clear();
    }
}

/// Queue error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full")]
    Full,
}
