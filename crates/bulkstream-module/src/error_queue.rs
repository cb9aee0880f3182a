//! `ErrorQueue` - bounded runtime error queue.
//!
//! The reactor pushes, callers drain from any thread. When the queue is
//! full the newest record is dropped; the session is cancelled either way,
//! so the first errors are the interesting ones.

use std::fmt;

use bulkstream_core::entry::StreamId;
use bulkstream_core::error::BulkError;
use crossbeam_queue::ArrayQueue;

/// Default capacity of a session's error queue.
pub const ERROR_QUEUE_CAPACITY: usize = 64;

/// One runtime error, with the transfer it came from if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// (stream id, transfer id)
    pub origin: Option<(StreamId, u32)>,
    pub error: BulkError,
}

impl ErrorRecord {
    pub fn new(error: BulkError) -> Self {
        Self { origin: None, error }
    }

    pub fn at(stream: StreamId, transfer: u32, error: BulkError) -> Self {
        Self { origin: Some((stream, transfer)), error }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Some((stream, transfer)) => write!(f, "@{},{}: {}", stream, transfer, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

pub struct ErrorQueue {
    queue: ArrayQueue<ErrorRecord>,
}

impl ErrorQueue {
    pub fn new() -> Self {
        Self::with_capacity(ERROR_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { queue: ArrayQueue::new(capacity.max(1)) }
    }

    /// Store `record`; `false` if the queue was full and it was dropped.
    #[inline]
    pub fn push(&self, record: ErrorRecord) -> bool {
        self.queue.push(record).is_ok()
    }

    #[inline]
    pub fn pop(&self) -> Option<ErrorRecord> {
        self.queue.pop()
    }

    /// Move every queued record into `out`; returns how many were moved.
    pub fn drain_into(&self, out: &mut Vec<ErrorRecord>) -> usize {
        let mut n = 0;
        while let Some(record) = self.queue.pop() {
            out.push(record);
            n += 1;
        }
        n
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}
