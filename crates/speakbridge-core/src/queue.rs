//! FIFO queue connecting the reader to the synth worker.
//!
//! The queue does no locking or waiting of its own. It lives inside
//! [`PipelineState`](crate::state::PipelineState), whose mutex serialises
//! every operation and whose condition variable carries the wake-ups.

use std::collections::VecDeque;

/// Unbounded first-in, first-out queue of owned entries
#[derive(Debug)]
pub struct CommandQueue<T> {
    entries: VecDeque<T>,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Append an entry to the tail
    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    /// Remove and return the head entry
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    /// Look at the head entry without removing it
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Drop every entry, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Number of queued entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Extend<T> for CommandQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}
