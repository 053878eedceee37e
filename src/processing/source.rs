//! Input fed while it is being consumed.

use crate::data::{Element, Index, Iterable, Sequence};
use crate::processing::{ProcessingBuffer, ProcessingEntry, ProcessingEnv, StageResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A processing input that accepts elements while pipelines already read it.
///
/// Readers block until more elements are added or the source is closed, so
/// every producer must eventually call [`IncrementalSource::close`].
pub struct IncrementalSource<T> {
    buffer: ProcessingBuffer<T>,
    next: Arc<AtomicUsize>,
}

impl<T> Clone for IncrementalSource<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            next: self.next.clone(),
        }
    }
}

impl<T: Element> IncrementalSource<T> {
    pub fn new(env: &ProcessingEnv) -> Self {
        Self {
            buffer: ProcessingBuffer::ordered(env),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add(&self, value: T) {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.buffer
            .add(ProcessingEntry::new(Index::top(i), StageResult::Value(value)));
    }

    /// Signal that no more elements follow.
    pub fn close(&self) {
        self.buffer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }

    /// Elements added so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl<T: Element> Iterable<T> for IncrementalSource<T> {
    fn iterator(&self) -> Sequence<T> {
        Box::new(self.buffer.values().filter_map(Result::ok))
    }
}
