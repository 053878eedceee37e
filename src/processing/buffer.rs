//! Concurrent result buffers.
//!
//! A [`ProcessingBuffer`] is filled by any number of producers, in whatever
//! order their work completes, and read by any number of consumers. It offers
//! two views:
//!
//! - [`ProcessingBuffer::entries`]: every entry in arrival order, placeholders
//!   included. Parallel stages read their input this way.
//! - [`ProcessingBuffer::values`]: the visible elements. For an ordered buffer
//!   they come in [`Index`] order and only up to the *frontier*, the end of the
//!   longest prefix without gaps; an unordered buffer yields them as they
//!   arrive.
//!
//! Readers block until data is available or the buffer is closed. Closing
//! resolves any remaining gap, so a terminal drain always completes.

use crate::data::{Index, Iterable, Sequence};
use crate::error::Outcome;
use crate::processing::{Metrics, ProcessingEntry, ProcessingEnv, StageResult};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::iter::FusedIterator;
use std::ops::Bound;
use std::sync::Arc;

/// Read order of a buffer's value view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Values in original input order
    Ordered,
    /// Values in completion order
    Unordered,
}

/// Thread-safe many-producer, many-consumer entry buffer.
pub struct ProcessingBuffer<T> {
    frame: Arc<Frame<T>>,
}

impl<T> Clone for ProcessingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            frame: self.frame.clone(),
        }
    }
}

struct Frame<T> {
    kind: BufferKind,
    state: Mutex<BufferState<T>>,
    changed: Condvar,
    metrics: Arc<Metrics>,
}

struct BufferState<T> {
    /// Arrival log
    entries: Vec<ProcessingEntry<T>>,
    /// Index order, ordered buffers only
    order: Option<OrderState>,
    closed: bool,
}

/// Position-searchable view of the log plus the frontier.
struct OrderState {
    /// Index → position in the arrival log
    positions: BTreeMap<Index, usize>,
    /// Last index of the resolved prefix
    frontier: Option<Index>,
    /// Index that has to arrive next to extend the prefix
    next_index: Index,
}

impl OrderState {
    fn new() -> Self {
        Self {
            positions: BTreeMap::new(),
            frontier: None,
            next_index: Index::root().next(0),
        }
    }

    fn following(&self, after: Option<&Index>) -> Option<(&Index, usize)> {
        let mut range = match after {
            Some(index) => self
                .positions
                .range::<Index, _>((Bound::Excluded(index), Bound::Unbounded)),
            None => self.positions.range::<Index, _>(..),
        };
        range.next().map(|(index, pos)| (index, *pos))
    }

    /// Insert an entry and move the frontier over every now contiguous entry.
    fn insert<T>(&mut self, index: Index, pos: usize, entries: &[ProcessingEntry<T>]) {
        if self.positions.contains_key(&index) {
            tracing::warn!(index = %index, "duplicate index in ordered buffer, entry ignored for ordering");
            return;
        }
        self.positions.insert(index, pos);

        loop {
            let Some((index, pos)) = self.following(self.frontier.as_ref()) else {
                break;
            };
            if index.after(&self.next_index) {
                break;
            }
            let index = index.clone();
            self.next_index = entries[pos].next_index();
            tracing::debug!(index = %index, next = %self.next_index, "frontier advanced");
            self.frontier = Some(index);
        }
    }

    /// Treat every gap as resolved. Returns whether a gap was open.
    fn resolve_all(&mut self) -> bool {
        let Some(last) = self.positions.keys().next_back().cloned() else {
            return false;
        };
        if self.frontier.as_ref() == Some(&last) {
            return false;
        }
        tracing::warn!(
            frontier = ?self.frontier.as_ref().map(|i| i.to_string()),
            expected = %self.next_index,
            last = %last,
            "closing ordered buffer with unresolved gap"
        );
        self.next_index = last.clone();
        self.frontier = Some(last);
        true
    }
}

impl<T: Clone> ProcessingBuffer<T> {
    pub fn new(env: &ProcessingEnv, kind: BufferKind) -> Self {
        let order = match kind {
            BufferKind::Ordered => Some(OrderState::new()),
            BufferKind::Unordered => None,
        };
        Self {
            frame: Arc::new(Frame {
                kind,
                state: Mutex::new(BufferState {
                    entries: Vec::new(),
                    order,
                    closed: false,
                }),
                changed: Condvar::new(),
                metrics: env.metrics().clone(),
            }),
        }
    }

    /// An open buffer that reconstructs input order.
    pub fn ordered(env: &ProcessingEnv) -> Self {
        Self::new(env, BufferKind::Ordered)
    }

    /// An open buffer that yields values in completion order.
    pub fn unordered(env: &ProcessingEnv) -> Self {
        Self::new(env, BufferKind::Unordered)
    }

    /// Append an entry. Entries added after [`close`](Self::close) and
    /// entries whose index exceeds a sibling bound are dropped.
    pub fn add(&self, entry: ProcessingEntry<T>) {
        if let Err(err) = entry.index.validate() {
            tracing::warn!(index = %entry.index, "malformed entry dropped: {}", err);
            return;
        }
        let mut state = self.frame.state.lock();
        if state.closed {
            tracing::warn!(index = %entry.index, "entry added to closed buffer, dropped");
            return;
        }
        match &entry.result {
            StageResult::Value(_) => self.frame.metrics.add_value(),
            StageResult::Failure(_) => self.frame.metrics.add_failure(),
            StageResult::Filtered => self.frame.metrics.add_placeholder(),
        }
        tracing::trace!(index = %entry.index, valid = entry.is_valid(), "buffer add");

        let index = entry.index.clone();
        let pos = state.entries.len();
        state.entries.push(entry);
        let BufferState { entries, order, .. } = &mut *state;
        if let Some(order) = order {
            order.insert(index, pos, entries.as_slice());
        }
        drop(state);
        // entry readers wait on every append, value readers on the frontier
        self.frame.changed.notify_all();
    }

    /// Mark the end of input and wake every blocked reader.
    pub fn close(&self) {
        let mut state = self.frame.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let forced = state
            .order
            .as_mut()
            .map(|order| order.resolve_all())
            .unwrap_or(false);
        self.frame.metrics.add_buffer_closed(forced);
        drop(state);
        self.frame.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.frame.state.lock().closed
    }

    /// Number of entries appended so far, placeholders included.
    pub fn len(&self) -> usize {
        self.frame.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `i`-th entry in buffer order (index order for ordered buffers),
    /// `None` for placeholders or out of range.
    pub fn get(&self, i: usize) -> Option<Outcome<T>> {
        let state = self.frame.state.lock();
        let pos = match &state.order {
            Some(order) => *order.positions.values().nth(i)?,
            None => i,
        };
        state.entries.get(pos)?.result.clone().into_outcome()
    }

    /// Raw entries in arrival order.
    pub fn entries(&self) -> EntryIter<T> {
        EntryIter {
            frame: self.frame.clone(),
            pos: 0,
        }
    }

    /// Visible elements, in index order for ordered buffers.
    pub fn values(&self) -> ValueIter<T> {
        let cursor = match self.frame.kind {
            BufferKind::Ordered => Cursor::Ordered(None),
            BufferKind::Unordered => Cursor::Arrival(0),
        };
        ValueIter {
            frame: self.frame.clone(),
            cursor,
        }
    }

    /// Guard closing the buffer when dropped, also during unwinding.
    pub fn close_on_drop(&self) -> CloseOnDrop<T> {
        CloseOnDrop {
            buffer: self.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Iterable<Outcome<T>> for ProcessingBuffer<T> {
    fn iterator(&self) -> Sequence<Outcome<T>> {
        Box::new(self.values())
    }
}

/// Closes a buffer when dropped.
pub struct CloseOnDrop<T: Clone> {
    buffer: ProcessingBuffer<T>,
}

impl<T: Clone> Drop for CloseOnDrop<T> {
    fn drop(&mut self) {
        self.buffer.close();
    }
}

/// Arrival-order iterator over all entries.
pub struct EntryIter<T> {
    frame: Arc<Frame<T>>,
    pos: usize,
}

impl<T: Clone> Iterator for EntryIter<T> {
    type Item = ProcessingEntry<T>;

    fn next(&mut self) -> Option<ProcessingEntry<T>> {
        let mut state = self.frame.state.lock();
        loop {
            if let Some(entry) = state.entries.get(self.pos) {
                self.pos += 1;
                return Some(entry.clone());
            }
            if state.closed {
                return None;
            }
            self.frame.changed.wait(&mut state);
        }
    }
}

impl<T: Clone> FusedIterator for EntryIter<T> {}

enum Cursor {
    /// Last index consumed or skipped
    Ordered(Option<Index>),
    /// Next arrival position
    Arrival(usize),
}

/// Iterator over visible elements.
pub struct ValueIter<T> {
    frame: Arc<Frame<T>>,
    cursor: Cursor,
}

impl<T: Clone> ValueIter<T> {
    /// Locate the next visible entry without consuming it. Placeholders on the
    /// way are skipped permanently.
    fn seek(cursor: &mut Cursor, state: &BufferState<T>) -> Option<(Option<Index>, usize)> {
        match cursor {
            Cursor::Arrival(pos) => {
                while let Some(entry) = state.entries.get(*pos) {
                    if entry.is_valid() {
                        return Some((None, *pos));
                    }
                    *pos += 1;
                }
                None
            }
            Cursor::Ordered(last) => {
                let order = state.order.as_ref()?;
                let frontier = order.frontier.as_ref()?;
                loop {
                    let (index, pos) = order.following(last.as_ref())?;
                    if index.after(frontier) {
                        return None;
                    }
                    if state.entries[pos].is_valid() {
                        return Some((Some(index.clone()), pos));
                    }
                    *last = Some(index.clone());
                }
            }
        }
    }

    fn consume(&mut self, index: Option<Index>, pos: usize) {
        match &mut self.cursor {
            Cursor::Arrival(p) => *p = pos + 1,
            Cursor::Ordered(last) => *last = index,
        }
    }

    /// Block until another element is available or the buffer is closed and
    /// drained. Does not consume.
    pub fn has_next(&mut self) -> bool {
        let frame = self.frame.clone();
        let mut state = frame.state.lock();
        loop {
            if Self::seek(&mut self.cursor, &state).is_some() {
                return true;
            }
            if state.closed {
                return false;
            }
            frame.changed.wait(&mut state);
        }
    }

    /// Whether another element is available right now.
    pub fn check_next(&mut self) -> bool {
        let state = self.frame.state.lock();
        Self::seek(&mut self.cursor, &state).is_some()
    }
}

impl<T: Clone> Iterator for ValueIter<T> {
    type Item = Outcome<T>;

    fn next(&mut self) -> Option<Outcome<T>> {
        let frame = self.frame.clone();
        let mut state = frame.state.lock();
        loop {
            if let Some((index, pos)) = Self::seek(&mut self.cursor, &state) {
                let outcome = state.entries[pos].result.clone().into_outcome();
                self.consume(index, pos);
                if outcome.is_some() {
                    return outcome;
                }
                continue;
            }
            if state.closed {
                return None;
            }
            frame.changed.wait(&mut state);
        }
    }
}

impl<T: Clone> FusedIterator for ValueIter<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::processing::StageResult;
    use std::thread;

    fn env() -> ProcessingEnv {
        ProcessingEnv::default()
    }

    fn value(index: Index, v: i32) -> ProcessingEntry<i32> {
        ProcessingEntry::new(index, StageResult::Value(v))
    }

    fn top(i: usize, v: i32) -> ProcessingEntry<i32> {
        value(Index::top(i), v)
    }

    fn filtered(i: usize) -> ProcessingEntry<i32> {
        ProcessingEntry::filtered(Index::top(i))
    }

    fn child(parent: usize, pos: usize, count: usize) -> Index {
        Index::top(parent).children(count).nth(pos).unwrap()
    }

    /// Collect all values on a background thread until the buffer closes.
    fn gather(buffer: &ProcessingBuffer<i32>) -> thread::JoinHandle<Vec<i32>> {
        let values = buffer.values();
        thread::spawn(move || values.map(|v| v.unwrap()).collect())
    }

    fn arrival(buffer: &ProcessingBuffer<i32>) -> Vec<Option<i32>> {
        buffer
            .entries()
            .map(|e| e.result.value().copied())
            .collect()
    }

    fn expect_next(it: &mut ValueIter<i32>, v: i32, more: bool) {
        assert!(it.check_next(), "next element expected but not indicated");
        assert_eq!(it.next(), Some(Ok(v)));
        assert_eq!(it.check_next(), more);
    }

    #[test]
    fn test_unordered_add() {
        let buf = ProcessingBuffer::unordered(&env());
        let promise = gather(&buf);

        buf.add(top(0, 0));
        buf.add(top(1, 1));
        buf.add(top(2, 2));
        buf.add(top(3, 3));
        buf.close();

        assert_eq!(promise.join().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(arrival(&buf), vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_unordered_add_filtered() {
        let buf = ProcessingBuffer::unordered(&env());
        let promise = gather(&buf);

        buf.add(top(0, 0));
        buf.add(top(1, 1));
        buf.add(filtered(2));
        buf.add(top(3, 3));
        buf.close();

        assert_eq!(promise.join().unwrap(), vec![0, 1, 3]);
        assert_eq!(buf.entries().count(), 4);
    }

    #[test]
    fn test_unordered_keeps_completion_order() {
        let buf = ProcessingBuffer::unordered(&env());
        buf.add(top(2, 2));
        buf.add(top(0, 0));
        buf.add(top(1, 1));
        buf.close();
        let values: Vec<i32> = buf.values().map(|v| v.unwrap()).collect();
        assert_eq!(values, vec![2, 0, 1]);
    }

    #[test]
    fn test_ordered_add_in_order() {
        let buf = ProcessingBuffer::ordered(&env());
        let promise = gather(&buf);
        let mut it = buf.values();
        assert!(!it.check_next());

        buf.add(top(0, 0));
        expect_next(&mut it, 0, false);
        buf.add(top(1, 1));
        expect_next(&mut it, 1, false);
        buf.add(top(2, 2));
        expect_next(&mut it, 2, false);
        buf.add(top(3, 3));
        expect_next(&mut it, 3, false);

        buf.close();
        assert_eq!(promise.join().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(arrival(&buf), vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_ordered_add_filtered() {
        let buf = ProcessingBuffer::ordered(&env());
        let promise = gather(&buf);
        let mut it = buf.values();

        buf.add(top(0, 0));
        expect_next(&mut it, 0, false);
        buf.add(top(1, 1));
        expect_next(&mut it, 1, false);
        buf.add(filtered(2));
        assert!(!it.check_next());
        buf.add(top(3, 3));
        expect_next(&mut it, 3, false);

        buf.close();
        assert_eq!(promise.join().unwrap(), vec![0, 1, 3]);
    }

    #[test]
    fn test_ordered_add_mixed_order() {
        let buf = ProcessingBuffer::ordered(&env());
        let promise = gather(&buf);
        let mut it = buf.values();

        buf.add(top(3, 3));
        assert!(!it.check_next());
        buf.add(top(0, 0));
        expect_next(&mut it, 0, false);
        buf.add(top(1, 1));
        expect_next(&mut it, 1, false);
        buf.add(top(2, 2));
        expect_next(&mut it, 2, true);
        expect_next(&mut it, 3, false);

        buf.close();
        assert_eq!(promise.join().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(arrival(&buf), vec![Some(3), Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_ordered_add_mixed_order_filtered() {
        let buf = ProcessingBuffer::ordered(&env());
        let promise = gather(&buf);
        let mut it = buf.values();

        buf.add(top(3, 3));
        assert!(!it.check_next());
        buf.add(top(0, 0));
        expect_next(&mut it, 0, false);
        buf.add(top(2, 2));
        assert!(!it.check_next());
        buf.add(ProcessingEntry::new(Index::top(1), StageResult::Filtered));
        expect_next(&mut it, 2, true);
        expect_next(&mut it, 3, false);

        buf.close();
        assert_eq!(promise.join().unwrap(), vec![0, 2, 3]);
        assert_eq!(arrival(&buf), vec![Some(3), Some(0), Some(2), None]);
    }

    #[test]
    fn test_ordered_exploded() {
        let buf = ProcessingBuffer::ordered(&env());
        let promise = gather(&buf);
        let mut it = buf.values();

        buf.add(value(child(0, 1, 2), 11));
        assert!(!it.check_next());
        buf.add(value(child(0, 0, 2), 10));
        assert!(!it.check_next());

        let mut decl = value(Index::top(0), 0);
        decl.max_sub = 2;
        buf.add(decl);
        expect_next(&mut it, 0, true);
        expect_next(&mut it, 10, true);
        expect_next(&mut it, 11, false);

        let mut decl = value(Index::top(1), 1);
        decl.max_sub = 1;
        buf.add(decl);
        expect_next(&mut it, 1, false);

        let mut decl = value(Index::top(2), 2);
        decl.max_sub = 1;
        buf.add(decl);
        assert!(!it.check_next());

        buf.add(value(child(1, 0, 1), 20));
        expect_next(&mut it, 20, true);
        expect_next(&mut it, 2, false);

        buf.add(value(child(2, 0, 1), 30));
        expect_next(&mut it, 30, false);
        assert!(!it.check_next());

        buf.close();
        assert_eq!(promise.join().unwrap(), vec![0, 10, 11, 1, 20, 2, 30]);
        assert_eq!(
            arrival(&buf),
            vec![Some(11), Some(10), Some(0), Some(1), Some(2), Some(20), Some(30)]
        );
    }

    #[test]
    fn test_declaration_releases_children() {
        let buf = ProcessingBuffer::ordered(&env());
        let mut it = buf.values();

        buf.add(value(child(1, 0, 1), 10));
        buf.add(ProcessingEntry::filtered(Index::top(0)));
        assert!(!it.check_next());
        buf.add(ProcessingEntry::declaration(Index::top(1), 1));
        expect_next(&mut it, 10, false);
    }

    #[test]
    fn test_close_resolves_gap() {
        let env = env();
        let buf = ProcessingBuffer::ordered(&env);
        let promise = gather(&buf);

        // declares three children but only delivers two
        buf.add(ProcessingEntry::declaration(Index::top(0), 3));
        buf.add(value(child(0, 0, 3), 1));
        buf.add(value(child(0, 2, 3), 3));
        buf.add(top(1, 4));
        buf.close();

        assert_eq!(promise.join().unwrap(), vec![1, 3, 4]);
        assert_eq!(env.metrics().snapshot().forced_closes, 1);
    }

    #[test]
    fn test_close_records_forced_close() {
        let env = env();
        let buf = ProcessingBuffer::ordered(&env);
        buf.add(top(1, 1));
        buf.close();
        let snapshot = env.metrics().snapshot();
        assert_eq!(snapshot.buffers_closed, 1);
        assert_eq!(snapshot.forced_closes, 1);
    }

    #[test]
    fn test_frontier_never_passes_last_added() {
        let buf = ProcessingBuffer::ordered(&env());
        buf.add(top(0, 0));
        buf.add(top(1, 1));
        let mut it = buf.values();
        expect_next(&mut it, 0, true);
        expect_next(&mut it, 1, false);
        buf.add(top(3, 3));
        assert!(!it.check_next());
    }

    #[test]
    fn test_failures_are_visible() {
        let buf = ProcessingBuffer::ordered(&env());
        let err = StageError::Aborted {
            message: "lost".to_string(),
        };
        buf.add(ProcessingEntry::new(Index::top(1), StageResult::Failure(err.clone())));
        buf.add(top(0, 0));
        buf.close();
        let values: Vec<Outcome<i32>> = buf.values().collect();
        assert_eq!(values, vec![Ok(0), Err(err)]);
    }

    #[test]
    fn test_drain_is_deterministic_after_close() {
        let buf = ProcessingBuffer::ordered(&env());
        buf.add(top(0, 0));
        buf.close();
        let mut it = buf.values();
        assert!(it.has_next());
        assert_eq!(it.next(), Some(Ok(0)));
        for _ in 0..3 {
            assert!(!it.has_next());
            assert_eq!(it.next(), None);
        }
        let mut entries = buf.entries();
        assert!(entries.next().is_some());
        assert!(entries.next().is_none());
        assert!(entries.next().is_none());
    }

    #[test]
    fn test_has_next_blocks_until_close() {
        let buf = ProcessingBuffer::<i32>::ordered(&env());
        let mut it = buf.values();
        let waiter = thread::spawn(move || it.has_next());
        thread::sleep(std::time::Duration::from_millis(20));
        buf.close();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_add_after_close_is_dropped() {
        let buf = ProcessingBuffer::ordered(&env());
        buf.close();
        buf.add(top(0, 0));
        assert!(buf.is_empty());
        assert!(buf.is_closed());
    }

    #[test]
    fn test_out_of_bound_index_is_dropped() {
        // a bounded top level has no parent to carry into
        let bad = Index::from_parts([(0, Some(1))]).unwrap().next(0);
        assert!(bad.validate().is_err());

        let buf = ProcessingBuffer::ordered(&env());
        buf.add(value(bad, 9));
        assert!(buf.is_empty());

        buf.add(top(0, 0));
        let mut values = buf.values();
        assert!(values.check_next());
        assert_eq!(values.next(), Some(Ok(0)));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_get_uses_buffer_order() {
        let buf = ProcessingBuffer::ordered(&env());
        buf.add(top(2, 2));
        buf.add(filtered(1));
        buf.add(top(0, 0));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.get(0), Some(Ok(0)));
        assert_eq!(buf.get(1), None);
        assert_eq!(buf.get(2), Some(Ok(2)));
        assert_eq!(buf.get(3), None);

        let unordered = ProcessingBuffer::unordered(&env());
        unordered.add(top(2, 2));
        unordered.add(top(0, 0));
        assert_eq!(unordered.get(0), Some(Ok(2)));
    }

    #[test]
    fn test_close_on_drop_guard() {
        let buf = ProcessingBuffer::<i32>::unordered(&env());
        let sink = buf.clone();
        let producer = thread::spawn(move || {
            let _guard = sink.close_on_drop();
            sink.add(top(0, 0));
            panic!("producer died");
        });
        assert!(producer.join().is_err());
        assert!(buf.is_closed());
        assert_eq!(buf.values().count(), 1);
    }

    #[test]
    fn test_concurrent_producers_keep_order() {
        let buf = ProcessingBuffer::ordered(&env());
        let promise = gather(&buf);
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let sink = buf.clone();
                thread::spawn(move || {
                    for i in (p..100).step_by(4).rev() {
                        sink.add(top(i, i as i32));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        buf.close();
        assert_eq!(promise.join().unwrap(), (0..100).collect::<Vec<i32>>());
    }
}
