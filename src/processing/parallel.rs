//! Worker pool execution.
//!
//! Every parallel stage owns a feeder thread reading the previous stage's
//! buffer in arrival order. Value entries become pool tasks that write their
//! results, under the entry's [`Index`], into the stage's own buffer; entries
//! without a value are forwarded directly. The buffer restores input order for
//! readers unless the chain was switched to unordered output.

use crate::data::{Element, Index, Sequence};
use crate::error::{Outcome, StageError};
use crate::processing::buffer::{BufferKind, ProcessingBuffer};
use crate::processing::ops::{self, CompareFn, ElementOp, Emit, TransformFn};
use crate::processing::sequential::Source;
use crate::processing::{Metrics, ProcessingEntry, ProcessingEnv, ProcessorPool, StageResult};
use crossbeam_utils::sync::WaitGroup;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub(crate) struct Parallel<T> {
    env: ProcessingEnv,
    pool: ProcessorPool,
    buffer: ProcessingBuffer<T>,
}

impl<T: Element> Parallel<T> {
    /// Feed an arbitrary source into a fresh ordered buffer.
    pub fn from_source(env: &ProcessingEnv, pool: ProcessorPool, source: Source<T>) -> Self {
        let buffer = ProcessingBuffer::ordered(env);
        let sink = buffer.clone();
        let spawned = env.spawn("ingest", move || {
            let _close = sink.close_on_drop();
            let mut next = 0;
            let fed = catch_unwind(AssertUnwindSafe(|| {
                for outcome in source.iterator() {
                    sink.add(ProcessingEntry::top(next, outcome));
                    next += 1;
                }
            }));
            if let Err(payload) = fed {
                abort_entry(&sink, Index::top(next), StageError::from_panic("ingest", payload));
            }
        });
        if let Err(err) = spawned {
            abort(&buffer, Index::top(0), err);
        }
        Self {
            env: env.clone(),
            pool,
            buffer,
        }
    }

    pub fn pool(&self) -> &ProcessorPool {
        &self.pool
    }

    pub fn buffer(&self) -> &ProcessingBuffer<T> {
        &self.buffer
    }

    /// Same data, subsequent stages run on `pool`.
    pub fn with_pool(&self, pool: ProcessorPool) -> Self {
        Self {
            env: self.env.clone(),
            pool,
            buffer: self.buffer.clone(),
        }
    }

    /// Apply an element stage, one pool task per value entry.
    pub fn elements<U: Element>(&self, kind: BufferKind, op: &ElementOp<T, U>) -> Parallel<U> {
        let target = ProcessingBuffer::new(&self.env, kind);
        let next = Parallel {
            env: self.env.clone(),
            pool: self.pool.clone(),
            buffer: target.clone(),
        };

        let lease = match self.pool.lease() {
            Ok(lease) => lease,
            Err(err) => {
                abort(&target, Index::top(0), err);
                return next;
            }
        };

        let upstream = self.buffer.entries();
        let op = op.clone();
        let metrics = self.env.metrics().clone();
        let sink = target.clone();
        let spawned = self.env.spawn(op.stage(), move || {
            // close the buffer before the pool is released
            let lease = lease;
            let _close = sink.close_on_drop();
            let pending = WaitGroup::new();
            // index of the entry in hand, then the highest one handled
            let mut current: Option<Index> = None;
            let mut last: Option<Index> = None;

            let fed = catch_unwind(AssertUnwindSafe(|| {
                for entry in upstream {
                    current = Some(entry.index.clone());
                    let entry = match entry.pass_through::<U>() {
                        Ok(forwarded) => {
                            sink.add(forwarded);
                            last = current.take().max(last.take());
                            continue;
                        }
                        Err(entry) => entry,
                    };
                    let ProcessingEntry { index, result, .. } = entry;
                    let StageResult::Value(value) = result else {
                        continue;
                    };

                    let job_index = index.clone();
                    let job_sink = sink.clone();
                    let job_op = op.clone();
                    let job_metrics = metrics.clone();
                    let job_pending = pending.clone();
                    let submitted = lease.pool().exec(move || {
                        let _done = job_pending;
                        let emit = job_op.apply(Ok(value));
                        emit_into(&job_sink, job_index, emit, &job_metrics);
                    });
                    if let Err(err) = submitted {
                        abort_entry(&sink, index, err);
                    }
                    last = current.take().max(last.take());
                }
            }));
            if let Err(payload) = fed {
                let index = current
                    .or_else(|| last.map(|i| i.next(0)))
                    .unwrap_or_else(|| Index::top(0));
                abort_entry(&sink, index, StageError::from_panic(op.stage(), payload));
            }
            pending.wait();
            tracing::debug!(stage = op.stage(), "parallel stage drained");
        });

        if let Err(err) = spawned {
            abort(&target, Index::top(0), err);
        }
        next
    }

    pub fn sorted(&self, cmp: &CompareFn<T>) -> Parallel<T> {
        let cmp = cmp.clone();
        self.republish("sort", move |items| ops::sort_outcomes(items, &cmp))
    }

    pub fn transformed<U: Element>(&self, f: &TransformFn<T, U>) -> Parallel<U> {
        let f = f.clone();
        self.republish("transform", move |items| ops::transform_outcomes(items, &f))
    }

    /// Drain the visible values on a background thread, apply a
    /// whole-sequence function and publish the result as a new ordered source.
    fn republish<U, F>(&self, stage: &'static str, f: F) -> Parallel<U>
    where
        U: Element,
        F: FnOnce(Vec<Outcome<T>>) -> Vec<Outcome<U>> + Send + 'static,
    {
        let target = ProcessingBuffer::ordered(&self.env);
        let values = self.buffer.values();
        let sink = target.clone();
        let spawned = self.env.spawn(stage, move || {
            let _close = sink.close_on_drop();
            let items: Vec<Outcome<T>> = values.collect();
            for (i, outcome) in f(items).into_iter().enumerate() {
                sink.add(ProcessingEntry::top(i, outcome));
            }
        });
        if let Err(err) = spawned {
            abort(&target, Index::top(0), err);
        }
        Parallel {
            env: self.env.clone(),
            pool: self.pool.clone(),
            buffer: target,
        }
    }

    pub fn iterator(&self) -> Sequence<Outcome<T>> {
        Box::new(self.buffer.values())
    }
}

fn emit_into<U: Clone>(sink: &ProcessingBuffer<U>, index: Index, emit: Emit<U>, metrics: &Metrics) {
    match emit {
        Emit::One(outcome) => sink.add(ProcessingEntry::new(index, outcome.into())),
        Emit::Skip => sink.add(ProcessingEntry::filtered(index)),
        Emit::Many(children) if children.is_empty() => sink.add(ProcessingEntry::filtered(index)),
        Emit::Many(children) => {
            let count = children.len();
            metrics.add_children(count as u64);
            sink.add(ProcessingEntry::declaration(index.clone(), count));
            for (child, value) in index.children(count).zip(children) {
                sink.add(ProcessingEntry::new(child, StageResult::Value(value)));
            }
        }
    }
}

fn abort_entry<U: Clone>(sink: &ProcessingBuffer<U>, index: Index, err: impl Display) {
    tracing::error!(index = %index, "stage task lost: {}", err);
    sink.add(ProcessingEntry::new(
        index,
        StageResult::Failure(StageError::Aborted {
            message: err.to_string(),
        }),
    ));
}

fn abort<U: Clone>(sink: &ProcessingBuffer<U>, index: Index, err: impl Display) {
    abort_entry(sink, index, err);
    sink.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::sequential::{lift, materialize};
    use std::sync::Arc;
    use std::time::Duration;

    fn node(env: &ProcessingEnv, workers: usize, values: Vec<i32>) -> Parallel<i32> {
        Parallel::from_source(env, env.pool(workers), lift(Arc::new(values)))
    }

    fn drain<T: Element>(node: &Parallel<T>) -> Vec<Outcome<T>> {
        node.iterator().collect()
    }

    #[test]
    fn test_map_keeps_order_with_shuffled_completion() {
        let env = ProcessingEnv::default();
        let out = node(&env, 4, (0..20).collect()).elements(
            BufferKind::Ordered,
            &ElementOp::map(|x: i32| {
                std::thread::sleep(Duration::from_millis(((20 - x) % 7) as u64));
                x * 2
            }),
        );
        assert_eq!(drain(&out), (0..20).map(|x| Ok(x * 2)).collect::<Vec<_>>());
    }

    #[test]
    fn test_explode_declares_children() {
        let env = ProcessingEnv::default();
        let out = node(&env, 2, vec![2, 0, 1]).elements(
            BufferKind::Ordered,
            &ElementOp::explode(|n: i32| (0..n).map(|i| n * 10 + i).collect()),
        );
        assert_eq!(drain(&out), vec![Ok(20), Ok(21), Ok(10)]);
        let entries: Vec<_> = out.buffer().entries().collect();
        // declaration for 2, placeholder for 0, declaration for 1, three children
        assert_eq!(entries.len(), 6);
        assert_eq!(entries.iter().filter(|e| e.is_valid()).count(), 3);
        assert_eq!(env.metrics().snapshot().children_exploded, 3);
    }

    #[test]
    fn test_chained_stages_forward_placeholders() {
        let env = ProcessingEnv::default();
        let out = node(&env, 3, (0..10).collect())
            .elements(BufferKind::Ordered, &ElementOp::filter(|x: &i32| x % 3 != 0))
            .elements(BufferKind::Ordered, &ElementOp::explode(|x: i32| vec![x; (x % 2) as usize + 1]))
            .elements(BufferKind::Ordered, &ElementOp::map(|x: i32| x.to_string()));
        let expected: Vec<Outcome<String>> = [1, 1, 2, 4, 5, 5, 7, 7, 8]
            .iter()
            .map(|x| Ok(x.to_string()))
            .collect();
        assert_eq!(drain(&out), expected);
    }

    #[test]
    fn test_sorted_republishes() {
        let env = ProcessingEnv::default();
        let cmp: CompareFn<i32> = Arc::new(|a, b| b.cmp(a));
        let out = node(&env, 2, vec![3, 9, 1]).sorted(&cmp);
        assert_eq!(drain(&out), vec![Ok(9), Ok(3), Ok(1)]);
        assert!(out.buffer().is_closed());
    }

    #[test]
    fn test_failures_are_forwarded() {
        let env = ProcessingEnv::default();
        let err = StageError::Aborted {
            message: "upstream".to_string(),
        };
        let source = materialize(vec![Ok(1), Err(err.clone()), Ok(3)]);
        let out = Parallel::from_source(&env, env.pool(2), source)
            .elements(BufferKind::Ordered, &ElementOp::map(|x: i32| x + 1));
        assert_eq!(drain(&out), vec![Ok(2), Err(err), Ok(4)]);
    }

    #[test]
    fn test_pool_released_after_stage() {
        let env = ProcessingEnv::default();
        let input = node(&env, 2, vec![1, 2, 3]);
        let pool = input.pool().clone();
        let out = input.elements(BufferKind::Unordered, &ElementOp::map(|x: i32| x));
        let mut values: Vec<i32> = out.iterator().map(|v| v.unwrap()).collect();
        values.sort();
        assert_eq!(values, vec![1, 2, 3]);

        // the feeder releases the pool right after closing the buffer
        for _ in 0..100 {
            if !pool.is_active() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!pool.is_active());
        assert_eq!(pool.teardowns(), 1);
    }
}
