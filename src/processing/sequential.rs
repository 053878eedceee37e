//! Synchronous and single-background-task execution.

use crate::data::{Element, Iterable, Sequence, Slice};
use crate::error::{Outcome, StageError};
use crate::processing::ops::{self, CompareFn, ElementOp, TransformFn};
use crate::processing::ProcessingEnv;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Any repeatable source of outcomes.
pub(crate) type Source<T> = Arc<dyn Iterable<Outcome<T>>>;

/// Raw input lifted into outcomes.
struct Lifted<T> {
    input: Arc<dyn Iterable<T>>,
}

impl<T: Element> Iterable<Outcome<T>> for Lifted<T> {
    fn iterator(&self) -> Sequence<Outcome<T>> {
        Box::new(self.input.iterator().map(Ok))
    }
}

pub(crate) fn lift<T: Element>(input: Arc<dyn Iterable<T>>) -> Source<T> {
    Arc::new(Lifted { input })
}

pub(crate) fn materialize<T: Element>(items: Vec<Outcome<T>>) -> Source<T> {
    Arc::new(Slice::from(items))
}

/// Stages evaluated eagerly on the calling thread.
pub(crate) struct Synchronous<T> {
    data: Source<T>,
}

impl<T: Element> Synchronous<T> {
    pub fn new(data: Source<T>) -> Self {
        Self { data }
    }

    pub fn source(&self) -> Source<T> {
        self.data.clone()
    }

    pub fn elements<U: Element>(&self, op: &ElementOp<T, U>) -> Synchronous<U> {
        Synchronous::new(materialize(ops::apply_sequence(self.data.iterator(), op)))
    }

    pub fn sorted(&self, cmp: &CompareFn<T>) -> Synchronous<T> {
        let items = self.data.iterator().collect();
        Synchronous::new(materialize(ops::sort_outcomes(items, cmp)))
    }

    pub fn transformed<U: Element>(&self, f: &TransformFn<T, U>) -> Synchronous<U> {
        let items = self.data.iterator().collect();
        Synchronous::new(materialize(ops::transform_outcomes(items, f)))
    }

    pub fn iterator(&self) -> Sequence<Outcome<T>> {
        self.data.iterator()
    }
}

/// Result slot filled once by a background task.
struct Deferred<T> {
    slot: Mutex<Option<Source<T>>>,
    ready: Condvar,
}

impl<T> Deferred<T> {
    fn empty() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, source: Source<T>) {
        *self.slot.lock() = Some(source);
        self.ready.notify_all();
    }

    fn wait(&self) -> Source<T> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(source) = slot.as_ref() {
                return source.clone();
            }
            self.ready.wait(&mut slot);
        }
    }
}

/// Each stage runs as one task on its own thread; readers block until the
/// task has finished.
pub(crate) struct Asynchronous<T> {
    deferred: Arc<Deferred<T>>,
}

impl<T> Clone for Asynchronous<T> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T: Element> Asynchronous<T> {
    /// Wrap a source that is already available.
    pub fn ready(source: Source<T>) -> Self {
        let deferred = Deferred::empty();
        deferred.complete(source);
        Self {
            deferred: Arc::new(deferred),
        }
    }

    /// Compute the stage result on a background thread.
    pub fn spawn<F>(env: &ProcessingEnv, stage: &'static str, f: F) -> Self
    where
        F: FnOnce() -> Vec<Outcome<T>> + Send + 'static,
    {
        let deferred = Arc::new(Deferred::empty());
        let slot = deferred.clone();
        let spawned = env.spawn(stage, move || {
            let items = catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
                let err = StageError::from_panic(stage, payload);
                tracing::error!("{}", err);
                vec![Err(err)]
            });
            slot.complete(materialize(items));
        });
        if let Err(err) = spawned {
            tracing::error!("{}", err);
            deferred.complete(materialize(vec![Err(StageError::Aborted {
                message: err.to_string(),
            })]));
        }
        Self { deferred }
    }

    fn upstream(&self) -> Arc<Deferred<T>> {
        self.deferred.clone()
    }

    pub fn elements<U: Element>(&self, env: &ProcessingEnv, op: &ElementOp<T, U>) -> Asynchronous<U> {
        let upstream = self.upstream();
        let op = op.clone();
        Asynchronous::spawn(env, op.stage(), move || {
            ops::apply_sequence(upstream.wait().iterator(), &op)
        })
    }

    pub fn sorted(&self, env: &ProcessingEnv, cmp: &CompareFn<T>) -> Asynchronous<T> {
        let upstream = self.upstream();
        let cmp = cmp.clone();
        Asynchronous::spawn(env, "sort", move || {
            ops::sort_outcomes(upstream.wait().iterator().collect(), &cmp)
        })
    }

    pub fn transformed<U: Element>(&self, env: &ProcessingEnv, f: &TransformFn<T, U>) -> Asynchronous<U> {
        let upstream = self.upstream();
        let f = f.clone();
        Asynchronous::spawn(env, "transform", move || {
            ops::transform_outcomes(upstream.wait().iterator().collect(), &f)
        })
    }

    /// Block until the result is available.
    pub fn source(&self) -> Source<T> {
        self.deferred.wait()
    }
}

impl<T: Element> Iterable<Outcome<T>> for Asynchronous<T> {
    fn iterator(&self) -> Sequence<Outcome<T>> {
        self.source().iterator()
    }
}
