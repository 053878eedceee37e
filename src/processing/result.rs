//! The staged processing result.
//!
//! A [`ProcessingResult`] is one node of a pipeline. Every operation returns a
//! new node wrapping the previous one, executed with the node's current
//! strategy:
//!
//! - synchronous: eagerly on the calling thread,
//! - asynchronous: one background task per stage,
//! - parallel: one pool task per element.
//!
//! Switching strategy never re-executes earlier stages, it only changes how
//! the following stages are run.

use crate::data::{Element, Iterable, Sequence};
use crate::error::{Outcome, StageError};
use crate::processing::buffer::BufferKind;
use crate::processing::ops::{CompareFn, ElementOp, TransformFn};
use crate::processing::parallel::Parallel;
use crate::processing::sequential::{self, Asynchronous, Source, Synchronous};
use crate::processing::{ProcessChain, ProcessingEnv, ProcessorPool};
use std::cmp::Ordering;
use std::fmt::Display;
use std::sync::Arc;

/// Execution strategy of a [`ProcessingResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Synchronous,
    Asynchronous,
    Parallel,
}

enum Node<T> {
    Synchronous(Synchronous<T>),
    Asynchronous(Asynchronous<T>),
    Parallel(Parallel<T>),
}

/// A lazily composed sequence of processing stages.
pub struct ProcessingResult<T> {
    env: ProcessingEnv,
    kind: BufferKind,
    node: Node<T>,
}

impl<T: Element> ProcessingResult<T> {
    /// Start processing `input` synchronously.
    pub fn process<I>(env: &ProcessingEnv, input: I) -> Self
    where
        I: Iterable<T> + 'static,
    {
        Self::from_source(env, sequential::lift(Arc::new(input)))
    }

    fn from_source(env: &ProcessingEnv, source: Source<T>) -> Self {
        Self {
            env: env.clone(),
            kind: BufferKind::Ordered,
            node: Node::Synchronous(Synchronous::new(source)),
        }
    }

    fn with_node<U>(&self, node: Node<U>) -> ProcessingResult<U> {
        ProcessingResult {
            env: self.env.clone(),
            kind: self.kind,
            node,
        }
    }

    pub fn env(&self) -> &ProcessingEnv {
        &self.env
    }

    pub fn strategy(&self) -> Strategy {
        match self.node {
            Node::Synchronous(_) => Strategy::Synchronous,
            Node::Asynchronous(_) => Strategy::Asynchronous,
            Node::Parallel(_) => Strategy::Parallel,
        }
    }

    /// Whether parallel stages restore input order.
    pub fn is_ordered(&self) -> bool {
        self.kind == BufferKind::Ordered
    }

    /// The pool used by parallel stages, if any.
    pub fn pool(&self) -> Option<&ProcessorPool> {
        match &self.node {
            Node::Parallel(p) => Some(p.pool()),
            _ => None,
        }
    }

    pub(crate) fn elements<U: Element>(&self, op: &ElementOp<T, U>) -> ProcessingResult<U> {
        self.env.metrics().add_stage();
        tracing::debug!(stage = op.stage(), strategy = ?self.strategy(), "stage created");
        let node = match &self.node {
            Node::Synchronous(s) => Node::Synchronous(s.elements(op)),
            Node::Asynchronous(a) => Node::Asynchronous(a.elements(&self.env, op)),
            Node::Parallel(p) => Node::Parallel(p.elements(self.kind, op)),
        };
        self.with_node(node)
    }

    pub(crate) fn sorted(&self, cmp: &CompareFn<T>) -> ProcessingResult<T> {
        self.env.metrics().add_stage();
        let node = match &self.node {
            Node::Synchronous(s) => Node::Synchronous(s.sorted(cmp)),
            Node::Asynchronous(a) => Node::Asynchronous(a.sorted(&self.env, cmp)),
            Node::Parallel(p) => Node::Parallel(p.sorted(cmp)),
        };
        self.with_node(node)
    }

    pub(crate) fn transformed<U: Element>(&self, f: &TransformFn<T, U>) -> ProcessingResult<U> {
        self.env.metrics().add_stage();
        let node = match &self.node {
            Node::Synchronous(s) => Node::Synchronous(s.transformed(f)),
            Node::Asynchronous(a) => Node::Asynchronous(a.transformed(&self.env, f)),
            Node::Parallel(p) => Node::Parallel(p.transformed(f)),
        };
        self.with_node(node)
    }

    pub fn map<U, F>(&self, f: F) -> ProcessingResult<U>
    where
        U: Element,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.elements(&ElementOp::map(f))
    }

    /// Map with a fallible function. An error replaces the element with a
    /// failure at the same position.
    pub fn try_map<U, E, F>(&self, f: F) -> ProcessingResult<U>
    where
        U: Element,
        E: Display,
        F: Fn(T) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        self.elements(&ElementOp::try_map(f))
    }

    pub fn filter<F>(&self, f: F) -> ProcessingResult<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.elements(&ElementOp::filter(f))
    }

    /// Replace every element by the elements `f` returns for it, in place.
    pub fn explode<U, F>(&self, f: F) -> ProcessingResult<U>
    where
        U: Element,
        F: Fn(T) -> Vec<U> + Send + Sync + 'static,
    {
        self.elements(&ElementOp::explode(f))
    }

    /// Stable sort of all values. Failures follow the values.
    pub fn sort<F>(&self, cmp: F) -> ProcessingResult<T>
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.sorted(&(Arc::new(cmp) as CompareFn<T>))
    }

    /// Apply a function to the complete sequence of outcomes.
    pub fn transform<U, F>(&self, f: F) -> ProcessingResult<U>
    where
        U: Element,
        F: Fn(Vec<Outcome<T>>) -> Vec<Outcome<U>> + Send + Sync + 'static,
    {
        self.transformed(&(Arc::new(f) as TransformFn<T, U>))
    }

    /// Run the following stages on `pool`.
    pub fn with_pool(&self, pool: ProcessorPool) -> ProcessingResult<T> {
        let node = match &self.node {
            Node::Parallel(p) => Node::Parallel(p.with_pool(pool)),
            _ => Node::Parallel(Parallel::from_source(&self.env, pool, self.source())),
        };
        self.with_node(node)
    }

    /// Run the following stages on a new pool of `workers` threads
    /// (0 = configured default).
    pub fn parallel(&self, workers: usize) -> ProcessingResult<T> {
        self.with_pool(self.env.pool(workers))
    }

    /// Parallel stages from here on yield their results in completion order.
    pub fn unordered(&self) -> ProcessingResult<T> {
        ProcessingResult {
            env: self.env.clone(),
            kind: BufferKind::Unordered,
            node: self.rewire(),
        }
    }

    /// Run the following stages on the calling thread.
    pub fn synchronously(&self) -> ProcessingResult<T> {
        let node = match &self.node {
            Node::Synchronous(s) => Node::Synchronous(Synchronous::new(s.source())),
            _ => Node::Synchronous(Synchronous::new(self.source())),
        };
        self.with_node(node)
    }

    /// Run each following stage as a single background task.
    pub fn asynchronously(&self) -> ProcessingResult<T> {
        let node = match &self.node {
            Node::Asynchronous(a) => Node::Asynchronous(a.clone()),
            _ => Node::Asynchronous(Asynchronous::ready(self.source())),
        };
        self.with_node(node)
    }

    /// Continue with the stages of `chain`.
    pub fn apply<U: Element>(self, chain: &ProcessChain<T, U>) -> ProcessingResult<U> {
        chain.process_result(self)
    }

    fn rewire(&self) -> Node<T> {
        match &self.node {
            Node::Synchronous(s) => Node::Synchronous(Synchronous::new(s.source())),
            Node::Asynchronous(a) => Node::Asynchronous(a.clone()),
            Node::Parallel(p) => Node::Parallel(p.with_pool(p.pool().clone())),
        }
    }

    /// This node's output as a repeatable source.
    fn source(&self) -> Source<T> {
        match &self.node {
            Node::Synchronous(s) => s.source(),
            Node::Asynchronous(a) => Arc::new(a.clone()),
            Node::Parallel(p) => Arc::new(p.buffer().clone()),
        }
    }

    /// A new pass over the output. Blocks while results are pending.
    pub fn iterator(&self) -> Sequence<Outcome<T>> {
        match &self.node {
            Node::Synchronous(s) => s.iterator(),
            Node::Asynchronous(a) => a.iterator(),
            Node::Parallel(p) => p.iterator(),
        }
    }

    /// Drain the complete output.
    pub fn as_slice(&self) -> Vec<Outcome<T>> {
        self.iterator().collect()
    }

    /// Drain the output, stopping at the first failure.
    pub fn values(&self) -> std::result::Result<Vec<T>, StageError> {
        self.iterator().collect()
    }
}

impl<T: Element> Iterable<Outcome<T>> for ProcessingResult<T> {
    fn iterator(&self) -> Sequence<Outcome<T>> {
        ProcessingResult::iterator(self)
    }
}
