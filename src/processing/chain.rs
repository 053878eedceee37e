//! Reusable processing recipes.

use crate::data::{Element, Iterable};
use crate::error::Outcome;
use crate::processing::ops::{CompareFn, ElementOp, TransformFn};
use crate::processing::{ProcessingEnv, ProcessingResult, ProcessorPool};
use std::cmp::Ordering;
use std::fmt::Display;
use std::sync::Arc;

type Step<I, O> = Arc<dyn Fn(ProcessingResult<I>) -> ProcessingResult<O> + Send + Sync>;

/// An immutable list of deferred stages, replayable against any input.
///
/// Builder methods leave `self` untouched and return the extended chain, so a
/// chain can be shared and extended in several directions. Nothing runs until
/// [`ProcessChain::process`] is called.
pub struct ProcessChain<I, O = I> {
    env: ProcessingEnv,
    step: Step<I, O>,
    stages: usize,
}

impl<I, O> Clone for ProcessChain<I, O> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            step: self.step.clone(),
            stages: self.stages,
        }
    }
}

impl<I: Element> ProcessChain<I, I> {
    /// The empty chain, which returns its input unchanged.
    pub fn new(env: &ProcessingEnv) -> Self {
        Self {
            env: env.clone(),
            step: Arc::new(|result: ProcessingResult<I>| result),
            stages: 0,
        }
    }
}

impl<I: Element, O: Element> ProcessChain<I, O> {
    fn then<U, F>(&self, f: F) -> ProcessChain<I, U>
    where
        U: Element,
        F: Fn(ProcessingResult<O>) -> ProcessingResult<U> + Send + Sync + 'static,
    {
        let prev = self.step.clone();
        ProcessChain {
            env: self.env.clone(),
            step: Arc::new(move |result: ProcessingResult<I>| f(prev(result))),
            stages: self.stages + 1,
        }
    }

    fn elements<U: Element>(&self, op: ElementOp<O, U>) -> ProcessChain<I, U> {
        self.then(move |result| result.elements(&op))
    }

    pub fn map<U, F>(&self, f: F) -> ProcessChain<I, U>
    where
        U: Element,
        F: Fn(O) -> U + Send + Sync + 'static,
    {
        self.elements(ElementOp::map(f))
    }

    pub fn try_map<U, E, F>(&self, f: F) -> ProcessChain<I, U>
    where
        U: Element,
        E: Display,
        F: Fn(O) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        self.elements(ElementOp::try_map(f))
    }

    pub fn filter<F>(&self, f: F) -> ProcessChain<I, O>
    where
        F: Fn(&O) -> bool + Send + Sync + 'static,
    {
        self.elements(ElementOp::filter(f))
    }

    pub fn explode<U, F>(&self, f: F) -> ProcessChain<I, U>
    where
        U: Element,
        F: Fn(O) -> Vec<U> + Send + Sync + 'static,
    {
        self.elements(ElementOp::explode(f))
    }

    pub fn sort<F>(&self, cmp: F) -> ProcessChain<I, O>
    where
        F: Fn(&O, &O) -> Ordering + Send + Sync + 'static,
    {
        let cmp: CompareFn<O> = Arc::new(cmp);
        self.then(move |result| result.sorted(&cmp))
    }

    pub fn transform<U, F>(&self, f: F) -> ProcessChain<I, U>
    where
        U: Element,
        F: Fn(Vec<Outcome<O>>) -> Vec<Outcome<U>> + Send + Sync + 'static,
    {
        let f: TransformFn<O, U> = Arc::new(f);
        self.then(move |result| result.transformed(&f))
    }

    /// Run the following stages on a shared pool.
    pub fn with_pool(&self, pool: ProcessorPool) -> ProcessChain<I, O> {
        self.then(move |result| result.with_pool(pool.clone()))
    }

    /// Run the following stages on a pool created per run.
    pub fn parallel(&self, workers: usize) -> ProcessChain<I, O> {
        self.then(move |result| result.parallel(workers))
    }

    pub fn unordered(&self) -> ProcessChain<I, O> {
        self.then(|result| result.unordered())
    }

    pub fn synchronously(&self) -> ProcessChain<I, O> {
        self.then(|result| result.synchronously())
    }

    pub fn asynchronously(&self) -> ProcessChain<I, O> {
        self.then(|result| result.asynchronously())
    }

    /// This chain followed by all stages of `other`.
    pub fn append<U: Element>(&self, other: &ProcessChain<O, U>) -> ProcessChain<I, U> {
        let first = self.step.clone();
        let second = other.step.clone();
        ProcessChain {
            env: self.env.clone(),
            step: Arc::new(move |result: ProcessingResult<I>| second(first(result))),
            stages: self.stages + other.stages,
        }
    }

    /// Append `other` only if `cond` holds.
    pub fn append_if(&self, cond: bool, other: &ProcessChain<O, O>) -> ProcessChain<I, O> {
        if cond {
            self.append(other)
        } else {
            self.clone()
        }
    }

    /// Run the chain on `input`.
    pub fn process<S>(&self, input: S) -> ProcessingResult<O>
    where
        S: Iterable<I> + 'static,
    {
        self.process_result(ProcessingResult::process(&self.env, input))
    }

    /// Run the chain on the output of another pipeline.
    pub fn process_result(&self, result: ProcessingResult<I>) -> ProcessingResult<O> {
        (self.step)(result)
    }

    /// Number of recorded stages, strategy switches included.
    pub fn len(&self) -> usize {
        self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages == 0
    }

    pub fn env(&self) -> &ProcessingEnv {
        &self.env
    }
}
