//! Stage functions shared by all execution strategies.
//!
//! Element-wise stages (map, filter, explode) are normalized into an
//! [`ElementOp`] producing an [`Emit`] per input, so the synchronous and the
//! parallel strategy apply exactly the same semantics. Whole-sequence stages
//! (sort, transform) work on the complete list of outcomes.

use crate::error::{Outcome, StageError};
use std::cmp::Ordering;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Comparison used by sort stages.
pub type CompareFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Function applied to the complete sequence by transform stages.
pub type TransformFn<T, U> = Arc<dyn Fn(Vec<Outcome<T>>) -> Vec<Outcome<U>> + Send + Sync>;

/// What an element-wise stage produced for one input.
#[derive(Debug, Clone, PartialEq)]
pub enum Emit<U> {
    /// Exactly one element (value or failure) at the input's position.
    One(Outcome<U>),
    /// Nothing, the position becomes a placeholder.
    Skip,
    /// Zero or more children nested below the input's position.
    Many(Vec<U>),
}

/// An element-wise stage function.
pub struct ElementOp<T, U> {
    stage: &'static str,
    f: Arc<dyn Fn(T) -> Emit<U> + Send + Sync>,
}

impl<T, U> Clone for ElementOp<T, U> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage,
            f: self.f.clone(),
        }
    }
}

impl<T: 'static, U: 'static> ElementOp<T, U> {
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Self {
            stage: "map",
            f: Arc::new(move |v: T| Emit::One(Ok(f(v)))),
        }
    }

    /// Map with a fallible function; errors become failure elements.
    pub fn try_map<F, E>(f: F) -> Self
    where
        F: Fn(T) -> std::result::Result<U, E> + Send + Sync + 'static,
        E: Display,
    {
        Self {
            stage: "try_map",
            f: Arc::new(move |v: T| {
                Emit::One(f(v).map_err(|e| StageError::Failed {
                    stage: "try_map",
                    message: e.to_string(),
                }))
            }),
        }
    }

    /// One input to any number of outputs.
    pub fn explode<F>(f: F) -> Self
    where
        F: Fn(T) -> Vec<U> + Send + Sync + 'static,
    {
        Self {
            stage: "explode",
            f: Arc::new(move |v: T| Emit::Many(f(v))),
        }
    }
}

impl<T: 'static> ElementOp<T, T> {
    pub fn filter<F>(f: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            stage: "filter",
            f: Arc::new(move |v: T| if f(&v) { Emit::One(Ok(v)) } else { Emit::Skip }),
        }
    }
}

impl<T, U> ElementOp<T, U> {
    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Apply the stage to one element. Failures pass through untouched and a
    /// panic becomes a failure at the element's position.
    pub fn apply(&self, input: Outcome<T>) -> Emit<U> {
        let value = match input {
            Ok(v) => v,
            Err(e) => return Emit::One(Err(e)),
        };
        match catch_unwind(AssertUnwindSafe(|| (self.f)(value))) {
            Ok(emit) => emit,
            Err(payload) => {
                let err = StageError::from_panic(self.stage, payload);
                tracing::error!("{}", err);
                Emit::One(Err(err))
            }
        }
    }
}

/// Apply an element stage to a whole sequence, flattening the results.
pub fn apply_sequence<T, U, I>(input: I, op: &ElementOp<T, U>) -> Vec<Outcome<U>>
where
    I: IntoIterator<Item = Outcome<T>>,
{
    let mut out = Vec::new();
    for item in input {
        match op.apply(item) {
            Emit::One(outcome) => out.push(outcome),
            Emit::Skip => {}
            Emit::Many(children) => out.extend(children.into_iter().map(Ok)),
        }
    }
    out
}

/// Stable sort of the values; failures follow all values in their original
/// relative order.
pub fn sort_outcomes<T>(items: Vec<Outcome<T>>, cmp: &CompareFn<T>) -> Vec<Outcome<T>> {
    let mut values = Vec::with_capacity(items.len());
    let mut failures = Vec::new();
    for item in items {
        match item {
            Ok(v) => values.push(v),
            Err(e) => failures.push(e),
        }
    }

    let sorted = catch_unwind(AssertUnwindSafe(|| values.sort_by(|a, b| cmp(a, b))));
    let mut out: Vec<Outcome<T>> = values.into_iter().map(Ok).collect();
    out.extend(failures.into_iter().map(Err));
    if let Err(payload) = sorted {
        let err = StageError::from_panic("sort", payload);
        tracing::error!("{}", err);
        out.push(Err(err));
    }
    out
}

/// Run a transform function, turning a panic into a single failure.
pub fn transform_outcomes<T, U>(items: Vec<Outcome<T>>, f: &TransformFn<T, U>) -> Vec<Outcome<U>> {
    match catch_unwind(AssertUnwindSafe(|| f(items))) {
        Ok(out) => out,
        Err(payload) => {
            let err = StageError::from_panic("transform", payload);
            tracing::error!("{}", err);
            vec![Err(err)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(message: &str) -> StageError {
        StageError::Failed {
            stage: "test",
            message: message.to_string(),
        }
    }

    #[test]
    fn test_map_and_filter() {
        let double = ElementOp::map(|x: i32| x * 2);
        assert_eq!(double.apply(Ok(3)), Emit::One(Ok(6)));
        assert_eq!(double.stage(), "map");

        let even = ElementOp::filter(|x: &i32| x % 2 == 0);
        assert_eq!(even.apply(Ok(4)), Emit::One(Ok(4)));
        assert_eq!(even.apply(Ok(3)), Emit::Skip);
    }

    #[test]
    fn test_failures_pass_through() {
        let even = ElementOp::filter(|x: &i32| x % 2 == 0);
        assert_eq!(even.apply(Err(failed("x"))), Emit::One(Err(failed("x"))));

        let explode = ElementOp::explode(|x: i32| vec![x; 3]);
        assert_eq!(explode.apply(Err(failed("y"))), Emit::One(Err(failed("y"))));
    }

    #[test]
    fn test_try_map_error_becomes_failure() {
        let parse = ElementOp::try_map(|s: &'static str| s.parse::<i32>());
        assert_eq!(parse.apply(Ok("7")), Emit::One(Ok(7)));
        match parse.apply(Ok("x")) {
            Emit::One(Err(StageError::Failed { stage, .. })) => assert_eq!(stage, "try_map"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_panic_becomes_failure() {
        let op = ElementOp::map(|x: i32| {
            if x == 2 {
                panic!("two");
            }
            x
        });
        let out = apply_sequence(vec![Ok(1), Ok(2), Ok(3)], &op);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Ok(1));
        assert_eq!(
            out[1],
            Err(StageError::Panicked {
                stage: "map",
                message: "two".to_string()
            })
        );
        assert_eq!(out[2], Ok(3));
    }

    #[test]
    fn test_apply_sequence_flattens_children() {
        let op = ElementOp::explode(|s: &'static str| match s {
            "a" => vec!["a1", "a2"],
            "b" => vec![],
            _ => vec!["c1"],
        });
        let out = apply_sequence(vec![Ok("a"), Ok("b"), Ok("c")], &op);
        assert_eq!(out, vec![Ok("a1"), Ok("a2"), Ok("c1")]);
    }

    #[test]
    fn test_sort_places_failures_last() {
        let cmp: CompareFn<i32> = Arc::new(|a, b| a.cmp(b));
        let out = sort_outcomes(
            vec![Ok(3), Err(failed("first")), Ok(1), Err(failed("second")), Ok(2)],
            &cmp,
        );
        assert_eq!(
            out,
            vec![Ok(1), Ok(2), Ok(3), Err(failed("first")), Err(failed("second"))]
        );
    }

    #[test]
    fn test_sort_is_stable() {
        let cmp: CompareFn<(i32, char)> = Arc::new(|a, b| a.0.cmp(&b.0));
        let out = sort_outcomes(vec![Ok((1, 'b')), Ok((0, 'x')), Ok((1, 'a'))], &cmp);
        assert_eq!(out, vec![Ok((0, 'x')), Ok((1, 'b')), Ok((1, 'a'))]);
    }

    #[test]
    fn test_sort_panic_appends_failure() {
        let cmp: CompareFn<i32> = Arc::new(|_, _| panic!("no order"));
        let out = sort_outcomes(vec![Ok(2), Ok(1)], &cmp);
        assert_eq!(out.len(), 3);
        assert!(matches!(out[2], Err(StageError::Panicked { stage: "sort", .. })));
    }

    #[test]
    fn test_transform_receives_failures() {
        let count: TransformFn<i32, usize> = Arc::new(|items| vec![Ok(items.len())]);
        assert_eq!(transform_outcomes(vec![Ok(1), Err(failed("x"))], &count), vec![Ok(2)]);

        let broken: TransformFn<i32, i32> = Arc::new(|_| panic!("broken"));
        let out = transform_outcomes(vec![Ok(1)], &broken);
        assert!(matches!(out[..], [Err(StageError::Panicked { stage: "transform", .. })]));
    }
}
