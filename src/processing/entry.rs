//! Entries exchanged between parallel stages.

use crate::data::Index;
use crate::error::{Outcome, StageError};

/// Result of applying a stage to one element.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult<T> {
    /// The element survived the stage.
    Value(T),
    /// The stage failed for this element.
    Failure(StageError),
    /// No element at this position: filtered out, or an ordering placeholder.
    Filtered,
}

impl<T> StageResult<T> {
    /// Whether the result is visible to consumers.
    pub fn is_valid(&self) -> bool {
        !matches!(self, StageResult::Filtered)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            StageResult::Value(v) => Some(v),
            _ => None,
        }
    }

    /// What a consumer sees, `None` for filtered positions.
    pub fn into_outcome(self) -> Option<Outcome<T>> {
        match self {
            StageResult::Value(v) => Some(Ok(v)),
            StageResult::Failure(e) => Some(Err(e)),
            StageResult::Filtered => None,
        }
    }
}

impl<T> From<Outcome<T>> for StageResult<T> {
    fn from(outcome: Outcome<T>) -> Self {
        match outcome {
            Ok(v) => StageResult::Value(v),
            Err(e) => StageResult::Failure(e),
        }
    }
}

/// One element plus its ordering information.
#[derive(Debug, Clone)]
pub struct ProcessingEntry<T> {
    /// Position in the original input
    pub index: Index,
    /// Number of children declared by this entry (explode declarations only)
    pub max_sub: usize,
    pub result: StageResult<T>,
}

impl<T> ProcessingEntry<T> {
    pub fn new(index: Index, result: StageResult<T>) -> Self {
        Self {
            index,
            max_sub: 0,
            result,
        }
    }

    /// Entry for the `i`-th element of an input sequence.
    pub fn top(i: usize, outcome: Outcome<T>) -> Self {
        Self::new(Index::top(i), outcome.into())
    }

    /// Placeholder for a position that produced no element.
    pub fn filtered(index: Index) -> Self {
        Self::new(index, StageResult::Filtered)
    }

    /// Placeholder announcing `children` entries nested below `index`.
    pub fn declaration(index: Index, children: usize) -> Self {
        Self {
            index,
            max_sub: children,
            result: StageResult::Filtered,
        }
    }

    /// Sibling bound of the entry's innermost level.
    pub fn max_index(&self) -> Option<usize> {
        self.index.max_index()
    }

    pub fn is_valid(&self) -> bool {
        self.result.is_valid()
    }

    /// Index expected after this entry has been resolved.
    pub fn next_index(&self) -> Index {
        self.index.next(self.max_sub)
    }

    /// Re-type an entry that carries no value, so it can be forwarded
    /// unchanged to a stage with a different element type. Entries holding a
    /// value are handed back.
    pub fn pass_through<U>(self) -> Result<ProcessingEntry<U>, ProcessingEntry<T>> {
        let result = match self.result {
            StageResult::Value(_) => return Err(self),
            StageResult::Failure(e) => StageResult::Failure(e),
            StageResult::Filtered => StageResult::Filtered,
        };
        Ok(ProcessingEntry {
            index: self.index,
            max_sub: self.max_sub,
            result,
        })
    }
}
