//! Sequence primitives: ordering keys and the pull-based iterable contract.

mod index;
mod iterable;

pub use index::Index;
pub use iterable::{collect, Iterable, Sequence, Slice, SliceIter};

/// Bound shared by every value flowing through a processing chain.
///
/// Values are handed between worker threads and re-read by independent
/// passes, so they must be clonable and thread-safe.
pub trait Element: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Element for T {}
