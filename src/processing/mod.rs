//! The processing engine.
//!
//! A [`ProcessChain`] records stages; applying it to an [`Iterable`] builds a
//! [`ProcessingResult`] per stage. Each stage runs with the strategy selected
//! when it was added:
//!
//! ```text
//!   input ──► Synchronous ──► Parallel ──────► Parallel ──► Asynchronous ──► consumer
//!             (caller)        (pool tasks,     (pool tasks)  (one task)
//!                              ordered buffer)
//! ```
//!
//! Parallel stages exchange [`ProcessingEntry`] values through
//! [`ProcessingBuffer`]s, which restore the input order from the entries'
//! [`Index`](crate::data::Index) keys.
//!
//! [`Iterable`]: crate::data::Iterable

pub mod buffer;
pub mod chain;
pub mod entry;
pub mod env;
pub mod metrics;
pub mod ops;
mod parallel;
pub mod pool;
pub mod result;
mod sequential;
pub mod source;


pub use buffer::{BufferKind, CloseOnDrop, EntryIter, ProcessingBuffer, ValueIter};
pub use chain::ProcessChain;
pub use entry::{ProcessingEntry, StageResult};
pub use env::ProcessingEnv;
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot, ReporterHandle};
pub use ops::{CompareFn, TransformFn};
pub use pool::{PoolLease, ProcessorPool};
pub use result::{ProcessingResult, Strategy};
pub use source::IncrementalSource;
