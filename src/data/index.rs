//! Hierarchical ordering keys.
//!
//! An [`Index`] names the position of an element in the original input. Every
//! explode stage a value passes through adds one component, so the children of
//! the element at `[3]` are `[3, 0]`, `[3, 1]`, ... Each component remembers how
//! many siblings exist at its level, which lets [`Index::next`] roll over into
//! the parent level (over any number of levels) once the last child has been
//! seen.

use crate::error::{ProcessingError, Result};
use std::cmp::Ordering;
use std::fmt;

/// One component of an [`Index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Position among the siblings of this level.
    pub pos: usize,
    /// Number of siblings at this level, `None` if unbounded (top level).
    pub siblings: Option<usize>,
}

/// Ordering key of a processing entry.
///
/// Comparison is lexicographic over the positions only; a shorter index that
/// is a prefix of a longer one sorts first, so a parent precedes its children.
#[derive(Debug, Clone, Default)]
pub struct Index {
    parts: Vec<Position>,
}

impl Index {
    /// The empty index. Its successor is `[0]`.
    pub fn root() -> Self {
        Self { parts: Vec::new() }
    }

    /// Index of the `i`-th element of an input sequence.
    pub fn top(i: usize) -> Self {
        Self {
            parts: vec![Position {
                pos: i,
                siblings: None,
            }],
        }
    }

    /// Build an index from `(position, siblings)` pairs, root first.
    pub fn from_parts<I>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, Option<usize>)>,
    {
        let index = Self {
            parts: parts
                .into_iter()
                .map(|(pos, siblings)| Position { pos, siblings })
                .collect(),
        };
        index.validate()?;
        Ok(index)
    }

    /// Indices of the `count` children of this entry, in order.
    pub fn children(&self, count: usize) -> impl Iterator<Item = Index> + '_ {
        (0..count).map(move |pos| {
            let mut parts = self.parts.clone();
            parts.push(Position {
                pos,
                siblings: Some(count),
            });
            Index { parts }
        })
    }

    /// Sibling bound of the innermost level.
    pub fn max_index(&self) -> Option<usize> {
        self.parts.last().and_then(|p| p.siblings)
    }

    /// Whether this index sorts strictly after `other`.
    pub fn after(&self, other: &Index) -> bool {
        self > other
    }

    /// Index expected to follow this one.
    ///
    /// With `sub > 0` the entry declares `sub` children and the successor is
    /// its first child. Otherwise the innermost position advances; reaching
    /// the sibling bound carries into the parent level, repeatedly.
    pub fn next(&self, sub: usize) -> Index {
        let mut parts = self.parts.clone();
        if parts.is_empty() {
            parts.push(Position {
                pos: 0,
                siblings: None,
            });
            return Index { parts };
        }
        if sub > 0 {
            parts.push(Position {
                pos: 0,
                siblings: Some(sub),
            });
            return Index { parts };
        }
        loop {
            let depth = parts.len();
            let Some(last) = parts.last_mut() else { break };
            last.pos += 1;
            let carry = depth > 1 && matches!(last.siblings, Some(bound) if last.pos >= bound);
            if !carry {
                break;
            }
            parts.pop();
        }
        Index { parts }
    }

    /// Check every component against its sibling bound.
    pub fn validate(&self) -> Result<()> {
        for part in &self.parts {
            if let Some(bound) = part.siblings {
                if part.pos >= bound {
                    return Err(ProcessingError::InvalidIndex {
                        position: part.pos,
                        bound,
                    });
                }
            }
        }
        Ok(())
    }

    fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.parts.iter().map(|p| p.pos)
    }
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Index {}

impl PartialOrd for Index {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Index {
    fn cmp(&self, other: &Self) -> Ordering {
        self.positions().cmp(other.positions())
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, p) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", p.pos)?;
        }
        write!(f, "]")
    }
}
