//! Pull-based sequence contract.

use std::sync::Arc;

/// A forward-only pass over a sequence. `next` may block for concurrent
/// sources and returns `None` once the source is closed and drained.
pub type Sequence<T> = Box<dyn Iterator<Item = T> + Send>;

/// Something that can hand out independent passes over its elements.
///
/// Every call to [`Iterable::iterator`] starts a fresh pass; passes do not
/// consume the underlying data.
pub trait Iterable<T>: Send + Sync {
    fn iterator(&self) -> Sequence<T>;
}

impl<T: Clone + Send + Sync + 'static> Iterable<T> for Vec<T> {
    fn iterator(&self) -> Sequence<T> {
        Box::new(Slice::from(self.clone()).into_iter())
    }
}

impl<T, I> Iterable<T> for Arc<I>
where
    I: Iterable<T> + ?Sized,
{
    fn iterator(&self) -> Sequence<T> {
        (**self).iterator()
    }
}

/// Immutable, cheaply clonable materialized sequence.
#[derive(Debug)]
pub struct Slice<T> {
    items: Arc<[T]>,
}

impl<T> Clone for Slice<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T> Slice<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&T> {
        self.items.get(i)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T> From<Vec<T>> for Slice<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }
}

impl<T: Clone> IntoIterator for Slice<T> {
    type Item = T;
    type IntoIter = SliceIter<T>;

    fn into_iter(self) -> SliceIter<T> {
        SliceIter {
            items: self.items,
            pos: 0,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Iterable<T> for Slice<T> {
    fn iterator(&self) -> Sequence<T> {
        Box::new(self.clone().into_iter())
    }
}

/// Owning iterator over a [`Slice`].
pub struct SliceIter<T> {
    items: Arc<[T]>,
    pos: usize,
}

impl<T: Clone> Iterator for SliceIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.items.get(self.pos)?.clone();
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.items.len().saturating_sub(self.pos);
        (rest, Some(rest))
    }
}

impl<T: Clone> ExactSizeIterator for SliceIter<T> {}
impl<T: Clone> std::iter::FusedIterator for SliceIter<T> {}

/// Drain one pass of `iterable` into a vector.
pub fn collect<T, I>(iterable: &I) -> Vec<T>
where
    I: Iterable<T> + ?Sized,
{
    iterable.iterator().collect()
}
