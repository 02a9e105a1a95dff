//! The ordered index contract.

use std::ops::Bound;

use crate::common::Result;

/// Iteration order of a range cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Reverse,
}

/// Operations every ordered key/value index provides, whatever its storage.
///
/// Methods take `&self`: implementations synchronize internally and are
/// shared between threads.
///
/// # Cursors
/// [`range`](Self::range) returns a lazy cursor. A cursor can be restarted by
/// calling `range` again. The entries returned by a cursor that is still in
/// use while another thread mutates the index are **undefined**: the cursor
/// may or may not observe the mutation, and must not be relied upon.
pub trait OrderedIndex<K, V> {
    /// Lazy iterator over `(key, value)` pairs in a range.
    type Cursor<'a>: Iterator<Item = (K, V)>
    where
        Self: 'a;

    /// Number of entries.
    fn size(&self) -> Result<u64>;

    /// Whether `key` is mapped.
    fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Value mapped to `key`, or `None` when absent.
    fn get(&self, key: &K) -> Result<Option<V>>;

    /// Insert or replace. Returns whether a mapping already existed.
    fn put(&self, key: K, value: V) -> Result<bool>;

    /// Remove `key`. Returns whether a mapping existed.
    fn remove(&self, key: &K) -> Result<bool>;

    /// Smallest key.
    fn first_key(&self) -> Result<Option<K>>;

    /// Largest key.
    fn last_key(&self) -> Result<Option<K>>;

    /// Entries with keys between `begin` and `end` in `direction`.
    ///
    /// `Bound::Included` is a closed boundary, `Bound::Excluded` an open one.
    /// An empty or inverted range yields an empty cursor.
    fn range<'a>(
        &'a self,
        begin: Bound<&K>,
        end: Bound<&K>,
        direction: Direction,
    ) -> Result<Self::Cursor<'a>>;

    /// Keys between `begin` and `end`.
    fn keys_between<'a>(
        &'a self,
        begin: Bound<&K>,
        end: Bound<&K>,
        direction: Direction,
    ) -> Result<Keys<Self::Cursor<'a>>> {
        Ok(Keys(self.range(begin, end, direction)?))
    }

    /// Values of the keys between `begin` and `end`.
    fn values_between<'a>(
        &'a self,
        begin: Bound<&K>,
        end: Bound<&K>,
        direction: Direction,
    ) -> Result<Values<Self::Cursor<'a>>> {
        Ok(Values(self.range(begin, end, direction)?))
    }
}

/// Key-only view of a cursor.
#[derive(Debug)]
pub struct Keys<C>(C);

impl<K, V, C> Iterator for Keys<C>
where
    C: Iterator<Item = (K, V)>,
{
    type Item = K;

    fn next(&mut self) -> Option<K> {
        self.0.next().map(|(key, _)| key)
    }
}

/// Value-only view of a cursor.
#[derive(Debug)]
pub struct Values<C>(C);

impl<K, V, C> Iterator for Values<C>
where
    C: Iterator<Item = (K, V)>,
{
    type Item = V;

    fn next(&mut self) -> Option<V> {
        self.0.next().map(|(_, value)| value)
    }
}

/// Whether no key can lie between `begin` and `end`.
pub(crate) fn is_empty_range<K: Ord>(begin: Bound<&K>, end: Bound<&K>) -> bool {
    match (begin, end) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
        (Bound::Included(b), Bound::Included(e)) => b > e,
        (Bound::Included(b), Bound::Excluded(e))
        | (Bound::Excluded(b), Bound::Included(e))
        | (Bound::Excluded(b), Bound::Excluded(e)) => b >= e,
    }
}
