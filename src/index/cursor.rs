//! Lazy range cursor over a lock-protected `BTreeMap`.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

use parking_lot::RwLock;

use crate::common::config::DEFAULT_CURSOR_PREFETCH;
use crate::index::ordered::{is_empty_range, Direction};

/// Iterates a key range in batches.
///
/// Each batch of up to `prefetch` entries is copied out under a short read
/// lock; the next batch resumes after the last key returned. Writers are
/// therefore never blocked for the lifetime of the cursor, and a cursor
/// running across mutations sees an unspecified mix of old and new entries.
pub struct RangeCursor<'a, K, V> {
    map: &'a RwLock<BTreeMap<K, V>>,
    begin: Bound<K>,
    end: Bound<K>,
    direction: Direction,
    prefetch: usize,
    batch: VecDeque<(K, V)>,
    exhausted: bool,
}

impl<'a, K: Ord + Clone, V: Clone> RangeCursor<'a, K, V> {
    pub(crate) fn new(
        map: &'a RwLock<BTreeMap<K, V>>,
        begin: Bound<&K>,
        end: Bound<&K>,
        direction: Direction,
    ) -> Self {
        Self::with_prefetch(map, begin, end, direction, DEFAULT_CURSOR_PREFETCH)
    }

    pub(crate) fn with_prefetch(
        map: &'a RwLock<BTreeMap<K, V>>,
        begin: Bound<&K>,
        end: Bound<&K>,
        direction: Direction,
        prefetch: usize,
    ) -> Self {
        Self {
            map,
            begin: begin.cloned(),
            end: end.cloned(),
            direction,
            prefetch: prefetch.max(1),
            batch: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) {
        if is_empty_range(self.begin.as_ref(), self.end.as_ref()) {
            self.exhausted = true;
            return;
        }

        let map = self.map.read();
        let range = map.range((self.begin.as_ref(), self.end.as_ref()));
        let cloned = |(k, v): (&K, &V)| (k.clone(), v.clone());
        match self.direction {
            Direction::Forward => self.batch.extend(range.take(self.prefetch).map(cloned)),
            Direction::Reverse => self.batch.extend(range.rev().take(self.prefetch).map(cloned)),
        }
        drop(map);

        if self.batch.len() < self.prefetch {
            self.exhausted = true;
        }
        if let Some((last, _)) = self.batch.back() {
            match self.direction {
                Direction::Forward => self.begin = Bound::Excluded(last.clone()),
                Direction::Reverse => self.end = Bound::Excluded(last.clone()),
            }
        }
    }
}

impl<K: Ord + Clone, V: Clone> Iterator for RangeCursor<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        if self.batch.is_empty() && !self.exhausted {
            self.fill();
        }
        self.batch.pop_front()
    }
}
