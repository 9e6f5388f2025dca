//! Bounded FIFO sample storage.
//!
//! [`Ring`] is the plain container; [`RingStore`] wraps it in a reader/writer
//! lock so producers, the analysis worker and display readers can share it.
//! Every mutator takes the write lock for its whole duration, so a reader
//! always observes the state between two complete operations.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;

/// A FIFO of samples with an optional capacity. `0` means unbounded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ring {
    values: VecDeque<f64>,
    capacity: usize,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// The configured capacity, `0` for unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn effective_capacity(&self) -> usize {
        if self.capacity == 0 {
            usize::MAX
        } else {
            self.capacity
        }
    }

    /// Number of values that would be evicted if `incoming` values were appended.
    pub fn overflow_after(&self, incoming: usize) -> usize {
        self.values
            .len()
            .saturating_add(incoming)
            .saturating_sub(self.effective_capacity())
    }

    /// Appends one value, evicting the oldest one when full. Returns the
    /// number of evicted values.
    pub fn append(&mut self, value: f64) -> usize {
        self.values.push_back(value);
        if self.values.len() > self.effective_capacity() {
            self.values.pop_front();
            1
        } else {
            0
        }
    }

    /// Appends `values` with the same end state as appending them one by one.
    /// The eviction count is computed once up front: values that would be
    /// evicted anyway never enter the container.
    pub fn append_batch(&mut self, values: &[f64]) -> usize {
        if values.is_empty() {
            return 0;
        }
        let cut = self.overflow_after(values.len());
        let held = self.values.len();
        if cut <= held {
            self.values.drain(..cut);
            self.values.extend(values.iter().copied());
        } else {
            self.values.clear();
            self.values.extend(values[cut - held..].iter().copied());
        }
        cut
    }

    /// Drops the `n` oldest values, clamped to the current length.
    pub fn remove_first(&mut self, n: usize) -> usize {
        let n = n.min(self.values.len());
        self.values.drain(..n);
        n
    }

    /// Replaces the contents, keeping only the most recent `capacity` values.
    pub fn replace_all(&mut self, values: &[f64]) {
        self.values.clear();
        let skip = values.len().saturating_sub(self.effective_capacity());
        self.values.extend(values[skip..].iter().copied());
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn first(&self) -> Option<f64> {
        self.values.front().copied()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }
}

/// Thread-safe [`Ring`].
#[derive(Debug, Default)]
pub struct RingStore {
    inner: RwLock<Ring>,
}

impl RingStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Ring::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity()
    }

    pub fn append(&self, value: f64) -> usize {
        self.inner.write().append(value)
    }

    pub fn append_batch(&self, values: &[f64]) -> usize {
        self.inner.write().append_batch(values)
    }

    pub fn remove_first(&self, n: usize) -> usize {
        self.inner.write().remove_first(n)
    }

    pub fn replace_all(&self, values: &[f64]) {
        self.inner.write().replace_all(values)
    }

    pub fn clear(&self) {
        self.inner.write().clear()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.inner.read().to_vec()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.inner.read().get(index)
    }

    pub fn first(&self) -> Option<f64> {
        self.inner.read().first()
    }

    pub fn last(&self) -> Option<f64> {
        self.inner.read().last()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Shared access for multi-step reads that must see a single state.
    ///
    /// The lock is fair: do not call other methods of this store while the
    /// guard is alive, or a queued writer deadlocks both.
    pub fn read(&self) -> RwLockReadGuard<'_, Ring> {
        self.inner.read()
    }

    /// Exclusive access for compound mutations.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Ring> {
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sequential_appends_keep_the_newest_values() {
        let store = RingStore::new(3);
        for v in 1..=5 {
            store.append(v as f64);
        }
        assert_eq!(store.to_vec(), vec![3.0, 4.0, 5.0]);
        assert_eq!(store.first(), Some(3.0));
        assert_eq!(store.last(), Some(5.0));
        assert_eq!(store.get(1), Some(4.0));
        assert_eq!(store.get(3), None);
    }

    #[test]
    fn batch_append_matches_sequential_appends() {
        let batch = RingStore::new(2);
        assert_eq!(batch.append_batch(&[1.0, 2.0, 3.0]), 1);

        let sequential = RingStore::new(2);
        for v in [1.0, 2.0, 3.0] {
            sequential.append(v);
        }
        assert_eq!(batch.to_vec(), vec![2.0, 3.0]);
        assert_eq!(batch.to_vec(), sequential.to_vec());
    }

    #[test]
    fn remove_first_clamps_to_length() {
        let store = RingStore::new(0);
        store.append_batch(&[1.0, 2.0, 3.0]);
        assert_eq!(store.remove_first(0), 0);
        assert_eq!(store.remove_first(2), 2);
        assert_eq!(store.to_vec(), vec![3.0]);
        assert_eq!(store.remove_first(10), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn replace_keeps_the_tail() {
        let store = RingStore::new(3);
        store.append(9.0);
        store.replace_all(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(store.to_vec(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn unbounded_store_never_evicts() {
        let store = RingStore::new(0);
        let values: Vec<f64> = (0..10_000).map(f64::from).collect();
        assert_eq!(store.append_batch(&values), 0);
        assert_eq!(store.len(), 10_000);
    }

    proptest! {
        #[test]
        fn capacity_invariant_holds(
            capacity in 1usize..16,
            ops in prop::collection::vec(prop::collection::vec(-1e6f64..1e6, 0..20), 0..20),
        ) {
            let mut ring = Ring::new(capacity);
            let mut history = Vec::new();
            for chunk in &ops {
                if chunk.len() == 1 {
                    ring.append(chunk[0]);
                } else {
                    ring.append_batch(chunk);
                }
                history.extend_from_slice(chunk);
                prop_assert!(ring.len() <= capacity);
                let keep = history.len().min(capacity);
                prop_assert_eq!(ring.to_vec(), history[history.len() - keep..].to_vec());
            }
        }

        #[test]
        fn batch_equals_sequential(
            capacity in 0usize..8,
            prefix in prop::collection::vec(-10.0f64..10.0, 0..10),
            batch in prop::collection::vec(-10.0f64..10.0, 0..20),
        ) {
            let mut a = Ring::new(capacity);
            let mut b = Ring::new(capacity);
            a.append_batch(&prefix);
            b.append_batch(&prefix);
            let cut = a.append_batch(&batch);
            let mut evicted = 0;
            for v in &batch {
                evicted += b.append(*v);
            }
            prop_assert_eq!(a.to_vec(), b.to_vec());
            prop_assert_eq!(cut, evicted);
        }
    }
}
