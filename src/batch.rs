//! Owned record buffers in flight between producers and the manager.

use std::cmp::Ordering;

/// A contiguous owned array of records handed from a producer to the
/// manager.
///
/// Ownership moves with the batch: the producer gives it up on a
/// successful enqueue, the manager sorts it in place and drops it once
/// its contents reach a level-0 run file. No other party ever aliases
/// the buffer.
#[derive(Debug)]
pub struct Batch<K> {
    records: Vec<K>,
}

impl<K> Batch<K> {
    pub fn new(records: Vec<K>) -> Self {
        Self { records }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn records(&self) -> &[K] {
        &self.records
    }

    /// Sorts the batch in place under the caller's ordering predicate.
    ///
    /// Unstable by contract: the engine promises no relative order among
    /// records that compare equal.
    pub fn sort<C>(&mut self, less: &C)
    where
        C: Fn(&K, &K) -> bool,
    {
        self.records.sort_unstable_by(|a, b| order(less, a, b));
    }
}

/// Lifts a strict-weak-order predicate into a total [`Ordering`].
///
/// Records where neither side precedes the other report `Equal` and are
/// interchangeable downstream.
#[inline]
pub(crate) fn order<K, C>(less: &C, a: &K, b: &K) -> Ordering
where
    C: Fn(&K, &K) -> bool,
{
    if less(a, b) {
        Ordering::Less
    } else if less(b, a) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

#[cfg(test)]
mod test {
    use super::Batch;

    #[test]
    fn sorts_under_predicate() {
        let mut batch = Batch::new(vec![5u32, 1, 4, 1, 3]);
        batch.sort(&|a: &u32, b: &u32| a < b);
        assert_eq!(batch.records(), &[1, 1, 3, 4, 5]);
    }

    #[test]
    fn reversed_predicate_reverses() {
        let mut batch = Batch::new(vec![2i64, 9, 4]);
        batch.sort(&|a: &i64, b: &i64| b < a);
        assert_eq!(batch.records(), &[9, 4, 2]);
    }
}
