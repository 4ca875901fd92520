use std::iter::FusedIterator;

use super::walk::{Unbounded, Walker};
use super::{split_key, CritBit};

/// Full scan of a 1-D tree in ascending key order.
pub struct Iter<'a, V> {
    walker: Walker<'a, V, Unbounded>,
}

impl<'a, V> Iter<'a, V> {
    pub(crate) fn new(tree: &'a CritBit<V>) -> Self {
        Self {
            walker: Walker::new(tree, Unbounded),
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (Vec<u64>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.walker.next_leaf()?;
        Some((self.walker.key().to_vec(), value))
    }
}

impl<V> FusedIterator for Iter<'_, V> {}

/// Full scan of a k-D tree; keys are split back into dimensions.
pub struct KdIter<'a, V> {
    walker: Walker<'a, V, Unbounded>,
    dims: usize,
    width: u32,
}

impl<'a, V> KdIter<'a, V> {
    pub(crate) fn new(tree: &'a CritBit<V>, dims: usize) -> Self {
        Self {
            walker: Walker::new(tree, Unbounded),
            dims,
            width: tree.width,
        }
    }
}

impl<'a, V> Iterator for KdIter<'a, V> {
    type Item = (Vec<u64>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.walker.next_leaf()?;
        Some((split_key(self.dims, self.width, self.walker.key()), value))
    }
}

impl<V> FusedIterator for KdIter<'_, V> {}
