use std::cmp::Ordering;
use std::iter::FusedIterator;

use super::walk::{Prune, Walker};
use super::CritBit;
use crate::bit_tools::{cmp_bits, low_bits_mask, split_into};
use crate::error::{CritBitError, Result};

// =============================================================================
// 1-D range
// =============================================================================

/// Whether the current path is already known to lie strictly above `min`
/// (`lo`) or strictly below `max` (`hi`).
#[derive(Clone, Copy, Default)]
pub(crate) struct Enclosure {
    lo: bool,
    hi: bool,
}

pub(crate) struct RangePrune {
    min: Box<[u64]>,
    max: Box<[u64]>,
}

impl Prune for RangePrune {
    type State = Enclosure;

    fn root_state(&self) -> Enclosure {
        Enclosure::default()
    }

    fn admit(&mut self, prefix: &[u64], from: u32, to: u32, mut enc: Enclosure) -> Option<Enclosure> {
        // While a side is not enclosed the path equals that bound on every bit
        // before `from`, so only the new bits need comparing.
        if !enc.lo {
            match cmp_bits(prefix, &self.min, from, to) {
                Ordering::Less => return None,
                Ordering::Greater => enc.lo = true,
                Ordering::Equal => {}
            }
        }
        if !enc.hi {
            match cmp_bits(prefix, &self.max, from, to) {
                Ordering::Greater => return None,
                Ordering::Less => enc.hi = true,
                Ordering::Equal => {}
            }
        }
        Some(enc)
    }
}

/// Entries of a 1-D tree with `min <= key <= max`, in ascending order.
pub struct QueryIter<'a, V> {
    walker: Walker<'a, V, RangePrune>,
    words: usize,
}

impl<'a, V> QueryIter<'a, V> {
    pub(crate) fn new(tree: &'a CritBit<V>, min: &[u64], max: &[u64]) -> Self {
        let prune = RangePrune {
            min: min.into(),
            max: max.into(),
        };
        Self {
            walker: Walker::new(tree, prune),
            words: tree.words,
        }
    }

    /// Restart the query with new bounds, reusing the iterator's buffers.
    pub fn reset(&mut self, min: &[u64], max: &[u64]) -> Result<()> {
        for bound in [min, max] {
            if bound.len() != self.words {
                return Err(CritBitError::KeyLength {
                    expected: self.words,
                    actual: bound.len(),
                });
            }
        }
        self.walker.prune.min.copy_from_slice(min);
        self.walker.prune.max.copy_from_slice(max);
        self.walker.restart();
        Ok(())
    }
}

impl<'a, V> Iterator for QueryIter<'a, V> {
    type Item = (Vec<u64>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.walker.next_leaf()?;
        Some((self.walker.key().to_vec(), value))
    }
}

impl<V> FusedIterator for QueryIter<'_, V> {}

// =============================================================================
// k-D range
// =============================================================================

/// De-interleaves the path into per-dimension values as bits get fixed and
/// checks the known high bits of every dimension against the box.
pub(crate) struct KdPrune {
    dims: usize,
    width: u32,
    min: Vec<u64>,
    max: Vec<u64>,
    /// Per-dimension values; only bits fixed on the current path are valid.
    current: Vec<u64>,
}

impl KdPrune {
    /// `fixed` leading bits of the interleaved key are known.
    fn matches(&self, fixed: u32) -> bool {
        let dims = self.dims as u32;
        let common = fixed / dims;
        // The first `ahead` dimensions already know one bit more.
        let ahead = (fixed - common * dims) as usize;
        let open = low_bits_mask(self.width - common);
        for k in 0..self.dims {
            let open = if k < ahead { open >> 1 } else { open };
            let v = self.current[k];
            if (v | open) < self.min[k] || (v & !open) > self.max[k] {
                return false;
            }
        }
        true
    }
}

impl Prune for KdPrune {
    type State = ();

    fn root_state(&self) {}

    fn admit(&mut self, prefix: &[u64], from: u32, to: u32, _: ()) -> Option<()> {
        split_into(self.dims, self.width, prefix, from, to, &mut self.current);
        self.matches(to).then_some(())
    }
}

/// Entries of a k-D tree inside the box `[min, max]`, keys split into
/// dimensions.
pub struct QueryKdIter<'a, V> {
    walker: Walker<'a, V, KdPrune>,
}

impl<'a, V> QueryKdIter<'a, V> {
    pub(crate) fn new(tree: &'a CritBit<V>, dims: usize, min: &[u64], max: &[u64]) -> Self {
        let prune = KdPrune {
            dims,
            width: tree.width,
            min: min.to_vec(),
            max: max.to_vec(),
            current: vec![0; dims],
        };
        Self {
            walker: Walker::new(tree, prune),
        }
    }
}

impl<'a, V> Iterator for QueryKdIter<'a, V> {
    type Item = (Vec<u64>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.walker.next_leaf()?;
        Some((self.walker.prune.current.clone(), value))
    }
}

impl<V> FusedIterator for QueryKdIter<'_, V> {}
