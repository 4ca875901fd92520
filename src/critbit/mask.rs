//! Range queries tracked with one enclosure bit per dimension.
//!
//! Interleaved bit `p` belongs to dimension `p % dims` (a 1-D tree is the
//! single-dimension case). For every dimension the walker remembers whether
//! the path is already strictly above `min` and strictly below `max`; once
//! every dimension is enclosed on both sides no further bits are compared.

use std::iter::FusedIterator;

use super::walk::{Prune, Walker};
use super::{split_key, CritBit};
use crate::bit_tools::{get_bit, low_bits_mask};
use crate::error::{CritBitError, Result};

#[derive(Clone, Copy, Default)]
pub(crate) struct DimensionMask {
    lo: u64,
    hi: u64,
}

pub(crate) struct MaskPrune {
    dims: u32,
    /// One bit per dimension.
    full: u64,
    /// Interleaved bounds.
    min: Vec<u64>,
    max: Vec<u64>,
}

impl MaskPrune {
    fn new<V>(tree: &CritBit<V>, min: Vec<u64>, max: Vec<u64>) -> Result<Self> {
        let dims = tree.dims.unwrap_or(1);
        if dims > 64 {
            return Err(CritBitError::TooManyDimensions(dims));
        }
        Ok(Self {
            dims: dims as u32,
            full: low_bits_mask(dims as u32),
            min,
            max,
        })
    }
}

impl Prune for MaskPrune {
    type State = DimensionMask;

    fn root_state(&self) -> DimensionMask {
        DimensionMask::default()
    }

    fn admit(
        &mut self,
        prefix: &[u64],
        from: u32,
        to: u32,
        mut mask: DimensionMask,
    ) -> Option<DimensionMask> {
        let mut pos = from;
        while pos < to && (mask.lo & mask.hi) != self.full {
            let dim = 1u64 << (pos % self.dims);
            let bit = get_bit(prefix, pos);
            if mask.lo & dim == 0 && bit != get_bit(&self.min, pos) {
                if !bit {
                    return None;
                }
                mask.lo |= dim;
            }
            if mask.hi & dim == 0 && bit != get_bit(&self.max, pos) {
                if bit {
                    return None;
                }
                mask.hi |= dim;
            }
            pos += 1;
        }
        Some(mask)
    }
}

/// Entries inside `[min, max]` found with per-dimension enclosure masks.
///
/// Keys have the shape the tree was created with: raw words for 1-D trees,
/// one value per dimension for k-D trees.
pub struct MaskQueryIter<'a, V> {
    walker: Walker<'a, V, MaskPrune>,
    dims: Option<usize>,
    width: u32,
}

impl<'a, V> MaskQueryIter<'a, V> {
    pub(crate) fn new(tree: &'a CritBit<V>, min: Vec<u64>, max: Vec<u64>) -> Result<Self> {
        let prune = MaskPrune::new(tree, min, max)?;
        Ok(Self {
            walker: Walker::new(tree, prune),
            dims: tree.dims,
            width: tree.width,
        })
    }

    /// Restart the query with new bounds, reusing the iterator's buffers.
    ///
    /// Bounds are checked and clamped as in
    /// [`CritBit::query_with_mask`]; on error the iterator is left as it was.
    pub fn reset(&mut self, min: &[u64], max: &[u64]) -> Result<()> {
        let (lo, hi) = self.walker.tree().raw_bounds(min, max)?;
        self.walker.prune.min = lo;
        self.walker.prune.max = hi;
        self.walker.restart();
        Ok(())
    }
}

impl<'a, V> Iterator for MaskQueryIter<'a, V> {
    type Item = (Vec<u64>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.walker.next_leaf()?;
        let key = match self.dims {
            None => self.walker.key().to_vec(),
            Some(dims) => split_key(dims, self.width, self.walker.key()),
        };
        Some((key, value))
    }
}

impl<V> FusedIterator for MaskQueryIter<'_, V> {}

/// Repeated emptiness checks against one tree.
///
/// Same traversal as [`MaskQueryIter`], stopping at the first entry and
/// without materialising keys. The traversal stack is kept between checks.
pub struct RangeCheck<'a, V> {
    walker: Walker<'a, V, MaskPrune>,
}

impl<'a, V> RangeCheck<'a, V> {
    pub(crate) fn new(tree: &'a CritBit<V>) -> Result<Self> {
        let prune = MaskPrune::new(tree, vec![0; tree.words], vec![0; tree.words])?;
        Ok(Self {
            walker: Walker::new(tree, prune),
        })
    }

    /// Whether no entry lies in the box `[min, max]`. With `ignore_upper`,
    /// an entry equal to `max` does not count.
    pub fn is_range_empty(&mut self, min: &[u64], max: &[u64], ignore_upper: bool) -> Result<bool> {
        let tree = self.walker.tree();
        let (lo, hi) = tree.raw_bounds(min, max)?;
        let upper = if ignore_upper {
            tree.excluded_upper(max)
        } else {
            None
        };
        self.walker.prune.min = lo;
        self.walker.prune.max = hi;
        self.walker.restart();
        while self.walker.next_leaf().is_some() {
            match &upper {
                Some(upper) if self.walker.key() == upper.as_slice() => continue,
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}
