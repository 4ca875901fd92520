//! The general crit-bit tree over fixed-width word-array keys.
//!
//! 1-D trees store keys of `ceil(width / 64)` words; every bit of those words
//! takes part in comparisons. k-dimensional trees interleave `dims` values of
//! `width <= 64` bits (right-aligned in their word) into one key with
//! [`merge`] and de-interleave on the way out.

mod iter;
mod mask;
mod query;
mod walk;

pub use iter::{Iter, KdIter};
pub use mask::{MaskQueryIter, RangeCheck};
pub use query::{QueryIter, QueryKdIter};

use std::fmt;

use smallvec::{smallvec, SmallVec};
use tracing::{debug, trace, warn};

use crate::bit_tools::{
    first_diff_bit, first_diff_bit_from, get_and_copy_bit, get_bit, high_bits_mask,
    low_bits_mask, merge, set_bit, split, to_binary_words, words_for_bits,
};
use crate::config::Config;
use crate::error::{CritBitError, Result};

/// Scratch buffer for the key prefix reconstructed during descent.
pub(crate) type Prefix = SmallVec<[u64; 4]>;

// =============================================================================
// Nodes
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone)]
pub(crate) enum Slot<V> {
    /// Key words from word `pos_diff / 64` of the owning node onwards.
    Leaf { postfix: Box<[u64]>, value: V },
    Subtree(NodeId),
}

#[derive(Clone)]
pub(crate) struct Node<V> {
    /// First bit covered by this node's infix; the parent's `pos_diff + 1`.
    pub(crate) pos_first_bit: u32,
    /// Bit at which the `lo` and `hi` subtrees differ.
    pub(crate) pos_diff: u32,
    /// Words covering bits `[pos_first_bit, pos_diff)`, starting at word
    /// `pos_first_bit / 64`, with every bit from `pos_diff` on cleared.
    /// `None` when the range is empty.
    pub(crate) infix: Option<Box<[u64]>>,
    pub(crate) lo: Slot<V>,
    pub(crate) hi: Slot<V>,
}

impl<V> Node<V> {
    #[inline]
    pub(crate) fn child(&self, hi: bool) -> &Slot<V> {
        if hi {
            &self.hi
        } else {
            &self.lo
        }
    }

    #[inline]
    fn child_mut(&mut self, hi: bool) -> &mut Slot<V> {
        if hi {
            &mut self.hi
        } else {
            &mut self.lo
        }
    }
}

#[derive(Clone)]
enum Root<V> {
    Empty,
    Single { key: Box<[u64]>, value: V },
    Tree(NodeId),
}

/// Node storage with a free list; ids of freed nodes are handed out again.
#[derive(Clone)]
pub(crate) struct NodeArena<V> {
    slots: Vec<Option<Node<V>>>,
    free: Vec<NodeId>,
    live: usize,
}

impl<V> NodeArena<V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
        }
    }

    /// The id the next [`alloc`](Self::alloc) will return.
    #[inline]
    fn next_id(&self) -> NodeId {
        self.free
            .last()
            .copied()
            .unwrap_or(NodeId(self.slots.len() as u32))
    }

    fn alloc(&mut self, node: Node<V>) -> NodeId {
        self.live += 1;
        if let Some(id) = self.free.pop() {
            self.slots[id.index()] = Some(node);
            return id;
        }
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Some(node));
        id
    }

    fn free(&mut self, id: NodeId) -> Node<V> {
        let node = self.slots[id.index()]
            .take()
            .expect("freed node must be live");
        self.free.push(id);
        self.live -= 1;
        node
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &Node<V> {
        self.slots[id.index()].as_ref().expect("dangling node id")
    }

    #[inline]
    fn get_mut(&mut self, id: NodeId) -> &mut Node<V> {
        self.slots[id.index()].as_mut().expect("dangling node id")
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }

    fn shrink_to_fit(&mut self) {
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        let len = self.slots.len();
        self.free.retain(|id| id.index() < len);
        self.slots.shrink_to_fit();
        self.free.shrink_to_fit();
    }
}

// =============================================================================
// Prefix helpers
// =============================================================================

/// Overlay the node's infix onto `prefix`.
#[inline]
pub(crate) fn read_infix<V>(node: &Node<V>, prefix: &mut [u64]) {
    if let Some(infix) = &node.infix {
        let start = (node.pos_first_bit >> 6) as usize;
        prefix[start..start + infix.len()].copy_from_slice(infix);
    }
}

/// Overlay a leaf postfix onto the tail of `prefix`.
#[inline]
pub(crate) fn read_postfix(postfix: &[u64], prefix: &mut [u64]) {
    let start = prefix.len() - postfix.len();
    prefix[start..].copy_from_slice(postfix);
}

#[inline]
fn create_postfix(key: &[u64], pos_diff: u32) -> Box<[u64]> {
    key[(pos_diff >> 6) as usize..].into()
}

/// Words of `key` covering bits `[start, end)`, bits from `end` on cleared.
fn extract_infix(key: &[u64], start: u32, end: u32) -> Option<Box<[u64]>> {
    if end <= start {
        return None;
    }
    let first = (start >> 6) as usize;
    let last = ((end - 1) >> 6) as usize;
    let mut infix: Box<[u64]> = key[first..=last].into();
    infix[last - first] &= high_bits_mask(((end - 1) & 63) + 1);
    Some(infix)
}

/// First bit inside the node's infix at which `key` leaves the prefix.
#[inline]
fn infix_mismatch<V>(node: &Node<V>, key: &[u64], prefix: &[u64]) -> Option<u32> {
    node.infix.as_ref()?;
    let start = (node.pos_first_bit >> 6) as usize;
    first_diff_bit_from(key, prefix, start).filter(|diff| *diff < node.pos_diff)
}

/// Build the node separating two keys that first differ at `pos_diff`.
fn new_node<V>(
    k1: &[u64],
    v1: V,
    k2: &[u64],
    v2: V,
    pos_first_bit: u32,
    pos_diff: u32,
) -> Node<V> {
    let infix = extract_infix(k1, pos_first_bit, pos_diff);
    let leaf1 = Slot::Leaf {
        postfix: create_postfix(k1, pos_diff),
        value: v1,
    };
    let leaf2 = Slot::Leaf {
        postfix: create_postfix(k2, pos_diff),
        value: v2,
    };
    let (lo, hi) = if get_bit(k1, pos_diff) {
        (leaf2, leaf1)
    } else {
        (leaf1, leaf2)
    };
    Node {
        pos_first_bit,
        pos_diff,
        infix,
        lo,
        hi,
    }
}

// =============================================================================
// CritBit
// =============================================================================

/// A crit-bit tree mapping fixed-width bit keys to values.
///
/// Internally: an inline root entry while the tree holds at most one key, and
/// an arena of binary nodes with path-compressed infixes once it holds two or
/// more.
pub struct CritBit<V> {
    width: u32,
    dims: Option<usize>,
    /// Words per stored (interleaved) key.
    words: usize,
    /// Bits a traversal has to fix to reach a complete key.
    key_bits: u32,
    root: Root<V>,
    nodes: NodeArena<V>,
    len: usize,
}

enum Location {
    Root,
    Leaf { node: NodeId, hi: bool },
}

impl<V> CritBit<V> {
    /// A 1-D tree over 64-bit keys.
    pub fn new() -> Self {
        Self::build(Config::default())
    }

    /// A 1-D tree over keys of `width` bits.
    pub fn create_1d(width: u32) -> Result<Self> {
        Self::with_config(Config::one_dimensional(width))
    }

    /// A tree over `dims`-dimensional keys of `width <= 64` bits per dimension.
    ///
    /// Only the low `width` bits of each value are stored; higher bits are
    /// ignored by every k-D operation that takes a key.
    pub fn create_kd(width: u32, dims: usize) -> Result<Self> {
        Self::with_config(Config::k_dimensional(width, dims))
    }

    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: Config) -> Self {
        let words = words_for_bits(config.key_bits());
        let key_bits = match config.dims {
            None => words as u32 * 64,
            Some(_) => config.key_bits(),
        };
        debug!(
            width = config.width,
            dims = ?config.dims,
            words,
            "created crit-bit tree"
        );
        Self {
            width: config.width,
            dims: config.dims,
            words,
            key_bits,
            root: Root::Empty,
            nodes: NodeArena::with_capacity(config.initial_capacity),
            len: 0,
        }
    }

    /// Bits per key (1-D) or per dimension (k-D).
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// `None` for 1-D trees.
    #[inline]
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    /// Words per 1-D key.
    #[inline]
    pub fn key_words(&self) -> usize {
        self.words
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.root = Root::Empty;
        self.nodes.clear();
        self.len = 0;
    }

    pub fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
    }

    // -------------------------------------------------------------------------
    // Argument checks
    // -------------------------------------------------------------------------

    fn check_1d(&self, key: &[u64]) -> Result<()> {
        if self.dims.is_some() {
            return Err(CritBitError::NotOneDimensional);
        }
        if key.len() != self.words {
            return Err(CritBitError::KeyLength {
                expected: self.words,
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn check_kd(&self, key: &[u64]) -> Result<usize> {
        let dims = self.dims.ok_or(CritBitError::NotMultiDimensional)?;
        if key.len() != dims {
            return Err(CritBitError::DimensionMismatch {
                expected: dims,
                actual: key.len(),
            });
        }
        Ok(dims)
    }

    fn interleave(&self, key: &[u64]) -> Result<Vec<u64>> {
        let dims = self.check_kd(key)?;
        Ok(merge(dims, self.width, key))
    }

    /// Bring `min`/`max` into stored-key shape for traversals that work in
    /// either mode.
    fn raw_bounds(&self, min: &[u64], max: &[u64]) -> Result<(Vec<u64>, Vec<u64>)> {
        let Some(dims) = self.dims else {
            self.check_1d(min)?;
            self.check_1d(max)?;
            return Ok((min.to_vec(), max.to_vec()));
        };
        self.check_kd(min)?;
        self.check_kd(max)?;
        // Interleaving keeps only `width` bits per dimension, so bounds are
        // clamped first. A `min` above every storable value empties its
        // dimension.
        let top = low_bits_mask(self.width);
        let (lo, hi): (Vec<u64>, Vec<u64>) = min
            .iter()
            .zip(max)
            .map(|(&lo, &hi)| if lo > top { (top, top - 1) } else { (lo, hi.min(top)) })
            .unzip();
        Ok((merge(dims, self.width, &lo), merge(dims, self.width, &hi)))
    }

    // -------------------------------------------------------------------------
    // 1-D API
    // -------------------------------------------------------------------------

    /// Insert or replace. Returns the previous value of `key`.
    pub fn put(&mut self, key: &[u64], value: V) -> Result<Option<V>> {
        self.check_1d(key)?;
        Ok(self.put_raw(key, value))
    }

    pub fn get(&self, key: &[u64]) -> Result<Option<&V>> {
        self.check_1d(key)?;
        Ok(self.get_raw(key))
    }

    pub fn get_mut(&mut self, key: &[u64]) -> Result<Option<&mut V>> {
        self.check_1d(key)?;
        Ok(self.get_raw_mut(key))
    }

    pub fn contains(&self, key: &[u64]) -> Result<bool> {
        self.check_1d(key)?;
        Ok(self.locate(key).is_some())
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &[u64]) -> Result<Option<V>> {
        self.check_1d(key)?;
        Ok(self.remove_raw(key))
    }

    /// All entries in ascending unsigned key order.
    pub fn iter(&self) -> Result<Iter<'_, V>> {
        if self.dims.is_some() {
            return Err(CritBitError::NotOneDimensional);
        }
        Ok(Iter::new(self))
    }

    /// Entries with `min <= key <= max`, compared as unsigned multi-word
    /// integers.
    pub fn query(&self, min: &[u64], max: &[u64]) -> Result<QueryIter<'_, V>> {
        self.check_1d(min)?;
        self.check_1d(max)?;
        Ok(QueryIter::new(self, min, max))
    }

    // -------------------------------------------------------------------------
    // k-D API
    // -------------------------------------------------------------------------

    /// Insert or replace. Returns the previous value of `key`.
    ///
    /// Bits of a value above the tree's `width` are dropped, so keys that
    /// agree on their low `width` bits in every dimension are the same key.
    pub fn put_kd(&mut self, key: &[u64], value: V) -> Result<Option<V>> {
        let raw = self.interleave(key)?;
        Ok(self.put_raw(&raw, value))
    }

    pub fn get_kd(&self, key: &[u64]) -> Result<Option<&V>> {
        let raw = self.interleave(key)?;
        Ok(self.get_raw(&raw))
    }

    pub fn get_kd_mut(&mut self, key: &[u64]) -> Result<Option<&mut V>> {
        let raw = self.interleave(key)?;
        Ok(self.get_raw_mut(&raw))
    }

    pub fn contains_kd(&self, key: &[u64]) -> Result<bool> {
        let raw = self.interleave(key)?;
        Ok(self.locate(&raw).is_some())
    }

    pub fn remove_kd(&mut self, key: &[u64]) -> Result<Option<V>> {
        let raw = self.interleave(key)?;
        Ok(self.remove_raw(&raw))
    }

    /// All entries with their keys split back into dimensions, in
    /// interleaved (z-) order.
    pub fn iter_kd(&self) -> Result<KdIter<'_, V>> {
        let dims = self.dims.ok_or(CritBitError::NotMultiDimensional)?;
        Ok(KdIter::new(self, dims))
    }

    /// Entries with `min[d] <= key[d] <= max[d]` in every dimension.
    pub fn query_kd(&self, min: &[u64], max: &[u64]) -> Result<QueryKdIter<'_, V>> {
        let dims = self.check_kd(min)?;
        self.check_kd(max)?;
        Ok(QueryKdIter::new(self, dims, min, max))
    }

    // -------------------------------------------------------------------------
    // Either mode
    // -------------------------------------------------------------------------

    /// Range query driven by per-dimension enclosure masks.
    ///
    /// Returns exactly the entries of [`query`](Self::query) (1-D) or
    /// [`query_kd`](Self::query_kd) (k-D); keys come back in the shape the
    /// tree was created for.
    pub fn query_with_mask(&self, min: &[u64], max: &[u64]) -> Result<MaskQueryIter<'_, V>> {
        let (lo, hi) = self.raw_bounds(min, max)?;
        MaskQueryIter::new(self, lo, hi)
    }

    /// Whether no entry lies in the box `[min, max]`.
    ///
    /// With `ignore_upper`, an entry equal to `max` does not count. Use
    /// [`range_check`](Self::range_check) for many checks in a row.
    pub fn is_range_empty(&self, min: &[u64], max: &[u64], ignore_upper: bool) -> Result<bool> {
        self.range_check()?.is_range_empty(min, max, ignore_upper)
    }

    /// A reusable [`is_range_empty`](Self::is_range_empty).
    pub fn range_check(&self) -> Result<RangeCheck<'_, V>> {
        RangeCheck::new(self)
    }

    /// The stored key an `ignore_upper` emptiness check skips, if `max` is a
    /// storable point.
    fn excluded_upper(&self, max: &[u64]) -> Option<Vec<u64>> {
        match self.dims {
            None => Some(max.to_vec()),
            Some(dims) => {
                let top = low_bits_mask(self.width);
                max.iter()
                    .all(|v| *v <= top)
                    .then(|| merge(dims, self.width, max))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Core operations on stored-shape keys
    // -------------------------------------------------------------------------

    fn locate(&self, key: &[u64]) -> Option<Location> {
        let mut id = match &self.root {
            Root::Empty => return None,
            Root::Single { key: stored, .. } => {
                return (**stored == *key).then_some(Location::Root);
            }
            Root::Tree(id) => *id,
        };
        let mut prefix: Prefix = smallvec![0; self.words];
        loop {
            let node = self.nodes.get(id);
            read_infix(node, &mut prefix);
            if infix_mismatch(node, key, &prefix).is_some() {
                return None;
            }
            let hi = get_and_copy_bit(key, node.pos_diff, &mut prefix);
            match node.child(hi) {
                Slot::Subtree(child) => id = *child,
                Slot::Leaf { postfix, .. } => {
                    // Bits up to pos_diff already match, so the postfix decides.
                    let tail = &key[key.len() - postfix.len()..];
                    return (**postfix == *tail).then_some(Location::Leaf { node: id, hi });
                }
            }
        }
    }

    fn get_raw(&self, key: &[u64]) -> Option<&V> {
        match self.locate(key)? {
            Location::Root => match &self.root {
                Root::Single { value, .. } => Some(value),
                _ => None,
            },
            Location::Leaf { node, hi } => match self.nodes.get(node).child(hi) {
                Slot::Leaf { value, .. } => Some(value),
                Slot::Subtree(_) => None,
            },
        }
    }

    fn get_raw_mut(&mut self, key: &[u64]) -> Option<&mut V> {
        match self.locate(key)? {
            Location::Root => match &mut self.root {
                Root::Single { value, .. } => Some(value),
                _ => None,
            },
            Location::Leaf { node, hi } => match self.nodes.get_mut(node).child_mut(hi) {
                Slot::Leaf { value, .. } => Some(value),
                Slot::Subtree(_) => None,
            },
        }
    }

    fn put_raw(&mut self, key: &[u64], value: V) -> Option<V> {
        match std::mem::replace(&mut self.root, Root::Empty) {
            Root::Empty => {
                self.root = Root::Single {
                    key: key.into(),
                    value,
                };
                self.len = 1;
                None
            }
            Root::Single {
                key: old_key,
                value: old_value,
            } => match first_diff_bit(key, &old_key) {
                None => {
                    self.root = Root::Single {
                        key: old_key,
                        value,
                    };
                    Some(old_value)
                }
                Some(diff) => {
                    let node = new_node(key, value, &old_key, old_value, 0, diff);
                    self.root = Root::Tree(self.nodes.alloc(node));
                    self.len = 2;
                    None
                }
            },
            Root::Tree(id) => {
                self.root = Root::Tree(id);
                self.put_in_tree(id, key, value)
            }
        }
    }

    fn put_in_tree(&mut self, root: NodeId, key: &[u64], value: V) -> Option<V> {
        let mut prefix: Prefix = smallvec![0; self.words];
        let mut id = root;
        loop {
            let new_id = self.nodes.next_id();
            let node = self.nodes.get_mut(id);
            read_infix(node, &mut prefix);

            if let Some(diff) = infix_mismatch(node, key, &prefix) {
                // Split the infix: the node keeps [pos_first_bit, diff), a new
                // child takes the rest together with the old children.
                let sub_infix = extract_infix(&prefix, diff + 1, node.pos_diff);
                let leaf = Slot::Leaf {
                    postfix: create_postfix(key, diff),
                    value,
                };
                let (lo, hi) = if get_and_copy_bit(key, diff, &mut prefix) {
                    (Slot::Subtree(new_id), leaf)
                } else {
                    (leaf, Slot::Subtree(new_id))
                };
                let sub = Node {
                    pos_first_bit: diff + 1,
                    pos_diff: node.pos_diff,
                    infix: sub_infix,
                    lo: std::mem::replace(&mut node.lo, lo),
                    hi: std::mem::replace(&mut node.hi, hi),
                };
                node.infix = extract_infix(&prefix, node.pos_first_bit, diff);
                node.pos_diff = diff;
                let allocated = self.nodes.alloc(sub);
                debug_assert_eq!(allocated, new_id);
                trace!(node = id.0, pos_diff = diff, "split infix");
                self.len += 1;
                return None;
            }

            let pos_diff = node.pos_diff;
            let hi = get_and_copy_bit(key, pos_diff, &mut prefix);
            let slot = node.child_mut(hi);
            let current = match &mut *slot {
                Slot::Subtree(child) => {
                    id = *child;
                    continue;
                }
                Slot::Leaf {
                    postfix,
                    value: current,
                } => {
                    read_postfix(postfix, &mut prefix);
                    current
                }
            };

            let Some(diff) = first_diff_bit_from(key, &prefix, (pos_diff >> 6) as usize) else {
                return Some(std::mem::replace(current, value));
            };
            let Slot::Leaf {
                value: old_value, ..
            } = std::mem::replace(slot, Slot::Subtree(new_id))
            else {
                unreachable!("slot was matched as a leaf");
            };
            let sub = new_node(key, value, &prefix, old_value, pos_diff + 1, diff);
            let allocated = self.nodes.alloc(sub);
            debug_assert_eq!(allocated, new_id);
            trace!(node = id.0, pos_diff = diff, "split leaf");
            self.len += 1;
            return None;
        }
    }

    fn remove_raw(&mut self, key: &[u64]) -> Option<V> {
        let root = match std::mem::replace(&mut self.root, Root::Empty) {
            Root::Empty => return None,
            Root::Single {
                key: stored,
                value,
            } => {
                if *stored == *key {
                    self.len = 0;
                    return Some(value);
                }
                self.root = Root::Single { key: stored, value };
                return None;
            }
            Root::Tree(id) => {
                self.root = Root::Tree(id);
                id
            }
        };

        let mut prefix: Prefix = smallvec![0; self.words];
        let mut parent: Option<(NodeId, bool)> = None;
        let mut id = root;
        let hi = loop {
            let node = self.nodes.get(id);
            read_infix(node, &mut prefix);
            if infix_mismatch(node, key, &prefix).is_some() {
                return None;
            }
            let hi = get_and_copy_bit(key, node.pos_diff, &mut prefix);
            match node.child(hi) {
                Slot::Subtree(child) => {
                    parent = Some((id, hi));
                    id = *child;
                }
                Slot::Leaf { postfix, .. } => {
                    let tail = &key[key.len() - postfix.len()..];
                    if **postfix != *tail {
                        return None;
                    }
                    break hi;
                }
            }
        };

        let node = self.nodes.free(id);
        let (removed, sibling) = if hi {
            (node.hi, node.lo)
        } else {
            (node.lo, node.hi)
        };
        let Slot::Leaf { value, .. } = removed else {
            unreachable!("descent ended on a leaf");
        };

        // Promote the sibling into the freed node's place.
        set_bit(&mut prefix, node.pos_diff, !hi);
        match sibling {
            Slot::Leaf {
                postfix,
                value: sibling_value,
            } => {
                read_postfix(&postfix, &mut prefix);
                match parent {
                    None => {
                        self.root = Root::Single {
                            key: prefix.as_slice().into(),
                            value: sibling_value,
                        };
                    }
                    Some((pid, side)) => {
                        let p = self.nodes.get_mut(pid);
                        let postfix = create_postfix(&prefix, p.pos_diff);
                        *p.child_mut(side) = Slot::Leaf {
                            postfix,
                            value: sibling_value,
                        };
                    }
                }
            }
            Slot::Subtree(sid) => {
                let sub = self.nodes.get_mut(sid);
                read_infix(sub, &mut prefix);
                sub.infix = extract_infix(&prefix, node.pos_first_bit, sub.pos_diff);
                sub.pos_first_bit = node.pos_first_bit;
                match parent {
                    None => self.root = Root::Tree(sid),
                    Some((pid, side)) => {
                        *self.nodes.get_mut(pid).child_mut(side) = Slot::Subtree(sid);
                    }
                }
            }
        }
        trace!(node = id.0, "collapsed node");
        self.len -= 1;
        Some(value)
    }

    // -------------------------------------------------------------------------
    // Consistency
    // -------------------------------------------------------------------------

    /// Walk the whole structure and verify its invariants. Violations are
    /// logged at `warn` level.
    pub fn check_tree(&self) -> bool {
        let root = match &self.root {
            Root::Empty => {
                if self.len != 0 || self.nodes.live != 0 {
                    warn!(len = self.len, "empty root with entries");
                    return false;
                }
                return true;
            }
            Root::Single { key, .. } => {
                if self.len != 1 || self.nodes.live != 0 || key.len() != self.words {
                    warn!(len = self.len, "inline root with inconsistent state");
                    return false;
                }
                return true;
            }
            Root::Tree(id) => *id,
        };

        let mut prefix: Prefix = smallvec![0; self.words];
        let mut stack = vec![(root, 0u32, false)];
        let mut leaves = 0usize;
        let mut visited = 0usize;
        // Frames: (node, expected pos_first_bit, upper side pending).
        while let Some((id, first_bit, upper)) = stack.pop() {
            let node = self.nodes.get(id);
            if !upper {
                visited += 1;
                if node.pos_first_bit != first_bit {
                    warn!(node = id.0, "infix inconsistency detected");
                    return false;
                }
                if node.pos_diff < node.pos_first_bit || node.pos_diff >= self.key_bits {
                    warn!(node = id.0, pos_diff = node.pos_diff, "pos_diff out of range");
                    return false;
                }
                match &node.infix {
                    Some(_) if node.pos_diff == node.pos_first_bit => {
                        warn!(node = id.0, "infix with len=0 detected");
                        return false;
                    }
                    Some(infix) => {
                        let expected = ((node.pos_diff - 1) >> 6) - (node.pos_first_bit >> 6) + 1;
                        if infix.len() != expected as usize {
                            warn!(node = id.0, "infix with bad length detected");
                            return false;
                        }
                    }
                    None => {
                        if node.pos_diff != node.pos_first_bit {
                            warn!(node = id.0, "missing infix detected");
                            return false;
                        }
                    }
                }
                read_infix(node, &mut prefix);
                stack.push((id, first_bit, true));
            }
            set_bit(&mut prefix, node.pos_diff, upper);
            match node.child(upper) {
                Slot::Subtree(child) => stack.push((*child, node.pos_diff + 1, false)),
                Slot::Leaf { postfix, .. } => {
                    leaves += 1;
                    if postfix.len() != self.words - (node.pos_diff >> 6) as usize {
                        warn!(node = id.0, "postfix with bad length detected");
                        return false;
                    }
                    read_postfix(postfix, &mut prefix);
                    if get_bit(&prefix, node.pos_diff) != upper {
                        warn!(node = id.0, upper, "leaf on the wrong side of its node");
                        return false;
                    }
                }
            }
        }

        if leaves != self.len {
            warn!(leaves, len = self.len, "reachable leaf count differs from len");
            return false;
        }
        if visited != self.nodes.live {
            warn!(visited, live = self.nodes.live, "unreachable nodes in arena");
            return false;
        }
        true
    }

    fn fmt_node(&self, id: NodeId, f: &mut fmt::Formatter<'_>, level: &str, depth: u32) -> fmt::Result
    where
        V: fmt::Debug,
    {
        let node = self.nodes.get(id);
        match &node.infix {
            Some(infix) => writeln!(
                f,
                "{level}n: {depth}/{} {}",
                node.pos_diff,
                to_binary_words(infix, 64)
            )?,
            None => writeln!(f, "{level}n: {depth}/{} i=0", node.pos_diff)?,
        }
        let deeper = format!("{level}-");
        for upper in [false, true] {
            match node.child(upper) {
                Slot::Subtree(child) => self.fmt_node(*child, f, &deeper, node.pos_diff + 1)?,
                Slot::Leaf { postfix, value } => {
                    writeln!(f, "{level} {} v={value:?}", to_binary_words(postfix, 64))?
                }
            }
        }
        Ok(())
    }
}

impl<V> Default for CritBit<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Clone for CritBit<V> {
    fn clone(&self) -> Self {
        Self {
            width: self.width,
            dims: self.dims,
            words: self.words,
            key_bits: self.key_bits,
            root: self.root.clone(),
            nodes: self.nodes.clone(),
            len: self.len,
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for CritBit<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dims {
            None => f.debug_map().entries(Iter::new(self)).finish(),
            Some(dims) => f.debug_map().entries(KdIter::new(self, dims)).finish(),
        }
    }
}

/// Tree dump: one line per node (`n: <first bit>/<pos_diff> <infix>`) and per
/// leaf (`<postfix> v=<value>`), indented by depth.
impl<V: fmt::Debug> fmt::Display for CritBit<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Root::Empty => writeln!(f, "- -"),
            Root::Single { key, value } => {
                writeln!(f, "-{} v={value:?}", to_binary_words(key, 64))
            }
            Root::Tree(id) => self.fmt_node(*id, f, "", 0),
        }
    }
}

/// Split an interleaved key back into its dimensions.
#[inline]
pub(crate) fn split_key(dims: usize, width: u32, raw: &[u64]) -> Vec<u64> {
    split(dims, width, raw)
}
