//! Crit-bit tree over `u64` keys with copy-on-write updates.
//!
//! The tree state is an immutable [`CowSnapshot`] behind an epoch-protected
//! pointer. Readers load it without locking; writers are serialized by a
//! mutex, copy the path they modify (everything else stays shared through
//! `Arc`) and publish the result with a single swap.

use std::fmt;
use std::iter::FusedIterator;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::bit_tools::{get_bit64, high_bits_mask, low_bits_mask, to_binary};

enum Child<V> {
    Leaf {
        key: u64,
        value: Arc<V>,
    },
    /// `prefix` holds bits `[0, node.pos_diff)` shared by every key below,
    /// all other bits cleared.
    Inner {
        prefix: u64,
        node: Arc<Node<V>>,
    },
}

// Manual impls: cloning only bumps reference counts, `V: Clone` is not needed.
impl<V> Clone for Child<V> {
    fn clone(&self) -> Self {
        match self {
            Child::Leaf { key, value } => Child::Leaf {
                key: *key,
                value: Arc::clone(value),
            },
            Child::Inner { prefix, node } => Child::Inner {
                prefix: *prefix,
                node: Arc::clone(node),
            },
        }
    }
}

struct Node<V> {
    pos_diff: u32,
    lo: Child<V>,
    hi: Child<V>,
}

impl<V> Clone for Node<V> {
    fn clone(&self) -> Self {
        Self {
            pos_diff: self.pos_diff,
            lo: self.lo.clone(),
            hi: self.hi.clone(),
        }
    }
}

impl<V> Node<V> {
    #[inline]
    fn child(&self, hi: bool) -> &Child<V> {
        if hi {
            &self.hi
        } else {
            &self.lo
        }
    }

    #[inline]
    fn child_mut(&mut self, hi: bool) -> &mut Child<V> {
        if hi {
            &mut self.hi
        } else {
            &mut self.lo
        }
    }
}

/// Inner child separating `a` and `b`, which first differ at `pos_diff`.
fn branch<V>(pos_diff: u32, a: Child<V>, a_key: u64, b: Child<V>) -> Child<V> {
    let (lo, hi) = if get_bit64(a_key, pos_diff) {
        (b, a)
    } else {
        (a, b)
    };
    Child::Inner {
        prefix: a_key & high_bits_mask(pos_diff),
        node: Arc::new(Node { pos_diff, lo, hi }),
    }
}

/// Any key stored below `child`, used to find where a new key branches off.
#[inline]
fn representative<V>(child: &Child<V>) -> (u64, u32) {
    match child {
        Child::Leaf { key, .. } => (*key, 64),
        Child::Inner { prefix, node } => (*prefix, node.pos_diff),
    }
}

fn insert<V>(slot: &mut Child<V>, key: u64, value: Arc<V>) -> Option<Arc<V>> {
    let (known, known_bits) = representative(slot);
    let diff = (known ^ key).leading_zeros();
    if diff >= known_bits {
        match slot {
            Child::Leaf { value: current, .. } => {
                return Some(std::mem::replace(current, value));
            }
            Child::Inner { node, .. } => {
                let node = Arc::make_mut(node);
                let hi = get_bit64(key, node.pos_diff);
                return insert(node.child_mut(hi), key, value);
            }
        }
    }
    let leaf = Child::Leaf { key, value };
    *slot = branch(diff, leaf, key, slot.clone());
    trace!(pos_diff = diff, "split");
    None
}

enum Removal<V> {
    Absent,
    /// The leaf sits directly below this slot; its sibling takes the slot.
    Collapse { value: Arc<V>, sibling: Child<V> },
    Descend(bool),
}

fn remove<V>(slot: &mut Child<V>, key: u64) -> Option<Arc<V>> {
    let step = match &*slot {
        Child::Leaf { .. } => Removal::Absent,
        Child::Inner { prefix, node } => {
            if key & high_bits_mask(node.pos_diff) != *prefix {
                Removal::Absent
            } else {
                let hi = get_bit64(key, node.pos_diff);
                match node.child(hi) {
                    Child::Leaf { key: k, value } if *k == key => Removal::Collapse {
                        value: Arc::clone(value),
                        sibling: node.child(!hi).clone(),
                    },
                    Child::Leaf { .. } => Removal::Absent,
                    Child::Inner { .. } => Removal::Descend(hi),
                }
            }
        }
    };
    match step {
        Removal::Absent => None,
        Removal::Collapse { value, sibling } => {
            *slot = sibling;
            trace!(key, "collapsed node");
            Some(value)
        }
        Removal::Descend(hi) => {
            let Child::Inner { node, .. } = slot else {
                unreachable!("descent only through inner nodes");
            };
            remove(Arc::make_mut(node).child_mut(hi), key)
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// An immutable version of a [`CritBit64Cow`].
///
/// Later writes to the tree are not visible through a snapshot taken before
/// them.
pub struct CowSnapshot<V> {
    root: Option<Child<V>>,
    size: usize,
}

impl<V> Clone for CowSnapshot<V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            size: self.size,
        }
    }
}

impl<V> CowSnapshot<V> {
    fn empty() -> Self {
        Self {
            root: None,
            size: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn find(&self, key: u64) -> Option<&Arc<V>> {
        let mut child = self.root.as_ref()?;
        loop {
            match child {
                Child::Leaf { key: k, value } => return (*k == key).then_some(value),
                Child::Inner { prefix, node } => {
                    if key & high_bits_mask(node.pos_diff) != *prefix {
                        return None;
                    }
                    child = node.child(get_bit64(key, node.pos_diff));
                }
            }
        }
    }

    pub fn get(&self, key: u64) -> Option<&V> {
        self.find(key).map(|v| &**v)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.find(key).is_some()
    }

    /// All entries in ascending key order.
    pub fn iter(&self) -> CowIter<V> {
        CowIter::new(self, Filter::All)
    }

    /// Entries with `min <= key <= max`.
    pub fn query(&self, min: u64, max: u64) -> CowIter<V> {
        CowIter::new(self, Filter::Range { min, max })
    }

    /// Entries with `((key | min) & max) == key`: every bit set in `min` is
    /// set in the key and every bit clear in `max` is clear in the key.
    pub fn query_with_mask(&self, min: u64, max: u64) -> CowIter<V> {
        CowIter::new(self, Filter::Mask { min, max })
    }

    /// Verify the structure. Violations are logged at `warn` level.
    pub fn check_tree(&self) -> bool {
        let leaves = match &self.root {
            None => 0,
            Some(root) => match check_child(root, None) {
                Some(n) => n,
                None => return false,
            },
        };
        if leaves != self.size {
            warn!(leaves, size = self.size, "reachable leaf count differs from size");
            return false;
        }
        true
    }
}

/// Counts the leaves below `child`. `parent` is the enclosing node's prefix,
/// `pos_diff` and the side `child` hangs on.
fn check_child<V>(child: &Child<V>, parent: Option<(u64, u32, bool)>) -> Option<usize> {
    let (key, bits) = representative(child);
    if let Child::Inner { prefix, node } = child {
        if node.pos_diff > 63 || *prefix & !high_bits_mask(node.pos_diff) != 0 {
            warn!(pos_diff = node.pos_diff, "prefix with stray bits detected");
            return None;
        }
    }
    if let Some((parent_prefix, parent_diff, side)) = parent {
        if bits <= parent_diff {
            warn!(pos_diff = bits, parent_diff, "child does not descend");
            return None;
        }
        if key & high_bits_mask(parent_diff) != parent_prefix
            || get_bit64(key, parent_diff) != side
        {
            warn!(key, parent_diff, side, "child on the wrong side of its node");
            return None;
        }
    }
    match child {
        Child::Leaf { .. } => Some(1),
        Child::Inner { prefix, node } => {
            let lo = check_child(&node.lo, Some((*prefix, node.pos_diff, false)))?;
            let hi = check_child(&node.hi, Some((*prefix, node.pos_diff, true)))?;
            Some(lo + hi)
        }
    }
}

fn fmt_child<V: fmt::Debug>(child: &Child<V>, f: &mut fmt::Formatter<'_>, level: &str) -> fmt::Result {
    match child {
        Child::Leaf { key, value } => writeln!(f, "{level} {} v={value:?}", to_binary(*key, 64)),
        Child::Inner { prefix, node } => {
            writeln!(f, "{level}n: {} {}", node.pos_diff, to_binary(*prefix, 64))?;
            let deeper = format!("{level}-");
            fmt_child(&node.lo, f, &deeper)?;
            fmt_child(&node.hi, f, &deeper)
        }
    }
}

impl<V: fmt::Debug> fmt::Display for CowSnapshot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            None => writeln!(f, "- -"),
            Some(root) => fmt_child(root, f, ""),
        }
    }
}

// =============================================================================
// Iteration
// =============================================================================

#[derive(Clone, Copy)]
enum Filter {
    All,
    Range { min: u64, max: u64 },
    Mask { min: u64, max: u64 },
}

impl Filter {
    /// Whether some key with the given leading bits can match.
    fn admits_prefix(self, prefix: u64, pos_diff: u32) -> bool {
        match self {
            Filter::All => true,
            Filter::Range { min, max } => {
                prefix <= max && (prefix | low_bits_mask(64 - pos_diff)) >= min
            }
            Filter::Mask { min, max } => {
                (((prefix | min) & max) ^ prefix) & high_bits_mask(pos_diff) == 0
            }
        }
    }

    fn admits_key(self, key: u64) -> bool {
        match self {
            Filter::All => true,
            Filter::Range { min, max } => min <= key && key <= max,
            Filter::Mask { min, max } => (key | min) & max == key,
        }
    }
}

/// Entries of a [`CowSnapshot`] in ascending key order.
///
/// The iterator keeps the nodes it still has to visit alive on its own, so
/// it stays valid while the tree is modified.
pub struct CowIter<V> {
    stack: Vec<Child<V>>,
    filter: Filter,
}

impl<V> CowIter<V> {
    fn new(snapshot: &CowSnapshot<V>, filter: Filter) -> Self {
        Self {
            stack: snapshot.root.iter().cloned().collect(),
            filter,
        }
    }
}

impl<V> Iterator for CowIter<V> {
    type Item = (u64, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(child) = self.stack.pop() {
            match child {
                Child::Leaf { key, value } => {
                    if self.filter.admits_key(key) {
                        return Some((key, value));
                    }
                }
                Child::Inner { prefix, node } => {
                    if self.filter.admits_prefix(prefix, node.pos_diff) {
                        self.stack.push(node.hi.clone());
                        self.stack.push(node.lo.clone());
                    }
                }
            }
        }
        None
    }
}

impl<V> FusedIterator for CowIter<V> {}

// =============================================================================
// CritBit64Cow
// =============================================================================

/// Concurrent crit-bit tree over `u64` keys.
///
/// Reads never block and see either the whole effect of a write or none of
/// it. Writes are serialized.
///
/// Replaced versions are reclaimed by the epoch collector, which may drop
/// them on any thread at any later time. Values must therefore be
/// `Send + Sync + 'static`; a value type like `Rc` is rejected:
///
/// ```compile_fail
/// use std::rc::Rc;
///
/// let tree = critbit::CritBit64Cow::new();
/// tree.put(1, Rc::new(1u32));
/// ```
///
/// ```compile_fail
/// let local = String::from("borrowed");
/// let tree = critbit::CritBit64Cow::new();
/// tree.put(1, local.as_str());
/// drop(local);
/// ```
pub struct CritBit64Cow<V: Send + Sync + 'static> {
    current: Atomic<CowSnapshot<V>>,
    writer: Mutex<()>,
}

impl<V: Send + Sync + 'static> CritBit64Cow<V> {
    pub fn new() -> Self {
        Self::from_snapshot(CowSnapshot::empty())
    }

    fn from_snapshot(snapshot: CowSnapshot<V>) -> Self {
        Self {
            current: Atomic::new(snapshot),
            writer: Mutex::new(()),
        }
    }

    /// The current version of the tree.
    pub fn snapshot(&self) -> CowSnapshot<V> {
        let guard = &epoch::pin();
        let current = self.current.load(Ordering::Acquire, guard);
        // SAFETY: the pointer is never null and is only reclaimed after every
        // guard pinned before its replacement is dropped.
        unsafe { current.deref() }.clone()
    }

    /// Replace the current version. Must be called with `writer` held.
    fn publish(&self, snapshot: CowSnapshot<V>) {
        let guard = &epoch::pin();
        let size = snapshot.size;
        let old = self.current.swap(Owned::new(snapshot), Ordering::AcqRel, guard);
        // SAFETY: `old` is unreachable from `current` now; readers that loaded
        // it are pinned and keep it alive until they unpin.
        unsafe { guard.defer_destroy(old) };
        trace!(size, "published snapshot");
    }

    /// Insert or replace. Returns the previous value of `key`.
    pub fn put(&self, key: u64, value: V) -> Option<Arc<V>> {
        let _writer = self.writer.lock();
        let mut next = self.snapshot();
        let value = Arc::new(value);
        let previous = match &mut next.root {
            None => {
                next.root = Some(Child::Leaf { key, value });
                None
            }
            Some(root) => insert(root, key, value),
        };
        if previous.is_none() {
            next.size += 1;
        }
        self.publish(next);
        previous
    }

    /// Remove `key`, returning its value. A missing key leaves the tree
    /// version untouched.
    pub fn remove(&self, key: u64) -> Option<Arc<V>> {
        let _writer = self.writer.lock();
        let mut next = self.snapshot();
        let removed = match &mut next.root {
            None => None,
            Some(Child::Leaf { key: k, value }) if *k == key => {
                let value = Arc::clone(value);
                next.root = None;
                Some(value)
            }
            Some(root) => remove(root, key),
        };
        if removed.is_some() {
            next.size -= 1;
            self.publish(next);
        }
        removed
    }

    pub fn get(&self, key: u64) -> Option<Arc<V>> {
        self.snapshot().find(key).cloned()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.snapshot().contains(key)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> CowIter<V> {
        self.snapshot().iter()
    }

    pub fn query(&self, min: u64, max: u64) -> CowIter<V> {
        self.snapshot().query(min, max)
    }

    pub fn query_with_mask(&self, min: u64, max: u64) -> CowIter<V> {
        self.snapshot().query_with_mask(min, max)
    }

    pub fn check_tree(&self) -> bool {
        self.snapshot().check_tree()
    }
}

impl<V: Send + Sync + 'static> Default for CritBit64Cow<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// An independent tree starting from the current version; nodes are shared
/// until either side writes.
impl<V: Send + Sync + 'static> Clone for CritBit64Cow<V> {
    fn clone(&self) -> Self {
        Self::from_snapshot(self.snapshot())
    }
}

impl<V: Send + Sync + 'static> Drop for CritBit64Cow<V> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent readers of this pointer;
        // retired versions were handed to the collector in `publish`.
        unsafe {
            let current = self.current.load(Ordering::Relaxed, epoch::unprotected());
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}

impl<V: Send + Sync + 'static + fmt::Debug> fmt::Display for CritBit64Cow<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.snapshot(), f)
    }
}

impl<V: Send + Sync + 'static + fmt::Debug> fmt::Debug for CritBit64Cow<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
