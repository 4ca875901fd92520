//! Depth-first traversal shared by every iterator of [`CritBit`].
//!
//! The walker keeps a single prefix buffer that always holds the bits fixed
//! along the current path. Each time it fixes a run of bits (a node infix,
//! a branch bit, a leaf postfix) it asks a [`Prune`] whether the subtree below
//! can still contain a match.

use smallvec::smallvec;

use super::{read_infix, read_postfix, CritBit, NodeId, Prefix, Root, Slot};
use crate::bit_tools::set_bit;

pub(crate) trait Prune {
    /// Per-path state, saved on the stack for every visited node.
    type State: Copy;

    fn root_state(&self) -> Self::State;

    /// Bits `[from, to)` of `prefix` have just been fixed. Returns `None` if no
    /// key with this prefix can match.
    fn admit(&mut self, prefix: &[u64], from: u32, to: u32, state: Self::State)
        -> Option<Self::State>;
}

/// Admits everything.
pub(crate) struct Unbounded;

impl Prune for Unbounded {
    type State = ();

    #[inline]
    fn root_state(&self) {}

    #[inline]
    fn admit(&mut self, _: &[u64], _: u32, _: u32, _: ()) -> Option<()> {
        Some(())
    }
}

#[derive(Clone, Copy)]
struct Frame<S> {
    node: NodeId,
    /// `false` until the lower child has been handed out.
    upper: bool,
    state: S,
}

pub(crate) struct Walker<'a, V, P: Prune> {
    tree: &'a CritBit<V>,
    pub(crate) prune: P,
    stack: Vec<Frame<P::State>>,
    prefix: Prefix,
    single_pending: bool,
}

impl<'a, V, P: Prune> Walker<'a, V, P> {
    pub(crate) fn new(tree: &'a CritBit<V>, prune: P) -> Self {
        let mut walker = Self {
            tree,
            prune,
            stack: Vec::new(),
            prefix: smallvec![0; tree.words],
            single_pending: false,
        };
        walker.restart();
        walker
    }

    pub(crate) fn restart(&mut self) {
        self.stack.clear();
        self.single_pending = false;
        let tree = self.tree;
        match &tree.root {
            Root::Empty => {}
            Root::Single { .. } => self.single_pending = true,
            Root::Tree(id) => {
                let state = self.prune.root_state();
                self.enter(*id, state);
            }
        }
    }

    fn enter(&mut self, id: NodeId, state: P::State) {
        let tree = self.tree;
        let node = tree.nodes.get(id);
        read_infix(node, &mut self.prefix);
        if let Some(state) = self
            .prune
            .admit(&self.prefix, node.pos_first_bit, node.pos_diff, state)
        {
            self.stack.push(Frame {
                node: id,
                upper: false,
                state,
            });
        }
    }

    /// Advance to the next admitted leaf; its key is then in
    /// [`key`](Self::key).
    pub(crate) fn next_leaf(&mut self) -> Option<&'a V> {
        let tree = self.tree;
        if self.single_pending {
            self.single_pending = false;
            if let Root::Single { key, value } = &tree.root {
                self.prefix.copy_from_slice(key);
                let state = self.prune.root_state();
                if self.prune.admit(&self.prefix, 0, tree.key_bits, state).is_some() {
                    return Some(value);
                }
            }
            return None;
        }

        while let Some(frame) = self.stack.pop() {
            let node = tree.nodes.get(frame.node);
            if !frame.upper {
                self.stack.push(Frame {
                    upper: true,
                    ..frame
                });
            }
            set_bit(&mut self.prefix, node.pos_diff, frame.upper);
            let Some(state) =
                self.prune
                    .admit(&self.prefix, node.pos_diff, node.pos_diff + 1, frame.state)
            else {
                continue;
            };
            match node.child(frame.upper) {
                Slot::Leaf { postfix, value } => {
                    read_postfix(postfix, &mut self.prefix);
                    if self
                        .prune
                        .admit(&self.prefix, node.pos_diff + 1, tree.key_bits, state)
                        .is_some()
                    {
                        return Some(value);
                    }
                }
                Slot::Subtree(child) => self.enter(*child, state),
            }
        }
        None
    }

    #[inline]
    pub(crate) fn tree(&self) -> &'a CritBit<V> {
        self.tree
    }

    /// Key of the leaf last returned by [`next_leaf`](Self::next_leaf), in
    /// stored (interleaved) shape.
    #[inline]
    pub(crate) fn key(&self) -> &[u64] {
        &self.prefix
    }
}
