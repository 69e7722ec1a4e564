//! Position-ordered index: a weight-augmented splay tree over arena slots.
//!
//! The tree never owns nodes. Each slot of the node arena has a matching
//! `Link` record here holding the tree pointers, the node's live length, and
//! the subtree weight. In-order traversal yields document order.
//!
//! Invariant: `weight(x) == len(x) + weight(left(x)) + weight(right(x))` for
//! every linked slot, restored at the end of every public mutation.

use seqcrdt_core::NodeIdx;
use std::cell::Cell;

#[derive(Clone, Copy, Debug, Default)]
struct Link {
    parent: Option<NodeIdx>,
    left: Option<NodeIdx>,
    right: Option<NodeIdx>,
    len: usize,
    weight: usize,
    linked: bool,
}

/// Splay tree keyed implicitly by document order.
///
/// Lookups restructure the tree, so links and root live in `Cell`s and
/// `find` / `index_of` splay through a shared reference.
#[derive(Clone, Debug, Default)]
pub struct SplayTree {
    links: Vec<Cell<Link>>,
    root: Cell<Option<NodeIdx>>,
}

impl SplayTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeIdx> {
        self.root.get()
    }

    /// Total live length.
    pub fn weight(&self) -> usize {
        self.subtree_weight(self.root.get())
    }

    pub fn contains(&self, idx: NodeIdx) -> bool {
        self.links.get(idx.index()).map_or(false, |l| l.get().linked)
    }

    /// Live length recorded for `idx`.
    pub fn len_of(&self, idx: NodeIdx) -> usize {
        self.link(idx).len
    }

    /// Link the first node of an empty tree.
    pub fn insert_first(&mut self, idx: NodeIdx, len: usize) {
        debug_assert!(self.root.get().is_none());
        self.reset(idx, len);
        self.root.set(Some(idx));
    }

    /// Link `idx` immediately after `target` in document order.
    pub fn insert_after(&mut self, target: NodeIdx, idx: NodeIdx, len: usize) {
        self.reset(idx, len);
        self.splay(target);

        let right = self.link(target).right;
        self.modify(target, |l| l.right = None);
        self.update_weight(target);

        self.modify(idx, |l| {
            l.left = Some(target);
            l.right = right;
        });
        self.modify(target, |l| l.parent = Some(idx));
        if let Some(r) = right {
            self.modify(r, |l| l.parent = Some(idx));
        }
        self.root.set(Some(idx));
        self.update_weight(idx);
    }

    /// Change the live length of `idx` (split or tombstone) and repair weights.
    pub fn set_len(&mut self, idx: NodeIdx, len: usize) {
        self.splay(idx);
        self.modify(idx, |l| l.len = len);
        self.update_weight(idx);
    }

    /// Unlink `idx`, joining its subtrees.
    pub fn delete(&mut self, idx: NodeIdx) {
        if !self.contains(idx) {
            return;
        }
        self.splay(idx);
        let Link { left, right, .. } = self.link(idx);
        self.links[idx.index()].set(Link::default());

        match left {
            None => {
                self.root.set(right);
                if let Some(r) = right {
                    self.modify(r, |l| l.parent = None);
                }
            }
            Some(left) => {
                self.modify(left, |l| l.parent = None);
                self.root.set(Some(left));
                let max = self.rightmost(left);
                self.splay(max);
                self.modify(max, |l| l.right = right);
                if let Some(r) = right {
                    self.modify(r, |l| l.parent = Some(max));
                }
                self.update_weight(max);
            }
        }
    }

    /// Node holding document index `pos`, with the offset inside it. The
    /// found node is splayed to the root.
    ///
    /// `pos == 0` resolves to the leftmost slot. Any other position resolves to
    /// the first node whose cumulative weight reaches `pos`, which is never a
    /// zero-length node.
    pub fn find(&self, mut pos: usize) -> Option<(NodeIdx, usize)> {
        let mut node = self.root.get()?;
        loop {
            let link = self.link(node);
            let left_weight = self.subtree_weight(link.left);
            if let Some(left) = link.left {
                if pos <= left_weight {
                    node = left;
                    continue;
                }
            }
            if pos > left_weight + link.len {
                pos -= left_weight + link.len;
                node = link.right?;
                continue;
            }
            self.splay(node);
            return Some((node, pos - left_weight));
        }
    }

    /// Document index at which `idx` starts. Splays `idx` to the root.
    pub fn index_of(&self, idx: NodeIdx) -> usize {
        self.splay(idx);
        self.subtree_weight(self.link(idx).left)
    }

    /// Bring `idx` to the root.
    pub fn splay(&self, idx: NodeIdx) {
        while let Some(parent) = self.link(idx).parent {
            if let Some(grand) = self.link(parent).parent {
                let zig_zig = (self.link(grand).left == Some(parent))
                    == (self.link(parent).left == Some(idx));
                if zig_zig {
                    self.rotate(parent);
                } else {
                    self.rotate(idx);
                }
            }
            self.rotate(idx);
        }
    }

    /// Slots in document order.
    pub fn in_order(&self) -> Vec<NodeIdx> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        let mut cur = self.root.get();
        while cur.is_some() || !stack.is_empty() {
            while let Some(node) = cur {
                stack.push(node);
                cur = self.link(node).left;
            }
            if let Some(node) = stack.pop() {
                out.push(node);
                cur = self.link(node).right;
            }
        }
        out
    }

    /// Recompute every subtree weight from scratch and compare with the
    /// stored one.
    pub fn check_weights(&self) -> bool {
        fn walk(tree: &SplayTree, node: Option<NodeIdx>, ok: &mut bool) -> usize {
            let Some(node) = node else { return 0 };
            let link = tree.link(node);
            let expected = link.len + walk(tree, link.left, ok) + walk(tree, link.right, ok);
            if expected != link.weight {
                *ok = false;
            }
            expected
        }
        let mut ok = true;
        walk(self, self.root.get(), &mut ok);
        ok
    }

    fn rotate(&self, x: NodeIdx) {
        let Some(p) = self.link(x).parent else { return };
        let g = self.link(p).parent;

        if self.link(p).left == Some(x) {
            let b = self.link(x).right;
            self.modify(p, |l| l.left = b);
            if let Some(b) = b {
                self.modify(b, |l| l.parent = Some(p));
            }
            self.modify(x, |l| l.right = Some(p));
        } else {
            let b = self.link(x).left;
            self.modify(p, |l| l.right = b);
            if let Some(b) = b {
                self.modify(b, |l| l.parent = Some(p));
            }
            self.modify(x, |l| l.left = Some(p));
        }
        self.modify(p, |l| l.parent = Some(x));
        self.modify(x, |l| l.parent = g);

        match g {
            Some(g) => {
                if self.link(g).left == Some(p) {
                    self.modify(g, |l| l.left = Some(x));
                } else {
                    self.modify(g, |l| l.right = Some(x));
                }
            }
            None => self.root.set(Some(x)),
        }
        self.update_weight(p);
        self.update_weight(x);
    }

    fn rightmost(&self, mut node: NodeIdx) -> NodeIdx {
        while let Some(r) = self.link(node).right {
            node = r;
        }
        node
    }

    fn update_weight(&self, idx: NodeIdx) {
        let link = self.link(idx);
        let weight = link.len + self.subtree_weight(link.left) + self.subtree_weight(link.right);
        self.modify(idx, |l| l.weight = weight);
    }

    fn subtree_weight(&self, node: Option<NodeIdx>) -> usize {
        node.map_or(0, |n| self.link(n).weight)
    }

    fn reset(&mut self, idx: NodeIdx, len: usize) {
        if self.links.len() <= idx.index() {
            self.links.resize_with(idx.index() + 1, Cell::default);
        }
        self.links[idx.index()].set(Link {
            parent: None,
            left: None,
            right: None,
            len,
            weight: len,
            linked: true,
        });
    }

    fn link(&self, idx: NodeIdx) -> Link {
        self.links[idx.index()].get()
    }

    fn modify(&self, idx: NodeIdx, f: impl FnOnce(&mut Link)) {
        let cell = &self.links[idx.index()];
        let mut link = cell.get();
        f(&mut link);
        cell.set(link);
    }
}
