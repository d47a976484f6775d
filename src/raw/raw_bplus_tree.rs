use smallvec::SmallVec;
use tracing::trace;

use crate::degree::Degree;
use crate::error::{Error, Result};

use super::arena::{Arena, Handle};
use super::node::{InternalNode, LeafNode, Node, SearchResult};

/// The core B+Tree implementation backing `BPlusTree`.
pub(crate) struct RawBPlusTree<K, V> {
    /// Arena owning every node of the tree.
    nodes: Arena<Node<K, V>>,
    /// Handle to the root node, if the tree is non-empty.
    root: Option<Handle>,
    /// Fan-out limits shared by every node.
    degree: Degree,
    /// Total number of key-value pairs in the tree.
    len: usize,
}

/// Path element for tracking traversal during mutations.
#[derive(Clone, Copy, Debug)]
struct PathElement {
    /// Handle to the internal node at this level.
    node: Handle,
    /// Index of the child we descended into.
    child_index: usize,
}

/// Ancestors of the current node, root first.
type Path = SmallVec<[PathElement; 16]>;

impl<K, V> RawBPlusTree<K, V> {
    /// Creates a new, empty tree.
    pub(crate) const fn new(degree: Degree) -> Self {
        Self {
            nodes: Arena::new(),
            root: None,
            degree,
            len: 0,
        }
    }

    /// Wraps nodes that were assembled elsewhere (the decoder).
    pub(crate) fn from_parts(degree: Degree, nodes: Arena<Node<K, V>>, root: Option<Handle>, len: usize) -> Self {
        Self {
            nodes,
            root,
            degree,
            len,
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub(crate) const fn degree(&self) -> Degree {
        self.degree
    }

    /// Changes the degree; only an empty tree may change it.
    pub(crate) fn set_degree(&mut self, degree: Degree) -> Result<()> {
        if self.root.is_some() {
            return Err(Error::DegreeChangeRejected);
        }
        self.degree = degree;
        Ok(())
    }

    pub(crate) fn root(&self) -> Option<Handle> {
        self.root
    }

    pub(crate) fn node(&self, handle: Handle) -> &Node<K, V> {
        self.nodes.get(handle)
    }

    /// Drops every node. The degree is kept.
    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.len = 0;
    }

    /// Number of levels from the root down to the leaves.
    pub(crate) fn height(&self) -> usize {
        let Some(mut current) = self.root else {
            return 0;
        };
        let mut height = 1;
        while let Node::Internal(internal) = self.nodes.get(current) {
            current = internal.child(0);
            height += 1;
        }
        height
    }

    fn leftmost_leaf(&self) -> Option<Handle> {
        let mut current = self.root?;
        while let Node::Internal(internal) = self.nodes.get(current) {
            current = internal.child(0);
        }
        Some(current)
    }

    /// Collects every record by walking the leaf chain.
    pub(crate) fn entries(&self) -> Vec<(&K, &V)> {
        let mut entries = Vec::with_capacity(self.len);
        let mut current = self.leftmost_leaf();
        while let Some(handle) = current {
            let leaf = self.nodes.get(handle).as_leaf();
            entries.extend(leaf.keys().iter().zip(leaf.values()));
            current = leaf.next();
        }
        entries
    }
}

impl<K: Ord, V> RawBPlusTree<K, V> {
    /// Walks the leaf chain from the leftmost leaf and checks that keys are
    /// strictly ascending within and across leaves.
    pub(crate) fn verify(&self) -> bool {
        let mut previous: Option<&K> = None;
        let mut current = self.leftmost_leaf();
        while let Some(handle) = current {
            let leaf = self.nodes.get(handle).as_leaf();
            for key in leaf.keys() {
                if previous.is_some_and(|previous| previous >= key) {
                    return false;
                }
                previous = Some(key);
            }
            current = leaf.next();
        }
        true
    }

    /// Descends to the leaf whose key range covers `key`.
    fn find_leaf(&self, key: &K) -> Option<Handle> {
        let mut current = self.root?;
        while let Node::Internal(internal) = self.nodes.get(current) {
            current = internal.child(internal.search_child(key));
        }
        Some(current)
    }

    /// Like `find_leaf`, but records every internal node passed on the way down.
    fn locate(&self, key: &K) -> Option<(Handle, Path)> {
        let mut path: Path = SmallVec::new();
        let mut current = self.root?;
        while let Node::Internal(internal) = self.nodes.get(current) {
            let child_index = internal.search_child(key);
            path.push(PathElement {
                node: current,
                child_index,
            });
            current = internal.child(child_index);
        }
        Some((current, path))
    }

    pub(crate) fn search(&self, key: &K) -> Result<&V> {
        let leaf_handle = self.find_leaf(key).ok_or(Error::EmptyTree)?;
        let leaf = self.nodes.get(leaf_handle).as_leaf();
        match leaf.search(key) {
            SearchResult::Found(idx) => Ok(leaf.value(idx)),
            SearchResult::NotFound(_) => Err(Error::NotFound),
        }
    }

    pub(crate) fn search_mut(&mut self, key: &K) -> Result<&mut V> {
        let leaf_handle = self.find_leaf(key).ok_or(Error::EmptyTree)?;
        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        match leaf.search(key) {
            SearchResult::Found(idx) => Ok(leaf.value_mut(idx)),
            SearchResult::NotFound(_) => Err(Error::NotFound),
        }
    }
}

impl<K: Ord + Clone, V> RawBPlusTree<K, V> {
    /// Inserts a key-value pair. Returns false if the key was already present,
    /// in which case only its value is replaced.
    pub(crate) fn insert(&mut self, key: K, value: V) -> bool {
        let Some((leaf_handle, mut path)) = self.locate(&key) else {
            let root = self.nodes.alloc(Node::Leaf(LeafNode::singleton(key, value)));
            self.root = Some(root);
            self.len = 1;
            return true;
        };

        let degree = self.degree;
        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        match leaf.search(&key) {
            SearchResult::Found(idx) => {
                *leaf.value_mut(idx) = value;
                false
            }
            SearchResult::NotFound(idx) => {
                leaf.insert(idx, key, value);
                self.len += 1;
                if leaf.is_overflowing(degree) {
                    self.split_leaf_and_propagate(leaf_handle, &mut path);
                }
                true
            }
        }
    }

    /// Splits a full leaf and propagates splits up the tree as needed.
    fn split_leaf_and_propagate(&mut self, leaf_handle: Handle, path: &mut Path) {
        let at = self.degree.leaf_split_point();
        let right = self.nodes.get_mut(leaf_handle).as_leaf_mut().split(at);
        let separator = right.first_key().expect("split produced an empty right leaf").clone();

        let right_handle = self.nodes.alloc(Node::Leaf(right));
        self.nodes.get_mut(leaf_handle).as_leaf_mut().set_next(Some(right_handle));
        trace!(target: "bplus_index::split", left = ?leaf_handle, right = ?right_handle, "split leaf");

        self.propagate_split(path, separator, right_handle);
    }

    /// Inserts `(separator, new_child)` into each ancestor in turn until one
    /// absorbs it without overflowing, growing a new root if none does.
    fn propagate_split(&mut self, path: &mut Path, mut separator: K, mut new_child: Handle) {
        let degree = self.degree;

        while let Some(elem) = path.pop() {
            let parent = self.nodes.get_mut(elem.node).as_internal_mut();
            parent.insert_child(elem.child_index, separator, new_child);
            if !parent.is_overflowing(degree) {
                return;
            }

            let (median, right) = parent.split();
            let right_handle = self.nodes.alloc(Node::Internal(right));
            trace!(target: "bplus_index::split", left = ?elem.node, right = ?right_handle, "split internal node");

            separator = median;
            new_child = right_handle;
        }

        let old_root = self.root.expect("`RawBPlusTree::propagate_split()` - tree has no root!");
        let new_root = self.nodes.alloc(Node::Internal(InternalNode::new_root(old_root, separator, new_child)));
        self.root = Some(new_root);
        trace!(target: "bplus_index::split", root = ?new_root, "grew a new root");
    }

    /// Removes a key from the tree and returns its value.
    pub(crate) fn delete(&mut self, key: &K) -> Result<V> {
        let (leaf_handle, mut path) = self.locate(key).ok_or(Error::EmptyTree)?;

        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        let SearchResult::Found(idx) = leaf.search(key) else {
            return Err(Error::NotFound);
        };
        let (_, value) = leaf.remove(idx);
        self.len -= 1;

        if path.is_empty() {
            // The leaf is the root; there is nothing to rebalance against.
            if leaf.is_empty() {
                self.nodes.clear();
                self.root = None;
            }
            return Ok(value);
        }

        let emptied = leaf.is_empty();
        let underflowing = leaf.is_underflowing(self.degree);

        // An empty leaf has no minimum to publish yet; borrow or merge will provide one.
        if idx == 0 && !emptied {
            self.repair_separator(leaf_handle, &path);
        }
        if underflowing {
            self.rebalance_leaf(leaf_handle, &mut path);
        }

        Ok(value)
    }

    /// Publishes a leaf's new minimum key to the one ancestor that stores it.
    ///
    /// Climbs while the path arrived through child 0; the first ancestor entered
    /// through child `c > 0` keeps the minimum as `keys[c - 1]`. If every level was
    /// child 0 the leaf holds the global minimum, which has no separator.
    fn repair_separator(&mut self, leaf_handle: Handle, path: &Path) {
        let Some(min) = self.nodes.get(leaf_handle).as_leaf().first_key().cloned() else {
            return;
        };
        if let Some(elem) = path.iter().rev().find(|elem| elem.child_index > 0) {
            self.nodes.get_mut(elem.node).as_internal_mut().set_key(elem.child_index - 1, min);
        }
    }

    /// Rebalances a leaf after a removal caused it to underflow.
    fn rebalance_leaf(&mut self, leaf_handle: Handle, path: &mut Path) {
        let PathElement {
            node: parent_handle,
            child_index: idx,
        } = *path.last().expect("`RawBPlusTree::rebalance_leaf()` - leaf has no parent!");
        let degree = self.degree;

        let parent = self.nodes.get(parent_handle).as_internal();
        let left = (idx > 0).then(|| parent.child(idx - 1));
        let right = (idx < parent.key_count()).then(|| parent.child(idx + 1));

        if let Some(left) = left
            && self.nodes.get(left).as_leaf().can_lend(degree)
        {
            self.borrow_from_left_leaf(leaf_handle, left, parent_handle, idx);
            return;
        }

        if let Some(right) = right
            && self.nodes.get(right).as_leaf().can_lend(degree)
        {
            self.borrow_from_right_leaf(leaf_handle, right, parent_handle, idx, path);
            return;
        }

        // Must merge: fold this leaf into its left sibling, or absorb the right one.
        let survivor = if let Some(left) = left {
            self.merge_leaves(left, leaf_handle, parent_handle, idx - 1);
            left
        } else {
            let right = right.expect("`RawBPlusTree::rebalance_leaf()` - leaf has no siblings!");
            let was_empty = self.nodes.get(leaf_handle).as_leaf().is_empty();
            self.merge_leaves(leaf_handle, right, parent_handle, idx);
            if was_empty {
                self.repair_separator(leaf_handle, path);
            }
            leaf_handle
        };

        self.finish_merge(survivor, path);
    }

    /// Moves the left sibling's last record to the front of the leaf.
    fn borrow_from_left_leaf(&mut self, leaf_handle: Handle, left_handle: Handle, parent_handle: Handle, idx: usize) {
        let (key, value) = self.nodes.get_mut(left_handle).as_leaf_mut().pop();
        let separator = key.clone();
        self.nodes.get_mut(leaf_handle).as_leaf_mut().push_front(key, value);
        self.nodes.get_mut(parent_handle).as_internal_mut().set_key(idx - 1, separator);
        trace!(target: "bplus_index::merge", from = ?left_handle, to = ?leaf_handle, "borrowed from left leaf");
    }

    /// Moves the right sibling's first record to the end of the leaf.
    fn borrow_from_right_leaf(
        &mut self,
        leaf_handle: Handle,
        right_handle: Handle,
        parent_handle: Handle,
        idx: usize,
        path: &Path,
    ) {
        let right = self.nodes.get_mut(right_handle).as_leaf_mut();
        let (key, value) = right.pop_front();
        let right_min = right.first_key().expect("lending leaf was left empty").clone();

        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        let was_empty = leaf.is_empty();
        leaf.push(key, value);

        self.nodes.get_mut(parent_handle).as_internal_mut().set_key(idx, right_min);
        if was_empty {
            self.repair_separator(leaf_handle, path);
        }
        trace!(target: "bplus_index::merge", from = ?right_handle, to = ?leaf_handle, "borrowed from right leaf");
    }

    /// Folds `right` into `left` and drops the separator between them.
    fn merge_leaves(&mut self, left_handle: Handle, right_handle: Handle, parent_handle: Handle, separator_idx: usize) {
        let right = self.nodes.take(right_handle).into_leaf();
        // `left` inherits `right`'s next link here, so no leaf is left pointing at the released slot.
        self.nodes.get_mut(left_handle).as_leaf_mut().merge_with_right(right);

        let (_, removed) = self.nodes.get_mut(parent_handle).as_internal_mut().remove_child(separator_idx);
        debug_assert_eq!(removed, right_handle);
        trace!(target: "bplus_index::merge", survivor = ?left_handle, removed = ?right_handle, "merged leaves");
    }

    /// Handles the parent after one of its children absorbed a sibling: collapse
    /// an emptied root, or rebalance an underflowing internal node.
    fn finish_merge(&mut self, survivor: Handle, path: &mut Path) {
        let parent_handle = path.pop().expect("`RawBPlusTree::finish_merge()` - merged node has no parent!").node;
        let parent = self.nodes.get(parent_handle).as_internal();

        if path.is_empty() {
            if parent.key_count() == 0 {
                debug_assert_eq!(parent.child(0), survivor);
                self.nodes.free(parent_handle);
                self.root = Some(survivor);
                trace!(target: "bplus_index::merge", root = ?survivor, "collapsed root");
            }
        } else if parent.is_underflowing(self.degree) {
            self.rebalance_internal(parent_handle, path);
        }
    }

    /// Rebalances an internal node that lost a child to a merge.
    fn rebalance_internal(&mut self, node_handle: Handle, path: &mut Path) {
        let PathElement {
            node: parent_handle,
            child_index: idx,
        } = *path.last().expect("`RawBPlusTree::rebalance_internal()` - node has no parent!");
        let degree = self.degree;

        let parent = self.nodes.get(parent_handle).as_internal();
        let left = (idx > 0).then(|| parent.child(idx - 1));
        let right = (idx < parent.key_count()).then(|| parent.child(idx + 1));

        if let Some(left) = left
            && self.nodes.get(left).as_internal().can_lend(degree)
        {
            self.borrow_from_left_internal(node_handle, left, parent_handle, idx);
            return;
        }

        if let Some(right) = right
            && self.nodes.get(right).as_internal().can_lend(degree)
        {
            self.borrow_from_right_internal(node_handle, right, parent_handle, idx);
            return;
        }

        let survivor = if let Some(left) = left {
            self.merge_internals(left, node_handle, parent_handle, idx - 1);
            left
        } else {
            let right = right.expect("`RawBPlusTree::rebalance_internal()` - node has no siblings!");
            self.merge_internals(node_handle, right, parent_handle, idx);
            node_handle
        };

        self.finish_merge(survivor, path);
    }

    /// Rotates right: the parent separator comes down as the node's first key,
    /// the left sibling's last child moves across, and its last key goes up.
    fn borrow_from_left_internal(&mut self, node_handle: Handle, left_handle: Handle, parent_handle: Handle, idx: usize) {
        let parent_separator = self.nodes.get(parent_handle).as_internal().key(idx - 1).clone();
        let (left_key, left_child) = self.nodes.get_mut(left_handle).as_internal_mut().pop_child();

        self.nodes
            .get_mut(node_handle)
            .as_internal_mut()
            .push_child_front(left_child, parent_separator);
        self.nodes.get_mut(parent_handle).as_internal_mut().set_key(idx - 1, left_key);
        trace!(target: "bplus_index::merge", from = ?left_handle, to = ?node_handle, "borrowed from left internal node");
    }

    /// Rotates left: the mirror of `borrow_from_left_internal`.
    fn borrow_from_right_internal(
        &mut self,
        node_handle: Handle,
        right_handle: Handle,
        parent_handle: Handle,
        idx: usize,
    ) {
        let parent_separator = self.nodes.get(parent_handle).as_internal().key(idx).clone();
        let (right_child, right_key) = self.nodes.get_mut(right_handle).as_internal_mut().pop_child_front();

        self.nodes
            .get_mut(node_handle)
            .as_internal_mut()
            .push_child(parent_separator, right_child);
        self.nodes.get_mut(parent_handle).as_internal_mut().set_key(idx, right_key);
        trace!(target: "bplus_index::merge", from = ?right_handle, to = ?node_handle, "borrowed from right internal node");
    }

    /// Folds internal node `right` into `left` around the parent separator.
    fn merge_internals(&mut self, left_handle: Handle, right_handle: Handle, parent_handle: Handle, separator_idx: usize) {
        let right = self.nodes.take(right_handle).into_internal();
        let (separator, removed) = self.nodes.get_mut(parent_handle).as_internal_mut().remove_child(separator_idx);
        debug_assert_eq!(removed, right_handle);

        self.nodes.get_mut(left_handle).as_internal_mut().merge_with_right(separator, right);
        trace!(target: "bplus_index::merge", survivor = ?left_handle, removed = ?right_handle, "merged internal nodes");
    }
}
