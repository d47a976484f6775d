use crate::degree::Degree;

use super::arena::Handle;

pub(crate) enum Node<K, V> {
    Internal(InternalNode<K>),
    Leaf(LeafNode<K, V>),
}

// B+Tree: internal nodes route only. keys[i] is the minimum key of children[i + 1].
pub(crate) struct InternalNode<K> {
    keys: Vec<K>,
    children: Vec<Handle>,
}

// B+Tree: leaves hold the records and the link to the next leaf in key order.
pub(crate) struct LeafNode<K, V> {
    next: Option<Handle>,
    keys: Vec<K>,
    values: Vec<V>,
}

/// Result of searching for a key in a leaf.
pub(crate) enum SearchResult {
    /// Key was found at the given index.
    Found(usize),
    /// Key was not found; index is where it would be inserted.
    NotFound(usize),
}

impl<K, V> Node<K, V> {
    /// Returns the leaf node, panicking if this is not a leaf.
    pub(crate) fn as_leaf(&self) -> &LeafNode<K, V> {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("expected leaf node"),
        }
    }

    /// Returns the leaf node mutably, panicking if this is not a leaf.
    pub(crate) fn as_leaf_mut(&mut self) -> &mut LeafNode<K, V> {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("expected leaf node"),
        }
    }

    /// Returns the internal node, panicking if this is not internal.
    pub(crate) fn as_internal(&self) -> &InternalNode<K> {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("expected internal node"),
        }
    }

    /// Returns the internal node mutably, panicking if this is not internal.
    pub(crate) fn as_internal_mut(&mut self) -> &mut InternalNode<K> {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("expected internal node"),
        }
    }

    /// Unwraps a leaf that was moved out of the arena.
    pub(crate) fn into_leaf(self) -> LeafNode<K, V> {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("expected leaf node"),
        }
    }

    /// Unwraps an internal node that was moved out of the arena.
    pub(crate) fn into_internal(self) -> InternalNode<K> {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("expected internal node"),
        }
    }
}

impl<K> InternalNode<K> {
    /// Creates the root produced by splitting the old root.
    pub(crate) fn new_root(left: Handle, separator: K, right: Handle) -> Self {
        Self {
            keys: vec![separator],
            children: vec![left, right],
        }
    }

    /// Assembles a node from decoded parts.
    pub(crate) fn from_parts(keys: Vec<K>, children: Vec<Handle>) -> Self {
        debug_assert_eq!(keys.len() + 1, children.len());
        Self { keys, children }
    }

    /// Returns the number of separator keys in this node.
    pub(crate) fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Returns true once the node has reached the degree and must split.
    pub(crate) fn is_overflowing(&self, degree: Degree) -> bool {
        self.keys.len() >= degree.nonleaf_max()
    }

    /// Returns true if this non-root node is below minimum occupancy.
    pub(crate) fn is_underflowing(&self, degree: Degree) -> bool {
        self.keys.len() < degree.min_internal_keys()
    }

    /// Returns true if this node can give a key to a sibling and stay at minimum.
    pub(crate) fn can_lend(&self, degree: Degree) -> bool {
        self.keys.len() > degree.min_internal_keys()
    }

    #[inline]
    pub(crate) fn key(&self, index: usize) -> &K {
        &self.keys[index]
    }

    pub(crate) fn keys(&self) -> &[K] {
        &self.keys
    }

    #[inline]
    pub(crate) fn child(&self, index: usize) -> Handle {
        self.children[index]
    }

    pub(crate) fn children(&self) -> &[Handle] {
        &self.children
    }

    /// Index of the child whose subtree may hold `key`: the number of
    /// separators that are less than or equal to `key`.
    #[inline]
    pub(crate) fn search_child(&self, key: &K) -> usize
    where
        K: Ord,
    {
        self.keys.partition_point(|separator| separator <= key)
    }

    /// Inserts `child` directly right of the child at `index`, separated by `key`.
    pub(crate) fn insert_child(&mut self, index: usize, key: K, child: Handle) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, child);
    }

    /// Removes the separator at `index` and the child to its right.
    pub(crate) fn remove_child(&mut self, index: usize) -> (K, Handle) {
        let key = self.keys.remove(index);
        let child = self.children.remove(index + 1);
        (key, child)
    }

    /// Updates a separator key at the given index.
    pub(crate) fn set_key(&mut self, index: usize, key: K) {
        self.keys[index] = key;
    }

    /// Appends a separator and the child to its right.
    pub(crate) fn push_child(&mut self, key: K, child: Handle) {
        self.keys.push(key);
        self.children.push(child);
    }

    /// Prepends a child and the separator to its right.
    pub(crate) fn push_child_front(&mut self, child: Handle, key: K) {
        self.keys.insert(0, key);
        self.children.insert(0, child);
    }

    /// Pops the last separator and the last child.
    pub(crate) fn pop_child(&mut self) -> (K, Handle) {
        let key = self.keys.pop().expect("`InternalNode::pop_child()` - node has no keys!");
        let child = self.children.pop().expect("`InternalNode::pop_child()` - node has no children!");
        (key, child)
    }

    /// Pops the first child and the separator to its right.
    pub(crate) fn pop_child_front(&mut self) -> (Handle, K) {
        assert!(!self.keys.is_empty(), "`InternalNode::pop_child_front()` - node has no keys!");
        let child = self.children.remove(0);
        let key = self.keys.remove(0);
        (child, key)
    }

    /// Splits this node at the midpoint. Returns (`median_key`, `new_node`).
    /// The median moves up and is kept by neither half.
    pub(crate) fn split(&mut self) -> (K, InternalNode<K>) {
        let mid = self.keys.len() / 2;

        let right = InternalNode {
            keys: self.keys.split_off(mid + 1),
            children: self.children.split_off(mid + 1),
        };
        let median = self.keys.pop().expect("`InternalNode::split()` - node has no keys!");

        (median, right)
    }

    /// Merges with a right sibling, pulling the parent separator down between them.
    pub(crate) fn merge_with_right(&mut self, separator: K, mut right: InternalNode<K>) {
        self.keys.push(separator);
        self.keys.append(&mut right.keys);
        self.children.append(&mut right.children);
    }
}

impl<K, V> LeafNode<K, V> {
    /// Creates a leaf holding a single record.
    pub(crate) fn singleton(key: K, value: V) -> Self {
        Self {
            next: None,
            keys: vec![key],
            values: vec![value],
        }
    }

    /// Assembles a leaf from decoded parts; the caller links it.
    pub(crate) fn from_parts(keys: Vec<K>, values: Vec<V>) -> Self {
        debug_assert_eq!(keys.len(), values.len());
        Self {
            next: None,
            keys,
            values,
        }
    }

    pub(crate) fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns true once the leaf has reached the degree and must split.
    pub(crate) fn is_overflowing(&self, degree: Degree) -> bool {
        self.keys.len() >= degree.leaf_max()
    }

    /// Returns true if this non-root leaf is below minimum occupancy.
    pub(crate) fn is_underflowing(&self, degree: Degree) -> bool {
        self.keys.len() < degree.min_leaf_keys()
    }

    /// Returns true if this leaf can give a record to a sibling and stay at minimum.
    pub(crate) fn can_lend(&self, degree: Degree) -> bool {
        self.keys.len() > degree.min_leaf_keys()
    }

    pub(crate) fn next(&self) -> Option<Handle> {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Option<Handle>) {
        self.next = next;
    }

    pub(crate) fn keys(&self) -> &[K] {
        &self.keys
    }

    pub(crate) fn first_key(&self) -> Option<&K> {
        self.keys.first()
    }

    #[inline]
    pub(crate) fn value(&self, index: usize) -> &V {
        &self.values[index]
    }

    #[inline]
    pub(crate) fn value_mut(&mut self, index: usize) -> &mut V {
        &mut self.values[index]
    }

    pub(crate) fn values(&self) -> &[V] {
        &self.values
    }

    /// Searches for a key in this leaf.
    #[inline]
    pub(crate) fn search(&self, key: &K) -> SearchResult
    where
        K: Ord,
    {
        match self.keys.binary_search(key) {
            Ok(idx) => SearchResult::Found(idx),
            Err(idx) => SearchResult::NotFound(idx),
        }
    }

    /// Inserts a record at the given position.
    pub(crate) fn insert(&mut self, index: usize, key: K, value: V) {
        self.keys.insert(index, key);
        self.values.insert(index, value);
    }

    /// Removes the record at the given position.
    pub(crate) fn remove(&mut self, index: usize) -> (K, V) {
        let key = self.keys.remove(index);
        let value = self.values.remove(index);
        (key, value)
    }

    pub(crate) fn push(&mut self, key: K, value: V) {
        self.keys.push(key);
        self.values.push(value);
    }

    pub(crate) fn push_front(&mut self, key: K, value: V) {
        self.keys.insert(0, key);
        self.values.insert(0, value);
    }

    pub(crate) fn pop(&mut self) -> (K, V) {
        let key = self.keys.pop().expect("`LeafNode::pop()` - leaf is empty!");
        let value = self.values.pop().expect("`LeafNode::pop()` - leaf is empty!");
        (key, value)
    }

    pub(crate) fn pop_front(&mut self) -> (K, V) {
        assert!(!self.keys.is_empty(), "`LeafNode::pop_front()` - leaf is empty!");
        self.remove(0)
    }

    /// Moves `keys[at..]` into a new right leaf that inherits this leaf's
    /// `next` link. The caller allocates the new leaf and links it in.
    pub(crate) fn split(&mut self, at: usize) -> LeafNode<K, V> {
        LeafNode {
            next: self.next.take(),
            keys: self.keys.split_off(at),
            values: self.values.split_off(at),
        }
    }

    /// Absorbs a right sibling, taking over its `next` link.
    pub(crate) fn merge_with_right(&mut self, mut right: LeafNode<K, V>) {
        self.keys.append(&mut right.keys);
        self.values.append(&mut right.values);
        self.next = right.next;
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::raw::arena::Arena;
    use pretty_assertions::assert_eq;

    fn leaf(keys: &[i32]) -> LeafNode<i32, String> {
        LeafNode::from_parts(keys.to_vec(), keys.iter().map(|k| format!("v{k}")).collect())
    }

    #[test]
    fn search_child_sends_equal_keys_right() {
        let mut arena: Arena<()> = Arena::new();
        let children: Vec<Handle> = (0..4).map(|_| arena.alloc(())).collect();
        let node = InternalNode::from_parts(vec![10, 20, 30], children);

        assert_eq!(node.search_child(&5), 0);
        assert_eq!(node.search_child(&10), 1);
        assert_eq!(node.search_child(&19), 1);
        assert_eq!(node.search_child(&20), 2);
        assert_eq!(node.search_child(&99), 3);
    }

    #[test]
    fn leaf_split_keeps_head() {
        let degree = Degree::new(4).unwrap();
        let mut left = leaf(&[3, 5, 7, 12]);
        assert!(left.is_overflowing(degree));

        let right = left.split(degree.leaf_split_point());
        assert_eq!(left.keys(), &[3, 5]);
        assert_eq!(right.keys(), &[7, 12]);
        assert_eq!(right.values(), &["v7".to_string(), "v12".to_string()]);
    }

    #[test]
    fn internal_split_promotes_median() {
        let mut arena: Arena<()> = Arena::new();
        let children: Vec<Handle> = (0..5).map(|_| arena.alloc(())).collect();
        let mut node = InternalNode::from_parts(vec![10, 20, 30, 40], children.clone());

        let (median, right) = node.split();
        assert_eq!(median, 30);
        assert_eq!(node.keys(), &[10, 20]);
        assert_eq!(node.children(), &children[..3]);
        assert_eq!(right.keys(), &[40]);
        assert_eq!(right.children(), &children[3..]);
    }

    #[test]
    fn internal_merge_pulls_separator_down() {
        let mut arena: Arena<()> = Arena::new();
        let children: Vec<Handle> = (0..4).map(|_| arena.alloc(())).collect();
        let mut left = InternalNode::from_parts(vec![10], children[..2].to_vec());
        let right = InternalNode::from_parts(vec![30], children[2..].to_vec());

        left.merge_with_right(20, right);
        assert_eq!(left.keys(), &[10, 20, 30]);
        assert_eq!(left.children(), &children[..]);
    }

    #[test]
    fn lend_and_underflow_thresholds() {
        let degree = Degree::new(5).unwrap();
        assert_eq!(degree.min_leaf_keys(), 2);
        assert!(leaf(&[1]).is_underflowing(degree));
        assert!(!leaf(&[1, 2]).is_underflowing(degree));
        assert!(!leaf(&[1, 2]).can_lend(degree));
        assert!(leaf(&[1, 2, 3]).can_lend(degree));
    }
}
