//! The newline-delimited text format a tree is saved in.
//!
//! ```text
//! <degree>
//! <is_leaf: 0|1>            \
//! <key_count>                | one block per node, pre-order,
//! <keys, space-separated>    | root first
//! <values>  (leaves only)   /
//! ```
//!
//! An internal node's block is followed by the blocks of its `key_count + 1`
//! children in order.

use std::fmt::{Display, Write as _};
use std::io::{BufRead, Write};
use std::str::FromStr;

use crate::degree::Degree;
use crate::error::{Error, Result};
use crate::raw::{Arena, Handle, InternalNode, LeafNode, Node, RawBPlusTree};

/// Deepest nesting the decoder accepts; far beyond any tree that fits in memory.
const MAX_DEPTH: usize = 64;

/// Writes `tree` to `writer`.
///
/// The whole encoding is rendered in memory first, so an unencodable key or
/// value is reported before anything reaches the writer.
pub(crate) fn encode_into<K, V, W>(tree: &RawBPlusTree<K, V>, writer: &mut W) -> Result<()>
where
    K: Display,
    V: Display,
    W: Write + ?Sized,
{
    let encoded = encode(tree)?;
    writer.write_all(encoded.as_bytes())?;
    writer.flush()?;
    Ok(())
}

fn encode<K: Display, V: Display>(tree: &RawBPlusTree<K, V>) -> Result<String> {
    let mut out = format!("{}\n", tree.degree());

    // Pre-order: children are pushed in reverse so the leftmost is emitted first.
    let mut stack: Vec<Handle> = tree.root().into_iter().collect();
    while let Some(handle) = stack.pop() {
        match tree.node(handle) {
            Node::Leaf(leaf) => {
                let _ = writeln!(out, "1\n{}", leaf.key_count());
                push_tokens(&mut out, leaf.keys())?;
                push_tokens(&mut out, leaf.values())?;
            }
            Node::Internal(internal) => {
                let _ = writeln!(out, "0\n{}", internal.key_count());
                push_tokens(&mut out, internal.keys())?;
                stack.extend(internal.children().iter().rev());
            }
        }
    }

    Ok(out)
}

fn push_tokens<T: Display>(out: &mut String, items: &[T]) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        let token = item.to_string();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(Error::Unencodable { token });
        }
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&token);
    }
    out.push('\n');
    Ok(())
}

/// Reads a tree from `reader`. Returns `None` when the input is empty.
pub(crate) fn decode<K, V, R>(reader: R) -> Result<Option<RawBPlusTree<K, V>>>
where
    K: Ord + Clone + FromStr,
    V: FromStr,
    R: BufRead,
{
    let mut lines = LineReader::new(reader);
    let Some(degree_line) = lines.next_line()? else {
        return Ok(None);
    };
    let degree: usize = degree_line.single("a degree")?;
    let degree = Degree::new(degree).map_err(|err| degree_line.error(err.to_string()))?;

    let mut decoder = Decoder { lines, degree };
    let root_is_leaf = match decoder.lines.next_content()? {
        // A degree line alone is an empty tree.
        None => return Ok(Some(RawBPlusTree::new(degree))),
        Some(kind) => kind.node_kind()?,
    };

    let mut builder = TreeBuilder::new();
    let (root, _) = decoder.decode_node(&mut builder, root_is_leaf, 0)?;

    if let Some(extra) = decoder.lines.next_content()? {
        return Err(extra.error("unexpected data after the last node"));
    }

    let tree = RawBPlusTree::from_parts(degree, builder.nodes, Some(root), builder.len);
    if !tree.verify() {
        return Err(Error::malformed(decoder.lines.number, "leaf keys are not strictly ascending"));
    }
    Ok(Some(tree))
}

/// Accumulates decoded nodes and links every leaf to the one read before it.
struct TreeBuilder<K, V> {
    nodes: Arena<Node<K, V>>,
    last_leaf: Option<Handle>,
    leaf_depth: Option<usize>,
    len: usize,
}

impl<K, V> TreeBuilder<K, V> {
    fn new() -> Self {
        Self {
            nodes: Arena::new(),
            last_leaf: None,
            leaf_depth: None,
            len: 0,
        }
    }

    fn push_leaf(&mut self, leaf: LeafNode<K, V>) -> Handle {
        self.len += leaf.key_count();
        let handle = self.nodes.alloc(Node::Leaf(leaf));
        if let Some(previous) = self.last_leaf {
            self.nodes.get_mut(previous).as_leaf_mut().set_next(Some(handle));
        }
        self.last_leaf = Some(handle);
        handle
    }

    fn push_internal(&mut self, internal: InternalNode<K>) -> Handle {
        self.nodes.alloc(Node::Internal(internal))
    }
}

struct Decoder<R> {
    lines: LineReader<R>,
    degree: Degree,
}

impl<R: BufRead> Decoder<R> {
    /// Decodes the node whose kind line was just read, and its subtree.
    /// Returns the node and the minimum key stored beneath it.
    fn decode_node<K, V>(&mut self, builder: &mut TreeBuilder<K, V>, is_leaf: bool, depth: usize) -> Result<(Handle, K)>
    where
        K: Ord + Clone + FromStr,
        V: FromStr,
    {
        let count_line = self.lines.expect_line("a key count")?;
        let key_count: usize = count_line.single("a key count")?;
        let max_keys = self.degree.get() - 1;
        let min_keys = match (depth, is_leaf) {
            (0, _) => 1,
            (_, true) => self.degree.min_leaf_keys(),
            (_, false) => self.degree.min_internal_keys(),
        };
        if !(min_keys..=max_keys).contains(&key_count) {
            return Err(count_line.error(format!(
                "key count {key_count} is outside {min_keys}..={max_keys} for degree {}",
                self.degree
            )));
        }

        let keys_line = self.lines.expect_line("a line of keys")?;
        let keys: Vec<K> = keys_line.tokens(key_count, "keys")?;
        if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(keys_line.error("keys are not strictly ascending"));
        }
        let keys_line_number = keys_line.number;

        if is_leaf {
            let values_line = self.lines.expect_line("a line of values")?;
            let values: Vec<V> = values_line.tokens(key_count, "values")?;

            match builder.leaf_depth {
                None => builder.leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(values_line.error(format!("leaf at depth {depth}, expected every leaf at depth {expected}")));
                }
                Some(_) => {}
            }

            let min = keys[0].clone();
            let handle = builder.push_leaf(LeafNode::from_parts(keys, values));
            return Ok((handle, min));
        }

        let (first, subtree_min) = self.decode_child(builder, depth + 1)?;
        let mut children = Vec::with_capacity(key_count + 1);
        children.push(first);
        for (i, separator) in keys.iter().enumerate() {
            let (child, child_min) = self.decode_child(builder, depth + 1)?;
            if child_min != *separator {
                return Err(Error::malformed(
                    keys_line_number,
                    format!("separator {i} is not the minimum key of the subtree to its right"),
                ));
            }
            children.push(child);
        }

        let handle = builder.push_internal(InternalNode::from_parts(keys, children));
        Ok((handle, subtree_min))
    }

    fn decode_child<K, V>(&mut self, builder: &mut TreeBuilder<K, V>, depth: usize) -> Result<(Handle, K)>
    where
        K: Ord + Clone + FromStr,
        V: FromStr,
    {
        let kind = self.lines.expect_line("a node kind")?;
        if depth >= MAX_DEPTH {
            return Err(kind.error(format!("nodes are nested deeper than {MAX_DEPTH} levels")));
        }
        let is_leaf = kind.node_kind()?;
        self.decode_node(builder, is_leaf, depth)
    }
}

/// Reads lines one at a time and remembers the 1-based number of the last one.
struct LineReader<R> {
    reader: R,
    buf: String,
    number: usize,
}

impl<R: BufRead> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            number: 0,
        }
    }

    fn advance(&mut self) -> Result<bool> {
        self.buf.clear();
        if self.reader.read_line(&mut self.buf)? == 0 {
            return Ok(false);
        }
        self.number += 1;
        Ok(true)
    }

    fn current(&self) -> Line<'_> {
        Line {
            number: self.number,
            text: self.buf.trim_end_matches(['\n', '\r']),
        }
    }

    fn next_line(&mut self) -> Result<Option<Line<'_>>> {
        if !self.advance()? {
            return Ok(None);
        }
        Ok(Some(self.current()))
    }

    /// Like `next_line`, but fails at the end of the input.
    fn expect_line(&mut self, what: &str) -> Result<Line<'_>> {
        let number = self.number + 1;
        self.next_line()?
            .ok_or_else(|| Error::malformed(number, format!("unexpected end of data, expected {what}")))
    }

    /// Skips blank lines.
    fn next_content(&mut self) -> Result<Option<Line<'_>>> {
        loop {
            if !self.advance()? {
                return Ok(None);
            }
            if !self.buf.trim().is_empty() {
                return Ok(Some(self.current()));
            }
        }
    }
}

struct Line<'a> {
    number: usize,
    text: &'a str,
}

impl Line<'_> {
    fn error(&self, reason: impl Into<String>) -> Error {
        Error::malformed(self.number, reason)
    }

    fn single<T: FromStr>(&self, what: &str) -> Result<T> {
        let token = self.text.trim();
        token
            .parse()
            .map_err(|_| self.error(format!("expected {what}, found `{token}`")))
    }

    fn node_kind(&self) -> Result<bool> {
        match self.text.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(self.error(format!("expected node kind 0 or 1, found `{other}`"))),
        }
    }

    /// Parses exactly `count` whitespace-separated tokens.
    fn tokens<T: FromStr>(&self, count: usize, what: &str) -> Result<Vec<T>> {
        let tokens: Vec<&str> = self.text.split_whitespace().collect();
        if tokens.len() != count {
            return Err(self.error(format!("expected {count} {what}, found {}", tokens.len())));
        }
        tokens
            .into_iter()
            .map(|token| {
                token
                    .parse()
                    .map_err(|_| self.error(format!("cannot parse `{token}` among the {what}")))
            })
            .collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree_with(degree: usize, keys: &[i64]) -> RawBPlusTree<i64, String> {
        let mut tree = RawBPlusTree::new(Degree::new(degree).unwrap());
        for &key in keys {
            tree.insert(key, format!("v{key}"));
        }
        tree
    }

    fn encoded(tree: &RawBPlusTree<i64, String>) -> String {
        let mut out = Vec::new();
        encode_into(tree, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn decoded(text: &str) -> Result<Option<RawBPlusTree<i64, String>>> {
        decode(text.as_bytes())
    }

    fn malformed_line(text: &str) -> usize {
        match decoded(text) {
            Err(Error::Malformed { line, .. }) => line,
            Err(other) => panic!("expected a malformed error, got {other:?}"),
            Ok(_) => panic!("expected a malformed error, decoding succeeded"),
        }
    }

    #[test]
    fn encodes_pre_order() {
        let tree = tree_with(4, &[3, 5, 12, 7, 8]);
        assert_eq!(
            encoded(&tree),
            "4\n0\n1\n7\n1\n2\n3 5\nv3 v5\n1\n3\n7 8 12\nv7 v8 v12\n"
        );
    }

    #[test]
    fn empty_tree_is_a_degree_line() {
        let tree = tree_with(6, &[]);
        assert_eq!(encoded(&tree), "6\n");

        let tree = decoded("6\n").unwrap().unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.degree().get(), 6);
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        assert!(decoded("").unwrap().is_none());
    }

    #[test]
    fn decode_links_leaves_in_file_order() {
        let keys: Vec<i64> = (0..120).map(|i| (i * 71) % 120).collect();
        let tree = tree_with(5, &keys);
        let text = encoded(&tree);

        let restored = decoded(&text).unwrap().unwrap();
        restored.validate_invariants();
        assert_eq!(restored.len(), tree.len());
        assert_eq!(restored.height(), tree.height());
        assert_eq!(restored.entries(), tree.entries());
        assert_eq!(encoded(&restored), text);
    }

    #[test]
    fn accepts_trailing_spaces() {
        let text = "4\n0 \n1\n7 \n1\n2\n3 5 \nv3 v5 \n1\n3\n7 8 12 \nv7 v8 v12 \n\n";
        let tree = decoded(text).unwrap().unwrap();
        tree.validate_invariants();
        assert_eq!(tree.search(&12).unwrap(), "v12");
    }

    #[test]
    fn rejects_unencodable_tokens() {
        let mut tree: RawBPlusTree<i64, String> = RawBPlusTree::new(Degree::DEFAULT);
        tree.insert(1, "one".to_string());
        tree.insert(2, "two words".to_string());

        let mut out = Vec::new();
        let err = encode_into(&tree, &mut out).unwrap_err();
        assert!(matches!(err, Error::Unencodable { ref token } if token == "two words"));
        assert!(out.is_empty());

        let mut tree: RawBPlusTree<i64, String> = RawBPlusTree::new(Degree::DEFAULT);
        tree.insert(1, String::new());
        assert!(matches!(encode_into(&tree, &mut out), Err(Error::Unencodable { .. })));
    }

    #[test]
    fn reports_the_offending_line() {
        // Degree too small.
        assert_eq!(malformed_line("2\n1\n1\n5\nv5\n"), 1);
        // Not a number.
        assert_eq!(malformed_line("four\n"), 1);
        // Bad node kind.
        assert_eq!(malformed_line("4\n2\n1\n5\nv5\n"), 2);
        // Too few keys for the count.
        assert_eq!(malformed_line("4\n1\n2\n5\nv5\n"), 4);
        // Count above the degree allows.
        assert_eq!(malformed_line("4\n1\n4\n1 2 3 4\na b c d\n"), 3);
        // Unsorted keys.
        assert_eq!(malformed_line("4\n1\n2\n5 3\na b\n"), 4);
        // Missing values line.
        assert_eq!(malformed_line("4\n1\n2\n3 5\n"), 5);
        // Unparseable key.
        assert_eq!(malformed_line("4\n1\n1\nx\na\n"), 4);
        // Trailing garbage.
        assert_eq!(malformed_line("4\n1\n1\n5\nv5\n1\n"), 6);
    }

    #[test]
    fn rejects_inconsistent_structure() {
        // Separator 8 but the right subtree starts at 7.
        let text = "4\n0\n1\n8\n1\n2\n3 5\na b\n1\n3\n7 8 12\nc d e\n";
        assert_eq!(malformed_line(text), 4);

        // Leaves at different depths.
        let text = "3\n0\n1\n5\n1\n1\n1\na\n0\n1\n7\n1\n1\n5\nb\n1\n1\n7\nc\n";
        assert!(matches!(decoded(text), Err(Error::Malformed { .. })));

        // Separators consistent, but the left leaf reaches past them.
        let text = "4\n0\n1\n10\n1\n2\n1 20\na b\n1\n2\n10 30\nc d\n";
        assert!(matches!(decoded(text), Err(Error::Malformed { .. })));
    }

    #[test]
    fn rejects_runaway_nesting() {
        let mut text = String::from("3\n");
        for _ in 0..=MAX_DEPTH {
            text.push_str("0\n1\n5\n");
        }
        let Err(err) = decoded(&text) else {
            panic!("expected a malformed error, decoding succeeded");
        };
        assert!(matches!(err, Error::Malformed { ref reason, .. } if reason.contains("nested deeper")), "{err}");
    }
}
