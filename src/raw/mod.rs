mod arena;
mod node;
mod raw_bplus_tree;

pub(crate) use arena::{Arena, Handle};
pub(crate) use node::{InternalNode, LeafNode, Node};
pub(crate) use raw_bplus_tree::RawBPlusTree;
