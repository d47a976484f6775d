//! An in-memory B+ tree index with a plain-text persistence format.
//!
//! This crate provides [`BPlusTree`], an ordered key-value index whose records
//! live in a chain of sorted leaves, routed to by separator-only internal nodes:
//!
//! - [`insert`](BPlusTree::insert), [`search`](BPlusTree::search),
//!   [`modify`](BPlusTree::modify) and [`delete`](BPlusTree::delete) in O(log n)
//! - A runtime [`Degree`] (fan-out) that is locked once the tree holds a record
//! - [`build_from_file`](BPlusTree::build_from_file) /
//!   [`save_to_file`](BPlusTree::save_to_file) against a bound data file
//! - [`verify`](BPlusTree::verify) to check the leaf chain is in strict key order
//!
//! # Example
//!
//! ```
//! use bplus_index::{BPlusTree, Error};
//!
//! let mut index: BPlusTree<i64, String> = BPlusTree::new();
//! index.set_degree(3)?;
//! for key in [3, 5, 12, 7, 8, 31, 13, 22, 10, 19] {
//!     index.insert(key, format!("value-{key}"));
//! }
//!
//! assert_eq!(index.search(&13)?, "value-13");
//! assert!(matches!(index.search(&15), Err(Error::NotFound)));
//! assert!(index.height() > 1);
//!
//! // Persist to memory and read it back.
//! let mut buffer = Vec::new();
//! index.serialize_into(&mut buffer)?;
//! let restored: BPlusTree<i64, String> = BPlusTree::deserialize_from(buffer.as_slice())?;
//! assert_eq!(restored.entries(), index.entries());
//! # Ok::<(), Error>(())
//! ```
//!
//! # Data file format
//!
//! The first line holds the degree. Each node follows in pre-order as a kind
//! line (`1` for a leaf, `0` for an internal node), a key-count line and a line
//! of space-separated keys; a leaf adds a line of values, an internal node is
//! followed by its children. Keys and values are written with [`Display`] and
//! read back with [`FromStr`], so a token must be non-empty and free of
//! whitespace.
//!
//! [`Display`]: std::fmt::Display
//! [`FromStr`]: std::str::FromStr
//!
//! # Logging
//!
//! Structural changes are emitted as `tracing` events at `TRACE` level under the
//! `bplus_index::split` and `bplus_index::merge` targets. Loads, saves, clears
//! and degree changes are reported at `INFO`/`WARN`. No subscriber is installed.

// These forbid rules and lint groups are meant to be very restrictive.
#![forbid(unsafe_code)]
#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::cargo)]
#![warn(clippy::pedantic)]
// Enable coverage attributes for nightly builds.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod bplus_tree;
mod codec;
mod degree;
mod error;
mod raw;

pub use bplus_tree::BPlusTree;
pub use degree::Degree;
pub use error::{Error, Result};
