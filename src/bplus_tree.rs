use std::fmt::{self, Display};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{info, warn};

use crate::codec;
use crate::degree::Degree;
use crate::error::{Error, Result};
use crate::raw::RawBPlusTree;

/// An ordered key-value index built as a [B+ tree].
///
/// Records live only in the leaves, which are chained left to right in key
/// order; internal nodes hold routing separators. Every point operation
/// descends once from the root and costs O(log n).
///
/// The fan-out is set by a [`Degree`] (4 unless chosen otherwise) and can only
/// be changed while the tree is empty, since every node is sized by it.
///
/// A tree can be bound to a data file and persisted to it in a line-oriented
/// text format, see [`BPlusTree::build_from_file`] and
/// [`BPlusTree::save_to_file`].
///
/// # Examples
///
/// ```
/// use bplus_index::BPlusTree;
///
/// let mut index = BPlusTree::new();
/// for (key, value) in [(3, "c"), (5, "e"), (12, "l"), (7, "g"), (8, "h")] {
///     index.insert(key, value.to_string());
/// }
///
/// assert_eq!(index.search(&7).unwrap(), "g");
/// assert!(index.search(&6).unwrap_err().is_not_found());
///
/// index.modify(&7, "G".to_string()).unwrap();
/// assert_eq!(index.delete(&7).unwrap(), "G");
/// assert_eq!(index.len(), 4);
/// assert!(index.verify());
/// ```
///
/// [B+ tree]: https://en.wikipedia.org/wiki/B%2B_tree
pub struct BPlusTree<K, V> {
    raw: RawBPlusTree<K, V>,
    data_file: Option<PathBuf>,
}

impl<K, V> BPlusTree<K, V> {
    /// Makes a new, empty `BPlusTree` with [`Degree::DEFAULT`].
    ///
    /// Does not allocate anything on its own.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_degree(Degree::DEFAULT)
    }

    /// Makes a new, empty `BPlusTree` with the given degree.
    ///
    /// # Examples
    ///
    /// ```
    /// use bplus_index::{BPlusTree, Degree};
    ///
    /// let index: BPlusTree<i64, String> = BPlusTree::with_degree(Degree::new(16)?);
    /// assert_eq!(index.degree(), 16);
    /// # Ok::<(), bplus_index::Error>(())
    /// ```
    #[must_use]
    pub const fn with_degree(degree: Degree) -> Self {
        Self {
            raw: RawBPlusTree::new(degree),
            data_file: None,
        }
    }

    /// Returns the number of records in the tree.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the tree holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns the maximum degree: a node splits once it reaches this many keys.
    #[must_use]
    pub const fn degree(&self) -> usize {
        self.raw.degree().get()
    }

    /// Returns the number of levels, 0 for an empty tree.
    ///
    /// # Examples
    ///
    /// ```
    /// use bplus_index::BPlusTree;
    ///
    /// let mut index = BPlusTree::new();
    /// assert_eq!(index.height(), 0);
    /// index.insert(1, "a".to_string());
    /// assert_eq!(index.height(), 1);
    /// ```
    #[must_use]
    pub fn height(&self) -> usize {
        self.raw.height()
    }

    /// Returns the data file the tree is bound to, if any.
    #[must_use]
    pub fn data_file(&self) -> Option<&Path> {
        self.data_file.as_deref()
    }

    /// Changes the degree of an empty tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDegree`] if `degree < Degree::MIN`, and
    /// [`Error::DegreeChangeRejected`] if the tree holds any record. The tree is
    /// unchanged in both cases.
    ///
    /// # Examples
    ///
    /// ```
    /// use bplus_index::{BPlusTree, Error};
    ///
    /// let mut index = BPlusTree::new();
    /// index.set_degree(6).unwrap();
    /// assert_eq!(index.degree(), 6);
    ///
    /// index.insert(1, "a".to_string());
    /// assert!(matches!(index.set_degree(8), Err(Error::DegreeChangeRejected)));
    /// assert_eq!(index.degree(), 6);
    /// ```
    pub fn set_degree(&mut self, degree: usize) -> Result<()> {
        let degree = Degree::new(degree)?;
        if let Err(err) = self.raw.set_degree(degree) {
            warn!(requested = degree.get(), current = self.degree(), len = self.len(), "bplus_index.degree.rejected");
            return Err(err);
        }
        info!(degree = degree.get(), "bplus_index.degree.changed");
        Ok(())
    }

    /// Removes every record. The degree and the bound data file are kept.
    pub fn clear(&mut self) {
        let dropped = self.raw.len();
        self.raw.clear();
        info!(dropped, "bplus_index.cleared");
    }

    /// Returns every record in key order, read along the leaf chain.
    ///
    /// # Examples
    ///
    /// ```
    /// use bplus_index::BPlusTree;
    ///
    /// let mut index = BPlusTree::new();
    /// index.insert(2, "b");
    /// index.insert(1, "a");
    /// assert_eq!(index.entries(), vec![(&1, &"a"), (&2, &"b")]);
    /// ```
    #[must_use]
    pub fn entries(&self) -> Vec<(&K, &V)> {
        self.raw.entries()
    }
}

impl<K: Ord, V> BPlusTree<K, V> {
    /// Returns a reference to the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyTree`] if the tree is empty and [`Error::NotFound`]
    /// if `key` is not stored.
    pub fn search(&self, key: &K) -> Result<&V> {
        self.raw.search(key)
    }

    /// Returns `true` if the tree stores a value under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.raw.search(key).is_ok()
    }

    /// Replaces the value stored under `key`, leaving the structure untouched.
    ///
    /// # Errors
    ///
    /// Fails like [`BPlusTree::search`]; the tree is unchanged.
    pub fn modify(&mut self, key: &K, value: V) -> Result<()> {
        *self.raw.search_mut(key)? = value;
        Ok(())
    }

    /// Checks that the leaf chain yields strictly ascending keys, within and
    /// across leaves. Balance and separators are not checked.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.raw.verify()
    }
}

impl<K: Ord + Clone, V> BPlusTree<K, V> {
    /// Inserts a record.
    ///
    /// Returns `true` if `key` was new. If it was already present its value is
    /// replaced and `false` is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use bplus_index::BPlusTree;
    ///
    /// let mut index = BPlusTree::new();
    /// assert!(index.insert(37, "a"));
    /// assert!(!index.insert(37, "b"));
    /// assert_eq!(index.search(&37).unwrap(), &"b");
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.raw.insert(key, value)
    }

    /// Removes `key` and returns its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyTree`] if the tree is empty and [`Error::NotFound`]
    /// if `key` is not stored. Nothing is removed on failure.
    pub fn delete(&mut self, key: &K) -> Result<V> {
        self.raw.delete(key)
    }
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + FromStr,
    V: FromStr,
{
    /// Binds `path` as the tree's data file and replaces the whole tree,
    /// degree included, with the tree stored there.
    ///
    /// # Errors
    ///
    /// - [`Error::FileMissing`] if `path` does not exist. The tree and its
    ///   binding are unchanged.
    /// - [`Error::FileEmpty`] if the file is empty. The tree is cleared and
    ///   `path` is bound, so a later [`BPlusTree::save_to_file`] creates it.
    /// - [`Error::Malformed`] or [`Error::Io`] if the file cannot be read as
    ///   a tree. The tree and its binding are unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use bplus_index::BPlusTree;
    ///
    /// let dir = tempfile::tempdir()?;
    /// let path = dir.path().join("index.txt");
    /// std::fs::write(&path, "4\n1\n2\n3 5\nc e\n")?;
    ///
    /// let mut index: BPlusTree<i64, String> = BPlusTree::new();
    /// index.build_from_file(&path)?;
    /// assert_eq!(index.search(&5)?, "e");
    /// assert_eq!(index.data_file(), Some(path.as_path()));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn build_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "bplus_index.load.missing");
                return Err(Error::FileMissing { path: path.to_path_buf() });
            }
            Err(err) => return Err(err.into()),
        };

        match codec::decode(BufReader::new(file)) {
            Ok(Some(raw)) => {
                self.raw = raw;
                self.data_file = Some(path.to_path_buf());
                info!(
                    path = %path.display(),
                    degree = self.degree(),
                    len = self.len(),
                    height = self.height(),
                    "bplus_index.load.completed"
                );
                Ok(())
            }
            Ok(None) => {
                self.raw.clear();
                self.data_file = Some(path.to_path_buf());
                warn!(path = %path.display(), degree = self.degree(), "bplus_index.load.empty");
                Err(Error::FileEmpty { path: path.to_path_buf() })
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "bplus_index.load.failed");
                Err(err)
            }
        }
    }

    /// Reads a tree written by [`BPlusTree::serialize_into`]. The result is
    /// bound to no data file; an empty reader yields an empty default tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] or [`Error::Io`] if the input cannot be
    /// read as a tree.
    pub fn deserialize_from<R: BufRead>(reader: R) -> Result<Self> {
        let raw = codec::decode(reader)?.unwrap_or_else(|| RawBPlusTree::new(Degree::DEFAULT));
        Ok(Self { raw, data_file: None })
    }
}

impl<K: Display, V: Display> BPlusTree<K, V> {
    /// Writes the tree to its bound data file, replacing the file's contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDataFile`] if no data file is bound,
    /// [`Error::Unencodable`] if a key or value cannot be written (the file is
    /// not touched), and [`Error::Io`] if writing fails.
    pub fn save_to_file(&self) -> Result<()> {
        let path = self.data_file.as_deref().ok_or(Error::NoDataFile)?;
        self.write_file(path)
    }

    /// Writes the tree to `path` and binds `path` as its data file.
    ///
    /// # Errors
    ///
    /// Fails like [`BPlusTree::save_to_file`]; the binding only changes on success.
    ///
    /// # Examples
    ///
    /// ```
    /// use bplus_index::BPlusTree;
    ///
    /// let dir = tempfile::tempdir()?;
    /// let path = dir.path().join("index.txt");
    ///
    /// let mut index = BPlusTree::new();
    /// index.insert(1, "one".to_string());
    /// index.save_as(&path)?;
    ///
    /// let mut restored: BPlusTree<i64, String> = BPlusTree::new();
    /// restored.build_from_file(&path)?;
    /// assert_eq!(restored.search(&1)?, "one");
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.write_file(path)?;
        self.data_file = Some(path.to_path_buf());
        Ok(())
    }

    /// Writes the tree in the data-file format to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unencodable`] before anything is written if a key or
    /// value renders empty or contains whitespace, and [`Error::Io`] if
    /// writing fails.
    pub fn serialize_into<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        codec::encode_into(&self.raw, writer)
    }

    fn write_file(&self, path: &Path) -> Result<()> {
        // Encode first so a failure leaves the existing file intact.
        let mut encoded = Vec::new();
        codec::encode_into(&self.raw, &mut encoded)?;
        fs::write(path, &encoded)?;
        info!(path = %path.display(), len = self.len(), bytes = encoded.len(), "bplus_index.save.completed");
        Ok(())
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for BPlusTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.raw.entries()).finish()
    }
}

impl<K, V> Default for BPlusTree<K, V> {
    /// Creates an empty `BPlusTree` with [`Degree::DEFAULT`].
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use static_assertions::assert_impl_all;

    assert_impl_all!(BPlusTree<i64, String>: Send, Sync, Default);

    #[test]
    fn debug_renders_as_map() {
        let mut index = BPlusTree::new();
        index.insert(2, "b");
        index.insert(1, "a");
        assert_eq!(format!("{index:?}"), r#"{1: "a", 2: "b"}"#);
    }

    #[test]
    fn invalid_degree_leaves_tree_untouched() {
        let mut index: BPlusTree<i64, String> = BPlusTree::new();
        assert!(matches!(index.set_degree(2), Err(Error::InvalidDegree { degree: 2, min: 3 })));
        assert_eq!(index.degree(), 4);
    }

    #[test]
    fn clear_keeps_degree_and_binding() {
        let mut index: BPlusTree<i64, String> = BPlusTree::with_degree(Degree::new(7).unwrap());
        index.data_file = Some(PathBuf::from("bound.txt"));
        for key in 0..50 {
            index.insert(key, key.to_string());
        }

        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.height(), 0);
        assert_eq!(index.degree(), 7);
        assert_eq!(index.data_file(), Some(Path::new("bound.txt")));
        assert!(matches!(index.search(&1), Err(Error::EmptyTree)));
    }

    #[test]
    fn modify_requires_an_existing_key() {
        let mut index = BPlusTree::new();
        assert!(matches!(index.modify(&1, "x"), Err(Error::EmptyTree)));

        index.insert(1, "a");
        assert!(matches!(index.modify(&2, "x"), Err(Error::NotFound)));
        index.modify(&1, "b").unwrap();
        assert_eq!(index.entries(), vec![(&1, &"b")]);
    }

    #[test]
    fn save_without_binding_fails() {
        let index: BPlusTree<i64, String> = BPlusTree::new();
        assert!(matches!(index.save_to_file(), Err(Error::NoDataFile)));
    }

    #[test]
    fn deserializing_nothing_yields_default_tree() {
        let index: BPlusTree<i64, String> = BPlusTree::deserialize_from(&b""[..]).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.degree(), Degree::DEFAULT.get());
        assert_eq!(index.data_file(), None);
    }
}
