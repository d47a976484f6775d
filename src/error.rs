use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by [`BPlusTree`](crate::BPlusTree).
///
/// Every variant is recoverable: the tree is left exactly as it was before the
/// failing call, except where a variant documents otherwise.
#[derive(Debug, Error)]
pub enum Error {
    /// A lookup, modification or deletion was attempted on an empty tree.
    #[error("the tree is empty")]
    EmptyTree,
    /// The requested key is not stored in the tree.
    #[error("key not found")]
    NotFound,
    /// The degree can only be changed while the tree is empty.
    #[error("cannot change the degree of a non-empty tree")]
    DegreeChangeRejected,
    /// The requested degree is too small to build a valid tree.
    #[error("invalid degree {degree}: the degree must be at least {min}")]
    InvalidDegree { degree: usize, min: usize },
    /// The data file to load from does not exist.
    #[error("data file `{}` does not exist", path.display())]
    FileMissing { path: PathBuf },
    /// The data file to load from has no content. The tree has been cleared.
    #[error("data file `{}` is empty", path.display())]
    FileEmpty { path: PathBuf },
    /// `save_to_file` was called before any data file was bound to the tree.
    #[error("no data file is bound to the tree")]
    NoDataFile,
    /// The persisted text does not follow the tree format.
    #[error("malformed tree data at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    /// A key or value renders as an empty string or contains whitespace, so it
    /// cannot be written to the space-separated format.
    #[error("`{token}` cannot be encoded: tokens must be non-empty and contain no whitespace")]
    Unencodable { token: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true for the two "nothing stored under that key" outcomes,
    /// [`Error::EmptyTree`] and [`Error::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::EmptyTree | Error::NotFound)
    }

    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Error::Malformed {
            line,
            reason: reason.into(),
        }
    }
}
