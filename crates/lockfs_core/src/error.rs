//! Error types for locked-file operations.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for locked-file operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during locked-file operations.
///
/// Callback errors are propagated untouched: a callback that returns a
/// [`LockError`] (or an [`io::Error`], via `From`) sees that exact value
/// surface from the transaction call. Errors raised by the transaction
/// machinery itself carry the failing operation and path in
/// [`LockError::FileOp`].
#[derive(Debug, Error)]
pub enum LockError {
    /// No path was specified.
    #[error("no path specified")]
    NoPath,

    /// A parent path exists but is not a directory.
    #[error("{0:?} exists and is not a directory")]
    NotADirectory(PathBuf),

    /// An I/O error without additional context, typically from a
    /// caller-supplied callback.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An I/O error from a specific filesystem step.
    #[error("error {op} {path:?}: {source}")]
    FileOp {
        /// The operation that failed, e.g. `"opening"` or `"locking"`.
        op: &'static str,
        /// The path the operation was applied to.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
}

impl LockError {
    /// Wraps an I/O error with the failing operation and path.
    pub(crate) fn file_op(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::FileOp {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns true if this error represents an exclusive-create conflict
    /// (the target path already existed).
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Io(err) => err.kind() == io::ErrorKind::AlreadyExists,
            Self::FileOp { source, .. } => source.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_op_carries_context() {
        let err = LockError::file_op(
            "opening",
            Path::new("/tmp/data"),
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        let msg = err.to_string();
        assert!(msg.contains("opening"));
        assert!(msg.contains("/tmp/data"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn already_exists_detection() {
        let conflict = LockError::file_op(
            "creating",
            Path::new("x"),
            io::Error::new(io::ErrorKind::AlreadyExists, "exists"),
        );
        assert!(conflict.is_already_exists());

        let other = LockError::NoPath;
        assert!(!other.is_already_exists());
    }
}
