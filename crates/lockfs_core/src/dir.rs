//! Parent-directory creation.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{LockError, LockResult};

/// Permission bits for directories created by [`ensure_dir`].
pub const DEFAULT_DIR_MODE: u32 = 0o775;

/// Ensures that the parent directory of `filename` exists.
///
/// Missing ancestors are created with mode [`DEFAULT_DIR_MODE`]. If the
/// parent already exists as a directory nothing is modified. If it exists
/// but is not a directory, [`LockError::NotADirectory`] is returned and
/// nothing is created.
///
/// # Errors
///
/// Returns [`LockError::NoPath`] for an empty `filename`,
/// [`LockError::NotADirectory`] if an existing parent is not a directory,
/// or a wrapped I/O error if the stat or directory creation fails.
pub fn ensure_dir(filename: impl AsRef<Path>) -> LockResult<()> {
    let filename = filename.as_ref();
    if filename.as_os_str().is_empty() {
        return Err(LockError::NoPath);
    }

    // A bare filename has an empty parent; the current directory always
    // exists.
    let parent = match filename.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };

    match fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(LockError::NotADirectory(parent.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => create_dir_tree(parent),
        Err(e) => Err(LockError::file_op("stat-ing", parent, e)),
    }
}

#[cfg(unix)]
fn create_dir_tree(parent: &Path) -> LockResult<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DEFAULT_DIR_MODE)
        .create(parent)
        .map_err(|e| LockError::file_op("creating directory", parent, e))
}

#[cfg(not(unix))]
fn create_dir_tree(parent: &Path) -> LockResult<()> {
    fs::create_dir_all(parent)
        .map_err(|e| LockError::file_op("creating directory", parent, e))
}
