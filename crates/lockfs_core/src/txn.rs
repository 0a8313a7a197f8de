//! Scoped file transactions.
//!
//! Each transaction wraps open, lock, callback, and cleanup into a single
//! call, so a caller cannot forget to release the lock or remove a temp
//! file. The callback receives streams bounded to the transaction's
//! lifetime; the capability split between [`ReadSeek`] and [`Write`] is
//! what guarantees an update callback can never write to the original file
//! directly.
//!
//! # Operations
//!
//! - [`read_locked`] — shared lock, read-only stream
//! - [`create_locked`] — exclusive-create, exclusive lock, write stream
//! - [`update_locked`] — read-modify-write through a `<path>.tmp` sibling,
//!   exclusive lock held across the whole copy-back window
//!
//! # Invariants
//!
//! - Locks and descriptors are released on every exit path, callback
//!   errors included
//! - `<path>.tmp` never survives an `update_locked` call
//! - The update callback reads the original and writes the temp file; the
//!   original's bytes change only in the copy-back step after the callback
//!   succeeded

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{LockError, LockResult};
use crate::lock::{LockedFile, DEFAULT_FILE_MODE};

/// A readable, seekable stream handed to read and update callbacks.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Runs `callback` with shared-locked read access to the file at `path`.
///
/// The file must already exist. The callback receives a stream positioned
/// at the start of the file. Blocks until any exclusive holder releases
/// its lock. The lock is released and the descriptor closed on every exit
/// path; the callback's result or error is returned unchanged.
///
/// # Errors
///
/// Returns an error if the open or lock fails, or whatever error the
/// callback returned.
///
/// # Example
///
/// ```no_run
/// use std::io::Read;
///
/// let contents = lockfs_core::read_locked("state.json", |r| {
///     let mut buf = String::new();
///     r.read_to_string(&mut buf)?;
///     Ok(buf)
/// })?;
/// # Ok::<(), lockfs_core::LockError>(())
/// ```
pub fn read_locked<T, F>(path: impl AsRef<Path>, callback: F) -> LockResult<T>
where
    F: FnOnce(&mut dyn ReadSeek) -> LockResult<T>,
{
    let mut file = LockedFile::options().read(true).open(path)?;
    match callback(&mut file) {
        Ok(value) => {
            file.close()?;
            Ok(value)
        }
        Err(err) => {
            // Callback error wins; cleanup is best-effort.
            let _ = file.close();
            Err(err)
        }
    }
}

/// Creates the file at `path` and runs `callback` with exclusive-locked
/// write access to it.
///
/// Creation is exclusive: the call fails immediately, without touching
/// anything, if a file already exists at `path`. The lock is uncontended
/// since the file was just created by this call.
///
/// If the callback fails, the lock is released and the error propagated;
/// the created (possibly partially written) file is left on disk. If the
/// callback succeeds, the file is synced to storage, then unlocked, then
/// closed, and a failure in any of those steps is returned even though the
/// callback itself succeeded.
///
/// # Errors
///
/// Returns an error if the file already exists, if the open, lock, sync,
/// or unlock fails, or whatever error the callback returned.
pub fn create_locked<F>(path: impl AsRef<Path>, callback: F) -> LockResult<()>
where
    F: FnOnce(&mut dyn Write) -> LockResult<()>,
{
    let mut file = LockedFile::options()
        .write(true)
        .create_new(true)
        .mode(DEFAULT_FILE_MODE)
        .open(path)?;
    match callback(&mut file) {
        Ok(()) => file.close(),
        Err(err) => {
            let _ = file.close();
            Err(err)
        }
    }
}

/// Runs a read-modify-write transaction on the file at `path`.
///
/// The file is opened read-write (created empty if absent) and exclusively
/// locked for the entire call. The callback receives two independent
/// streams: the original file's contents to read, and a freshly created
/// `<path>.tmp` sibling to write the new contents into. On callback
/// success the temp file is synced and its contents copied back over the
/// original while the lock is still held, so lock-respecting readers see
/// either the old content or the new, never a transient state.
///
/// On callback failure the original file is untouched (the callback never
/// holds a write stream on it). On every path the temp file is removed and
/// both descriptors are released before the call returns.
///
/// A stale or concurrent `<path>.tmp` makes the exclusive-create of the
/// temp file fail, aborting the transaction with the original untouched.
///
/// The copy-back truncates the original and rewrites it in place rather
/// than renaming the temp file over it: the advisory lock is attached to
/// the original's open descriptor, and a rename would leave blocked
/// waiters locking a dead inode. The cost is a crash window between
/// truncate and copy-completion in which the original can be left empty or
/// partial; callers needing crash-atomicity must layer a journal above
/// this call.
///
/// # Errors
///
/// Returns an error if any open, lock, sync, or copy step fails, or
/// whatever error the callback returned.
///
/// # Example
///
/// ```no_run
/// use std::io::{Read, Write};
///
/// lockfs_core::update_locked("counter", |r, w| {
///     let mut buf = String::new();
///     r.read_to_string(&mut buf)?;
///     let n: u64 = buf.trim().parse().unwrap_or(0);
///     write!(w, "{}", n + 1)?;
///     Ok(())
/// })?;
/// # Ok::<(), lockfs_core::LockError>(())
/// ```
pub fn update_locked<F>(path: impl AsRef<Path>, callback: F) -> LockResult<()>
where
    F: FnOnce(&mut dyn ReadSeek, &mut dyn Write) -> LockResult<()>,
{
    let path = path.as_ref();

    // Exclusive lock on the original, held until `orig` is closed or
    // dropped.
    let mut orig = LockedFile::options()
        .read(true)
        .write(true)
        .create(true)
        .mode(DEFAULT_FILE_MODE)
        .open(path)?;

    // The guard removes the temp file on every exit path from here on.
    let mut temp = TempFile::create_new(temp_path(path))?;

    callback(&mut orig, temp.file_mut())?;

    temp.sync()?;
    temp.rewind()?;
    orig.seek(SeekFrom::Start(0))
        .map_err(|e| LockError::file_op("rewinding", path, e))?;
    orig.set_len(0)?;
    io::copy(temp.file_mut(), &mut orig)
        .map_err(|e| LockError::file_op("writing changes to", path, e))?;

    // Syncs the original, then unlocks, then closes.
    orig.close()
}

/// Returns the temp-file sibling for `path`: `<path>.tmp`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// An exclusively-created temp file that is removed on drop.
struct TempFile {
    path: PathBuf,
    file: File,
}

impl TempFile {
    fn create_new(path: PathBuf) -> LockResult<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(DEFAULT_FILE_MODE);
        }
        let file = opts
            .open(&path)
            .map_err(|e| LockError::file_op("creating tempfile", &path, e))?;
        Ok(Self { path, file })
    }

    fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    fn sync(&self) -> LockResult<()> {
        self.file
            .sync_all()
            .map_err(|e| LockError::file_op("flushing tempfile", &self.path, e))
    }

    fn rewind(&mut self) -> LockResult<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map(|_| ())
            .map_err(|e| LockError::file_op("rewinding tempfile", &self.path, e))
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
