//! Advisory-locked file handles.
//!
//! A [`LockedFile`] owns one open file descriptor together with its current
//! advisory-lock state. The lock is whole-file and advisory (`flock`-style):
//! it constrains cooperating processes only.
//!
//! # Lock modes
//!
//! The lock mode follows the declared access mode: read-only handles take a
//! shared lock, anything with write access takes an exclusive lock.
//!
//! # Invariants
//!
//! - The descriptor is closed exactly once; `close` after `close` is a no-op
//! - Lock state is a tagged enum; shared and exclusive cannot both be held
//! - A requested truncation is deferred until after the lock is held, so the
//!   file is never emptied while unprotected
//! - The lock is released on drop if the handle was not closed explicitly

use std::fmt;
use std::fs::{File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;

use crate::error::{LockError, LockResult};
use crate::observer::{default_observer, LockEvent, LockObserver};

/// Default permission bits for files created by locked opens.
pub const DEFAULT_FILE_MODE: u32 = 0o664;

/// The advisory-lock mode of a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock: any number of concurrent holders, used for reading.
    Shared,
    /// Exclusive lock: a single holder, used for writing.
    Exclusive,
}

/// The current lock state of a [`LockedFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No lock is held.
    Unlocked,
    /// A shared lock is held.
    SharedHeld,
    /// An exclusive lock is held.
    ExclusiveHeld,
}

impl LockState {
    /// Returns true if any lock is held.
    #[must_use]
    pub fn is_held(self) -> bool {
        !matches!(self, Self::Unlocked)
    }
}

/// The access mode a handle was opened with. Immutable after open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Opened for reading only; locks shared.
    ReadOnly,
    /// Opened for writing only; locks exclusive.
    WriteOnly,
    /// Opened for reading and writing; locks exclusive.
    ReadWrite,
}

impl AccessMode {
    /// The lock mode implied by this access mode.
    #[must_use]
    pub fn lock_mode(self) -> LockMode {
        match self {
            Self::ReadOnly => LockMode::Shared,
            Self::WriteOnly | Self::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Options for opening a [`LockedFile`], in the style of
/// [`std::fs::OpenOptions`].
///
/// Truncation requested here is never applied by the raw open call; it is
/// deferred until the lock is held (see [`OpenLockedOptions::open`]).
///
/// # Example
///
/// ```no_run
/// use lockfs_core::LockedFile;
///
/// let file = LockedFile::options()
///     .read(true)
///     .write(true)
///     .create(true)
///     .open("data.bin")?;
/// # Ok::<(), lockfs_core::LockError>(())
/// ```
#[derive(Clone)]
pub struct OpenLockedOptions {
    read: bool,
    write: bool,
    append: bool,
    create: bool,
    create_new: bool,
    truncate: bool,
    mode: u32,
    observer: Option<Arc<dyn LockObserver>>,
}

impl Default for OpenLockedOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OpenLockedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenLockedOptions")
            .field("read", &self.read)
            .field("write", &self.write)
            .field("append", &self.append)
            .field("create", &self.create)
            .field("create_new", &self.create_new)
            .field("truncate", &self.truncate)
            .field("mode", &format_args!("{:o}", self.mode))
            .finish()
    }
}

impl OpenLockedOptions {
    /// Creates a blank set of options. All flags start false; the creation
    /// mode starts at [`DEFAULT_FILE_MODE`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            read: false,
            write: false,
            append: false,
            create: false,
            create_new: false,
            truncate: false,
            mode: DEFAULT_FILE_MODE,
            observer: None,
        }
    }

    /// Sets the option for read access.
    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    /// Sets the option for write access.
    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    /// Sets the option for append mode. Implies write access.
    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    /// Sets the option to create the file if it does not exist.
    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    /// Sets the option for exclusive creation: the open fails if the file
    /// already exists.
    pub fn create_new(&mut self, create_new: bool) -> &mut Self {
        self.create_new = create_new;
        self
    }

    /// Sets the option to truncate the file to zero length.
    ///
    /// Truncation is applied only after the lock is held, never by the raw
    /// open itself.
    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    /// Sets the permission bits used if a file is created.
    pub fn mode(&mut self, mode: u32) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Sets the observer that receives lock lifecycle events for the
    /// opened handle. Defaults to [`crate::TracingObserver`].
    pub fn observer(&mut self, observer: Arc<dyn LockObserver>) -> &mut Self {
        self.observer = Some(observer);
        self
    }

    fn access_mode(&self) -> AccessMode {
        if self.write || self.append {
            if self.read {
                AccessMode::ReadWrite
            } else {
                AccessMode::WriteOnly
            }
        } else {
            AccessMode::ReadOnly
        }
    }

    /// Opens the file at `path` and immediately locks it.
    ///
    /// The sequence is: open (with truncation stripped), lock in the mode
    /// implied by the access mode, then apply the deferred truncation if one
    /// was requested. If any step after the open fails, the descriptor is
    /// closed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the open, the lock acquisition, or the deferred
    /// truncation fails. Each error carries the failing step and the path.
    pub fn open(&self, path: impl AsRef<Path>) -> LockResult<LockedFile> {
        let path = path.as_ref();

        let mut opts = OpenOptions::new();
        opts.read(self.read)
            .write(self.write)
            .append(self.append)
            .create(self.create)
            .create_new(self.create_new);
        // Truncation is deferred until the lock is held; the raw open must
        // never empty the file while a concurrent reader could observe it.
        opts.truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(self.mode);
        }

        let file = opts
            .open(path)
            .map_err(|e| LockError::file_op("opening", path, e))?;

        let observer = self.observer.clone().unwrap_or_else(default_observer);
        let mut locked = LockedFile {
            file: Some(file),
            path: path.to_path_buf(),
            access: self.access_mode(),
            state: LockState::Unlocked,
            observer,
        };

        // Failures from here on drop `locked`, which closes the descriptor.
        locked.lock()?;

        if self.truncate {
            locked
                .file_ref()?
                .set_len(0)
                .map_err(|e| LockError::file_op("truncating", path, e))?;
        }

        Ok(locked)
    }
}

/// An open file descriptor together with its advisory-lock state.
///
/// Created by [`LockedFile::open_locked`] or [`LockedFile::options`]. The
/// handle implements [`Read`], [`Write`] and [`Seek`] by delegating to the
/// underlying file.
///
/// # Lifecycle
///
/// [`LockedFile::close`] syncs pending writes to storage, releases the lock,
/// then closes the descriptor, in that order. If the handle is dropped
/// without an explicit close, the lock is released and the descriptor closed
/// without the durability sync; use `close` when the data matters.
pub struct LockedFile {
    /// None once the handle has been closed.
    file: Option<File>,
    path: PathBuf,
    access: AccessMode,
    state: LockState,
    observer: Arc<dyn LockObserver>,
}

impl fmt::Debug for LockedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedFile")
            .field("path", &self.path)
            .field("access", &self.access)
            .field("state", &self.state)
            .field("closed", &self.file.is_none())
            .finish()
    }
}

impl LockedFile {
    /// Returns a new blank [`OpenLockedOptions`] builder.
    #[must_use]
    pub fn options() -> OpenLockedOptions {
        OpenLockedOptions::new()
    }

    /// Opens `path` read-only with a shared lock.
    ///
    /// Convenience for the common read case; fails if the file does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the open or the lock acquisition fails.
    pub fn open_locked(path: impl AsRef<Path>) -> LockResult<Self> {
        Self::options().read(true).open(path)
    }

    /// Returns the path the handle was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the access mode declared at open time.
    #[must_use]
    pub fn access_mode(&self) -> AccessMode {
        self.access
    }

    /// Returns the current lock state.
    #[must_use]
    pub fn lock_state(&self) -> LockState {
        self.state
    }

    /// Returns metadata for the open file.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or the stat call fails.
    pub fn metadata(&self) -> LockResult<Metadata> {
        self.file_ref()?
            .metadata()
            .map_err(|e| LockError::file_op("stat-ing", &self.path, e))
    }

    /// Truncates or extends the file to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or the truncation fails.
    pub fn set_len(&self, len: u64) -> LockResult<()> {
        self.file_ref()?
            .set_len(len)
            .map_err(|e| LockError::file_op("truncating", &self.path, e))
    }

    fn file_ref(&self) -> LockResult<&File> {
        self.file.as_ref().ok_or_else(|| {
            LockError::file_op("using", &self.path, closed_error())
        })
    }

    fn file_io(&mut self) -> io::Result<&mut File> {
        self.file.as_mut().ok_or_else(closed_error)
    }

    /// Acquires the advisory lock in the mode implied by the access mode.
    ///
    /// Idempotent: if a lock is already held, returns immediately. The call
    /// blocks for an unbounded time if another holder excludes it; there is
    /// no timeout or cancellation.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or the lock call fails.
    pub fn lock(&mut self) -> LockResult<()> {
        if self.state.is_held() {
            return Ok(());
        }
        let mode = self.access.lock_mode();
        self.observer.on_event(LockEvent::Acquiring {
            path: &self.path,
            mode,
        });
        let file = self.file_ref()?;
        let res = match mode {
            LockMode::Shared => file.lock_shared(),
            LockMode::Exclusive => file.lock_exclusive(),
        };
        res.map_err(|e| LockError::file_op("locking", &self.path, e))?;
        self.state = match mode {
            LockMode::Shared => LockState::SharedHeld,
            LockMode::Exclusive => LockState::ExclusiveHeld,
        };
        self.observer.on_event(LockEvent::Acquired {
            path: &self.path,
            mode,
        });
        Ok(())
    }

    /// Releases the advisory lock.
    ///
    /// Idempotent: a no-op if no lock is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlock call fails; the state is left
    /// unchanged in that case.
    pub fn unlock(&mut self) -> LockResult<()> {
        if !self.state.is_held() {
            return Ok(());
        }
        self.file_ref()?
            .unlock()
            .map_err(|e| LockError::file_op("unlocking", &self.path, e))?;
        self.state = LockState::Unlocked;
        self.observer.on_event(LockEvent::Released { path: &self.path });
        Ok(())
    }

    /// Syncs, unlocks, and closes the handle, in that order.
    ///
    /// If the durability sync fails the error is returned immediately and
    /// the handle is left open and locked: the caller must learn that the
    /// data may not be durable before anything is released. A second call
    /// on an already-closed handle is a no-op returning `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync, unlock, or close step fails.
    pub fn close(&mut self) -> LockResult<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        file.sync_all()
            .map_err(|e| LockError::file_op("syncing", &self.path, e))?;
        self.unlock()?;
        // Dropping the File is the close; errors from the underlying
        // close(2) are not observable through std and are accepted here.
        self.file = None;
        Ok(())
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if self.state.is_held() {
                let _ = file.unlock();
                self.observer.on_event(LockEvent::Released { path: &self.path });
            }
        }
    }
}

impl Read for LockedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file_io()?.read(buf)
    }
}

impl Write for LockedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_io()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file_io()?.flush()
    }
}

impl Seek for LockedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file_io()?.seek(pos)
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "locked file is closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records every event it sees, for ordering assertions.
    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl LockObserver for RecordingObserver {
        fn on_event(&self, event: LockEvent<'_>) {
            let tag = match event {
                LockEvent::Acquiring { mode, .. } => format!("acquiring:{mode:?}"),
                LockEvent::Acquired { mode, .. } => format!("acquired:{mode:?}"),
                LockEvent::Released { .. } => "released".to_string(),
            };
            self.events.lock().unwrap().push(tag);
        }
    }

    #[test]
    fn read_only_open_takes_shared_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello").unwrap();

        let lf = LockedFile::open_locked(&path).unwrap();
        assert_eq!(lf.access_mode(), AccessMode::ReadOnly);
        assert_eq!(lf.lock_state(), LockState::SharedHeld);
    }

    #[test]
    fn write_open_takes_exclusive_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        let lf = LockedFile::options()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        assert_eq!(lf.access_mode(), AccessMode::ReadWrite);
        assert_eq!(lf.lock_state(), LockState::ExclusiveHeld);
    }

    #[test]
    fn open_missing_file_fails_with_path_context() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");

        let err = LockedFile::open_locked(&path).unwrap_err();
        assert!(matches!(err, LockError::FileOp { op: "opening", .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn lock_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"x").unwrap();

        let mut lf = LockedFile::open_locked(&path).unwrap();
        lf.lock().unwrap();
        lf.lock().unwrap();
        assert_eq!(lf.lock_state(), LockState::SharedHeld);
    }

    #[test]
    fn unlock_twice_is_a_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"x").unwrap();

        let mut lf = LockedFile::open_locked(&path).unwrap();
        lf.unlock().unwrap();
        assert_eq!(lf.lock_state(), LockState::Unlocked);
        lf.unlock().unwrap();
        assert_eq!(lf.lock_state(), LockState::Unlocked);
    }

    #[test]
    fn close_twice_is_a_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"x").unwrap();

        let mut lf = LockedFile::open_locked(&path).unwrap();
        lf.close().unwrap();
        lf.close().unwrap();
    }

    #[test]
    fn io_after_close_fails_without_panicking() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"x").unwrap();

        let mut lf = LockedFile::open_locked(&path).unwrap();
        lf.close().unwrap();

        let mut buf = [0u8; 1];
        let err = lf.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn truncate_is_applied_after_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"previous contents").unwrap();

        let lf = LockedFile::options()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        assert_eq!(lf.metadata().unwrap().len(), 0);
    }

    #[test]
    fn open_without_truncate_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"keep me").unwrap();

        let lf = LockedFile::options()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        assert_eq!(lf.metadata().unwrap().len(), 7);
    }

    #[test]
    fn observer_sees_acquire_then_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"x").unwrap();

        let observer = Arc::new(RecordingObserver::default());
        let mut lf = LockedFile::options()
            .read(true)
            .observer(observer.clone())
            .open(&path)
            .unwrap();
        lf.close().unwrap();

        assert_eq!(
            observer.events(),
            vec!["acquiring:Shared", "acquired:Shared", "released"]
        );
    }

    #[test]
    fn drop_releases_the_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"x").unwrap();

        let observer = Arc::new(RecordingObserver::default());
        {
            let _lf = LockedFile::options()
                .read(true)
                .observer(observer.clone())
                .open(&path)
                .unwrap();
        }
        assert_eq!(observer.events().last().unwrap(), "released");

        // Lock must be re-acquirable after the drop.
        let lf = LockedFile::options()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        assert_eq!(lf.lock_state(), LockState::ExclusiveHeld);
    }

    #[test]
    fn read_and_seek_through_the_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello world").unwrap();

        let mut lf = LockedFile::open_locked(&path).unwrap();
        let mut contents = String::new();
        lf.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello world");

        lf.seek(SeekFrom::Start(6)).unwrap();
        contents.clear();
        lf.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "world");
    }
}
