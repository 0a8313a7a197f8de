//! # lockfs
//!
//! Safe, cross-process coordinated access to a single file on a shared
//! filesystem, built on whole-file advisory locking.
//!
//! The crate owns the lifecycle discipline around the lock: acquiring the
//! right mode for the access pattern, releasing on every exit path, and a
//! read-modify-write transaction that appears atomic to other cooperating
//! processes.
//!
//! ## Design Principles
//!
//! - Locks are advisory: only processes that also take the lock are
//!   constrained
//! - Lock state is a tagged enum; illegal combinations are unrepresentable
//! - Cleanup (unlock, close, temp-file removal) is tied to scope, not to
//!   manual bookkeeping
//! - Lock diagnostics go through an injectable [`LockObserver`], not a
//!   process-global logger
//!
//! ## Scoped transactions
//!
//! - [`read_locked`] - shared lock around a read callback
//! - [`create_locked`] - exclusive-create plus exclusive lock around a
//!   write callback
//! - [`update_locked`] - exclusive lock around a read-modify-write
//!   callback, staged through a `<path>.tmp` sibling
//!
//! ## Example
//!
//! ```no_run
//! use std::io::{Read, Write};
//!
//! lockfs_core::ensure_dir("state/app.json")?;
//! lockfs_core::create_locked("state/app.json", |w| {
//!     w.write_all(b"{}")?;
//!     Ok(())
//! })?;
//! let contents = lockfs_core::read_locked("state/app.json", |r| {
//!     let mut buf = String::new();
//!     r.read_to_string(&mut buf)?;
//!     Ok(buf)
//! })?;
//! # Ok::<(), lockfs_core::LockError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod error;
mod lock;
mod observer;
mod txn;

pub use dir::{ensure_dir, DEFAULT_DIR_MODE};
pub use error::{LockError, LockResult};
pub use lock::{
    AccessMode, LockMode, LockState, LockedFile, OpenLockedOptions, DEFAULT_FILE_MODE,
};
pub use observer::{LockEvent, LockObserver, TracingObserver};
pub use txn::{create_locked, read_locked, update_locked, ReadSeek};
