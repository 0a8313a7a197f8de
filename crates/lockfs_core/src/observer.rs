//! Lock lifecycle observation.
//!
//! Every lock acquisition and release on a [`crate::LockedFile`] is
//! reported to a [`LockObserver`]. The stock [`TracingObserver`] forwards
//! events to the `tracing` subscriber; tests substitute a recording
//! observer to assert on lock ordering without a global logger.

use std::path::Path;
use std::sync::Arc;

use crate::lock::LockMode;

/// A lock lifecycle event.
///
/// `Acquiring` is emitted before the (potentially blocking) lock call,
/// `Acquired` after it returns successfully. `Released` is emitted after a
/// successful unlock, including the implicit unlock performed by `close`
/// or by dropping a still-locked handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent<'a> {
    /// A lock acquisition is about to start and may block.
    Acquiring {
        /// The file being locked.
        path: &'a Path,
        /// The mode being requested.
        mode: LockMode,
    },
    /// A lock was acquired.
    Acquired {
        /// The file that was locked.
        path: &'a Path,
        /// The mode that was granted.
        mode: LockMode,
    },
    /// A lock was released.
    Released {
        /// The file that was unlocked.
        path: &'a Path,
    },
}

/// Receives lock lifecycle events from a [`crate::LockedFile`].
///
/// Implementations must be cheap and must not panic; they are invoked on
/// every lock and unlock, including the cleanup paths of failed
/// transactions.
pub trait LockObserver: Send + Sync {
    /// Called for each lock lifecycle event.
    fn on_event(&self, event: LockEvent<'_>);
}

/// The default observer: emits each event as a `tracing` debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LockObserver for TracingObserver {
    fn on_event(&self, event: LockEvent<'_>) {
        match event {
            LockEvent::Acquiring { path, mode } => {
                tracing::debug!(?path, ?mode, "acquiring lock");
            }
            LockEvent::Acquired { path, mode } => {
                tracing::debug!(?path, ?mode, "acquired lock");
            }
            LockEvent::Released { path } => {
                tracing::debug!(?path, "released lock");
            }
        }
    }
}

/// Returns the observer used when none is configured.
pub(crate) fn default_observer() -> Arc<dyn LockObserver> {
    Arc::new(TracingObserver)
}
