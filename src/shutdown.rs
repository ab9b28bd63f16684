//! Shutdown coordination utilities.
//!
//! A [`ShutdownCoordinator`] is shared by every unit of work. It has two
//! levels:
//!
//! - **graceful** ([`ShutdownCoordinator::request_shutdown`]): units finish the
//!   page they are on (commit and checkpoint) and stop before the next one.
//! - **abort** ([`ShutdownCoordinator::request_abort`]): additionally cuts
//!   short backoff sleeps and quota waits. Checkpoints are left at their last
//!   fully advanced value.
//!
//! An abort implies a graceful shutdown.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register a global shutdown handle so subsystems can discover it lazily.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// Retrieve the registered global shutdown handle, if available.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// Coordinates graceful and immediate shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    is_abort: AtomicBool,
    shutdown_notify: Notify,
    abort_notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request a graceful shutdown. Notifies waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.shutdown_notify.notify_waiters();
        }
    }

    /// Request an immediate shutdown (implies a graceful one).
    pub fn request_abort(&self) {
        self.request_shutdown();
        if !self.is_abort.swap(true, Ordering::SeqCst) {
            self.abort_notify.notify_waiters();
        }
    }

    /// Whether any shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Whether an immediate shutdown has been requested.
    pub fn is_abort_requested(&self) -> bool {
        self.is_abort.load(Ordering::SeqCst)
    }

    /// Wait until a graceful shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.shutdown_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Wait until an abort is requested. Returns immediately if already set.
    pub async fn wait_for_abort(&self) {
        let notified = self.abort_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_abort_requested() {
            return;
        }
        notified.await;
    }
}
