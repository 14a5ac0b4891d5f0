//! Application lifecycle abstraction.
//!
//! Components that need to stop the whole bridge (the supervisor after a
//! clean display server exit, the server on SIGINT/SIGTERM) go through
//! [`Lifecycle`] instead of exiting the process themselves.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Trait for application lifecycle operations.
///
/// # Example
///
/// ```ignore
/// struct Watcher {
///     lifecycle: Arc<dyn Lifecycle>,
/// }
///
/// impl Watcher {
///     fn on_child_stopped(&self) {
///         self.lifecycle.request_shutdown("display server stopped");
///     }
/// }
/// ```
pub trait Lifecycle: Send + Sync {
    /// Requests a graceful shutdown. Repeated requests are ignored.
    fn request_shutdown(&self, reason: &str);

    /// Whether shutdown has been requested.
    fn is_shutting_down(&self) -> bool;

    /// Token cancelled when shutdown is requested.
    fn token(&self) -> CancellationToken;
}

/// Lifecycle backed by a [`CancellationToken`].
///
/// The first reason given is kept for the exit log line.
#[derive(Default)]
pub struct ShutdownLifecycle {
    token: CancellationToken,
    reason: Mutex<Option<String>>,
}

impl ShutdownLifecycle {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Mutex::new(None),
        }
    }

    /// Why shutdown was first requested.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

impl Lifecycle for ShutdownLifecycle {
    fn request_shutdown(&self, reason: &str) {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                log::debug!("[Lifecycle] Shutdown already requested, ignoring: {}", reason);
                return;
            }
            *slot = Some(reason.to_string());
        }
        log::info!("[Lifecycle] Shutdown requested: {}", reason);
        self.token.cancel();
    }

    fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
