//! Trailing-edge debouncing for triggers, and the hook the cancellation
//! path uses to drop deferred invocations.
//!
//! ```ignore
//! let debouncer = Debouncer::new(Duration::from_millis(250));
//!
//! // Only the last of these runs, 250ms after it was scheduled
//! debouncer.schedule(search("r"));
//! debouncer.schedule(search("ru"));
//! debouncer.schedule(search("rust"));
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Something holding deferred trigger invocations for a channel.
///
/// The dispatcher calls [`cancel_pending`](Self::cancel_pending) on every
/// hook registered for a channel when that channel is explicitly canceled
/// or the dispatcher is reset.
pub trait PendingTriggers: Send + Sync {
    /// Drop every invocation that has not fired yet
    fn cancel_pending(&self);
}

/// Coalesces rapid calls: only the last call within the window runs.
///
/// Clones share the same schedule.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    /// Create a debouncer with the given window
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The debounce window
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Schedule `invocation` to run after the window, superseding any
    /// invocation that has not fired yet.
    ///
    /// The returned task resolves to `true` if the invocation ran.
    pub fn schedule<F>(&self, invocation: F) -> JoinHandle<bool>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let scheduled = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if generation.load(Ordering::SeqCst) != scheduled {
                tracing::trace!("debounced invocation superseded");
                return false;
            }
            invocation.await;
            true
        })
    }
}

impl PendingTriggers for Debouncer {
    fn cancel_pending(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
