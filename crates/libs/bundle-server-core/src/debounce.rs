//! Trailing-edge debouncing for subscriber events.
//!
//! Upstream watches can fire in bursts (a multi-key commit lands as many
//! notifications); the debouncer collapses a burst into a single callback
//! invocation once the window has been quiet.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default quiet window between the last event and the callback firing.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(200);

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Trailing-edge debouncer. Safe to invoke from any task concurrently.
#[derive(Clone)]
pub struct Debouncer {
    window: Duration,
    generation: Arc<AtomicU64>,
    callback: Callback,
}

impl Debouncer {
    pub fn new(window: Duration, callback: Callback) -> Self {
        Debouncer {
            window,
            generation: Arc::new(AtomicU64::new(0)),
            callback,
        }
    }

    /// Records an event. The callback fires `window` later unless another
    /// event supersedes this one first.
    pub fn call(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = Arc::clone(&self.generation);
        let callback = Arc::clone(&self.callback);
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if latest.load(Ordering::SeqCst) == generation {
                callback();
            }
        });
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
