//! One-shot cancellation signal
//!
//! [`CancellationToken`] wraps [`tokio_util::sync::CancellationToken`] so a
//! wait can be raced against it in `select!`, and adds callbacks that run when
//! the token fires. Callbacks run at most once: those registered before
//! [`cancel`](CancellationToken::cancel) run inside it, those registered after
//! run immediately.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken as TokioCancellationToken;

type CancelCallback = Box<dyn FnOnce() + Send>;

/// Cancellation signal shared between a caller and an in-flight request
///
/// Clones observe and fire the same signal.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    token: TokioCancellationToken,
    /// `None` once the callbacks have been taken by `cancel()`
    callbacks: Mutex<Option<Vec<CancelCallback>>>,
}

impl CancellationToken {
    /// Create a token that has not fired
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                token: TokioCancellationToken::new(),
                callbacks: Mutex::new(Some(Vec::new())),
            }),
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Fire the token
    ///
    /// Idempotent: only the first call runs the registered callbacks.
    pub fn cancel(&self) {
        let Some(callbacks) = self.inner.callbacks.lock().take() else {
            return;
        };
        self.inner.token.cancel();
        for callback in callbacks {
            run_callback(callback);
        }
    }

    /// Run `callback` when the token fires, or right away if it already has
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        let callback: CancelCallback = Box::new(callback);
        {
            let mut slot = self.inner.callbacks.lock();
            if let Some(callbacks) = slot.as_mut() {
                callbacks.push(callback);
                return;
            }
        }
        run_callback(callback);
    }

    /// Completes once the token fires
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

fn run_callback(callback: CancelCallback) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::warn!("Cancellation callback panicked");
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}
