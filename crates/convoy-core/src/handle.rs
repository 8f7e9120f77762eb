//! Single-assignment result handles
//!
//! A [`Handle`] is the unit every batched request ultimately produces: a
//! shared slot that is pending until exactly one writer resolves it with a
//! value or an error, after which any number of readers observe the
//! outcome. Resolving a handle twice is an invariant violation and reports
//! [`ConvoyError::DoubleCompletion`] instead of silently overwriting.

use convoy_common::{ConvoyError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

enum HandleState<T> {
    Pending,
    Ready(T),
    Failed(ConvoyError),
}

struct HandleInner<T> {
    state: Mutex<HandleState<T>>,
    changed: watch::Sender<bool>,
}

/// Shared single-assignment future/promise.
///
/// Cloning a handle clones the reference, not the slot: all clones observe
/// the same resolution. Single writer, many readers.
pub struct Handle<T> {
    inner: Arc<HandleInner<T>>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Default for Handle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        let label = match &*state {
            HandleState::Pending => "pending",
            HandleState::Ready(_) => "ready",
            HandleState::Failed(_) => "failed",
        };
        f.debug_struct("Handle").field("state", &label).finish()
    }
}

impl<T: Clone> Handle<T> {
    /// Create a new pending handle
    pub fn new() -> Self {
        let (changed, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                state: Mutex::new(HandleState::Pending),
                changed,
            }),
        }
    }

    /// Resolve the handle with a value.
    ///
    /// Fails with [`ConvoyError::DoubleCompletion`] if the handle was
    /// already resolved.
    pub fn complete(&self, value: T) -> Result<()> {
        self.resolve(HandleState::Ready(value))
    }

    /// Resolve the handle with an error.
    ///
    /// Fails with [`ConvoyError::DoubleCompletion`] if the handle was
    /// already resolved.
    pub fn fail(&self, err: ConvoyError) -> Result<()> {
        self.resolve(HandleState::Failed(err))
    }

    fn resolve(&self, next: HandleState<T>) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match &*state {
                HandleState::Pending => *state = next,
                _ => {
                    return Err(ConvoyError::DoubleCompletion(
                        "handle already resolved".to_string(),
                    ))
                }
            }
        }
        // Wakes every reader parked in resolved()
        let _ = self.inner.changed.send(true);
        Ok(())
    }

    /// Non-blocking probe: `None` while pending, otherwise the outcome.
    pub fn peek(&self) -> Option<std::result::Result<T, ConvoyError>> {
        let state = self.inner.state.lock();
        match &*state {
            HandleState::Pending => None,
            HandleState::Ready(value) => Some(Ok(value.clone())),
            HandleState::Failed(err) => Some(Err(err.clone())),
        }
    }

    /// Returns true once the handle carries a value or an error
    pub fn is_resolved(&self) -> bool {
        !matches!(*self.inner.state.lock(), HandleState::Pending)
    }

    /// Wait for resolution, then return the value or re-raise the error.
    pub async fn resolved(&self) -> std::result::Result<T, ConvoyError> {
        let mut rx = self.inner.changed.subscribe();
        loop {
            if let Some(outcome) = self.peek() {
                return outcome;
            }
            // The sender lives inside our own Arc, so changed() cannot
            // observe a closed channel while self is alive.
            if rx.changed().await.is_err() {
                return Err(ConvoyError::Internal(
                    "handle dropped while pending".to_string(),
                ));
            }
        }
    }
}
