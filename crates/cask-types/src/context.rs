use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TypeError;

/// Request context threaded through every long-running operation.
///
/// Carries a cooperative cancellation flag and an optional namespace tag.
/// Cancellation is checked between blobs during enumeration, scans and
/// restores; a `put` past its verify step runs to completion regardless.
#[derive(Clone, Debug, Default)]
pub struct Context {
    canceled: Arc<AtomicBool>,
    namespace: Option<String>,
}

impl Context {
    /// A fresh, never-canceled context with no namespace.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context tagged with a namespace.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            namespace: Some(namespace.into()),
        }
    }

    /// The namespace tag, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Request cancellation. Clones of this context observe the flag.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once `cancel` has been called.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Err(`Canceled`) once `cancel` has been called, Ok otherwise.
    pub fn check(&self) -> Result<(), TypeError> {
        if self.is_canceled() {
            return Err(TypeError::Canceled);
        }
        Ok(())
    }
}
