//! Cancellable execution context for copy operations

use crate::error::{GantryError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Carries the cancellation signal into every network call of a copy.
///
/// Cancelling drops the in-flight future, which aborts the underlying request.
/// Work already completed (uploaded blobs) is left in place.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
}

/// Cancels the [`Context`] it was created with, and every clone of it
#[derive(Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Context {
    pub fn with_cancel() -> (Self, CancelHandle) {
        let token = CancellationToken::new();
        (
            Self {
                token: token.clone(),
            },
            CancelHandle { token },
        )
    }

    /// A context that is never cancelled
    pub fn background() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `fut` unless the context is cancelled first
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(GantryError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(GantryError::Cancelled),
            res = fut => res,
        }
    }
}
