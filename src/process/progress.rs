//! Progress reporting and cooperative cancellation for the processor.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::geom::PixelRect;

/// Callback type for per-portion progress reports.
///
/// Invoked once for every fully retired portion with the portion's absolute
/// rectangle, after the portion's tiles have been released. Returning
/// `false` requests cooperative cancellation; the processor finishes the
/// portions already dispatched to other workers and pauses.
///
/// Invocations are serialized: even with multiple workers, two reports
/// never run concurrently.
pub type ProgressFn<'a> = Box<dyn Fn(PixelRect) -> bool + Send + Sync + 'a>;

/// Cancellation flag shared between workers.
///
/// Checked once per portion, at the point a worker is about to advance to
/// the next one. A kernel that has started is always run to completion.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Clear the flag, re-arming the token for a resumed run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());

        token.reset();
        assert!(!token.is_cancelled());
    }
}
