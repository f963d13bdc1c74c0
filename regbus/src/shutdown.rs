use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag observed at the top of every [`poll`] iteration
///
/// Tripping the flag is a single atomic store, so it is safe to do from
/// signal-handler style contexts; the actual resource release happens on the
/// thread that drives the poll loop.
///
/// [`poll`]: crate::server::Server::poll
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a new, untripped signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown
    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once shutdown has been requested
    pub fn is_signaled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
