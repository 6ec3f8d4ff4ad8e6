use std::sync::Arc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Why an in-flight transfer was interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortReason {
    Pause,
    Cancel,
    Remove,
}

/// Cancellation handle registered per task while a transfer attempt is alive.
///
/// `attempt` is unique per transfer, so a settling transfer can tell whether
/// the registry entry still belongs to it.
#[derive(Debug, Clone)]
pub(crate) struct AbortHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<AbortReason>>>,
    attempt: u64,
}

impl AbortHandle {
    pub(crate) fn new(attempt: u64) -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
            attempt,
        }
    }

    pub(crate) fn attempt(&self) -> u64 {
        self.attempt
    }

    /// The first reason wins; later calls are no-ops.
    pub(crate) fn abort(&self, reason: AbortReason) {
        {
            let mut current = self.reason.lock();
            if current.is_some() {
                return;
            }
            *current = Some(reason);
        }
        self.token.cancel();
    }

    pub(crate) fn reason(&self) -> Option<AbortReason> {
        *self.reason.lock()
    }

    pub(crate) async fn aborted(&self) {
        self.token.cancelled().await
    }
}
