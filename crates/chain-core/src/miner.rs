use crate::pow::meets_target;
use crate::{hash_parts, BlockData};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Nonces tried between cancellation-flag reads.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Shared flag that lets a node abort an in-flight nonce search, e.g. when a
/// competing block for the same height arrives from a peer.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Same search as [`crate::pow::find_nonce`], polling `cancel` every
/// [`CANCEL_CHECK_INTERVAL`] nonces. Returns `None` once cancelled,
/// otherwise the same smallest satisfying nonce as the plain search.
pub fn find_nonce_cancellable(
    previous_hash: &str,
    data: &BlockData,
    cancel: &CancelToken,
) -> Option<u64> {
    let payload = data.serialized();
    let mut nonce = 0u64;
    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            info!(index = data.index, nonce, "nonce search cancelled");
            return None;
        }
        if meets_target(&hash_parts(previous_hash, nonce, &payload)) {
            info!(index = data.index, nonce, "nonce found");
            return Some(nonce);
        }
        nonce += 1;
    }
}
