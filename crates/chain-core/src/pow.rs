use crate::constants::POW_TARGET_PREFIX;
use crate::{hash_parts, BlockData};

/// Whether a digest satisfies the fixed proof-of-work target.
pub fn meets_target(digest: &str) -> bool {
    digest.starts_with(POW_TARGET_PREFIX)
}

/// Sequential nonce search: start at 0, step by 1, stop at the first digest
/// carrying the target prefix. The winner is therefore also the smallest
/// satisfying nonce. Blocking, CPU-bound, and unbounded in the worst case;
/// callers that need to abort use [`crate::miner::find_nonce_cancellable`].
pub fn find_nonce(previous_hash: &str, data: &BlockData) -> u64 {
    let payload = data.serialized();
    let mut nonce = 0u64;
    loop {
        if meets_target(&hash_parts(previous_hash, nonce, &payload)) {
            return nonce;
        }
        nonce += 1;
    }
}
