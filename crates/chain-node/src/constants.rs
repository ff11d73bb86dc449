use std::time::Duration;

/// Upper bound on any single peer round-trip. Fan-out is best effort: a peer
/// that misses this deadline is recorded as failed and never stalls the
/// local operation.
pub(crate) const PEER_TIMEOUT: Duration = Duration::from_secs(5);
