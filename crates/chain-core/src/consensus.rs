use crate::validate::chain_is_valid;
use crate::{Ledger, NodeSnapshot};
use tracing::{debug, info};

/// Result of a longest-chain resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusOutcome {
    /// A strictly longer, valid peer chain was adopted. The pending pool was
    /// replaced wholesale along with it; local not-yet-mined transactions
    /// are discarded.
    Replaced,
    /// No peer chain was both strictly longer and valid; local state is
    /// untouched.
    Retained,
}

/// Longest-valid-chain rule over peer snapshots.
///
/// Only the single longest candidate is considered: ties with the local
/// chain never win, and an invalid longest candidate leaves the local chain
/// in place even when a shorter (but still longer-than-local) valid one
/// exists.
pub fn resolve(
    ledger: &mut Ledger,
    snapshots: impl IntoIterator<Item = NodeSnapshot>,
) -> ConsensusOutcome {
    let mut max_len = ledger.chain().len();
    let mut candidate = None;

    for snapshot in snapshots {
        if snapshot.chain.len() > max_len {
            max_len = snapshot.chain.len();
            candidate = Some(snapshot);
        }
    }

    match candidate {
        Some(snapshot) if chain_is_valid(&snapshot.chain) => {
            info!(
                from = %snapshot.current_node_url,
                new_len = snapshot.chain.len(),
                "adopting longer peer chain"
            );
            ledger.replace_chain(snapshot.chain, snapshot.pending_transactions);
            ConsensusOutcome::Replaced
        }
        other => {
            if other.is_some() {
                debug!("longest peer chain failed validation, keeping local chain");
            }
            ConsensusOutcome::Retained
        }
    }
}
