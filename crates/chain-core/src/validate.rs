use crate::constants::{GENESIS_HASH, GENESIS_NONCE, GENESIS_PREVIOUS_HASH};
use crate::pow::meets_target;
use crate::{block_hash, Block, BlockData};

/// Structural and proof-of-work check over a whole candidate chain.
///
/// Every link is recomputed and every check runs even after a failure has
/// already been found; the result is the AND of all individual checks. The
/// genesis block is verified against its fixed sentinel fields instead of a
/// recomputed hash.
pub fn chain_is_valid(chain: &[Block]) -> bool {
    let Some(genesis) = chain.first() else {
        return false;
    };

    let mut valid = true;

    for pair in chain.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let data = BlockData {
            transactions: cur.transactions.clone(),
            index: cur.index,
        };
        if !meets_target(&block_hash(&prev.hash, cur.nonce, &data)) {
            valid = false;
        }
        if cur.previous_block_hash != prev.hash {
            valid = false;
        }
    }

    let correct_nonce = genesis.nonce == GENESIS_NONCE;
    let correct_previous_hash = genesis.previous_block_hash == GENESIS_PREVIOUS_HASH;
    let correct_hash = genesis.hash == GENESIS_HASH;
    let correct_transactions = genesis.transactions.is_empty();
    if !correct_nonce || !correct_previous_hash || !correct_hash || !correct_transactions {
        valid = false;
    }

    valid
}
