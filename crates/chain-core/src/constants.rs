/// Hex prefix a block digest must carry to satisfy the proof-of-work puzzle.
/// Fixed difficulty; there is no adjustment schedule.
pub const POW_TARGET_PREFIX: &str = "00";

pub const GENESIS_NONCE: u64 = 100;
pub const GENESIS_HASH: &str = "0";
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Fixed payout credited to a miner via an ordinary pending transaction.
pub const MINING_REWARD: u64 = 5;
/// Sentinel sender address for reward transactions.
pub const MINING_REWARD_SENDER: &str = "00";
