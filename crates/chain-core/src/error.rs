use thiserror::Error;

/// Why an externally mined block was turned away. Rejection leaves the
/// ledger untouched and is reported to the caller, never raised as a fatal
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockRejected {
    #[error("previous block hash {actual} does not match the chain tip {expected}")]
    TipMismatch { expected: String, actual: String },

    #[error("block index {actual} is not the next height {expected}")]
    IndexMismatch { expected: u64, actual: u64 },
}
