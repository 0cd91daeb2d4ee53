use crate::core::types::OutPoint;
use crate::storage::StorageError;

/// Errors produced by the chain core.
///
/// Duplicate blocks are not an error: `put_block` returns `Ok(false)` and
/// the submission is swallowed, because the network layer re-announces.
#[derive(Debug)]
pub enum ChainError {
    /// A second block with an all-zero parent after genesis was accepted
    DuplicateGenesis,
    /// `put_block` reached with an unknown parent — the processor should
    /// have routed this block to the orphanage
    ParentBlockMissing,
    /// Height outside `[0, best_height]`
    InvalidBlockHeight(u32),
    /// Transaction missing or output index out of range
    InvalidOutPoint(OutPoint),
    /// The referenced output is already spent by a different best-chain input
    InputAlreadySpent(OutPoint),
    /// An input's outpoint did not resolve during block attachment
    InputMissing(OutPoint),
    /// Pool admission found unresolvable outpoints; the caller may park
    /// the transaction in the orphanage against each of them
    MissingInputs(Vec<OutPoint>),
    /// Coinbase transactions are unspendable outside their block
    CoinbaseInPool,
    /// A best-branch attach failed; the chain has been rolled back to the
    /// original best and the offending block stays on its fork
    ReorgFailed,
    /// Serialized block exceeds `MAX_BLOCK_SIZE`
    BlockTooLarge(usize),
    /// Malformed compact difficulty target, or one easier than
    /// `MAX_TARGET_BITS`
    InvalidBits(u32),
    Storage(StorageError),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::DuplicateGenesis => write!(f, "a genesis block already exists"),
            ChainError::ParentBlockMissing => write!(f, "parent block not in storage"),
            ChainError::InvalidBlockHeight(h) => write!(f, "no best-chain block at height {}", h),
            ChainError::InvalidOutPoint(op) => write!(f, "invalid outpoint {}", op),
            ChainError::InputAlreadySpent(op) => write!(f, "output {} is already spent", op),
            ChainError::InputMissing(op) => write!(f, "input {} did not resolve", op),
            ChainError::MissingInputs(missing) => match missing.first() {
                Some(op) => write!(f, "{} unresolvable input(s), first {}", missing.len(), op),
                None => write!(f, "unresolvable inputs"),
            },
            ChainError::CoinbaseInPool => write!(f, "coinbase not allowed in the pool"),
            ChainError::ReorgFailed => write!(f, "reorganization failed and was rolled back"),
            ChainError::BlockTooLarge(size) => {
                write!(f, "block of {} bytes exceeds the size limit", size)
            }
            ChainError::InvalidBits(bits) => {
                write!(f, "malformed compact target {:#010x}", bits)
            }
            ChainError::Storage(e) => write!(f, "storage failure: {}", e),
        }
    }
}

impl std::error::Error for ChainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChainError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for ChainError {
    fn from(e: StorageError) -> Self {
        ChainError::Storage(e)
    }
}
