//! Storage contract consumed by the chain core.
//!
//! The core persists through the [`BlockStore`] trait: blocks and their
//! metadata, the best-block pointer, the height index, per-transaction
//! descriptors and the disk-pool namespace. Every mutating chain operation
//! is staged in a [`StoreTxn`] overlay and lands as a single atomic
//! [`StoreBatch`], so a crash leaves either the old or the new state
//! visible, never a mix.

mod memory;
mod sled;
mod txn;

pub use self::memory::MemoryStore;
pub use self::sled::SledStore;
pub use self::txn::StoreTxn;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction};

// ─── Block Metadata ──────────────────────────────────────────────────

/// Metadata kept for every known block, on the main chain or on a fork
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockInfo {
    pub height: u32,
    pub header: BlockHeader,
    /// Cumulative work from genesis through this block
    pub chain_work: U256,
    /// The child on the best chain; `None` for tips and fork blocks
    pub next_block_hash: Option<Hash256>,
    pub transaction_count: u32,
    pub block_size: u32,
}

impl BlockInfo {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

// ─── Transaction Descriptors ─────────────────────────────────────────

/// Where the serialized transaction lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxLocation {
    /// On the best chain: transaction `index` of block `block_hash`
    Block { block_hash: Hash256, index: u32 },
    /// In the disk-pool, ordered by admission `sequence`
    Pool { sequence: u64 },
}

/// Per-transaction record: where the tx lives and, for each of its
/// outputs, the input currently claiming it. A claim names the spender as
/// `(spending txid, input index)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxDescriptor {
    pub location: TxLocation,
    pub spends: Vec<Option<OutPoint>>,
}

impl TxDescriptor {
    pub fn new(location: TxLocation, output_count: usize) -> Self {
        TxDescriptor { location, spends: vec![None; output_count] }
    }

    pub fn in_pool(&self) -> bool {
        matches!(self.location, TxLocation::Pool { .. })
    }
}

/// A disk-pool entry: the serialized transaction plus its admission order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolEntry {
    pub sequence: u64,
    pub tx: Transaction,
}

// ─── Atomic Batches ──────────────────────────────────────────────────

/// A single write in a [`StoreBatch`]
#[derive(Debug, Clone)]
pub enum StoreOp {
    PutBlock(Hash256, Block),
    PutBlockInfo(Hash256, BlockInfo),
    PutBestBlock(Hash256),
    PutHashAtHeight(u32, Hash256),
    DeleteHashAtHeight(u32),
    PutDescriptor(Hash256, TxDescriptor),
    DeleteDescriptor(Hash256),
    PutPoolEntry(Hash256, PoolEntry),
    DeletePoolEntry(Hash256, u64),
    PutPoolSequence(u64),
}

/// An ordered group of writes committed atomically
#[derive(Debug, Default)]
pub struct StoreBatch {
    pub ops: Vec<StoreOp>,
}

// ─── The Store Contract ──────────────────────────────────────────────

/// Abstract storage consumed by the chain core.
///
/// Implementations must give every read an atomic snapshot view and apply
/// [`commit`](BlockStore::commit) batches all-or-nothing.
pub trait BlockStore: Send + Sync {
    fn block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError>;
    fn block_info(&self, hash: &Hash256) -> Result<Option<BlockInfo>, StorageError>;
    fn has_block(&self, hash: &Hash256) -> Result<bool, StorageError>;

    fn best_block_hash(&self) -> Result<Option<Hash256>, StorageError>;
    fn block_hash_at(&self, height: u32) -> Result<Option<Hash256>, StorageError>;

    fn descriptor(&self, txid: &Hash256) -> Result<Option<TxDescriptor>, StorageError>;
    fn pool_entry(&self, txid: &Hash256) -> Result<Option<PoolEntry>, StorageError>;
    /// All pool entries as `(sequence, txid)`, ascending by sequence
    fn pool_entries(&self) -> Result<Vec<(u64, Hash256)>, StorageError>;
    /// The next unused pool sequence number
    fn next_pool_sequence(&self) -> Result<u64, StorageError>;

    /// Apply a batch atomically
    fn commit(&self, batch: StoreBatch) -> Result<(), StorageError>;

    fn block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, StorageError> {
        Ok(self.block_info(hash)?.map(|info| info.header))
    }

    /// Look up a transaction wherever it lives: a best-chain block or the
    /// disk-pool, resolved through its descriptor.
    fn transaction(&self, txid: &Hash256) -> Result<Option<Transaction>, StorageError> {
        match self.descriptor(txid)? {
            Some(desc) => match desc.location {
                TxLocation::Block { block_hash, index } => {
                    let block = self.block(&block_hash)?.ok_or_else(|| {
                        StorageError::Corruption(format!(
                            "descriptor points at missing block {}",
                            hex::encode(block_hash)
                        ))
                    })?;
                    match block.transactions.get(index as usize) {
                        Some(tx) => Ok(Some(tx.clone())),
                        None => Err(StorageError::Corruption(format!(
                            "descriptor index {} out of range for block {}",
                            index,
                            hex::encode(block_hash)
                        ))),
                    }
                }
                TxLocation::Pool { .. } => Ok(self.pool_entry(txid)?.map(|entry| entry.tx)),
            },
            None => Ok(None),
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum StorageError {
    DbError(String),
    SerializeError(String),
    /// Stored records contradict each other (a descriptor pointing at a
    /// missing block, a height entry without metadata, ...)
    Corruption(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::DbError(e) => write!(f, "database error: {}", e),
            StorageError::SerializeError(e) => write!(f, "serialization error: {}", e),
            StorageError::Corruption(e) => write!(f, "storage corruption: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}
