//! # chainforge
//!
//! The chain core of a Bitcoin-style cryptocurrency node: ingest blocks
//! and loose transactions from peers, decide which chain of blocks is the
//! canonical history, and maintain the auxiliary indexes — a disk-pool of
//! unconfirmed transactions, orphan pools for out-of-order arrivals, and
//! the inventory predicate the p2p layer uses to suppress redundant
//! fetches.
//!
//! The networking stack, RPC surface, wallet, script interpreter and
//! miner are external consumers. Persistence goes through the
//! [`storage::BlockStore`] contract; [`storage::SledStore`] and
//! [`storage::MemoryStore`] are the shipped backends.
//!
//! ```
//! use std::sync::Arc;
//! use chainforge::{Blockchain, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let chain = Blockchain::new(store).unwrap();
//! assert_eq!(chain.best_block_height(), None);
//! ```

pub mod chain;
pub mod core;
pub mod storage;

pub use crate::chain::{
    BlockOrphanage, BlockProcessor, Blockchain, ChainBlock, ChainError, ChainEventListener,
    ChainIter, InventoryProcessor, TransactionOrphanage, TransactionProcessor,
};
pub use crate::core::types::{
    Block, BlockHeader, Hash256, InvKind, InvVector, OutPoint, Transaction, TxInput, TxOutput,
    NULL_HASH,
};
pub use crate::storage::{
    BlockInfo, BlockStore, MemoryStore, PoolEntry, SledStore, StorageError, StoreBatch,
    StoreOp, StoreTxn, TxDescriptor, TxLocation,
};
