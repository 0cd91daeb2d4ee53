use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::core::types::{Block, Hash256};
use crate::storage::{
    BlockInfo, BlockStore, PoolEntry, StorageError, StoreBatch, StoreOp, TxDescriptor,
};

#[derive(Default)]
struct Inner {
    blocks: HashMap<Hash256, Block>,
    infos: HashMap<Hash256, BlockInfo>,
    best: Option<Hash256>,
    heights: BTreeMap<u32, Hash256>,
    descriptors: HashMap<Hash256, TxDescriptor>,
    pool: HashMap<Hash256, PoolEntry>,
    pool_index: BTreeMap<u64, Hash256>,
    next_seq: u64,
}

/// In-memory [`BlockStore`] for tests and ephemeral nodes.
///
/// A single `RwLock` around the maps gives readers the atomic snapshot
/// visibility the contract asks for; `commit` applies a whole batch under
/// one write guard.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl BlockStore for MemoryStore {
    fn block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        Ok(self.inner.read().blocks.get(hash).cloned())
    }

    fn block_info(&self, hash: &Hash256) -> Result<Option<BlockInfo>, StorageError> {
        Ok(self.inner.read().infos.get(hash).cloned())
    }

    fn has_block(&self, hash: &Hash256) -> Result<bool, StorageError> {
        Ok(self.inner.read().blocks.contains_key(hash))
    }

    fn best_block_hash(&self) -> Result<Option<Hash256>, StorageError> {
        Ok(self.inner.read().best)
    }

    fn block_hash_at(&self, height: u32) -> Result<Option<Hash256>, StorageError> {
        Ok(self.inner.read().heights.get(&height).copied())
    }

    fn descriptor(&self, txid: &Hash256) -> Result<Option<TxDescriptor>, StorageError> {
        Ok(self.inner.read().descriptors.get(txid).cloned())
    }

    fn pool_entry(&self, txid: &Hash256) -> Result<Option<PoolEntry>, StorageError> {
        Ok(self.inner.read().pool.get(txid).cloned())
    }

    fn pool_entries(&self) -> Result<Vec<(u64, Hash256)>, StorageError> {
        Ok(self
            .inner
            .read()
            .pool_index
            .iter()
            .map(|(seq, txid)| (*seq, *txid))
            .collect())
    }

    fn next_pool_sequence(&self) -> Result<u64, StorageError> {
        Ok(self.inner.read().next_seq)
    }

    fn commit(&self, batch: StoreBatch) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        for op in batch.ops {
            match op {
                StoreOp::PutBlock(hash, block) => {
                    inner.blocks.insert(hash, block);
                }
                StoreOp::PutBlockInfo(hash, info) => {
                    inner.infos.insert(hash, info);
                }
                StoreOp::PutBestBlock(hash) => {
                    inner.best = Some(hash);
                }
                StoreOp::PutHashAtHeight(height, hash) => {
                    inner.heights.insert(height, hash);
                }
                StoreOp::DeleteHashAtHeight(height) => {
                    inner.heights.remove(&height);
                }
                StoreOp::PutDescriptor(txid, desc) => {
                    inner.descriptors.insert(txid, desc);
                }
                StoreOp::DeleteDescriptor(txid) => {
                    inner.descriptors.remove(&txid);
                }
                StoreOp::PutPoolEntry(txid, entry) => {
                    inner.pool_index.insert(entry.sequence, txid);
                    inner.pool.insert(txid, entry);
                }
                StoreOp::DeletePoolEntry(txid, sequence) => {
                    inner.pool.remove(&txid);
                    inner.pool_index.remove(&sequence);
                }
                StoreOp::PutPoolSequence(next) => {
                    inner.next_seq = next;
                }
            }
        }
        Ok(())
    }
}
