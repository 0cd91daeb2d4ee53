use std::collections::HashMap;

use crate::core::types::{Block, Hash256};
use crate::storage::{
    BlockInfo, BlockStore, PoolEntry, StorageError, StoreBatch, StoreOp, TxDescriptor,
};

enum PoolWrite {
    Put(PoolEntry),
    Delete(u64),
}

/// Read-through write overlay over a [`BlockStore`].
///
/// Chain mutations stage every write here; reads see the staged state
/// layered over the underlying store. [`into_batch`](StoreTxn::into_batch)
/// turns the staged writes into one atomic [`StoreBatch`]. Dropping the
/// overlay without committing discards the mutation entirely — that is the
/// rollback path.
pub struct StoreTxn<'a> {
    store: &'a dyn BlockStore,
    blocks: HashMap<Hash256, Block>,
    infos: HashMap<Hash256, BlockInfo>,
    best: Option<Hash256>,
    heights: HashMap<u32, Option<Hash256>>,
    descriptors: HashMap<Hash256, Option<TxDescriptor>>,
    pool: HashMap<Hash256, PoolWrite>,
    next_seq: Option<u64>,
}

impl<'a> StoreTxn<'a> {
    pub fn new(store: &'a dyn BlockStore) -> Self {
        StoreTxn {
            store,
            blocks: HashMap::new(),
            infos: HashMap::new(),
            best: None,
            heights: HashMap::new(),
            descriptors: HashMap::new(),
            pool: HashMap::new(),
            next_seq: None,
        }
    }

    // ─── Reads (overlay first, then store) ───────────────────────────

    pub fn block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        if let Some(block) = self.blocks.get(hash) {
            return Ok(Some(block.clone()));
        }
        self.store.block(hash)
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool, StorageError> {
        if self.blocks.contains_key(hash) {
            return Ok(true);
        }
        self.store.has_block(hash)
    }

    pub fn block_info(&self, hash: &Hash256) -> Result<Option<BlockInfo>, StorageError> {
        if let Some(info) = self.infos.get(hash) {
            return Ok(Some(info.clone()));
        }
        self.store.block_info(hash)
    }

    pub fn best_block_hash(&self) -> Result<Option<Hash256>, StorageError> {
        if let Some(best) = self.best {
            return Ok(Some(best));
        }
        self.store.best_block_hash()
    }

    pub fn block_hash_at(&self, height: u32) -> Result<Option<Hash256>, StorageError> {
        if let Some(entry) = self.heights.get(&height) {
            return Ok(*entry);
        }
        self.store.block_hash_at(height)
    }

    pub fn descriptor(&self, txid: &Hash256) -> Result<Option<TxDescriptor>, StorageError> {
        if let Some(entry) = self.descriptors.get(txid) {
            return Ok(entry.clone());
        }
        self.store.descriptor(txid)
    }

    pub fn pool_entry(&self, txid: &Hash256) -> Result<Option<PoolEntry>, StorageError> {
        match self.pool.get(txid) {
            Some(PoolWrite::Put(entry)) => Ok(Some(entry.clone())),
            Some(PoolWrite::Delete(_)) => Ok(None),
            None => self.store.pool_entry(txid),
        }
    }

    /// Pool entries as `(sequence, txid)` with the overlay applied,
    /// ascending by sequence
    pub fn pool_entries(&self) -> Result<Vec<(u64, Hash256)>, StorageError> {
        let mut entries: Vec<(u64, Hash256)> = self
            .store
            .pool_entries()?
            .into_iter()
            .filter(|(_, txid)| !self.pool.contains_key(txid))
            .collect();
        for (txid, write) in &self.pool {
            if let PoolWrite::Put(entry) = write {
                entries.push((entry.sequence, *txid));
            }
        }
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        Ok(entries)
    }

    // ─── Writes (staged) ─────────────────────────────────────────────

    pub fn put_block(&mut self, hash: Hash256, block: Block) {
        self.blocks.insert(hash, block);
    }

    pub fn put_block_info(&mut self, info: BlockInfo) {
        self.infos.insert(info.hash(), info);
    }

    pub fn set_best_block(&mut self, hash: Hash256) {
        self.best = Some(hash);
    }

    pub fn put_hash_at_height(&mut self, height: u32, hash: Hash256) {
        self.heights.insert(height, Some(hash));
    }

    pub fn delete_hash_at_height(&mut self, height: u32) {
        self.heights.insert(height, None);
    }

    pub fn put_descriptor(&mut self, txid: Hash256, desc: TxDescriptor) {
        self.descriptors.insert(txid, Some(desc));
    }

    pub fn delete_descriptor(&mut self, txid: Hash256) {
        self.descriptors.insert(txid, None);
    }

    pub fn put_pool_entry(&mut self, txid: Hash256, entry: PoolEntry) {
        self.pool.insert(txid, PoolWrite::Put(entry));
    }

    /// Remove a pool entry if present; absent entries are a no-op
    pub fn delete_pool_entry(&mut self, txid: &Hash256) -> Result<(), StorageError> {
        let sequence = match self.pool_entry(txid)? {
            Some(entry) => entry.sequence,
            None => return Ok(()),
        };
        self.pool.insert(*txid, PoolWrite::Delete(sequence));
        Ok(())
    }

    /// Hand out the next pool sequence number
    pub fn allocate_pool_sequence(&mut self) -> Result<u64, StorageError> {
        let next = match self.next_seq {
            Some(next) => next,
            None => self.store.next_pool_sequence()?,
        };
        self.next_seq = Some(next + 1);
        Ok(next)
    }

    /// Rewrite a block's best-chain child pointer
    pub fn set_next_block_hash(
        &mut self,
        hash: &Hash256,
        next: Option<Hash256>,
    ) -> Result<(), StorageError> {
        let mut info = self.block_info(hash)?.ok_or_else(|| {
            StorageError::Corruption(format!("no metadata for block {}", hex::encode(hash)))
        })?;
        if info.next_block_hash != next {
            info.next_block_hash = next;
            self.put_block_info(info);
        }
        Ok(())
    }

    // ─── Commit ──────────────────────────────────────────────────────

    /// Flatten the staged writes into one batch. The best-block pointer
    /// lands last so backends that apply ops in order publish it only
    /// after everything it points at.
    pub fn into_batch(self) -> StoreBatch {
        let mut ops = Vec::new();
        for (hash, block) in self.blocks {
            ops.push(StoreOp::PutBlock(hash, block));
        }
        for (hash, info) in self.infos {
            ops.push(StoreOp::PutBlockInfo(hash, info));
        }
        for (height, entry) in self.heights {
            match entry {
                Some(hash) => ops.push(StoreOp::PutHashAtHeight(height, hash)),
                None => ops.push(StoreOp::DeleteHashAtHeight(height)),
            }
        }
        for (txid, entry) in self.descriptors {
            match entry {
                Some(desc) => ops.push(StoreOp::PutDescriptor(txid, desc)),
                None => ops.push(StoreOp::DeleteDescriptor(txid)),
            }
        }
        for (txid, write) in self.pool {
            match write {
                PoolWrite::Put(entry) => ops.push(StoreOp::PutPoolEntry(txid, entry)),
                PoolWrite::Delete(sequence) => {
                    ops.push(StoreOp::DeletePoolEntry(txid, sequence))
                }
            }
        }
        if let Some(next) = self.next_seq {
            ops.push(StoreOp::PutPoolSequence(next));
        }
        if let Some(best) = self.best {
            ops.push(StoreOp::PutBestBlock(best));
        }
        StoreBatch { ops }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Transaction;
    use crate::storage::{MemoryStore, TxLocation};

    fn pool_entry(seq: u64) -> PoolEntry {
        PoolEntry { sequence: seq, tx: Transaction::new_coinbase(seq as u32, 1, vec![]) }
    }

    #[test]
    fn test_overlay_reads_shadow_store() {
        let store = MemoryStore::new();
        let mut txn = StoreTxn::new(&store);
        let txid = [9u8; 32];
        assert!(txn.descriptor(&txid).unwrap().is_none());

        txn.put_descriptor(txid, TxDescriptor::new(TxLocation::Pool { sequence: 0 }, 2));
        assert!(txn.descriptor(&txid).unwrap().is_some());
        // Nothing committed yet
        assert!(store.descriptor(&txid).unwrap().is_none());

        txn.delete_descriptor(txid);
        assert!(txn.descriptor(&txid).unwrap().is_none());
    }

    #[test]
    fn test_abandoned_txn_leaves_store_untouched() {
        let store = MemoryStore::new();
        {
            let mut txn = StoreTxn::new(&store);
            txn.put_pool_entry([1u8; 32], pool_entry(0));
            txn.set_best_block([2u8; 32]);
            // dropped without commit
        }
        assert!(store.pool_entry(&[1u8; 32]).unwrap().is_none());
        assert!(store.best_block_hash().unwrap().is_none());
    }

    #[test]
    fn test_pool_entries_merge_overlay_and_store() {
        let store = MemoryStore::new();
        let mut setup = StoreTxn::new(&store);
        setup.put_pool_entry([1u8; 32], pool_entry(0));
        setup.put_pool_entry([2u8; 32], pool_entry(1));
        store.commit(setup.into_batch()).unwrap();

        let mut txn = StoreTxn::new(&store);
        txn.delete_pool_entry(&[1u8; 32]).unwrap();
        txn.put_pool_entry([3u8; 32], pool_entry(2));
        let entries = txn.pool_entries().unwrap();
        assert_eq!(entries, vec![(1, [2u8; 32]), (2, [3u8; 32])]);
    }

    #[test]
    fn test_sequence_allocation_is_monotone() {
        let store = MemoryStore::new();
        let mut txn = StoreTxn::new(&store);
        assert_eq!(txn.allocate_pool_sequence().unwrap(), 0);
        assert_eq!(txn.allocate_pool_sequence().unwrap(), 1);
        store.commit(txn.into_batch()).unwrap();

        let mut txn = StoreTxn::new(&store);
        assert_eq!(txn.allocate_pool_sequence().unwrap(), 2);
    }
}
