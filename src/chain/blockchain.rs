//! The blockchain facade — the single serialization point for chain
//! mutations and the owner of the best-block pointer.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chain::error::ChainError;
use crate::chain::events::{ChainBlock, ChainEvent, ChainEventListener, ListenerSet};
use crate::chain::{magnet, txpool};
use crate::core::types::{
    short_hash, Block, BlockHeader, Hash256, OutPoint, Transaction, TxOutput, NULL_HASH,
};
use crate::core::params::MAX_BLOCK_SIZE;
use crate::core::work::header_work;
use crate::storage::{BlockInfo, BlockStore, StorageError, StoreTxn};

/// The chain state machine.
///
/// All mutations (`put_block`, `put_transaction`) serialize on one internal
/// lock; each runs as a single atomic storage batch and its listener
/// callbacks fire under the lock, after the batch commits, in exact
/// attach/detach order. Reads go straight to the store's snapshot view and
/// never wait on the writer.
pub struct Blockchain {
    store: Arc<dyn BlockStore>,
    write_lock: Mutex<()>,
    /// Atomically published `(hash, info)` of the current best block
    best: RwLock<Option<(Hash256, BlockInfo)>>,
    listeners: ListenerSet,
}

impl Blockchain {
    /// Open over a store, resuming from its persisted best block
    pub fn new(store: Arc<dyn BlockStore>) -> Result<Self, ChainError> {
        let best = match store.best_block_hash()? {
            Some(hash) => {
                let info = store.block_info(&hash)?.ok_or_else(|| {
                    StorageError::Corruption(format!(
                        "best block {} has no metadata",
                        hex::encode(hash)
                    ))
                })?;
                info!(
                    "⛓️  chain resumed at height {} (best {})",
                    info.height,
                    short_hash(&hash)
                );
                Some((hash, info))
            }
            None => None,
        };
        Ok(Blockchain {
            store,
            write_lock: Mutex::new(()),
            best: RwLock::new(best),
            listeners: ListenerSet::default(),
        })
    }

    /// Register a listener; callbacks fire in registration order
    pub fn add_event_listener(&self, listener: Arc<dyn ChainEventListener>) {
        self.listeners.add(listener);
    }

    // ─── Block Ingestion ─────────────────────────────────────────────

    /// Accept a block whose parent is known (or which is the genesis).
    ///
    /// Returns `Ok(true)` when the block became part of the best chain
    /// (extension or reorganization), `Ok(false)` for duplicates and for
    /// blocks resting on a fork. A block with an unknown parent is a
    /// routing error — `BlockProcessor` sends those to the orphanage.
    pub fn put_block(&self, hash: Hash256, block: Block) -> Result<bool, ChainError> {
        let _guard = self.write_lock.lock();

        if self.store.has_block(&hash)? {
            debug!("📦 duplicate block {}, ignoring", short_hash(&hash));
            return Ok(false);
        }
        let size = block.size();
        if size > MAX_BLOCK_SIZE {
            return Err(ChainError::BlockTooLarge(size));
        }
        if block.header.prev_hash == NULL_HASH {
            return self.put_genesis(hash, block);
        }

        let parent = self
            .store
            .block_info(&block.header.prev_hash)?
            .ok_or(ChainError::ParentBlockMissing)?;
        let bits = block.header.bits;
        let work = header_work(bits).ok_or(ChainError::InvalidBits(bits))?;
        let info = BlockInfo {
            height: parent.height + 1,
            header: block.header.clone(),
            chain_work: parent.chain_work + work,
            next_block_hash: None,
            transaction_count: block.transactions.len() as u32,
            block_size: size as u32,
        };
        let (best_hash, best_info) = self.best.read().clone().ok_or_else(|| {
            ChainError::Storage(StorageError::Corruption(
                "parent metadata exists but no best block is set".into(),
            ))
        })?;

        let mut txn = StoreTxn::new(&*self.store);
        let mut events = Vec::new();
        txn.put_block(hash, block.clone());
        txn.put_block_info(info.clone());

        if block.header.prev_hash == best_hash {
            // Simple extension of the best chain
            magnet::attach_block(&mut txn, &mut events, &hash, &block, info.height)?;
            txn.put_hash_at_height(info.height, hash);
            txn.set_next_block_hash(&block.header.prev_hash, Some(hash))?;
            txn.set_best_block(hash);
            self.store.commit(txn.into_batch())?;
            self.publish_best(hash, info.clone());
            info!("📦 block {} attached at height {}", short_hash(&hash), info.height);
            self.listeners.dispatch(events);
            return Ok(true);
        }

        if info.chain_work <= best_info.chain_work {
            // The block rests on a fork
            self.store.commit(txn.into_batch())?;
            debug!(
                "🌱 fork block {} stored at height {} (work {} ≤ best {})",
                short_hash(&hash),
                info.height,
                info.chain_work,
                best_info.chain_work
            );
            return Ok(false);
        }

        // The fork outweighs the incumbent: reorganize
        match magnet::reorganize(
            &mut txn,
            &mut events,
            (best_hash, best_info),
            (hash, info.clone()),
        ) {
            Ok(()) => {
                self.store.commit(txn.into_batch())?;
                self.publish_best(hash, info);
                self.listeners.dispatch(events);
                Ok(true)
            }
            Err(ChainError::ReorgFailed) => {
                // Abandon the staged overlay — the pre-reorg state stands.
                // The offending block stays known on its fork.
                drop(txn);
                let mut keep = StoreTxn::new(&*self.store);
                keep.put_block(hash, block);
                keep.put_block_info(info);
                self.store.commit(keep.into_batch())?;
                Err(ChainError::ReorgFailed)
            }
            Err(e) => Err(e),
        }
    }

    fn put_genesis(&self, hash: Hash256, block: Block) -> Result<bool, ChainError> {
        if self.best.read().is_some() {
            return Err(ChainError::DuplicateGenesis);
        }
        let bits = block.header.bits;
        let work = header_work(bits).ok_or(ChainError::InvalidBits(bits))?;
        let info = BlockInfo {
            height: 0,
            header: block.header.clone(),
            chain_work: work,
            next_block_hash: None,
            transaction_count: block.transactions.len() as u32,
            block_size: block.size() as u32,
        };
        let mut txn = StoreTxn::new(&*self.store);
        let mut events = Vec::new();
        txn.put_block(hash, block.clone());
        txn.put_block_info(info.clone());
        magnet::attach_block(&mut txn, &mut events, &hash, &block, 0)?;
        txn.put_hash_at_height(0, hash);
        txn.set_best_block(hash);
        self.store.commit(txn.into_batch())?;
        self.publish_best(hash, info);
        info!("⛓️  genesis block {} accepted", short_hash(&hash));
        self.listeners.dispatch(events);
        Ok(true)
    }

    fn publish_best(&self, hash: Hash256, info: BlockInfo) {
        *self.best.write() = Some((hash, info));
    }

    // ─── Transaction Ingestion ───────────────────────────────────────

    /// Admit a loose transaction into the disk-pool.
    ///
    /// A transaction already known — on the best chain or in the pool —
    /// is swallowed silently. `MissingInputs` lists the unresolvable
    /// outpoints so the caller can park the tx in the orphanage.
    pub fn put_transaction(&self, txid: Hash256, tx: Transaction) -> Result<(), ChainError> {
        let _guard = self.write_lock.lock();

        if self.store.descriptor(&txid)?.is_some() {
            debug!("💧 duplicate tx {}, ignoring", short_hash(&txid));
            return Ok(());
        }
        let mut txn = StoreTxn::new(&*self.store);
        txpool::add_to_pool(&mut txn, &txid, &tx)?;
        self.store.commit(txn.into_batch())?;
        self.listeners.dispatch(vec![ChainEvent::NewTransaction(tx)]);
        Ok(())
    }

    // ─── Reads ───────────────────────────────────────────────────────

    pub fn best_block_hash(&self) -> Option<Hash256> {
        self.best.read().as_ref().map(|(hash, _)| *hash)
    }

    pub fn best_block_height(&self) -> Option<u32> {
        self.best.read().as_ref().map(|(_, info)| info.height)
    }

    pub fn best_block_info(&self) -> Option<BlockInfo> {
        self.best.read().as_ref().map(|(_, info)| info.clone())
    }

    /// Hash of the best-chain block at `height`; `InvalidBlockHeight`
    /// outside `[0, best_height]`
    pub fn block_hash_at(&self, height: u32) -> Result<Hash256, ChainError> {
        let best_height = self
            .best_block_height()
            .ok_or(ChainError::InvalidBlockHeight(height))?;
        if height > best_height {
            return Err(ChainError::InvalidBlockHeight(height));
        }
        self.store.block_hash_at(height)?.ok_or_else(|| {
            StorageError::Corruption(format!("height index hole at {}", height)).into()
        })
    }

    pub fn block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        Ok(self.store.block(hash)?)
    }

    pub fn block_info(&self, hash: &Hash256) -> Result<Option<BlockInfo>, ChainError> {
        Ok(self.store.block_info(hash)?)
    }

    pub fn block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, ChainError> {
        Ok(self.store.block_header(hash)?)
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool, ChainError> {
        Ok(self.store.has_block(hash)?)
    }

    /// A transaction on the best chain or in the disk-pool
    pub fn transaction(&self, txid: &Hash256) -> Result<Option<Transaction>, ChainError> {
        Ok(self.store.transaction(txid)?)
    }

    pub fn has_transaction(&self, txid: &Hash256) -> Result<bool, ChainError> {
        Ok(self.store.descriptor(txid)?.is_some())
    }

    /// The output an outpoint references; `InvalidOutPoint` when the
    /// transaction is unknown or the index is out of range
    pub fn transaction_output(&self, outpoint: &OutPoint) -> Result<TxOutput, ChainError> {
        let tx = self
            .store
            .transaction(&outpoint.txid)?
            .ok_or_else(|| ChainError::InvalidOutPoint(outpoint.clone()))?;
        tx.outputs
            .get(outpoint.vout as usize)
            .cloned()
            .ok_or_else(|| ChainError::InvalidOutPoint(outpoint.clone()))
    }

    /// The oldest `count` pool transactions in admission order
    pub fn oldest_pool_transactions(
        &self,
        count: usize,
    ) -> Result<Vec<(Hash256, Transaction)>, ChainError> {
        let mut oldest = Vec::new();
        for (_, txid) in self.store.pool_entries()?.into_iter().take(count) {
            if let Some(entry) = self.store.pool_entry(&txid)? {
                oldest.push((txid, entry.tx));
            }
        }
        Ok(oldest)
    }

    pub fn pool_contains(&self, txid: &Hash256) -> Result<bool, ChainError> {
        Ok(self.store.pool_entry(txid)?.is_some())
    }

    /// Forward iterator over best-chain blocks from `height` through the
    /// best block at the time of the call
    pub fn iter_from(&self, height: u32) -> ChainIter {
        let end = self
            .best_block_height()
            .filter(|best_height| height <= *best_height);
        ChainIter { store: Arc::clone(&self.store), next_height: height, end_height: end }
    }
}

// ─── Forward Iterator ────────────────────────────────────────────────

/// Iterates `ChainBlock`s along the best chain; the end height is fixed
/// when the iterator is created. A storage error ends the iteration after
/// being yielded once.
pub struct ChainIter {
    store: Arc<dyn BlockStore>,
    next_height: u32,
    end_height: Option<u32>,
}

impl ChainIter {
    fn fetch(&self, height: u32) -> Result<ChainBlock, ChainError> {
        let hash = self.store.block_hash_at(height)?.ok_or_else(|| {
            StorageError::Corruption(format!("height index hole at {}", height))
        })?;
        let block = self.store.block(&hash)?.ok_or_else(|| {
            StorageError::Corruption(format!("missing block {}", hex::encode(hash)))
        })?;
        Ok(ChainBlock { height, block })
    }
}

impl Iterator for ChainIter {
    type Item = Result<ChainBlock, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.end_height?;
        if self.next_height > end {
            return None;
        }
        let height = self.next_height;
        self.next_height += 1;
        match self.fetch(height) {
            Ok(block) => Some(Ok(block)),
            Err(e) => {
                self.end_height = None;
                Some(Err(e))
            }
        }
    }
}
