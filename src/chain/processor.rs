//! Ingest entry points called by the networking layer. Thin classifiers:
//! decide whether an item can go to the chain now or must wait in an
//! orphan pool, and promote waiting items when their prerequisites land.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::blockchain::Blockchain;
use crate::chain::error::ChainError;
use crate::chain::orphans::{BlockOrphanage, TransactionOrphanage};
use crate::core::types::{short_hash, Block, Hash256, OutPoint, Transaction, NULL_HASH};

// ─── Transaction Processor ───────────────────────────────────────────

pub struct TransactionProcessor {
    chain: Arc<Blockchain>,
    orphans: Arc<Mutex<TransactionOrphanage>>,
}

impl TransactionProcessor {
    pub fn new(chain: Arc<Blockchain>, orphans: Arc<Mutex<TransactionOrphanage>>) -> Self {
        TransactionProcessor { chain, orphans }
    }

    /// Submit a loose transaction. Returns `Ok(true)` when it entered the
    /// pool (or was already known) and `Ok(false)` when it was parked in
    /// the orphanage against its missing outpoints.
    pub fn accept_transaction(
        &self,
        txid: Hash256,
        tx: Transaction,
    ) -> Result<bool, ChainError> {
        match self.chain.put_transaction(txid, tx.clone()) {
            Ok(()) => {
                self.promote_dependents(&txid)?;
                Ok(true)
            }
            Err(ChainError::MissingInputs(missing)) => {
                debug!(
                    "🕳️  tx {} waits on {} unresolved input(s)",
                    short_hash(&txid),
                    missing.len()
                );
                self.orphans.lock().put_orphan(txid, tx, missing);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Direct orphanage write, for out-of-order gossip paths
    pub fn put_orphan(&self, txid: Hash256, tx: Transaction, missing: Vec<OutPoint>) {
        self.orphans.lock().put_orphan(txid, tx, missing);
    }

    /// Re-submit every orphan waiting on an output of `txid`, and of any
    /// transaction admitted along the way
    pub fn promote_dependents(&self, txid: &Hash256) -> Result<(), ChainError> {
        let mut worklist = vec![*txid];
        while let Some(source) = worklist.pop() {
            let dependents = self.orphans.lock().dependents_of_tx(&source);
            for dep in dependents {
                let tx = match self.orphans.lock().remove_orphan(&dep) {
                    Some(tx) => tx,
                    None => continue,
                };
                match self.chain.put_transaction(dep, tx.clone()) {
                    Ok(()) => {
                        debug!("🕳️  orphan tx {} admitted to pool", short_hash(&dep));
                        worklist.push(dep);
                    }
                    Err(ChainError::MissingInputs(missing)) => {
                        // Still waiting on something else
                        self.orphans.lock().put_orphan(dep, tx, missing);
                    }
                    Err(ChainError::Storage(e)) => return Err(e.into()),
                    Err(e) => {
                        debug!("🗑️  orphan tx {} rejected: {}", short_hash(&dep), e);
                    }
                }
            }
        }
        Ok(())
    }
}

// ─── Block Processor ─────────────────────────────────────────────────

pub struct BlockProcessor {
    chain: Arc<Blockchain>,
    orphans: Arc<Mutex<BlockOrphanage>>,
    tx_processor: Arc<TransactionProcessor>,
}

impl BlockProcessor {
    pub fn new(
        chain: Arc<Blockchain>,
        orphans: Arc<Mutex<BlockOrphanage>>,
        tx_processor: Arc<TransactionProcessor>,
    ) -> Self {
        BlockProcessor { chain, orphans, tx_processor }
    }

    /// Submit a block from the network. A block whose parent is unknown
    /// goes to the orphanage; otherwise it goes to the chain, and every
    /// orphan waiting on it (transitively) is promoted afterwards.
    ///
    /// Returns what `Blockchain::put_block` returned for this block, or
    /// `Ok(false)` when it was orphaned.
    pub fn accept_block(&self, hash: Hash256, block: Block) -> Result<bool, ChainError> {
        let parent = block.header.prev_hash;
        if parent != NULL_HASH && !self.chain.has_block(&parent)? {
            debug!(
                "📥 block {} is an orphan (parent {} unknown)",
                short_hash(&hash),
                short_hash(&parent)
            );
            self.orphans.lock().put_orphan(block);
            return Ok(false);
        }
        let accepted = self.chain.put_block(hash, block.clone())?;
        if accepted {
            self.poll_tx_orphans(&block)?;
        }
        self.promote_orphans(hash)?;
        Ok(accepted)
    }

    /// Direct orphanage write, for out-of-order gossip paths
    pub fn put_orphan(&self, block: Block) -> Hash256 {
        self.orphans.lock().put_orphan(block)
    }

    /// Promote every orphan chain hanging off `parent`, breadth-first
    fn promote_orphans(&self, parent: Hash256) -> Result<(), ChainError> {
        let mut worklist = vec![parent];
        while let Some(parent) = worklist.pop() {
            let children: Vec<Block> = {
                let mut orphans = self.orphans.lock();
                orphans
                    .orphans_depending_on(&parent)
                    .into_iter()
                    .filter_map(|hash| orphans.remove_orphan(&hash))
                    .collect()
            };
            for child in children {
                let child_hash = child.hash();
                match self.chain.put_block(child_hash, child.clone()) {
                    Ok(became_best) => {
                        debug!(
                            "📥 orphan block {} adopted at parent {}",
                            short_hash(&child_hash),
                            short_hash(&parent)
                        );
                        if became_best {
                            self.poll_tx_orphans(&child)?;
                        }
                        worklist.push(child_hash);
                    }
                    Err(ChainError::Storage(e)) => return Err(e.into()),
                    Err(ChainError::ReorgFailed) => {
                        // The block is stored on its fork; descendants may
                        // still be promotable
                        warn!(
                            "📥 orphan block {} triggered a failed reorg",
                            short_hash(&child_hash)
                        );
                        worklist.push(child_hash);
                    }
                    Err(e) => {
                        warn!("📥 orphan block {} rejected: {}", short_hash(&child_hash), e);
                    }
                }
            }
        }
        Ok(())
    }

    /// A newly confirmed block can unblock orphaned transactions waiting
    /// on outputs it created
    fn poll_tx_orphans(&self, block: &Block) -> Result<(), ChainError> {
        for tx in &block.transactions {
            self.tx_processor.promote_dependents(&tx.hash())?;
        }
        Ok(())
    }
}
