//! The inventory predicate the p2p layer runs against every announced
//! item: "do we already have this in any form?". Cheap, and never a false
//! negative for something already persisted — otherwise peers get asked
//! for data the node holds.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::chain::error::ChainError;
use crate::chain::orphans::{BlockOrphanage, TransactionOrphanage};
use crate::core::types::{InvKind, InvVector};
use crate::storage::BlockStore;

pub struct InventoryProcessor {
    store: Arc<dyn BlockStore>,
    block_orphans: Arc<Mutex<BlockOrphanage>>,
    tx_orphans: Arc<Mutex<TransactionOrphanage>>,
}

impl InventoryProcessor {
    pub fn new(
        store: Arc<dyn BlockStore>,
        block_orphans: Arc<Mutex<BlockOrphanage>>,
        tx_orphans: Arc<Mutex<TransactionOrphanage>>,
    ) -> Self {
        InventoryProcessor { store, block_orphans, tx_orphans }
    }

    /// True iff the referenced item is known in any form: a block in
    /// storage (best chain or fork) or the block orphanage; a transaction
    /// with a descriptor (on-chain or disk-pool) or in the tx orphanage.
    pub fn already_has(&self, inv: &InvVector) -> Result<bool, ChainError> {
        match inv.kind {
            InvKind::Block => Ok(self.store.has_block(&inv.hash)?
                || self.block_orphans.lock().has_orphan(&inv.hash)),
            InvKind::Tx => Ok(self.store.descriptor(&inv.hash)?.is_some()
                || self.tx_orphans.lock().has_orphan(&inv.hash)),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::chain::fixtures::{harness_with_genesis, make_block, spend};
    use crate::core::types::{InvKind, InvVector};

    #[test]
    fn test_blocks_known_on_chain_fork_and_orphanage() {
        let (h, genesis_hash, _) = harness_with_genesis();
        let b1 = make_block(genesis_hash, 1, 20, 0, vec![]);
        let fork = make_block(genesis_hash, 1, 10, 1, vec![]);
        let orphan = make_block([0x42; 32], 9, 10, 2, vec![]);
        h.blocks.accept_block(b1.hash(), b1.clone()).unwrap();
        h.blocks.accept_block(fork.hash(), fork.clone()).unwrap();
        h.blocks.accept_block(orphan.hash(), orphan.clone()).unwrap();

        for hash in [genesis_hash, b1.hash(), fork.hash(), orphan.hash()] {
            assert!(h.inventory.already_has(&InvVector::block(hash)).unwrap());
        }
        assert!(!h.inventory.already_has(&InvVector::block([0x13; 32])).unwrap());
        // A block hash is not a transaction hash
        assert!(!h.inventory.already_has(&InvVector::tx(b1.hash())).unwrap());
    }

    #[test]
    fn test_orphan_block_counts_without_moving_best() {
        let (h, genesis_hash, _) = harness_with_genesis();
        let b1 = make_block(genesis_hash, 1, 10, 0, vec![]);
        let b2 = make_block(b1.hash(), 2, 10, 0, vec![]);
        h.blocks.accept_block(b2.hash(), b2.clone()).unwrap();

        assert!(h.inventory.already_has(&InvVector::block(b2.hash())).unwrap());
        assert_eq!(h.chain.best_block_height(), Some(0));
    }

    #[test]
    fn test_txs_known_on_chain_in_pool_and_orphanage() {
        let (h, genesis_hash, genesis_coinbase) = harness_with_genesis();
        let confirmed = spend(&[(genesis_coinbase, 0)], 2, 1);
        let b1 = make_block(genesis_hash, 1, 10, 0, vec![confirmed.clone()]);
        h.blocks.accept_block(b1.hash(), b1).unwrap();

        let pooled = spend(&[(confirmed.hash(), 0)], 1, 2);
        h.txs.accept_transaction(pooled.hash(), pooled.clone()).unwrap();

        let orphan = spend(&[([0x51; 32], 0)], 1, 3);
        h.txs.accept_transaction(orphan.hash(), orphan.clone()).unwrap();

        assert!(h.inventory.already_has(&InvVector::tx(genesis_coinbase)).unwrap());
        assert!(h.inventory.already_has(&InvVector::tx(confirmed.hash())).unwrap());
        assert!(h.inventory.already_has(&InvVector::tx(pooled.hash())).unwrap());
        assert!(h.inventory.already_has(&InvVector::tx(orphan.hash())).unwrap());
        assert!(!h.inventory.already_has(&InvVector::tx([0x14; 32])).unwrap());
    }

    #[test]
    fn test_filtered_blocks_are_not_claimed() {
        let (h, genesis_hash, _) = harness_with_genesis();
        let inv = InvVector { kind: InvKind::FilteredBlock, hash: genesis_hash };
        assert!(!h.inventory.already_has(&inv).unwrap());
    }
}
