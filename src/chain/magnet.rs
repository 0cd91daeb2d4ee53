//! Attach/detach of transactional effects — the transaction magnet marks
//! outputs spent or unspent as transactions connect to the best chain, the
//! block magnet applies whole blocks and drives reorganizations.
//!
//! Ordering contract: transactions attach in block order (a later tx may
//! spend an earlier tx's output) and detach in reverse block order. A
//! reorganization detaches the old branch newest-first, then attaches the
//! new branch oldest-first; a failed attach abandons the staged overlay,
//! which restores the pre-reorg state exactly.

use tracing::{debug, info, warn};

use crate::chain::error::ChainError;
use crate::chain::events::{ChainBlock, ChainEvent};
use crate::chain::txpool;
use crate::core::types::{short_hash, Block, Hash256, OutPoint, Transaction, NULL_HASH};
use crate::storage::{BlockInfo, StorageError, StoreTxn, TxDescriptor, TxLocation};

// ─── Transaction Magnet ──────────────────────────────────────────────

/// Connect a transaction's effects: verify every input references an
/// unspent output, mark those outputs spent, and index the transaction's
/// own outputs eagerly so later transactions in the same block can spend
/// them. With `check_only` nothing is written.
///
/// The coinbase skips input processing. An input re-claiming an output it
/// already holds (a pool transaction being confirmed) is not a double
/// spend. A conflicting claim held by a pool transaction is displaced —
/// the block wins and the pool entry is evicted; a conflicting best-chain
/// claim fails with `InputAlreadySpent`.
pub(crate) fn attach_transaction(
    txn: &mut StoreTxn<'_>,
    events: &mut Vec<ChainEvent>,
    txid: &Hash256,
    tx: &Transaction,
    location: TxLocation,
    check_only: bool,
) -> Result<(), ChainError> {
    if !tx.is_coinbase() {
        for (index, input) in tx.inputs.iter().enumerate() {
            let prev = &input.previous_output;
            let desc = txn
                .descriptor(&prev.txid)?
                .ok_or_else(|| ChainError::InputMissing(prev.clone()))?;
            let claim = OutPoint::new(*txid, index as u32);
            let slot = desc
                .spends
                .get(prev.vout as usize)
                .cloned()
                .ok_or_else(|| ChainError::InputMissing(prev.clone()))?;
            match slot {
                None => {}
                Some(existing) if existing == claim => {}
                Some(existing) => {
                    // A missing spender descriptor is a dangling claim and
                    // treated as released
                    let pool_spender = txn
                        .descriptor(&existing.txid)?
                        .map_or(true, |d| d.in_pool());
                    if !pool_spender {
                        return Err(ChainError::InputAlreadySpent(prev.clone()));
                    }
                    if !check_only {
                        debug!(
                            "⚡ block spend of {} displaces pool tx {}",
                            prev,
                            short_hash(&existing.txid)
                        );
                        txpool::drop_with_descendants(txn, events, &existing.txid)?;
                    }
                }
            }
            if !check_only {
                // Reload: the eviction above may have rewritten it
                let mut desc = txn
                    .descriptor(&prev.txid)?
                    .ok_or_else(|| ChainError::InputMissing(prev.clone()))?;
                desc.spends[prev.vout as usize] = Some(claim);
                txn.put_descriptor(prev.txid, desc);
            }
        }
    }
    if !check_only {
        // Index the outputs eagerly; a pool descriptor being promoted
        // keeps the claims already recorded against it
        let desc = match txn.descriptor(txid)? {
            Some(mut existing) => {
                existing.location = location;
                existing
            }
            None => TxDescriptor::new(location, tx.outputs.len()),
        };
        txn.put_descriptor(*txid, desc);
    }
    Ok(())
}

/// Revert a transaction's effects: release the claims it holds on the
/// outputs it spends. A detached coinbase loses its descriptor outright
/// (its outputs are unspendable outside the block); a non-coinbase keeps
/// its descriptor for the pool re-insert that follows.
pub(crate) fn detach_transaction(
    txn: &mut StoreTxn<'_>,
    txid: &Hash256,
    tx: &Transaction,
) -> Result<(), ChainError> {
    if tx.is_coinbase() {
        txn.delete_descriptor(*txid);
        return Ok(());
    }
    for (index, input) in tx.inputs.iter().enumerate().rev() {
        let prev = &input.previous_output;
        if let Some(mut desc) = txn.descriptor(&prev.txid)? {
            let claim = OutPoint::new(*txid, index as u32);
            if desc.spends.get(prev.vout as usize).cloned() == Some(Some(claim)) {
                desc.spends[prev.vout as usize] = None;
                txn.put_descriptor(prev.txid, desc);
            }
        }
    }
    Ok(())
}

// ─── Block Magnet ────────────────────────────────────────────────────

/// Attach a whole block: connect every transaction in order, drop entries
/// the block confirms from the pool, record the attach event.
pub(crate) fn attach_block(
    txn: &mut StoreTxn<'_>,
    events: &mut Vec<ChainEvent>,
    hash: &Hash256,
    block: &Block,
    height: u32,
) -> Result<(), ChainError> {
    for (index, tx) in block.transactions.iter().enumerate() {
        let txid = tx.hash();
        attach_transaction(
            txn,
            events,
            &txid,
            tx,
            TxLocation::Block { block_hash: *hash, index: index as u32 },
            false,
        )?;
        txpool::remove_confirmed(txn, &txid)?;
    }
    debug!("📦 attached block {} at height {}", short_hash(hash), height);
    events.push(ChainEvent::Attached(ChainBlock { height, block: block.clone() }));
    Ok(())
}

/// Detach a whole block: disconnect every transaction in reverse order,
/// then migrate the non-coinbase transactions back into the pool.
pub(crate) fn detach_block(
    txn: &mut StoreTxn<'_>,
    events: &mut Vec<ChainEvent>,
    hash: &Hash256,
    block: &Block,
    height: u32,
) -> Result<(), ChainError> {
    for tx in block.transactions.iter().rev() {
        detach_transaction(txn, &tx.hash(), tx)?;
    }
    for tx in block.transactions.iter().skip(1) {
        txpool::insert_detached(txn, events, &tx.hash(), tx)?;
    }
    debug!("↩️  detached block {} from height {}", short_hash(hash), height);
    events.push(ChainEvent::Detached(ChainBlock { height, block: block.clone() }));
    Ok(())
}

// ─── Reorganization ──────────────────────────────────────────────────

/// Switch the best chain from `original_best` to `new_best`, whose block
/// and metadata must already be staged in `txn`.
///
/// Walks both tips back to the fork point (stepping whichever cursor is
/// higher, both on a height tie), detaches the old branch, attaches the
/// new one, rewrites the height index and next-block pointers, and sweeps
/// the pool. All-or-nothing: any non-storage attach failure surfaces as
/// `ReorgFailed` and the caller abandons the overlay, leaving the
/// pre-reorg state in place.
pub(crate) fn reorganize(
    txn: &mut StoreTxn<'_>,
    events: &mut Vec<ChainEvent>,
    original_best: (Hash256, BlockInfo),
    new_best: (Hash256, BlockInfo),
) -> Result<(), ChainError> {
    let mut old_branch: Vec<(Hash256, BlockInfo)> = Vec::new();
    let mut new_branch: Vec<(Hash256, BlockInfo)> = Vec::new();
    let (new_hash, new_info) = new_best;

    let (mut a_hash, mut a) = original_best;
    let (mut b_hash, mut b) = (new_hash, new_info.clone());
    while a_hash != b_hash {
        if a.height > b.height {
            old_branch.push((a_hash, a.clone()));
            (a_hash, a) = parent_of(txn, &a)?;
        } else if b.height > a.height {
            new_branch.push((b_hash, b.clone()));
            (b_hash, b) = parent_of(txn, &b)?;
        } else {
            old_branch.push((a_hash, a.clone()));
            new_branch.push((b_hash, b.clone()));
            (a_hash, a) = parent_of(txn, &a)?;
            (b_hash, b) = parent_of(txn, &b)?;
        }
    }
    let fork_hash = a_hash;

    info!(
        "🔄 reorganizing: -{} +{} block(s), fork at {}",
        old_branch.len(),
        new_branch.len(),
        short_hash(&fork_hash)
    );

    // Detach the old branch, newest to oldest
    for (hash, block_info) in &old_branch {
        let block = load_block(txn, hash)?;
        detach_block(txn, events, hash, &block, block_info.height)?;
        txn.delete_hash_at_height(block_info.height);
        txn.set_next_block_hash(hash, None)?;
    }

    // Attach the new branch, oldest to newest
    for (hash, block_info) in new_branch.iter().rev() {
        let block = load_block(txn, hash)?;
        if let Err(e) = attach_block(txn, events, hash, &block, block_info.height) {
            return match e {
                ChainError::Storage(e) => Err(ChainError::Storage(e)),
                e => {
                    warn!(
                        "🔄 reorg abandoned, block {} failed to attach: {}",
                        short_hash(hash),
                        e
                    );
                    Err(ChainError::ReorgFailed)
                }
            };
        }
        txn.put_hash_at_height(block_info.height, *hash);
        txn.set_next_block_hash(&block_info.header.prev_hash, Some(*hash))?;
    }

    txn.set_best_block(new_hash);
    txpool::sweep(txn, events)?;

    info!(
        "🔄 reorg complete: new best {} at height {}",
        short_hash(&new_hash),
        new_info.height
    );
    Ok(())
}

fn parent_of(
    txn: &StoreTxn<'_>,
    info: &BlockInfo,
) -> Result<(Hash256, BlockInfo), ChainError> {
    let prev = info.header.prev_hash;
    if prev == NULL_HASH {
        return Err(StorageError::Corruption("fork walk ran past genesis".into()).into());
    }
    let parent = txn.block_info(&prev)?.ok_or_else(|| {
        StorageError::Corruption(format!("missing metadata for block {}", hex::encode(prev)))
    })?;
    Ok((prev, parent))
}

fn load_block(txn: &StoreTxn<'_>, hash: &Hash256) -> Result<Block, ChainError> {
    txn.block(hash)?.ok_or_else(|| {
        ChainError::Storage(StorageError::Corruption(format!(
            "missing block {}",
            hex::encode(hash)
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BlockHeader, TxInput, TxOutput};
    use crate::storage::{BlockStore, MemoryStore};

    fn header(prev: Hash256, nonce: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: prev,
            merkle_root: NULL_HASH,
            timestamp: 1_700_000_000,
            bits: 0x207fffff,
            nonce,
        }
    }

    fn spend(prev: &[(Hash256, u32)], outputs: usize) -> Transaction {
        Transaction {
            version: 1,
            inputs: prev
                .iter()
                .map(|(txid, vout)| TxInput {
                    previous_output: OutPoint::new(*txid, *vout),
                    unlocking_script: vec![],
                    sequence: 0xFFFF_FFFF,
                })
                .collect(),
            outputs: (0..outputs)
                .map(|_| TxOutput { amount: 1_000, locking_script: vec![] })
                .collect(),
            lock_time: 0,
        }
    }

    /// Attach a genesis-like block and return its coinbase txid
    fn seed_base(store: &MemoryStore) -> (Hash256, Hash256) {
        let coinbase = Transaction::new_coinbase(0, 50_000, vec![0x51]);
        let coinbase_id = coinbase.hash();
        let block = Block { header: header(NULL_HASH, 0), transactions: vec![coinbase] };
        let hash = block.hash();
        let mut txn = StoreTxn::new(store);
        let mut events = Vec::new();
        txn.put_block(hash, block.clone());
        attach_block(&mut txn, &mut events, &hash, &block, 0).unwrap();
        store.commit(txn.into_batch()).unwrap();
        (hash, coinbase_id)
    }

    #[test]
    fn test_attach_marks_inputs_spent_and_indexes_outputs() {
        let store = MemoryStore::new();
        let (_, base_coinbase) = seed_base(&store);

        let coinbase = Transaction::new_coinbase(1, 50_000, vec![]);
        let tx = spend(&[(base_coinbase, 0)], 2);
        let txid = tx.hash();
        let block = Block {
            header: header([0xB1; 32], 1),
            transactions: vec![coinbase, tx],
        };
        let hash = block.hash();

        let mut txn = StoreTxn::new(&store);
        let mut events = Vec::new();
        txn.put_block(hash, block.clone());
        attach_block(&mut txn, &mut events, &hash, &block, 1).unwrap();
        store.commit(txn.into_batch()).unwrap();

        let base_desc = store.descriptor(&base_coinbase).unwrap().unwrap();
        assert_eq!(base_desc.spends[0], Some(OutPoint::new(txid, 0)));
        let desc = store.descriptor(&txid).unwrap().unwrap();
        assert_eq!(desc.location, TxLocation::Block { block_hash: hash, index: 1 });
        assert_eq!(desc.spends, vec![None, None]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_later_tx_can_spend_earlier_tx_in_same_block() {
        let store = MemoryStore::new();
        let (_, base_coinbase) = seed_base(&store);

        let coinbase = Transaction::new_coinbase(1, 50_000, vec![]);
        let first = spend(&[(base_coinbase, 0)], 1);
        let second = spend(&[(first.hash(), 0)], 1);
        let block = Block {
            header: header([0xB1; 32], 1),
            transactions: vec![coinbase, first.clone(), second.clone()],
        };
        let hash = block.hash();

        let mut txn = StoreTxn::new(&store);
        let mut events = Vec::new();
        txn.put_block(hash, block.clone());
        attach_block(&mut txn, &mut events, &hash, &block, 1).unwrap();
        store.commit(txn.into_batch()).unwrap();

        let first_desc = store.descriptor(&first.hash()).unwrap().unwrap();
        assert_eq!(first_desc.spends[0], Some(OutPoint::new(second.hash(), 0)));
    }

    #[test]
    fn test_attach_rejects_double_spend_within_chain() {
        let store = MemoryStore::new();
        let (_, base_coinbase) = seed_base(&store);

        let coinbase = Transaction::new_coinbase(1, 50_000, vec![]);
        let a = spend(&[(base_coinbase, 0)], 1);
        let mut b = spend(&[(base_coinbase, 0)], 1);
        b.lock_time = 1;
        let block = Block {
            header: header([0xB1; 32], 1),
            transactions: vec![coinbase, a, b],
        };
        let hash = block.hash();

        let mut txn = StoreTxn::new(&store);
        let mut events = Vec::new();
        assert!(matches!(
            attach_block(&mut txn, &mut events, &hash, &block, 1),
            Err(ChainError::InputAlreadySpent(op)) if op == OutPoint::new(base_coinbase, 0)
        ));
    }

    #[test]
    fn test_attach_missing_input() {
        let store = MemoryStore::new();
        seed_base(&store);

        let coinbase = Transaction::new_coinbase(1, 50_000, vec![]);
        let tx = spend(&[([0x77; 32], 0)], 1);
        let block = Block { header: header([0xB1; 32], 1), transactions: vec![coinbase, tx] };

        let mut txn = StoreTxn::new(&store);
        let mut events = Vec::new();
        assert!(matches!(
            attach_block(&mut txn, &mut events, &block.hash(), &block, 1),
            Err(ChainError::InputMissing(op)) if op == OutPoint::new([0x77; 32], 0)
        ));
    }

    #[test]
    fn test_check_only_writes_nothing() {
        let store = MemoryStore::new();
        let (_, base_coinbase) = seed_base(&store);

        let tx = spend(&[(base_coinbase, 0)], 1);
        let mut txn = StoreTxn::new(&store);
        let mut events = Vec::new();
        attach_transaction(
            &mut txn,
            &mut events,
            &tx.hash(),
            &tx,
            TxLocation::Block { block_hash: [0xB1; 32], index: 1 },
            true,
        )
        .unwrap();
        store.commit(txn.into_batch()).unwrap();

        let base_desc = store.descriptor(&base_coinbase).unwrap().unwrap();
        assert_eq!(base_desc.spends[0], None);
        assert!(store.descriptor(&tx.hash()).unwrap().is_none());
    }

    #[test]
    fn test_block_spend_displaces_conflicting_pool_tx() {
        let store = MemoryStore::new();
        let (_, base_coinbase) = seed_base(&store);

        // A pool tx claims the coinbase output first
        let pool_tx = spend(&[(base_coinbase, 0)], 1);
        let pool_id = pool_tx.hash();
        let mut txn = StoreTxn::new(&store);
        txpool::add_to_pool(&mut txn, &pool_id, &pool_tx).unwrap();
        store.commit(txn.into_batch()).unwrap();

        // A block confirms a different spend of the same output
        let coinbase = Transaction::new_coinbase(1, 50_000, vec![]);
        let mut winner = spend(&[(base_coinbase, 0)], 1);
        winner.lock_time = 9;
        let winner_id = winner.hash();
        let block = Block {
            header: header([0xB1; 32], 1),
            transactions: vec![coinbase, winner],
        };
        let hash = block.hash();

        let mut txn = StoreTxn::new(&store);
        let mut events = Vec::new();
        txn.put_block(hash, block.clone());
        attach_block(&mut txn, &mut events, &hash, &block, 1).unwrap();
        store.commit(txn.into_batch()).unwrap();

        assert!(store.pool_entry(&pool_id).unwrap().is_none());
        assert!(store.descriptor(&pool_id).unwrap().is_none());
        let base_desc = store.descriptor(&base_coinbase).unwrap().unwrap();
        assert_eq!(base_desc.spends[0], Some(OutPoint::new(winner_id, 0)));
        assert!(events
            .iter()
            .any(|e| matches!(e, ChainEvent::RemovedTransaction(id) if *id == pool_id)));
    }

    #[test]
    fn test_attach_then_detach_restores_claim_state() {
        let store = MemoryStore::new();
        let (_, base_coinbase) = seed_base(&store);

        let coinbase = Transaction::new_coinbase(1, 50_000, vec![]);
        let coinbase_id = coinbase.hash();
        let tx = spend(&[(base_coinbase, 0)], 1);
        let txid = tx.hash();
        let block = Block {
            header: header([0xB1; 32], 1),
            transactions: vec![coinbase, tx.clone()],
        };
        let hash = block.hash();

        let mut txn = StoreTxn::new(&store);
        let mut events = Vec::new();
        txn.put_block(hash, block.clone());
        attach_block(&mut txn, &mut events, &hash, &block, 1).unwrap();
        detach_block(&mut txn, &mut events, &hash, &block, 1).unwrap();
        store.commit(txn.into_batch()).unwrap();

        // The detached coinbase loses its descriptor outright
        assert!(store.descriptor(&coinbase_id).unwrap().is_none());
        // The non-coinbase tx migrated to the pool and re-claimed its input
        let desc = store.descriptor(&txid).unwrap().unwrap();
        assert!(desc.in_pool());
        assert!(store.pool_entry(&txid).unwrap().is_some());
        let base_desc = store.descriptor(&base_coinbase).unwrap().unwrap();
        assert_eq!(base_desc.spends[0], Some(OutPoint::new(txid, 0)));
    }

    #[test]
    fn test_magnet_roundtrip_restores_referenced_descriptor_exactly() {
        let store = MemoryStore::new();
        let (_, base_coinbase) = seed_base(&store);
        let before = store.descriptor(&base_coinbase).unwrap().unwrap();

        let tx = spend(&[(base_coinbase, 0)], 1);
        let txid = tx.hash();
        let mut txn = StoreTxn::new(&store);
        let mut events = Vec::new();
        attach_transaction(
            &mut txn,
            &mut events,
            &txid,
            &tx,
            TxLocation::Block { block_hash: [0xB1; 32], index: 1 },
            false,
        )
        .unwrap();
        detach_transaction(&mut txn, &txid, &tx).unwrap();
        store.commit(txn.into_batch()).unwrap();

        assert_eq!(store.descriptor(&base_coinbase).unwrap().unwrap(), before);
    }
}
