//! The disk-pool of accepted, unconfirmed transactions.
//!
//! Pool entries live in the store's pool namespace, ordered by a monotone
//! admission sequence. Admission resolves every input to an output that is
//! unspent either on the best chain or earlier in the pool, then records
//! the claims in the referenced descriptors. All writes are staged in the
//! caller's [`StoreTxn`].

use tracing::debug;

use crate::chain::error::ChainError;
use crate::chain::events::ChainEvent;
use crate::core::types::{short_hash, Hash256, OutPoint, Transaction};
use crate::storage::{PoolEntry, StorageError, StoreTxn, TxDescriptor, TxLocation};

/// Admit a freshly submitted transaction.
///
/// Fails with `MissingInputs` (listing every unresolvable outpoint) when
/// the caller should consider the orphanage, and `InputAlreadySpent` when
/// an input conflicts with an existing claim.
pub(crate) fn add_to_pool(
    txn: &mut StoreTxn<'_>,
    txid: &Hash256,
    tx: &Transaction,
) -> Result<(), ChainError> {
    if tx.is_coinbase() {
        return Err(ChainError::CoinbaseInPool);
    }
    let mut missing = Vec::new();
    for input in &tx.inputs {
        let prev = &input.previous_output;
        match txn.descriptor(&prev.txid)? {
            Some(desc) => match desc.spends.get(prev.vout as usize) {
                Some(None) => {}
                Some(Some(_)) => return Err(ChainError::InputAlreadySpent(prev.clone())),
                None => missing.push(prev.clone()),
            },
            None => missing.push(prev.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(ChainError::MissingInputs(missing));
    }

    claim_inputs(txn, txid, tx)?;
    let sequence = txn.allocate_pool_sequence()?;
    txn.put_descriptor(
        *txid,
        TxDescriptor::new(TxLocation::Pool { sequence }, tx.outputs.len()),
    );
    txn.put_pool_entry(*txid, PoolEntry { sequence, tx: tx.clone() });
    debug!("💧 pool admit {} (seq {})", short_hash(txid), sequence);
    Ok(())
}

/// Re-insert a transaction that was just detached from the best chain.
///
/// Its descriptor (with the claims other transactions hold on its outputs)
/// is still in place; only the location is rewritten. A detached tx whose
/// inputs are no longer claimable — typically because the new branch
/// confirmed a conflicting spend — is dropped together with its pool
/// descendants instead of failing the reorganization.
pub(crate) fn insert_detached(
    txn: &mut StoreTxn<'_>,
    events: &mut Vec<ChainEvent>,
    txid: &Hash256,
    tx: &Transaction,
) -> Result<(), ChainError> {
    if !inputs_claimable(txn, txid, tx)? {
        debug!("🗑️  detached tx {} no longer admissible, dropping", short_hash(txid));
        drop_with_descendants(txn, events, txid)?;
        return Ok(());
    }
    claim_inputs(txn, txid, tx)?;
    let sequence = txn.allocate_pool_sequence()?;
    let mut desc = txn
        .descriptor(txid)?
        .unwrap_or_else(|| TxDescriptor::new(TxLocation::Pool { sequence }, tx.outputs.len()));
    desc.location = TxLocation::Pool { sequence };
    txn.put_descriptor(*txid, desc);
    txn.put_pool_entry(*txid, PoolEntry { sequence, tx: tx.clone() });
    Ok(())
}

/// Remove a transaction that a best-chain block just confirmed. The
/// attach path has already rewritten its descriptor; only the pool bytes
/// and sequence entry go away.
pub(crate) fn remove_confirmed(
    txn: &mut StoreTxn<'_>,
    txid: &Hash256,
) -> Result<(), ChainError> {
    txn.delete_pool_entry(txid)?;
    Ok(())
}

/// Evict a transaction and every pool transaction downstream of it,
/// releasing all claims they hold. Emits `RemovedTransaction` per evicted
/// entry.
pub(crate) fn drop_with_descendants(
    txn: &mut StoreTxn<'_>,
    events: &mut Vec<ChainEvent>,
    txid: &Hash256,
) -> Result<(), ChainError> {
    let mut worklist = vec![*txid];
    while let Some(current) = worklist.pop() {
        let desc = match txn.descriptor(&current)? {
            Some(desc) => desc,
            None => continue,
        };
        for spender in desc.spends.iter().flatten() {
            let spender_pooled = txn
                .descriptor(&spender.txid)?
                .map_or(false, |d| d.in_pool());
            if spender_pooled {
                worklist.push(spender.txid);
            }
        }
        if let Some(entry) = txn.pool_entry(&current)? {
            release_claims(txn, &current, &entry.tx)?;
        }
        txn.delete_pool_entry(&current)?;
        txn.delete_descriptor(current);
        events.push(ChainEvent::RemovedTransaction(current));
    }
    Ok(())
}

/// Drop every pool entry whose input claims no longer hold. Run after a
/// reorganization settles; eviction of one entry can invalidate its
/// descendants, so this iterates to a fixpoint.
pub(crate) fn sweep(
    txn: &mut StoreTxn<'_>,
    events: &mut Vec<ChainEvent>,
) -> Result<(), ChainError> {
    loop {
        let mut victims = Vec::new();
        for (_, txid) in txn.pool_entries()? {
            let entry = txn.pool_entry(&txid)?.ok_or_else(|| {
                StorageError::Corruption(format!(
                    "pool index names missing entry {}",
                    hex::encode(txid)
                ))
            })?;
            if !claims_hold(txn, &txid, &entry.tx)? {
                victims.push(txid);
            }
        }
        if victims.is_empty() {
            return Ok(());
        }
        for txid in victims {
            drop_with_descendants(txn, events, &txid)?;
        }
    }
}

// ─── Claim Bookkeeping ───────────────────────────────────────────────

/// Would `claim_inputs` succeed? Read-only; also rejects a transaction
/// spending the same outpoint twice.
fn inputs_claimable(
    txn: &StoreTxn<'_>,
    txid: &Hash256,
    tx: &Transaction,
) -> Result<bool, ChainError> {
    let mut seen = std::collections::HashSet::new();
    for (index, input) in tx.inputs.iter().enumerate() {
        let prev = &input.previous_output;
        if !seen.insert(prev.clone()) {
            return Ok(false);
        }
        let claimable = match txn.descriptor(&prev.txid)? {
            Some(desc) => match desc.spends.get(prev.vout as usize).cloned() {
                Some(None) => true,
                Some(Some(existing)) => existing == OutPoint::new(*txid, index as u32),
                None => false,
            },
            None => false,
        };
        if !claimable {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Mark every input's referenced output as spent by this transaction
fn claim_inputs(
    txn: &mut StoreTxn<'_>,
    txid: &Hash256,
    tx: &Transaction,
) -> Result<(), ChainError> {
    for (index, input) in tx.inputs.iter().enumerate() {
        let prev = &input.previous_output;
        let mut desc = txn
            .descriptor(&prev.txid)?
            .ok_or_else(|| ChainError::InputMissing(prev.clone()))?;
        let claim = OutPoint::new(*txid, index as u32);
        match desc.spends.get(prev.vout as usize).cloned() {
            Some(None) => {
                desc.spends[prev.vout as usize] = Some(claim);
                txn.put_descriptor(prev.txid, desc);
            }
            Some(Some(existing)) if existing == claim => {}
            Some(Some(_)) => return Err(ChainError::InputAlreadySpent(prev.clone())),
            None => return Err(ChainError::InputMissing(prev.clone())),
        }
    }
    Ok(())
}

/// Undo the claims this transaction holds; slots claimed by someone else
/// are left alone
fn release_claims(
    txn: &mut StoreTxn<'_>,
    txid: &Hash256,
    tx: &Transaction,
) -> Result<(), ChainError> {
    for (index, input) in tx.inputs.iter().enumerate() {
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

/// Does every input claim of this pool transaction still hold?
pub(crate) fn claims_hold(
    txn: &StoreTxn<'_>,
    txid: &Hash256,
    tx: &Transaction,
) -> Result<bool, ChainError> {
    for (index, input) in tx.inputs.iter().enumerate() {
        let prev = &input.previous_output;
        let holds = match txn.descriptor(&prev.txid)? {
            Some(desc) => {
                desc.spends.get(prev.vout as usize).cloned().flatten()
                    == Some(OutPoint::new(*txid, index as u32))
            }
            None => false,
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}
