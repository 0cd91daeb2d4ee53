//! Orphan pools: blocks whose parent is unknown and transactions whose
//! inputs do not yet resolve. Both are memory-only, capacity-bounded, and
//! evict their oldest entry when full — a peer can always re-announce.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::core::params::{MAX_ORPHAN_BLOCKS, MAX_ORPHAN_TRANSACTIONS};
use crate::core::types::{short_hash, Block, Hash256, OutPoint, Transaction};

// ─── Block Orphanage ─────────────────────────────────────────────────

/// Blocks waiting for their parent to arrive
pub struct BlockOrphanage {
    by_hash: HashMap<Hash256, Block>,
    by_parent: HashMap<Hash256, HashSet<Hash256>>,
    arrival: VecDeque<Hash256>,
    capacity: usize,
}

impl BlockOrphanage {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ORPHAN_BLOCKS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BlockOrphanage {
            by_hash: HashMap::new(),
            by_parent: HashMap::new(),
            arrival: VecDeque::new(),
            capacity,
        }
    }

    /// Park a block; returns its hash. Re-inserting a known orphan is a
    /// no-op.
    pub fn put_orphan(&mut self, block: Block) -> Hash256 {
        let hash = block.hash();
        if self.by_hash.contains_key(&hash) {
            return hash;
        }
        if self.by_hash.len() >= self.capacity {
            if let Some(oldest) = self.arrival.front().copied() {
                debug!("🧹 orphan blocks full, evicting {}", short_hash(&oldest));
                self.remove_orphan(&oldest);
            }
        }
        self.by_parent
            .entry(block.header.prev_hash)
            .or_default()
            .insert(hash);
        self.by_hash.insert(hash, block);
        self.arrival.push_back(hash);
        hash
    }

    pub fn remove_orphan(&mut self, hash: &Hash256) -> Option<Block> {
        let block = self.by_hash.remove(hash)?;
        if let Some(siblings) = self.by_parent.get_mut(&block.header.prev_hash) {
            siblings.remove(hash);
            if siblings.is_empty() {
                self.by_parent.remove(&block.header.prev_hash);
            }
        }
        self.arrival.retain(|h| h != hash);
        Some(block)
    }

    pub fn has_orphan(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get_orphan(&self, hash: &Hash256) -> Option<&Block> {
        self.by_hash.get(hash)
    }

    /// Hashes of the orphans whose parent is `parent_hash`
    pub fn orphans_depending_on(&self, parent_hash: &Hash256) -> Vec<Hash256> {
        self.by_parent
            .get(parent_hash)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Walk `prev_hash` links inside the orphanage to the earliest
    /// ancestor that is itself still an orphan — the block whose parent
    /// should be requested from peers.
    pub fn root_orphan_of(&self, hash: &Hash256) -> Option<Hash256> {
        let mut current = *hash;
        self.by_hash.get(&current)?;
        for _ in 0..self.by_hash.len() {
            let parent = self.by_hash.get(&current)?.header.prev_hash;
            if !self.by_hash.contains_key(&parent) {
                break;
            }
            current = parent;
        }
        Some(current)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

impl Default for BlockOrphanage {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Transaction Orphanage ───────────────────────────────────────────

/// Transactions waiting for the outputs they spend to become known
pub struct TransactionOrphanage {
    by_hash: HashMap<Hash256, (Transaction, Vec<OutPoint>)>,
    by_outpoint: HashMap<OutPoint, HashSet<Hash256>>,
    arrival: VecDeque<Hash256>,
    capacity: usize,
}

impl TransactionOrphanage {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ORPHAN_TRANSACTIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        TransactionOrphanage {
            by_hash: HashMap::new(),
            by_outpoint: HashMap::new(),
            arrival: VecDeque::new(),
            capacity,
        }
    }

    /// Park a transaction against each outpoint it is waiting for
    pub fn put_orphan(&mut self, txid: Hash256, tx: Transaction, missing: Vec<OutPoint>) {
        if self.by_hash.contains_key(&txid) {
            return;
        }
        if self.by_hash.len() >= self.capacity {
            if let Some(oldest) = self.arrival.front().copied() {
                debug!("🧹 orphan txs full, evicting {}", short_hash(&oldest));
                self.remove_orphan(&oldest);
            }
        }
        for outpoint in &missing {
            self.by_outpoint.entry(outpoint.clone()).or_default().insert(txid);
        }
        self.by_hash.insert(txid, (tx, missing));
        self.arrival.push_back(txid);
    }

    pub fn remove_orphan(&mut self, txid: &Hash256) -> Option<Transaction> {
        let (tx, missing) = self.by_hash.remove(txid)?;
        for outpoint in &missing {
            if let Some(waiters) = self.by_outpoint.get_mut(outpoint) {
                waiters.remove(txid);
                if waiters.is_empty() {
                    self.by_outpoint.remove(outpoint);
                }
            }
        }
        self.arrival.retain(|h| h != txid);
        Some(tx)
    }

    pub fn has_orphan(&self, txid: &Hash256) -> bool {
        self.by_hash.contains_key(txid)
    }

    /// Orphans waiting on a specific outpoint
    pub fn dependents_of(&self, outpoint: &OutPoint) -> Vec<Hash256> {
        self.by_outpoint
            .get(outpoint)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Orphans waiting on any output of `txid`
    pub fn dependents_of_tx(&self, txid: &Hash256) -> Vec<Hash256> {
        let mut dependents: Vec<Hash256> = self
            .by_outpoint
            .iter()
            .filter(|(outpoint, _)| outpoint.txid == *txid)
            .flat_map(|(_, waiters)| waiters.iter().copied())
            .collect();
        dependents.sort_unstable();
        dependents.dedup();
        dependents
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

impl Default for TransactionOrphanage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BlockHeader, NULL_HASH};

    fn block(prev: Hash256, nonce: u64) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: prev,
                merkle_root: NULL_HASH,
                timestamp: 0,
                bits: 0x207fffff,
                nonce,
            },
            transactions: vec![Transaction::new_coinbase(0, 50, vec![])],
        }
    }

    #[test]
    fn test_block_orphans_indexed_by_parent() {
        let mut orphans = BlockOrphanage::new();
        let a = block([1; 32], 0);
        let b = block([1; 32], 1);
        let c = block([2; 32], 2);
        let (ha, hb) = (orphans.put_orphan(a), orphans.put_orphan(b));
        orphans.put_orphan(c);

        let mut depending = orphans.orphans_depending_on(&[1; 32]);
        depending.sort_unstable();
        let mut expected = vec![ha, hb];
        expected.sort_unstable();
        assert_eq!(depending, expected);
        assert!(orphans.orphans_depending_on(&[9; 32]).is_empty());
        assert_eq!(orphans.get_orphan(&ha).map(|b| b.hash()), Some(ha));
        assert!(orphans.get_orphan(&[9; 32]).is_none());
    }

    #[test]
    fn test_block_orphan_remove_clears_parent_index() {
        let mut orphans = BlockOrphanage::new();
        let hash = orphans.put_orphan(block([1; 32], 0));
        assert!(orphans.remove_orphan(&hash).is_some());
        assert!(!orphans.has_orphan(&hash));
        assert!(orphans.orphans_depending_on(&[1; 32]).is_empty());
        assert!(orphans.remove_orphan(&hash).is_none());
    }

    #[test]
    fn test_root_orphan_walks_to_earliest_ancestor() {
        let mut orphans = BlockOrphanage::new();
        let root = block([0xEE; 32], 0);
        let root_hash = orphans.put_orphan(root.clone());
        let mid = block(root_hash, 1);
        let mid_hash = orphans.put_orphan(mid.clone());
        let tip_hash = orphans.put_orphan(block(mid_hash, 2));

        assert_eq!(orphans.root_orphan_of(&tip_hash), Some(root_hash));
        assert_eq!(orphans.root_orphan_of(&root_hash), Some(root_hash));
        assert_eq!(orphans.root_orphan_of(&[5; 32]), None);
    }

    #[test]
    fn test_block_orphanage_evicts_oldest_at_capacity() {
        let mut orphans = BlockOrphanage::with_capacity(2);
        let first = orphans.put_orphan(block([1; 32], 0));
        let second = orphans.put_orphan(block([1; 32], 1));
        let third = orphans.put_orphan(block([1; 32], 2));
        assert_eq!(orphans.len(), 2);
        assert!(!orphans.has_orphan(&first));
        assert!(orphans.has_orphan(&second));
        assert!(orphans.has_orphan(&third));
    }

    #[test]
    fn test_tx_orphans_indexed_by_missing_outpoint() {
        let mut orphans = TransactionOrphanage::new();
        let tx = Transaction::new_coinbase(9, 1, vec![]);
        let txid = [0xAB; 32];
        let missing = vec![OutPoint::new([1; 32], 0), OutPoint::new([2; 32], 3)];
        orphans.put_orphan(txid, tx, missing.clone());

        assert!(orphans.has_orphan(&txid));
        assert_eq!(orphans.dependents_of(&missing[0]), vec![txid]);
        assert_eq!(orphans.dependents_of(&missing[1]), vec![txid]);
        assert_eq!(orphans.dependents_of_tx(&[1; 32]), vec![txid]);
        assert!(orphans.dependents_of_tx(&[3; 32]).is_empty());

        orphans.remove_orphan(&txid);
        assert!(orphans.dependents_of(&missing[0]).is_empty());
        assert!(orphans.is_empty());
    }

    #[test]
    fn test_tx_orphanage_evicts_oldest_at_capacity() {
        let mut orphans = TransactionOrphanage::with_capacity(1);
        orphans.put_orphan([1; 32], Transaction::new_coinbase(1, 1, vec![]), vec![]);
        orphans.put_orphan([2; 32], Transaction::new_coinbase(2, 1, vec![]), vec![]);
        assert_eq!(orphans.len(), 1);
        assert!(orphans.has_orphan(&[2; 32]));
    }
}
