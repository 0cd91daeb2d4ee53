//! Test fixtures: deterministic block/transaction builders and a fully
//! wired chain core over a `MemoryStore`. Blocks take their per-block
//! work in abstract units; `bits` is derived so chain-work comparisons in
//! scenarios come out as written.

use parking_lot::Mutex;
use primitive_types::U256;
use std::sync::Arc;

use crate::chain::blockchain::Blockchain;
use crate::chain::events::{ChainBlock, ChainEventListener};
use crate::chain::inventory::InventoryProcessor;
use crate::chain::orphans::{BlockOrphanage, TransactionOrphanage};
use crate::chain::processor::{BlockProcessor, TransactionProcessor};
use crate::core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput, NULL_HASH,
};
use crate::core::work::compact_from_target;
use crate::storage::MemoryStore;

/// Compact bits whose per-block work is ≈ `units` hash evaluations
pub(crate) fn bits_for_work(units: u64) -> u32 {
    compact_from_target(U256::MAX / U256::from(units))
}

/// Build a block of `work_units` per-block work on `prev`. `tag` lands in
/// the nonce and the coinbase script so sibling blocks at the same height
/// get distinct hashes and distinct coinbases.
pub(crate) fn make_block(
    prev: Hash256,
    height: u32,
    work_units: u64,
    tag: u64,
    extra: Vec<Transaction>,
) -> Block {
    let mut transactions =
        vec![Transaction::new_coinbase(height, 50_000, vec![0x51, tag as u8])];
    transactions.extend(extra);
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: prev,
            merkle_root: NULL_HASH,
            timestamp: 1_700_000_000,
            bits: bits_for_work(work_units),
            nonce: tag,
        },
        transactions,
    }
}

/// A non-coinbase transaction spending the given outpoints; `tag` makes
/// otherwise-identical transactions hash differently
pub(crate) fn spend(prev: &[(Hash256, u32)], outputs: usize, tag: u64) -> Transaction {
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
        lock_time: tag,
    }
}

// ─── Event Recording ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    Attach(u32, Hash256),
    Detach(u32, Hash256),
    NewTx(Hash256),
    RemovedTx(Hash256),
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    log: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut *self.log.lock())
    }
}

impl ChainEventListener for RecordingListener {
    fn on_attach_block(&self, block: &ChainBlock) {
        self.log.lock().push(Recorded::Attach(block.height, block.block.hash()));
    }

    fn on_detach_block(&self, block: &ChainBlock) {
        self.log.lock().push(Recorded::Detach(block.height, block.block.hash()));
    }

    fn on_new_transaction(&self, tx: &Transaction) {
        self.log.lock().push(Recorded::NewTx(tx.hash()));
    }

    fn on_remove_transaction(&self, txid: &Hash256) {
        self.log.lock().push(Recorded::RemovedTx(*txid));
    }
}

// ─── Wiring ──────────────────────────────────────────────────────────

pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub chain: Arc<Blockchain>,
    pub blocks: BlockProcessor,
    pub txs: Arc<TransactionProcessor>,
    pub inventory: InventoryProcessor,
    pub events: Arc<RecordingListener>,
    pub block_orphans: Arc<Mutex<BlockOrphanage>>,
    pub tx_orphans: Arc<Mutex<TransactionOrphanage>>,
}

pub(crate) fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(Blockchain::new(store.clone()).expect("fresh store"));
    let events = Arc::new(RecordingListener::default());
    chain.add_event_listener(events.clone());

    let block_orphans = Arc::new(Mutex::new(BlockOrphanage::new()));
    let tx_orphans = Arc::new(Mutex::new(TransactionOrphanage::new()));
    let txs = Arc::new(TransactionProcessor::new(chain.clone(), tx_orphans.clone()));
    let blocks = BlockProcessor::new(chain.clone(), block_orphans.clone(), txs.clone());
    let inventory =
        InventoryProcessor::new(store.clone(), block_orphans.clone(), tx_orphans.clone());

    Harness { store, chain, blocks, txs, inventory, events, block_orphans, tx_orphans }
}

/// Harness with a genesis block already accepted; returns the harness,
/// the genesis hash and the genesis coinbase txid
pub(crate) fn harness_with_genesis() -> (Harness, Hash256, Hash256) {
    let h = harness();
    let genesis = make_block(NULL_HASH, 0, 10, 0, vec![]);
    let genesis_hash = genesis.hash();
    let coinbase_id = genesis.transactions[0].hash();
    h.chain.put_block(genesis_hash, genesis).expect("genesis");
    h.events.take();
    (h, genesis_hash, coinbase_id)
}
