use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte hash used throughout the system
pub type Hash256 = [u8; 32];

/// Null hash (all zeros): genesis prev_hash and the coinbase source
pub const NULL_HASH: Hash256 = [0u8; 32];

/// Output index marker for a coinbase outpoint
pub const COINBASE_VOUT: u32 = 0xFFFF_FFFF;

/// Double SHA-256 over raw bytes — the hash recipe for every wire type
pub fn double_sha256(bytes: &[u8]) -> Hash256 {
    use sha2::{Digest, Sha256};
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&second);
    hash
}

/// Short hex form for log lines
pub fn short_hash(hash: &Hash256) -> String {
    hex::encode(&hash[..8])
}

// ─── Transaction Types ───────────────────────────────────────────────

/// Reference to a previous transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// The outpoint a coinbase input carries: (all-zero hash, 0xFFFFFFFF)
    pub fn null() -> Self {
        OutPoint { txid: NULL_HASH, vout: COINBASE_VOUT }
    }

    pub fn is_null(&self) -> bool {
        self.txid == NULL_HASH && self.vout == COINBASE_VOUT
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", short_hash(&self.txid), self.vout)
    }
}

/// Transaction input — spends a previous output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub unlocking_script: Vec<u8>,
    pub sequence: u32,
}

/// Transaction output — creates a new spendable output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    pub amount: u64,
    pub locking_script: Vec<u8>,
}

/// A complete transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u64,
}

impl Transaction {
    /// Create a coinbase transaction paying `amount` to `locking_script`.
    /// The unlocking script carries the height so coinbases of different
    /// blocks never hash identically.
    pub fn new_coinbase(height: u32, amount: u64, locking_script: Vec<u8>) -> Self {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                unlocking_script: height.to_le_bytes().to_vec(),
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput { amount, locking_script }],
            lock_time: 0,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// Compute the transaction hash (double SHA-256 of the serialized bytes)
    pub fn hash(&self) -> Hash256 {
        let serialized = bincode::serialize(self).expect("tx serialization failed");
        double_sha256(&serialized)
    }
}

// ─── Block Types ─────────────────────────────────────────────────────

/// Block header. `bits` is the compact difficulty target; the header hash
/// is a deterministic function of the serialized bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u64,
    pub bits: u32,
    pub nonce: u64,
}

impl BlockHeader {
    /// Compute the block hash (double SHA-256 of the serialized header)
    pub fn hash(&self) -> Hash256 {
        let serialized = bincode::serialize(self).expect("header serialization failed");
        double_sha256(&serialized)
    }
}

/// A complete block; `transactions[0]` is the coinbase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn size(&self) -> usize {
        bincode::serialized_size(self).unwrap_or(0) as usize
    }
}

// ─── Inventory Vectors ───────────────────────────────────────────────

/// Inventory item kind as announced on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InvKind {
    Tx,
    Block,
    FilteredBlock,
}

/// A single inventory announcement: "item `hash` of kind `kind`"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InvVector {
    pub kind: InvKind,
    pub hash: Hash256,
}

impl InvVector {
    pub fn block(hash: Hash256) -> Self {
        InvVector { kind: InvKind::Block, hash }
    }

    pub fn tx(hash: Hash256) -> Self {
        InvVector { kind: InvKind::Tx, hash }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coinbase_detection() {
        let tx = Transaction::new_coinbase(7, 50_000, vec![0x51]);
        assert!(tx.is_coinbase());
        assert_eq!(tx.total_output(), 50_000);
        assert!(tx.inputs[0].previous_output.is_null());
    }

    #[test]
    fn test_coinbase_hashes_differ_by_height() {
        let a = Transaction::new_coinbase(1, 50_000, vec![0x51]);
        let b = Transaction::new_coinbase(2, 50_000, vec![0x51]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_tx_hash_deterministic() {
        let tx = Transaction::new_coinbase(0, 5_000_000_000, vec![]);
        assert_eq!(tx.hash(), tx.hash());
        assert_ne!(tx.hash(), NULL_HASH);
    }

    #[test]
    fn test_header_hash_covers_all_fields() {
        let header = BlockHeader {
            version: 1,
            prev_hash: NULL_HASH,
            merkle_root: NULL_HASH,
            timestamp: 1_700_000_000,
            bits: 0x207fffff,
            nonce: 0,
        };
        let mut other = header.clone();
        other.nonce = 1;
        assert_ne!(header.hash(), other.hash());
    }

    #[test]
    fn test_outpoint_null_roundtrip() {
        assert!(OutPoint::null().is_null());
        assert!(!OutPoint::new([1; 32], 0).is_null());
        assert!(!OutPoint::new(NULL_HASH, 0).is_null());
    }
}
