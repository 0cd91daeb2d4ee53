use sled::Db;
use std::path::Path;

use crate::core::types::{Block, Hash256};
use crate::storage::{
    BlockInfo, BlockStore, PoolEntry, StorageError, StoreBatch, StoreOp, TxDescriptor,
};

/// Key prefixes for the different record kinds in sled
const PREFIX_BLOCK: &[u8] = b"blk:";
const PREFIX_INFO: &[u8] = b"nfo:";
const PREFIX_HEIGHT: &[u8] = b"hgt:";
const PREFIX_DESCRIPTOR: &[u8] = b"txd:";
const PREFIX_POOL: &[u8] = b"pol:";
const PREFIX_POOL_SEQ: &[u8] = b"seq:";
const META_BEST: &[u8] = b"meta:best";
const META_POOL_SEQ: &[u8] = b"meta:poolseq";

/// Persistent [`BlockStore`] backed by a sled embedded database.
///
/// Everything lives in one tree so a `sled::Batch` covers a whole chain
/// mutation; `commit` applies the batch and flushes.
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(SledStore { db })
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<sled::IVec>, StorageError> {
        self.db.get(key).map_err(|e| StorageError::DbError(e.to_string()))
    }

    fn get_decoded<T: serde::de::DeserializeOwned>(
        &self,
        key: &[u8],
    ) -> Result<Option<T>, StorageError> {
        match self.get_raw(key)? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| StorageError::SerializeError(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn get_hash(&self, key: &[u8]) -> Result<Option<Hash256>, StorageError> {
        match self.get_raw(key)? {
            Some(bytes) => {
                if bytes.len() != 32 {
                    return Err(StorageError::Corruption(format!(
                        "hash value of length {} under key {}",
                        bytes.len(),
                        String::from_utf8_lossy(key),
                    )));
                }
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }
}

fn prefixed_key(prefix: &[u8], data: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + data.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(data);
    key
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::SerializeError(e.to_string()))
}

impl BlockStore for SledStore {
    fn block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        self.get_decoded(&prefixed_key(PREFIX_BLOCK, hash))
    }

    fn block_info(&self, hash: &Hash256) -> Result<Option<BlockInfo>, StorageError> {
        self.get_decoded(&prefixed_key(PREFIX_INFO, hash))
    }

    fn has_block(&self, hash: &Hash256) -> Result<bool, StorageError> {
        self.db
            .contains_key(prefixed_key(PREFIX_BLOCK, hash))
            .map_err(|e| StorageError::DbError(e.to_string()))
    }

    fn best_block_hash(&self) -> Result<Option<Hash256>, StorageError> {
        self.get_hash(META_BEST)
    }

    fn block_hash_at(&self, height: u32) -> Result<Option<Hash256>, StorageError> {
        self.get_hash(&prefixed_key(PREFIX_HEIGHT, &height.to_be_bytes()))
    }

    fn descriptor(&self, txid: &Hash256) -> Result<Option<TxDescriptor>, StorageError> {
        self.get_decoded(&prefixed_key(PREFIX_DESCRIPTOR, txid))
    }

    fn pool_entry(&self, txid: &Hash256) -> Result<Option<PoolEntry>, StorageError> {
        self.get_decoded(&prefixed_key(PREFIX_POOL, txid))
    }

    fn pool_entries(&self) -> Result<Vec<(u64, Hash256)>, StorageError> {
        let mut entries = Vec::new();
        // Big-endian sequence keys scan in admission order
        for item in self.db.scan_prefix(PREFIX_POOL_SEQ) {
            let (key, value) = item.map_err(|e| StorageError::DbError(e.to_string()))?;
            let seq_bytes: [u8; 8] = key[PREFIX_POOL_SEQ.len()..]
                .try_into()
                .map_err(|_| StorageError::Corruption("bad pool sequence key".into()))?;
            if value.len() != 32 {
                return Err(StorageError::Corruption("bad pool sequence value".into()));
            }
            let mut txid = [0u8; 32];
            txid.copy_from_slice(&value);
            entries.push((u64::from_be_bytes(seq_bytes), txid));
        }
        Ok(entries)
    }

    fn next_pool_sequence(&self) -> Result<u64, StorageError> {
        match self.get_raw(META_POOL_SEQ)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes[..]
                    .try_into()
                    .map_err(|_| StorageError::Corruption("bad pool sequence counter".into()))?;
                Ok(u64::from_le_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn commit(&self, batch: StoreBatch) -> Result<(), StorageError> {
        let mut writes = sled::Batch::default();
        for op in batch.ops {
            match op {
                StoreOp::PutBlock(hash, block) => {
                    writes.insert(prefixed_key(PREFIX_BLOCK, &hash), encode(&block)?);
                }
                StoreOp::PutBlockInfo(hash, info) => {
                    writes.insert(prefixed_key(PREFIX_INFO, &hash), encode(&info)?);
                }
                StoreOp::PutBestBlock(hash) => {
                    writes.insert(META_BEST, &hash[..]);
                }
                StoreOp::PutHashAtHeight(height, hash) => {
                    writes.insert(prefixed_key(PREFIX_HEIGHT, &height.to_be_bytes()), &hash[..]);
                }
                StoreOp::DeleteHashAtHeight(height) => {
                    writes.remove(prefixed_key(PREFIX_HEIGHT, &height.to_be_bytes()));
                }
                StoreOp::PutDescriptor(txid, desc) => {
                    writes.insert(prefixed_key(PREFIX_DESCRIPTOR, &txid), encode(&desc)?);
                }
                StoreOp::DeleteDescriptor(txid) => {
                    writes.remove(prefixed_key(PREFIX_DESCRIPTOR, &txid));
                }
                StoreOp::PutPoolEntry(txid, entry) => {
                    writes.insert(
                        prefixed_key(PREFIX_POOL_SEQ, &entry.sequence.to_be_bytes()),
                        &txid[..],
                    );
                    writes.insert(prefixed_key(PREFIX_POOL, &txid), encode(&entry)?);
                }
                StoreOp::DeletePoolEntry(txid, sequence) => {
                    writes.remove(prefixed_key(PREFIX_POOL, &txid));
                    writes.remove(prefixed_key(PREFIX_POOL_SEQ, &sequence.to_be_bytes()));
                }
                StoreOp::PutPoolSequence(next) => {
                    writes.insert(META_POOL_SEQ, &next.to_le_bytes()[..]);
                }
            }
        }
        self.db
            .apply_batch(writes)
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        self.db.flush().map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }
}
