use parking_lot::RwLock;
use std::sync::Arc;

use crate::core::types::{Block, Hash256, Transaction};

/// A block together with its best-chain height, as delivered to listeners
/// and by the forward iterator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub height: u32,
    pub block: Block,
}

/// Callbacks fired by the blockchain facade while its write lock is held.
///
/// Within a reorganization, every detach of the old branch is delivered
/// before any attach of the new branch, in chain order. Listeners must not
/// block; anything slow belongs on the listener's own queue.
pub trait ChainEventListener: Send + Sync {
    fn on_attach_block(&self, _block: &ChainBlock) {}
    fn on_detach_block(&self, _block: &ChainBlock) {}
    fn on_new_transaction(&self, _tx: &Transaction) {}
    fn on_remove_transaction(&self, _txid: &Hash256) {}
}

/// An event recorded during a chain mutation. Events are buffered while
/// the mutation is staged and delivered only after its batch commits, so
/// listeners never observe state that was rolled back.
#[derive(Debug, Clone)]
pub(crate) enum ChainEvent {
    Attached(ChainBlock),
    Detached(ChainBlock),
    NewTransaction(Transaction),
    RemovedTransaction(Hash256),
}

/// Ordered listener registry; listeners are invoked in registration order
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn ChainEventListener>>>,
}

impl ListenerSet {
    pub fn add(&self, listener: Arc<dyn ChainEventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn dispatch(&self, events: Vec<ChainEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read();
        for event in &events {
            for listener in listeners.iter() {
                match event {
                    ChainEvent::Attached(block) => listener.on_attach_block(block),
                    ChainEvent::Detached(block) => listener.on_detach_block(block),
                    ChainEvent::NewTransaction(tx) => listener.on_new_transaction(tx),
                    ChainEvent::RemovedTransaction(txid) => listener.on_remove_transaction(txid),
                }
            }
        }
    }
}
