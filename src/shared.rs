//! A thread-safe handle around [`Node`].
//!
//! Block receipt, transaction receipt and mining all read then write the tip and the UTXO
//! set, so every entry point goes through one mutex. Mining holds the lock only to build
//! its candidate and to receive the result; the nonce search itself runs unlocked and is
//! interrupted whenever another block is accepted.
//!
//! Lock order is node, then miners. A search is registered and interrupted only while the
//! node lock is held.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitnode_core::{Block, BlockHash, Transaction};
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::{error::NodeResult, Node};

#[derive(Clone)]
pub struct SharedNode {
    node: Arc<Mutex<Node>>,
    /// One token per nonce search in flight.
    miners: Arc<Mutex<Vec<CancellationToken>>>,
}

impl SharedNode {
    pub fn new(node: Node) -> Self {
        Self {
            node: Arc::new(Mutex::new(node)),
            miners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Node> {
        self.node.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_miners(&self) -> MutexGuard<'_, Vec<CancellationToken>> {
        self.miners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read-only closure against the node.
    pub fn with_node<R>(&self, f: impl FnOnce(&Node) -> R) -> R {
        f(&self.lock())
    }

    pub fn latest_block(&self) -> Option<Block> {
        self.lock().latest_block().cloned()
    }

    pub fn receive_transaction(&self, tx: Transaction) -> NodeResult<()> {
        self.lock().receive_transaction(tx)
    }

    /// Receive a block; on success any nonce search in flight is abandoned.
    pub fn receive_block(&self, block: Block) -> NodeResult<BlockHash> {
        let mut node = self.lock();
        let hash = node.receive_block(block)?;
        self.interrupt_mining();
        Ok(hash)
    }

    /// Mine a block on the current tip.
    ///
    /// Stops with [`NodeError::MiningCancelled`](crate::NodeError::MiningCancelled) when
    /// `cancel` trips or when another block is accepted during the search.
    pub fn mine_block(&self, cancel: &CancellationToken) -> NodeResult<Block> {
        // The search is registered before the node lock is released.
        let (mut candidate, required, token) = {
            let node = self.lock();
            let (candidate, required) = node.prepare_candidate()?;
            let token = cancel.child_token();
            self.lock_miners().push(token.clone());
            (candidate, required, token)
        };

        let found = candidate.search_nonce(required, &token);
        token.cancel();
        self.lock_miners().retain(|t| !t.is_cancelled());
        found?;

        let mut node = self.lock();
        let hash = node.receive_block(candidate.clone())?;
        debug!("Mined block {} hash: {hash}", candidate.number());
        self.interrupt_mining();
        Ok(candidate)
    }

    /// Abandon every nonce search in flight.
    pub fn interrupt_mining(&self) {
        for token in self.lock_miners().drain(..) {
            token.cancel();
        }
    }

    /// Number of nonce searches in flight.
    pub fn active_miners(&self) -> usize {
        self.lock_miners().len()
    }
}
