//! The hand-off to whatever spreads confirmed blocks to peers.
//!
//! The node calls [`BlockPropagator::notify`] once per confirmed block, after the
//! confirmation happened. A failing sink is logged and otherwise ignored.

use std::sync::Mutex;

use bitnode_core::{Block, BlockHash};
use thiserror::Error;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("propagation failed: {0}")]
pub struct PropagationError(pub String);

pub trait BlockPropagator: Send + Sync {
    fn notify(&self, block: &Block) -> Result<(), PropagationError>;
}

/// A propagator that does nothing. Used when the node runs without a transport.
#[derive(Debug, Default)]
pub struct NoopPropagator;

impl BlockPropagator for NoopPropagator {
    fn notify(&self, _block: &Block) -> Result<(), PropagationError> {
        Ok(())
    }
}

/// Records the hash of every notified block. Useful for writing tests.
#[derive(Debug, Default)]
pub struct MemoryPropagator {
    sent: Mutex<Vec<BlockHash>>,
}

impl MemoryPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes of the notified blocks, oldest first.
    pub fn sent(&self) -> Vec<BlockHash> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl BlockPropagator for MemoryPropagator {
    fn notify(&self, block: &Block) -> Result<(), PropagationError> {
        self.sent
            .lock()
            .map_err(|e| PropagationError(e.to_string()))?
            .push(block.hash());
        Ok(())
    }
}
