//! Validation errors surfaced by the node.
//!
//! Every rejection carries the identity of the rejected entity: number and hash for
//! blocks, id for transactions.

use bitnode_core::{BlockError, BlockHash, TransactionId, Xput};
use thiserror::Error;

/// Why a block was not accepted.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum BlockRejection {
    /// The block does not extend the tip and its chain is not heavier.
    #[error("accumulated difficulty {candidate} does not exceed the current chain's {current}")]
    ForkChoice { candidate: u64, current: u64 },

    #[error("parent {0} is not known")]
    UnknownParent(BlockHash),

    /// Proof-of-work check failed.
    #[error("hash has {actual} leading zero bits, {required} required")]
    InsufficientDifficulty { required: u32, actual: u32 },

    #[error("input {input} of transaction {tx} is not spendable")]
    UnspendableInput { tx: TransactionId, input: Xput },

    #[error(transparent)]
    Structure(#[from] BlockError),
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MempoolError {
    #[error("transaction {tx} spends {input}, already spent by a pending transaction")]
    DoubleSpend { tx: TransactionId, input: Xput },

    #[error("transaction {tx} creates {outputs} from {inputs}")]
    InsufficientInputs {
        tx: TransactionId,
        inputs: u128,
        outputs: u128,
    },
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum NodeError {
    #[error("invalid block {number}, hash {hash}: {reason}")]
    InvalidBlock {
        number: u64,
        hash: BlockHash,
        reason: BlockRejection,
    },

    #[error("invalid transaction {id}: input {input} is not in the UTXO set")]
    InvalidTransaction { id: TransactionId, input: Xput },

    #[error("mempool refused transaction: {0}")]
    Mempool(#[from] MempoolError),

    #[error("mining was cancelled")]
    MiningCancelled,

    #[error("the node holds no blocks")]
    EmptyChain,

    #[error(transparent)]
    Block(BlockError),
}

impl NodeError {
    /// Any block rejection, including insufficient difficulty.
    pub fn is_invalid_block(&self) -> bool {
        matches!(self, NodeError::InvalidBlock { .. })
    }

    pub fn is_insufficient_difficulty(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidBlock {
                reason: BlockRejection::InsufficientDifficulty { .. },
                ..
            }
        )
    }

    pub fn rejection(&self) -> Option<&BlockRejection> {
        match self {
            NodeError::InvalidBlock { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl From<BlockError> for NodeError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::Cancelled => NodeError::MiningCancelled,
            other => NodeError::Block(other),
        }
    }
}

/// A convenient type alias to return from fallible node methods.
pub type NodeResult<T> = Result<T, NodeError>;
