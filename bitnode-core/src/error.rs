//! Structural errors raised while building core values.
//!
//! Consensus rejections (fork choice, spent inputs, proof-of-work) are decided by the
//! node and live in the engine crate. The errors here only describe values that cannot
//! be constructed or searched at all.

use thiserror::Error;

use crate::{BlockHash, Xput};

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AddressError {
    #[error("an address needs a cash address or a public-key hash")]
    Empty,
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum TransactionError {
    #[error("a transaction needs at least one input")]
    EmptyInputs,

    #[error("a transaction needs at least one output")]
    EmptyOutputs,

    /// The same xput listed twice among the inputs.
    #[error("input {0} is listed more than once")]
    DuplicateInput(Xput),
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum BlockError {
    /// Only one coinbase transaction fits in a block.
    #[error("block {number} already contains a coinbase transaction")]
    DuplicateCoinbase { number: u64 },

    /// A coinbase transaction must consist of exactly the coinbase input.
    #[error("coinbase transaction {id} has {inputs} inputs, expected exactly one")]
    CoinbaseWithMultipleInputs { id: String, inputs: usize },

    /// A chain walk reached a parent that the chain view does not hold.
    #[error("ancestor {0} is not known")]
    UnknownAncestor(BlockHash),

    #[error("nonce search was cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("invalid consensus parameters: {0}")]
    Invalid(String),

    #[error("failed to parse consensus parameters: {0}")]
    Parse(#[from] serde_json::Error),
}
