//! A single-node Bitnode ledger.
//!
//! Accepts transactions and blocks, keeps the set of unspent outputs, enforces
//! proof-of-work and chain continuity, and mines new blocks from its own mempool.
//!
//! Peer transport, key cryptography and persistence are outside this crate. Confirmed
//! blocks are handed to a [`BlockPropagator`] and forgotten.

pub mod clock;
pub mod error;
mod mempool;
mod node;
pub mod propagation;
mod shared;
mod utxo;

pub use bitnode_core::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BlockRejection, MempoolError, NodeError, NodeResult};
pub use mempool::Mempool;
pub use node::Node;
pub use propagation::{BlockPropagator, MemoryPropagator, NoopPropagator, PropagationError};
pub use shared::SharedNode;
pub use tokio_util::sync::CancellationToken;
pub use utxo::UtxoSet;


#[cfg(test)]
mod tests;
