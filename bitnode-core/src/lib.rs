//! The core types associated with the Bitnode ledger.
//!
//! Bitnode is a simple UTXO based cryptocurrency.
//! An xput has an owner and an amount.
//! Each transaction consumes some xputs and creates new xputs.
//! A block links to its parent by hash, carries a set of transactions, and must carry
//! enough proof-of-work for its height. Difficulty is retargeted every fixed number of blocks.

mod address;
mod block;
mod chain;
pub mod difficulty;
pub mod error;
mod params;
mod transaction;
pub mod units;
mod xput;

pub use address::{Address, COINBASE_ADDRESS};
pub use block::{Block, BlockHash};
pub use chain::{BlockStore, ChainView, StoredBlock};
pub use error::{AddressError, BlockError, ParamsError, TransactionError};
pub use params::ConsensusParams;
pub use transaction::{Transaction, TransactionId};
pub use xput::Xput;
