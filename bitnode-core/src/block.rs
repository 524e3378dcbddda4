//! The main `Block` and `BlockHash` types for Bitnode.
//!
//! A block contains:
//! * A cryptographic link to its parent (the parent's hash),
//! * A number (height) that is one greater than its parent's, genesis being 1,
//! * A set of transactions that move value around,
//! * A nonce and a timestamp used by proof-of-work and the difficulty adjustment.
//!
//! The block hash is cached and the cache is cleared by every method that changes
//! hashed content, so the fields stay private.

use std::{
    cell::OnceCell,
    collections::BTreeSet,
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::{difficulty, error::BlockError, ChainView, ConsensusParams, Transaction};

/// A block in the Bitnode chain.
/// There is no header/body separation here.
#[derive(Clone, Debug)]
pub struct Block {
    previous: Option<BlockHash>,
    number: u64,
    transactions: BTreeSet<Transaction>,
    nonce: u64,
    timestamp: Option<u64>,
    cached_hash: OnceCell<BlockHash>,
}

impl Block {
    /// A fresh genesis block: number 1, no parent, no transactions.
    pub fn genesis() -> Self {
        Self {
            previous: None,
            number: 1,
            transactions: BTreeSet::new(),
            nonce: 0,
            timestamp: None,
            cached_hash: OnceCell::new(),
        }
    }

    /// An empty candidate block extending `parent`.
    pub fn child_of(parent: &Block) -> Self {
        Self {
            previous: Some(parent.hash()),
            number: parent.number + 1,
            ..Self::genesis()
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn previous(&self) -> Option<&BlockHash> {
        self.previous.as_ref()
    }

    pub fn is_genesis(&self) -> bool {
        self.previous.is_none()
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.cached_hash.take();
    }

    /// Unix seconds, if the block has been stamped.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// The timestamp is not hashed, so this leaves the cached hash alone.
    pub fn set_timestamp(&mut self, secs: u64) {
        self.timestamp = Some(secs);
    }

    pub fn transactions(&self) -> &BTreeSet<Transaction> {
        &self.transactions
    }

    pub fn contains_transaction(&self, tx: &Transaction) -> bool {
        self.transactions.contains(tx)
    }

    pub fn has_coinbase(&self) -> bool {
        self.transactions.iter().any(Transaction::is_coinbase)
    }

    /// Add a transaction to the block.
    ///
    /// A coinbase transaction must have exactly one input and the block may hold only one.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), BlockError> {
        if tx.is_coinbase() {
            if tx.inputs().len() != 1 {
                return Err(BlockError::CoinbaseWithMultipleInputs {
                    id: tx.id().to_string(),
                    inputs: tx.inputs().len(),
                });
            }
            if self.has_coinbase() {
                return Err(BlockError::DuplicateCoinbase {
                    number: self.number,
                });
            }
        }

        if self.transactions.insert(tx) {
            self.cached_hash.take();
        }
        Ok(())
    }

    /// Add several transactions, stopping at the first one the block refuses.
    /// Transactions added before the failure stay in the block.
    pub fn add_transactions(
        &mut self,
        txs: impl IntoIterator<Item = Transaction>,
    ) -> Result<(), BlockError> {
        txs.into_iter().try_for_each(|tx| self.add_transaction(tx))
    }

    /// The SHA-256 digest of this block's content.
    pub fn hash(&self) -> BlockHash {
        *self.cached_hash.get_or_init(|| self.compute_hash())
    }

    fn compute_hash(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        if let Some(previous) = &self.previous {
            hasher.update(previous.as_bytes());
        }
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.nonce.to_be_bytes());

        // Transactions are folded in id order, ties broken by content.
        let mut txs: Vec<&Transaction> = self.transactions.iter().collect();
        txs.sort_by(|a, b| a.id().cmp(b.id()).then_with(|| a.cmp(b)));
        hasher.update((txs.len() as u64).to_be_bytes());
        for tx in txs {
            tx.digest_into(&mut hasher);
        }

        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        BlockHash(out)
    }

    pub fn leading_zero_bits(&self) -> u32 {
        self.hash().leading_zero_bits()
    }

    pub fn meets_difficulty(&self, required: u32) -> bool {
        self.leading_zero_bits() >= required
    }

    /// Number of leading zero bits this block's hash must have at its height.
    /// Walks back through `chain` to genesis; every ancestor must be known.
    pub fn required_difficulty<C: ChainView + ?Sized>(
        &self,
        chain: &C,
        params: &ConsensusParams,
    ) -> Result<u32, BlockError> {
        difficulty::required_difficulty(chain, self, params)
    }

    /// Search a nonce meeting this block's own required difficulty.
    /// Returns the difficulty that was met.
    pub fn find_nonce<C: ChainView + ?Sized>(
        &mut self,
        chain: &C,
        params: &ConsensusParams,
        cancel: &CancellationToken,
    ) -> Result<u32, BlockError> {
        let required = self.required_difficulty(chain, params)?;
        self.search_nonce(required, cancel)?;
        Ok(required)
    }

    /// Increment the nonce until the hash has at least `required` leading zero bits.
    ///
    /// The nonce is always incremented at least once. The search runs until it succeeds
    /// or `cancel` trips; on success an unstamped block gets the current time.
    pub fn search_nonce(
        &mut self,
        required: u32,
        cancel: &CancellationToken,
    ) -> Result<(), BlockError> {
        loop {
            if cancel.is_cancelled() {
                return Err(BlockError::Cancelled);
            }
            self.set_nonce(self.nonce.wrapping_add(1));
            if self.meets_difficulty(required) {
                break;
            }
        }

        if self.timestamp.is_none() {
            self.timestamp = Some(unix_now());
        }
        Ok(())
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.previous == other.previous
            && self.number == other.number
            && self.nonce == other.nonce
            && self.timestamp == other.timestamp
            && self.transactions == other.transactions
    }
}

impl Eq for Block {}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block #{} ({})", self.number, self.hash())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A block identifier. It is the SHA-256 digest of the block.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Count leading zero bits byte by byte: 8 per zero byte, then the
    /// leading zeros of the first non-zero byte.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut total = 0;
        for byte in self.0 {
            if byte == 0 {
                total += 8;
            } else {
                total += byte.leading_zeros();
                break;
            }
        }
        total
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
