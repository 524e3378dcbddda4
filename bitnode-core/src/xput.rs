//! The basic `Xput` type: a spendable quantity owned by an address.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::Address;

/// An `(owner, amount)` pair used both as a transaction input and as an output.
///
/// Equality and hashing are by value. Two xputs with the same owner and the same
/// amount are indistinguishable, even when they were created by different transactions,
/// so the ledger can only ever track one of them at a time.
#[derive(Hash, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct Xput {
    /// The address that owns this value and has the authority to spend it.
    pub owner: Address,
    /// The value denominated in satoshis.
    pub amount: u64,
}

impl Xput {
    pub fn new(owner: Address, amount: u64) -> Self {
        Self { owner, amount }
    }

    /// A coinbase xput references no prior output; it only marks issuance.
    pub fn is_coinbase(&self) -> bool {
        self.owner.is_coinbase()
    }

    pub(crate) fn digest_into(&self, hasher: &mut Sha256) {
        self.owner.digest_into(hasher);
        hasher.update(self.amount.to_be_bytes());
    }
}

impl fmt::Display for Xput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.owner, self.amount)
    }
}
