//! Opaque identities that own value.
//!
//! Key derivation and signature checks happen outside this crate. An address is
//! accepted as already validated and only compared for equality.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::AddressError;

/// The literal that marks the coinbase sentinel in either address form.
pub const COINBASE_ADDRESS: &str = "coinbase";

/// Represents a public identifier that can own an [`Xput`](crate::Xput).
///
/// An address has two textual forms: a cash address and a public-key hash.
/// At least one of them must be set. Two addresses are equal iff both forms match.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
pub struct Address {
    cash_address: String,
    pub_key_hash: String,
}

impl Address {
    /// Create an address from its two forms. Either may be empty, but not both.
    pub fn new(
        cash_address: impl Into<String>,
        pub_key_hash: impl Into<String>,
    ) -> Result<Self, AddressError> {
        let cash_address = cash_address.into();
        let pub_key_hash = pub_key_hash.into();

        if cash_address.is_empty() && pub_key_hash.is_empty() {
            return Err(AddressError::Empty);
        }

        Ok(Self {
            cash_address,
            pub_key_hash,
        })
    }

    /// The distinguished sentinel that denotes newly issued value.
    pub fn coinbase() -> Self {
        Self {
            cash_address: COINBASE_ADDRESS.to_string(),
            pub_key_hash: COINBASE_ADDRESS.to_string(),
        }
    }

    pub fn cash_address(&self) -> &str {
        &self.cash_address
    }

    pub fn pub_key_hash(&self) -> &str {
        &self.pub_key_hash
    }

    /// Either form naming the sentinel is enough.
    pub fn is_coinbase(&self) -> bool {
        self.cash_address == COINBASE_ADDRESS || self.pub_key_hash == COINBASE_ADDRESS
    }

    /// Feed both forms into a digest, length-prefixed so that
    /// `("ab", "c")` and `("a", "bc")` do not collide.
    pub(crate) fn digest_into(&self, hasher: &mut Sha256) {
        for part in [&self.cash_address, &self.pub_key_hash] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cash_address.is_empty() {
            write!(f, "{}", self.pub_key_hash)
        } else {
            write!(f, "{}", self.cash_address)
        }
    }
}
