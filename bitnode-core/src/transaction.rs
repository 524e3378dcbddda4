//! A transaction consumes a non-empty list of xputs and creates a non-empty list of xputs.
//!
//! Inputs are matched against the UTXO set by value, so an input names the owner and
//! amount it spends rather than a reference to the transaction that created it.

use std::{collections::HashSet, fmt};

use sha2::{Digest, Sha256};

use crate::{error::TransactionError, Xput};

/// A Bitnode transaction.
///
/// The constructor enforces that both sides are non-empty and that no input repeats.
/// Balance, double spending and UTXO membership are checked by the mempool and the node,
/// not here.
#[derive(Clone, Hash, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct Transaction {
    inputs: Vec<Xput>,
    outputs: Vec<Xput>,
    id: TransactionId,
}

impl Transaction {
    /// Build a transaction with a caller supplied identifier.
    /// When `id` is `None` an identifier is derived from the inputs and outputs.
    pub fn new(
        inputs: Vec<Xput>,
        outputs: Vec<Xput>,
        id: Option<TransactionId>,
    ) -> Result<Self, TransactionError> {
        if inputs.is_empty() {
            return Err(TransactionError::EmptyInputs);
        }
        if outputs.is_empty() {
            return Err(TransactionError::EmptyOutputs);
        }
        let mut seen = HashSet::new();
        if let Some(input) = inputs.iter().find(|i| !seen.insert(*i)) {
            return Err(TransactionError::DuplicateInput(input.clone()));
        }

        let id = id.unwrap_or_else(|| TransactionId::derive(&inputs, &outputs));

        Ok(Self {
            inputs,
            outputs,
            id,
        })
    }

    /// Shorthand for `new` with a textual identifier.
    pub fn with_id(
        inputs: Vec<Xput>,
        outputs: Vec<Xput>,
        id: impl Into<String>,
    ) -> Result<Self, TransactionError> {
        Self::new(inputs, outputs, Some(TransactionId(id.into())))
    }

    pub fn inputs(&self) -> &[Xput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Xput] {
        &self.outputs
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// A transaction is a coinbase transaction iff any of its inputs is coinbase.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.iter().any(Xput::is_coinbase)
    }

    /// Inputs that reference a real prior output.
    pub fn spent_inputs(&self) -> impl Iterator<Item = &Xput> + '_ {
        self.inputs.iter().filter(|i| !i.is_coinbase())
    }

    /// Sum of all non-coinbase input amounts.
    pub fn input_total(&self) -> u128 {
        self.spent_inputs().map(|i| u128::from(i.amount)).sum()
    }

    pub fn output_total(&self) -> u128 {
        self.outputs.iter().map(|o| u128::from(o.amount)).sum()
    }

    /// Feed the length-prefixed id and both count-prefixed sides into `hasher`.
    pub(crate) fn digest_into(&self, hasher: &mut Sha256) {
        let id = self.id.as_str().as_bytes();
        hasher.update((id.len() as u64).to_be_bytes());
        hasher.update(id);
        digest_sides(hasher, &self.inputs, &self.outputs);
    }
}

fn digest_sides(hasher: &mut Sha256, inputs: &[Xput], outputs: &[Xput]) {
    for side in [inputs, outputs] {
        hasher.update((side.len() as u64).to_be_bytes());
        for xput in side {
            xput.digest_into(hasher);
        }
    }
}

/// An opaque transaction identifier.
#[derive(Clone, Hash, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 over the count-prefixed inputs and outputs, hex encoded.
    fn derive(inputs: &[Xput], outputs: &[Xput]) -> Self {
        let mut hasher = Sha256::new();
        digest_sides(&mut hasher, inputs, outputs);
        Self(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
