//! Transactions that have been admitted but not yet confirmed.
//!
//! The mempool only checks pending state: double spends between pending transactions
//! and the balance of each transaction. Whether inputs exist in the confirmed UTXO set
//! is the node's check, and both must pass.

use std::collections::{BTreeSet, HashSet};

use bitnode_core::{Block, Transaction, Xput};

use crate::{error::MempoolError, UtxoSet};

#[derive(Clone, Debug, Default)]
pub struct Mempool {
    unconfirmed: BTreeSet<Transaction>,
    /// Every non-coinbase input referenced by a pending transaction.
    pending_inputs: HashSet<Xput>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a transaction. Adding a transaction that is already present is a no-op.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        if self.unconfirmed.contains(&tx) {
            return Ok(());
        }

        if let Some(input) = tx.spent_inputs().find(|i| self.pending_inputs.contains(*i)) {
            return Err(MempoolError::DoubleSpend {
                tx: tx.id().clone(),
                input: input.clone(),
            });
        }

        if !tx.is_coinbase() && tx.input_total() < tx.output_total() {
            return Err(MempoolError::InsufficientInputs {
                tx: tx.id().clone(),
                inputs: tx.input_total(),
                outputs: tx.output_total(),
            });
        }

        self.pending_inputs.extend(tx.spent_inputs().cloned());
        self.unconfirmed.insert(tx);
        Ok(())
    }

    /// A snapshot of the pending transactions.
    pub fn transactions(&self) -> BTreeSet<Transaction> {
        self.unconfirmed.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.unconfirmed.iter()
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.unconfirmed.contains(tx)
    }

    pub fn len(&self) -> usize {
        self.unconfirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unconfirmed.is_empty()
    }

    /// Drop transactions that were confirmed by `block` or whose inputs are no longer
    /// spendable in `utxos`. Returns how many were dropped.
    pub fn prune(&mut self, block: &Block, utxos: &UtxoSet) -> usize {
        let before = self.unconfirmed.len();
        self.unconfirmed.retain(|tx| {
            !block.contains_transaction(tx) && tx.spent_inputs().all(|i| utxos.contains(i))
        });
        self.pending_inputs = self
            .unconfirmed
            .iter()
            .flat_map(|tx| tx.spent_inputs().cloned())
            .collect();
        before - self.unconfirmed.len()
    }
}
