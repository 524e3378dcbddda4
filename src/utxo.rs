//! The set of currently spendable xputs.
//!
//! Xputs are tracked by value. Two outputs with the same owner and amount are one entry
//! here, so spending one of them removes both from the node's point of view.
// TODO: key entries on (transaction id, output index) so equal xputs from different
// transactions stay distinct.

use std::collections::HashSet;

use bitnode_core::{Block, BlockError, BlockHash, ChainView, Transaction, Xput};
use log::trace;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UtxoSet {
    utxos: HashSet<Xput>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the set by replaying the chain that ends at `tip`.
    ///
    /// An output is unspent iff no non-coinbase input anywhere on the chain matches it.
    pub fn replay<C: ChainView + ?Sized>(chain: &C, tip: &BlockHash) -> Result<Self, BlockError> {
        let mut spent = HashSet::new();
        let mut created = Vec::new();

        let mut current = chain.block(tip).ok_or(BlockError::UnknownAncestor(*tip))?;
        loop {
            for tx in current.transactions() {
                spent.extend(tx.spent_inputs().cloned());
                created.extend(tx.outputs().iter().cloned());
            }
            trace!("Parsed block {} hash: {}.", current.number(), current.hash());

            match chain.parent_of(current)? {
                Some(parent) => current = parent,
                None => break,
            }
        }

        let mut utxos = HashSet::new();
        for output in created {
            if !spent.contains(&output) {
                trace!("Added output {output} to UTXO set.");
                utxos.insert(output);
            }
        }
        Ok(Self { utxos })
    }

    pub fn contains(&self, xput: &Xput) -> bool {
        self.utxos.contains(xput)
    }

    /// The first non-coinbase input in the block that is not spendable, with its transaction.
    ///
    /// An input is spendable once per block: a second input naming an xput already
    /// consumed by the block counts as unspendable.
    pub fn first_unspendable<'a>(&self, block: &'a Block) -> Option<(&'a Transaction, &'a Xput)> {
        let mut consumed: HashSet<&Xput> = HashSet::new();
        block.transactions().iter().find_map(|tx| {
            tx.spent_inputs()
                .find(|input| !self.contains(input) || !consumed.insert(*input))
                .map(|input| (tx, input))
        })
    }

    /// Fold an accepted block into the set.
    ///
    /// Inputs are removed; outputs are added unless an input of the same block spends them.
    pub fn apply(&mut self, block: &Block) {
        let spent: HashSet<&Xput> = block
            .transactions()
            .iter()
            .flat_map(|tx| tx.spent_inputs())
            .collect();

        for input in &spent {
            self.utxos.remove(*input);
        }
        for tx in block.transactions() {
            for output in tx.outputs() {
                if !spent.contains(output) {
                    self.utxos.insert(output.clone());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Xput> + '_ {
        self.utxos.iter()
    }
}
