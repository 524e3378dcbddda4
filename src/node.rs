//! The node: admits transactions and blocks, keeps the UTXO set in step with the best
//! chain, and mines new blocks from its mempool.
//!
//! Per block the life cycle is
//! `candidate -> nonce search -> proof-of-work satisfied -> validation -> confirmed | rejected`.
//! Validation runs to completion before anything is mutated, so a rejected block leaves
//! the tip, the UTXO set and the mempool exactly as they were.

use std::{borrow::Cow, collections::BTreeSet, sync::Arc};

use bitnode_core::{
    difficulty, Block, BlockHash, BlockStore, ChainView, ConsensusParams, StoredBlock,
    Transaction,
};
use log::{debug, info, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{Clock, SystemClock},
    error::{BlockRejection, NodeError, NodeResult},
    propagation::{BlockPropagator, NoopPropagator},
    Mempool, UtxoSet,
};

/// What accepting a validated block does to the UTXO set.
enum Verdict {
    /// The block extends the tip; fold it into the current set.
    Extend,
    /// Genesis or a reorganization; the set is replaced.
    Replace(UtxoSet),
}

pub struct Node {
    params: ConsensusParams,
    /// Every block the node knows: the best chain plus retained side branches.
    store: BlockStore,
    /// The best block. Absent only while the genesis block is being admitted.
    tip: Option<BlockHash>,
    utxos: UtxoSet,
    mempool: Mempool,
    propagator: Arc<dyn BlockPropagator>,
    clock: Arc<dyn Clock>,
}

impl Node {
    /// Start a node from a genesis block.
    pub fn new(genesis: Block, params: ConsensusParams) -> NodeResult<Self> {
        Self::from_chain([genesis], params)
    }

    /// Start a node from a whole chain, genesis first.
    ///
    /// The first block is admitted as genesis, every later block is fully validated, and the
    /// UTXO set is then rebuilt by replaying the chain from its tip.
    pub fn from_chain(
        blocks: impl IntoIterator<Item = Block>,
        params: ConsensusParams,
    ) -> NodeResult<Self> {
        let mut node = Self {
            params,
            store: BlockStore::new(),
            tip: None,
            utxos: UtxoSet::new(),
            mempool: Mempool::new(),
            propagator: Arc::new(NoopPropagator),
            clock: Arc::new(SystemClock),
        };

        for block in blocks {
            node.admit(block)?;
        }

        let tip = node.tip.ok_or(NodeError::EmptyChain)?;
        node.utxos = UtxoSet::replay(&node.store, &tip)?;
        info!(
            "Node started at block {} with {} unspent outputs",
            node.height(),
            node.utxos.len()
        );
        Ok(node)
    }

    pub fn with_propagator(mut self, propagator: Arc<dyn BlockPropagator>) -> Self {
        self.propagator = propagator;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn tip(&self) -> Option<BlockHash> {
        self.tip
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.tip.and_then(|tip| self.store.block(&tip))
    }

    /// Number of the best block, 0 before genesis.
    pub fn height(&self) -> u64 {
        self.latest_block().map_or(0, Block::number)
    }

    pub fn block(&self, hash: &BlockHash) -> Option<&Block> {
        self.store.block(hash)
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn unconfirmed_transactions(&self) -> BTreeSet<Transaction> {
        self.mempool.transactions()
    }

    /// Accumulated difficulty of the best chain.
    pub fn accumulated_difficulty(&self) -> u64 {
        self.tip
            .and_then(|tip| self.store.get(&tip))
            .map_or(0, |stored| stored.accumulated_difficulty)
    }

    /// Check a block against the current state without accepting it.
    pub fn validate_block(&self, block: &Block) -> NodeResult<()> {
        self.check(block)
            .map(|_| ())
            .map_err(|reason| rejected(block, reason))
    }

    /// Validate a block and make it the new tip.
    /// Propagation is notified after the block is confirmed.
    pub fn receive_block(&mut self, block: Block) -> NodeResult<BlockHash> {
        let number = block.number();
        let hash = self.admit(block).map_err(|e| {
            debug!("Rejected block {number}: {e}");
            e
        })?;

        info!("Received valid block {number} hash: {hash}");
        self.propagate(&hash);
        Ok(hash)
    }

    /// Admit a transaction into the mempool if every input is in the confirmed UTXO set.
    pub fn receive_transaction(&mut self, tx: Transaction) -> NodeResult<()> {
        if let Some(input) = tx.inputs().iter().find(|i| !self.utxos.contains(i)) {
            return Err(NodeError::InvalidTransaction {
                id: tx.id().clone(),
                input: input.clone(),
            });
        }

        let id = tx.id().clone();
        self.mempool.add_transaction(tx)?;
        trace!("Received valid transaction with hash: {id}");
        Ok(())
    }

    /// Build a child of the tip holding the mempool and the required difficulty it must meet.
    ///
    /// Mempool entries the block refuses (a second coinbase) are skipped.
    pub fn prepare_candidate(&self) -> NodeResult<(Block, u32)> {
        let tip = self.latest_block().ok_or(NodeError::EmptyChain)?;
        let mut candidate = Block::child_of(tip);
        for tx in self.mempool.iter() {
            if let Err(e) = candidate.add_transaction(tx.clone()) {
                warn!("Leaving transaction {} out of block {}: {e}", tx.id(), candidate.number());
            }
        }
        candidate.set_timestamp(self.clock.now_secs());

        let required = self
            .required_difficulty(&candidate)
            .map_err(|reason| rejected(&candidate, reason))?;
        Ok((candidate, required))
    }

    /// Mine a block on top of the tip and receive it.
    /// A successfully mined block is the new tip when this returns.
    pub fn mine_block(&mut self, cancel: &CancellationToken) -> NodeResult<Block> {
        let (mut candidate, required) = self.prepare_candidate()?;
        candidate.search_nonce(required, cancel)?;
        debug!(
            "Found nonce {} for block {} at difficulty {required}",
            candidate.nonce(),
            candidate.number()
        );

        let hash = self.receive_block(candidate.clone())?;
        info!("Successfully mined block {} hash: {hash}", candidate.number());
        Ok(candidate)
    }

    fn propagate(&self, hash: &BlockHash) {
        if let Some(block) = self.store.block(hash) {
            if let Err(e) = self.propagator.notify(block) {
                warn!("Failed to propagate block {}: {e}", block.number());
            }
        }
    }

    /// Validate and commit without notifying propagation.
    fn admit(&mut self, block: Block) -> NodeResult<BlockHash> {
        let verdict = match self.check(&block) {
            Ok(verdict) => verdict,
            Err(reason) => {
                if matches!(reason, BlockRejection::ForkChoice { .. }) {
                    self.retain_side_block(&block);
                }
                return Err(rejected(&block, reason));
            }
        };

        let hash = self
            .store
            .insert(block.clone(), &self.params)
            .map_err(|e| rejected(&block, e.into()))?;

        match verdict {
            Verdict::Extend => self.utxos.apply(&block),
            Verdict::Replace(utxos) => {
                if self.tip.is_some() {
                    info!("Reorganized to block {} hash: {hash}", block.number());
                }
                self.utxos = utxos;
            }
        }
        self.tip = Some(hash);

        let dropped = self.mempool.prune(&block, &self.utxos);
        if dropped > 0 {
            debug!("Dropped {dropped} mempool transactions after block {}", block.number());
        }
        Ok(hash)
    }

    fn check(&self, block: &Block) -> Result<Verdict, BlockRejection> {
        let Some(tip) = self.tip else {
            // Accepting a genesis: nothing to compare against.
            if let Some(previous) = block.previous() {
                return Err(BlockRejection::UnknownParent(*previous));
            }
            let mut utxos = UtxoSet::new();
            utxos.apply(block);
            return Ok(Verdict::Replace(utxos));
        };

        let parent = self.parent_of(block)?;
        let required = self.required_difficulty(block)?;

        let extends_tip = block.previous() == Some(&tip);
        if !extends_tip {
            let candidate =
                parent.map_or(0, |parent| parent.accumulated_difficulty) + u64::from(required);
            let current = self.accumulated_difficulty();
            if candidate <= current {
                return Err(BlockRejection::ForkChoice { candidate, current });
            }
        }

        check_work(block, required)?;

        let ledger = self.ledger_below(block)?;
        check_inputs(block, &ledger)?;

        if extends_tip {
            Ok(Verdict::Extend)
        } else {
            let mut utxos = ledger.into_owned();
            utxos.apply(block);
            Ok(Verdict::Replace(utxos))
        }
    }

    fn parent_of(&self, block: &Block) -> Result<Option<&StoredBlock>, BlockRejection> {
        match block.previous() {
            Some(previous) => self
                .store
                .get(previous)
                .map(Some)
                .ok_or(BlockRejection::UnknownParent(*previous)),
            None => Ok(None),
        }
    }

    /// Difficulty the block must meet, from its parent's stored difficulty.
    fn required_difficulty(&self, block: &Block) -> Result<u32, BlockRejection> {
        match self.parent_of(block)? {
            Some(parent) => Ok(difficulty::child_difficulty(
                &self.store,
                &parent.block,
                parent.difficulty,
                &self.params,
            )?),
            None => Ok(self.params.base_difficulty),
        }
    }

    /// The UTXO set as of the block's parent.
    fn ledger_below(&self, block: &Block) -> Result<Cow<'_, UtxoSet>, BlockRejection> {
        match block.previous() {
            Some(previous) if Some(*previous) == self.tip => Ok(Cow::Borrowed(&self.utxos)),
            Some(previous) => Ok(Cow::Owned(UtxoSet::replay(&self.store, previous)?)),
            None => Ok(Cow::Owned(UtxoSet::new())),
        }
    }

    /// Keep a well-formed block that lost fork choice so a descendant can still outweigh
    /// the current chain later.
    fn retain_side_block(&mut self, block: &Block) {
        if block.is_genesis() || self.store.contains(&block.hash()) {
            return;
        }
        let well_formed = self
            .required_difficulty(block)
            .and_then(|required| check_work(block, required))
            .is_ok()
            && self
                .ledger_below(block)
                .map(|ledger| check_inputs(block, &ledger).is_ok())
                .unwrap_or(false);
        if well_formed && self.store.insert(block.clone(), &self.params).is_ok() {
            debug!("Retained side-branch block {} hash: {}", block.number(), block.hash());
        }
    }
}

fn check_work(block: &Block, required: u32) -> Result<(), BlockRejection> {
    let actual = block.leading_zero_bits();
    if actual < required {
        return Err(BlockRejection::InsufficientDifficulty { required, actual });
    }
    Ok(())
}

/// Every non-coinbase input must be unspent as of the block's parent, and spent only once
/// within the block.
fn check_inputs(block: &Block, utxos: &UtxoSet) -> Result<(), BlockRejection> {
    match utxos.first_unspendable(block) {
        Some((tx, input)) => Err(BlockRejection::UnspendableInput {
            tx: tx.id().clone(),
            input: input.clone(),
        }),
        None => Ok(()),
    }
}

fn rejected(block: &Block, reason: BlockRejection) -> NodeError {
    NodeError::InvalidBlock {
        number: block.number(),
        hash: block.hash(),
        reason,
    }
}
