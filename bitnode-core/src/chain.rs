//! Read access to a tree of blocks, plus an in-memory block arena.
//!
//! Blocks refer to their parent by hash, so ancestry is resolved through a [`ChainView`]
//! rather than through owned pointers. Difficulty windows, fork choice and UTXO replay
//! all walk backwards through this interface without mutating anything.

use std::collections::HashMap;

use crate::{difficulty, error::BlockError, Block, BlockHash, ConsensusParams};

/// Defines a common interface to look blocks up by hash.
pub trait ChainView {
    /// Fetch a known block given its hash.
    fn block(&self, hash: &BlockHash) -> Option<&Block>;

    /// The parent of `block`, `None` for genesis.
    /// A parent that is referenced but not known is an error.
    fn parent_of<'a>(&'a self, block: &'a Block) -> Result<Option<&'a Block>, BlockError> {
        match block.previous() {
            None => Ok(None),
            Some(hash) => self
                .block(hash)
                .map(Some)
                .ok_or(BlockError::UnknownAncestor(*hash)),
        }
    }

    /// Walk back from `from` to the ancestor with the given number.
    /// Returns `None` if the number is above `from`'s.
    fn ancestor_at_height<'a>(
        &'a self,
        from: &'a Block,
        number: u64,
    ) -> Result<Option<&'a Block>, BlockError> {
        // If the request is for a height greater than our own, we cannot fulfill it.
        if number > from.number() {
            return Ok(None);
        }

        let mut b = from;
        while b.number() != number {
            match self.parent_of(b)? {
                Some(parent) => b = parent,
                None => return Ok(None),
            }
        }
        Ok(Some(b))
    }
}

/// A block held by the store together with its difficulty bookkeeping.
#[derive(Clone, Debug)]
pub struct StoredBlock {
    pub block: Block,
    /// Leading zero bits this block had to meet.
    pub difficulty: u32,
    /// Sum of `difficulty` from genesis to this block inclusive.
    pub accumulated_difficulty: u64,
}

/// An in-memory arena of blocks keyed by hash.
///
/// This is a complete fork tree rather than a linear chain. The only validity
/// assumption is that every block in the store has its parent in the store (except
/// genesis blocks). The store does not check proof-of-work or transactions; that is
/// the node's job before inserting.
#[derive(Clone, Debug, Default)]
pub struct BlockStore {
    blocks: HashMap<BlockHash, StoredBlock>,
}

impl BlockStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block whose parent is already stored (or a genesis block).
    /// Inserting a block that is already known is a no-op.
    pub fn insert(
        &mut self,
        block: Block,
        params: &ConsensusParams,
    ) -> Result<BlockHash, BlockError> {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return Ok(hash);
        }

        let (difficulty, accumulated_difficulty) = match block.previous() {
            None => (params.base_difficulty, u64::from(params.base_difficulty)),
            Some(parent_hash) => {
                let parent = self
                    .blocks
                    .get(parent_hash)
                    .ok_or(BlockError::UnknownAncestor(*parent_hash))?;
                let difficulty =
                    difficulty::child_difficulty(self, &parent.block, parent.difficulty, params)?;
                (
                    difficulty,
                    parent.accumulated_difficulty + u64::from(difficulty),
                )
            }
        };

        self.blocks.insert(
            hash,
            StoredBlock {
                block,
                difficulty,
                accumulated_difficulty,
            },
        );
        Ok(hash)
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&StoredBlock> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Query the hash of the block at height `number` on the chain ending at `tip`.
    pub fn block_at_height(&self, tip: &BlockHash, number: u64) -> Option<BlockHash> {
        let tip = self.block(tip)?;
        self.ancestor_at_height(tip, number)
            .ok()
            .flatten()
            .map(Block::hash)
    }
}

impl ChainView for BlockStore {
    fn block(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(hash).map(|stored| &stored.block)
    }
}
