//! The discrete difficulty adjustment algorithm.
//!
//! Difficulty is a count of leading zero bits. Genesis uses the base difficulty and every
//! block inherits its parent's difficulty, except at retarget heights (height index
//! `number - 1` divisible by the interval) where the last window's solve time is compared
//! against the target:
//!
//! ```text
//! factor = clamp(actual_timespan / desired_timespan, min_adjustment, max_adjustment)
//! next   = clamp(parent - round(log2(factor)), min_bits, max_bits)
//! ```
//!
//! Slow windows (`factor > 1`) make the next difficulty easier.

use crate::{error::BlockError, Block, ChainView, ConsensusParams};

/// Whether a block with this number recomputes its difficulty.
pub fn is_retarget_height(number: u64, params: &ConsensusParams) -> bool {
    number > 1 && (number - 1) % params.adjustment_interval.max(1) == 0
}

/// Clamp float between a min float and max float
fn clamp_f(x: f64, minv: f64, maxv: f64) -> f64 {
    x.max(minv).min(maxv)
}

/// Clamp integer between a min integer and max integer
fn clamp_i(x: i64, minv: i64, maxv: i64) -> i64 {
    x.max(minv).min(maxv)
}

/// Apply one retarget step to the parent's difficulty given the observed window timespan.
pub fn retarget(parent_difficulty: u32, actual_timespan: u64, params: &ConsensusParams) -> u32 {
    let actual = actual_timespan.max(1) as f64;
    let desired = params.desired_timespan().max(1) as f64;
    let factor = clamp_f(actual / desired, params.min_adjustment, params.max_adjustment);
    let delta_bits = factor.log2().round() as i64;

    clamp_i(
        i64::from(parent_difficulty) - delta_bits,
        i64::from(params.min_difficulty_bits),
        i64::from(params.max_difficulty_bits),
    ) as u32
}

/// Difficulty of a block at a retarget height from its parent and the window start.
/// Missing or zero timestamps leave the parent's difficulty unchanged.
fn retarget_from(
    parent: &Block,
    parent_difficulty: u32,
    window_start: &Block,
    params: &ConsensusParams,
) -> u32 {
    match (parent.timestamp(), window_start.timestamp()) {
        (Some(end), Some(start)) if end > 0 && start > 0 => {
            retarget(parent_difficulty, end.saturating_sub(start), params)
        }
        _ => {
            log::debug!(
                "missing timestamps in window ending at {}, keeping difficulty {}",
                parent.number(),
                parent_difficulty
            );
            parent_difficulty
        }
    }
}

/// Difficulty of a child of `parent`, given the parent's own difficulty.
/// Walks back through `chain` only when the child sits at a retarget height.
pub fn child_difficulty<C: ChainView + ?Sized>(
    chain: &C,
    parent: &Block,
    parent_difficulty: u32,
    params: &ConsensusParams,
) -> Result<u32, BlockError> {
    if !is_retarget_height(parent.number() + 1, params) {
        return Ok(parent_difficulty);
    }

    let start_number = parent
        .number()
        .saturating_sub(params.adjustment_interval.saturating_sub(1))
        .max(1);
    match chain.ancestor_at_height(parent, start_number)? {
        Some(window_start) => Ok(retarget_from(parent, parent_difficulty, window_start, params)),
        None => Ok(parent_difficulty),
    }
}

/// The chain from genesis to `block` inclusive, genesis first.
pub fn path_to_genesis<'a, C: ChainView + ?Sized>(
    chain: &'a C,
    block: &'a Block,
) -> Result<Vec<&'a Block>, BlockError> {
    let mut path = vec![block];
    let mut current = block;
    while let Some(parent) = chain.parent_of(current)? {
        path.push(parent);
        current = parent;
    }
    path.reverse();
    Ok(path)
}

/// Required difficulty of every block on a genesis-first path.
pub fn difficulties_along(path: &[&Block], params: &ConsensusParams) -> Vec<u32> {
    let interval = params.adjustment_interval.max(1) as usize;
    let mut out: Vec<u32> = Vec::with_capacity(path.len());

    for (i, block) in path.iter().enumerate() {
        let difficulty = if i == 0 {
            params.base_difficulty
        } else if is_retarget_height(block.number(), params) {
            let parent_difficulty = out[i - 1];
            // The window starts interval - 1 blocks behind the parent.
            match (i - 1).checked_sub(interval - 1) {
                Some(start) => retarget_from(path[i - 1], parent_difficulty, path[start], params),
                None => parent_difficulty,
            }
        } else {
            out[i - 1]
        };
        out.push(difficulty);
    }
    out
}

/// Required difficulty of `block` at its position in the chain.
pub fn required_difficulty<C: ChainView + ?Sized>(
    chain: &C,
    block: &Block,
    params: &ConsensusParams,
) -> Result<u32, BlockError> {
    let path = path_to_genesis(chain, block)?;
    Ok(difficulties_along(&path, params)
        .last()
        .copied()
        .unwrap_or(params.base_difficulty))
}

/// Sum of the required difficulty of every block from genesis to `tip`.
pub fn accumulated_difficulty<C: ChainView + ?Sized>(
    chain: &C,
    tip: &Block,
    params: &ConsensusParams,
) -> Result<u64, BlockError> {
    let path = path_to_genesis(chain, tip)?;
    Ok(difficulties_along(&path, params)
        .into_iter()
        .map(u64::from)
        .sum())
}
