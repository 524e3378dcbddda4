//! Consensus parameters for proof-of-work and the difficulty adjustment algorithm.

use serde::Deserialize;

use crate::error::ParamsError;

/// Tunable consensus constants.
///
/// Difficulty is measured in leading zero bits of the block hash.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Required difficulty of the genesis block (default: 3 bits)
    pub base_difficulty: u32,

    /// Number of blocks between retargets (default: 10)
    pub adjustment_interval: u64,

    /// Desired seconds between blocks (default: 10)
    pub target_block_time_secs: u64,

    /// Lower clamp for the observed/desired timespan ratio (default: 0.25)
    pub min_adjustment: f64,

    /// Upper clamp for the observed/desired timespan ratio (default: 4.0)
    pub max_adjustment: f64,

    /// Easiest difficulty a retarget may produce (default: 1 bit)
    pub min_difficulty_bits: u32,

    /// Hardest difficulty a retarget may produce (default: 255 bits)
    pub max_difficulty_bits: u32,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            base_difficulty: 3,
            adjustment_interval: 10,
            target_block_time_secs: 10,
            min_adjustment: 0.25,
            max_adjustment: 4.0,
            min_difficulty_bits: 1,
            max_difficulty_bits: 255,
        }
    }
}

impl ConsensusParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters suitable for testing (a single bit of work per block)
    pub fn for_testing() -> Self {
        Self {
            base_difficulty: 1,
            ..Self::default()
        }
    }

    /// Parse parameters from JSON. Missing fields take their default value.
    pub fn from_json_str(json: &str) -> Result<Self, ParamsError> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.adjustment_interval == 0 {
            return Err(ParamsError::Invalid("adjustment_interval must be positive".into()));
        }
        if self.target_block_time_secs == 0 {
            return Err(ParamsError::Invalid("target_block_time_secs must be positive".into()));
        }
        if !(self.min_adjustment > 0.0 && self.min_adjustment <= self.max_adjustment) {
            return Err(ParamsError::Invalid(format!(
                "adjustment bounds [{}, {}] are not a positive range",
                self.min_adjustment, self.max_adjustment
            )));
        }
        if self.min_difficulty_bits > self.max_difficulty_bits {
            return Err(ParamsError::Invalid(format!(
                "min_difficulty_bits {} exceeds max_difficulty_bits {}",
                self.min_difficulty_bits, self.max_difficulty_bits
            )));
        }
        if !(self.min_difficulty_bits..=self.max_difficulty_bits).contains(&self.base_difficulty) {
            return Err(ParamsError::Invalid(format!(
                "base_difficulty {} is outside [{}, {}]",
                self.base_difficulty, self.min_difficulty_bits, self.max_difficulty_bits
            )));
        }
        Ok(())
    }

    /// Seconds one full retarget window should take.
    pub fn desired_timespan(&self) -> u64 {
        self.adjustment_interval * self.target_block_time_secs
    }
}
