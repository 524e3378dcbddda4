//! Denominations, in satoshis.

pub const SATOSHI: u64 = 1;
pub const BIT: u64 = 100 * SATOSHI;
pub const M_BIT: u64 = 1000 * SATOSHI;
pub const BITCOIN: u64 = 100_000_000 * SATOSHI;
