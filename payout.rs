//! Pari-mutuel payout arithmetic.
//!
//! All results round down, so the sum of every winner's share never exceeds
//! the distributable pool. The remainder stays in the contract.

use sp_runtime::{helpers_128bit::multiply_by_rational_with_rounding, Percent, Rounding};

/// The house share of `pool`: `floor(pool * takeout_percentage / 100)`.
pub fn takeout(pool: u128, takeout_percentage: u8) -> u128 {
    Percent::from_percent(takeout_percentage).mul_floor(pool)
}

/// What is left for winners once the takeout is removed.
pub fn distributable(pool: u128, takeout_percentage: u8) -> u128 {
    pool.saturating_sub(takeout(pool, takeout_percentage))
}

/// `floor(distributable * stake / winning_total)`.
///
/// Returns `None` when nobody backed the winner, or when `stake` is larger
/// than the total it is supposedly part of.
pub fn winning_share(distributable: u128, stake: u128, winning_total: u128) -> Option<u128> {
    if winning_total == 0 || stake > winning_total {
        return None;
    }
    multiply_by_rational_with_rounding(distributable, stake, winning_total, Rounding::Down)
}
