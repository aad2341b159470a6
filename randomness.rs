//! Winner selection strategies.
//!
//! A race outcome is a competitor number in `1..=num_competitors` derived
//! from a Blake2x256 digest. The strategies differ only in what goes into
//! the digest:
//!
//! - [`SeededDraw`] hashes fixed race parameters. Anyone can compute the
//!   winner as soon as the race is scheduled, so it is only fit for test
//!   and staging deployments.
//! - [`BlockEntropyDraw`] also hashes the number and timestamp of the block
//!   that settles the race. That block cannot exist before the post time,
//!   and wagering closes at the post time, so nobody can bet knowing the
//!   outcome.

use ink::env::hash::{Blake2x256, HashOutput};

/// Race parameters a draw is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawInput {
    pub race_id: u32,
    pub post_time: u64,
    pub num_competitors: u8,
}

/// Supplies the winning competitor for a race.
pub trait RandomnessSource {
    /// Returns a competitor number in `1..=input.num_competitors`.
    fn winning_competitor(&self, input: &DrawInput) -> u8;
}

/// Reproducible draw: a pure function of race id and post time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeededDraw;

impl RandomnessSource for SeededDraw {
    fn winning_competitor(&self, input: &DrawInput) -> u8 {
        pick(digest(&(input.race_id, input.post_time)), input.num_competitors)
    }
}

/// Production draw, keyed on the settlement block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntropyDraw {
    pub block_number: u32,
    pub block_timestamp: u64,
}

impl RandomnessSource for BlockEntropyDraw {
    fn winning_competitor(&self, input: &DrawInput) -> u8 {
        let seed = (
            input.race_id,
            input.post_time,
            self.block_number,
            self.block_timestamp,
        );
        pick(digest(&seed), input.num_competitors)
    }
}

fn digest<T: ink::scale::Encode>(value: &T) -> [u8; 32] {
    let mut output = <Blake2x256 as HashOutput>::Type::default();
    ink::env::hash_encoded::<Blake2x256, _>(value, &mut output);
    output
}

/// Maps a digest onto `1..=num_competitors`.
fn pick(digest: [u8; 32], num_competitors: u8) -> u8 {
    let mut head = [0u8; 16];
    head.copy_from_slice(&digest[..16]);
    let slots = u128::from(num_competitors.max(1));
    // roll < slots <= 255
    let roll = u128::from_le_bytes(head) % slots;
    roll as u8 + 1
}
