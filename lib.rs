#![cfg_attr(not(feature = "std"), no_std, no_main)]
#![allow(clippy::cast_possible_truncation)]

//! # Race Ledger
//!
//! A pari-mutuel race betting ledger built in Ink!.
//!
//! ## Features
//! - Any number of scheduled races, addressed by sequential id
//! - Wagers on numbered competitors until the post time
//! - One-shot settlement with a pluggable randomness source
//! - Proportional payouts to winners minus the house takeout
//! - Full refunds when nobody backed the winner

pub mod payout;
pub mod randomness;

/// Smallest amounts are quoted in base units; one token is 10^12 of them.
pub const UNIT: u128 = 1_000_000_000_000;

/// Minimum wager accepted by `place_bet` (2 tokens)
pub const MINIMUM_BET: u128 = 2 * UNIT;

/// Headroom reserved for a future mandatory fee; only caps the takeout, never charged
pub const MANDATORY_FEE_PERCENTAGE: u8 = 5;

/// Highest takeout a race may be scheduled with
pub const MAX_TAKEOUT_PERCENTAGE: u8 = 100 - MANDATORY_FEE_PERCENTAGE;

/// Wagers one account may hold on a single race; keeps the stored list
/// well inside the contract's static buffer
pub const MAX_WAGERS_PER_BETTOR: usize = 128;

#[ink::contract]
mod race_ledger {
    use super::*;
    use crate::randomness::{BlockEntropyDraw, DrawInput, RandomnessSource, SeededDraw};
    use ink::prelude::vec::Vec;
    use ink::storage::Mapping;

    pub type RaceId = u32;

    // ============================================================================
    // ERROR TYPES
    // ============================================================================

    /// Contract errors
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[ink::scale_derive(Encode, Decode, TypeInfo)]
    pub enum Error {
        /// Takeout plus the mandatory fee exceeds 100%
        InvalidTakeout,
        /// Post time is not in the future
        InvalidPostTime,
        /// A race needs at least one competitor
        InvalidCompetitorCount,
        /// No such race
        NotFound,
        /// Competitor number outside `1..=num_competitors`
        InvalidCompetitor,
        /// Wager below `MINIMUM_BET`
        BetTooSmall,
        /// Post time reached, wagering is over
        RaceClosed,
        /// Post time not reached yet
        NotYetClosed,
        /// Results were already determined
        AlreadySettled,
        /// Results not determined yet
        NotSettled,
        /// Nothing owed to the caller
        NothingToClaim,
        /// Only owner can perform this action
        NotOwner,
        /// Outgoing value transfer was rejected
        TransferFailed,
        /// Balance arithmetic overflowed
        Overflow,
        /// Wager records disagree with the race pools
        LedgerMismatch,
        /// Account already holds `MAX_WAGERS_PER_BETTOR` wagers on the race
        TooManyWagers,
    }

    /// Broad classes of failure.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ErrorKind {
        /// Bad input; retrying with corrected arguments can succeed.
        Validation,
        /// The call is not valid in the race's current phase.
        StateConflict,
        /// A broken invariant.
        Fatal,
    }

    impl Error {
        pub fn kind(&self) -> ErrorKind {
            match self {
                Error::InvalidTakeout
                | Error::InvalidPostTime
                | Error::InvalidCompetitorCount
                | Error::NotFound
                | Error::InvalidCompetitor
                | Error::BetTooSmall
                | Error::NotOwner => ErrorKind::Validation,
                Error::RaceClosed
                | Error::NotYetClosed
                | Error::AlreadySettled
                | Error::NotSettled
                | Error::NothingToClaim
                | Error::TooManyWagers => ErrorKind::StateConflict,
                Error::TransferFailed | Error::Overflow | Error::LedgerMismatch => {
                    ErrorKind::Fatal
                }
            }
        }
    }

    /// Result type for contract operations
    pub type Result<T> = core::result::Result<T, Error>;

    // ============================================================================
    // DATA STRUCTURES
    // ============================================================================

    /// Which randomness source settles races
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[ink::scale_derive(Encode, Decode, TypeInfo)]
    #[cfg_attr(feature = "std", derive(ink::storage::traits::StorageLayout))]
    pub enum RandomnessMode {
        /// Reproducible outcome from race id and post time
        Seeded,
        /// Outcome keyed on the settlement block
        BlockEntropy,
    }

    /// Deployment settings, fixed at construction
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[ink::scale_derive(Encode, Decode, TypeInfo)]
    #[cfg_attr(feature = "std", derive(ink::storage::traits::StorageLayout))]
    pub struct LedgerConfig {
        pub owner: AccountId,
        pub randomness: RandomnessMode,
    }

    /// A scheduled race
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[ink::scale_derive(Encode, Decode, TypeInfo)]
    #[cfg_attr(feature = "std", derive(ink::storage::traits::StorageLayout))]
    pub struct Race {
        pub id: RaceId,
        pub post_time: Timestamp,
        pub takeout_percentage: u8,
        pub num_competitors: u8,
        pub pool: Balance,
        pub finished: bool,
        pub winning_competitor: Option<u8>,
        pub takeout_collected: bool,
    }

    impl Race {
        /// Derived from the clock on every call; never stored.
        pub fn phase(&self, now: Timestamp) -> RacePhase {
            if self.finished {
                RacePhase::Settled
            } else if now < self.post_time {
                RacePhase::Open
            } else {
                RacePhase::Closed
            }
        }

        fn is_valid_competitor(&self, competitor: u8) -> bool {
            (1..=self.num_competitors).contains(&competitor)
        }

        fn draw_input(&self) -> DrawInput {
            DrawInput {
                race_id: self.id,
                post_time: self.post_time,
                num_competitors: self.num_competitors,
            }
        }
    }

    /// Race lifecycle
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[ink::scale_derive(Encode, Decode, TypeInfo)]
    pub enum RacePhase {
        /// Accepting wagers
        Open,
        /// Post time passed, waiting for results
        Closed,
        /// Winner known, payouts open
        Settled,
    }

    /// A single wager. Never amended; only `claimed` flips, once.
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[ink::scale_derive(Encode, Decode, TypeInfo)]
    #[cfg_attr(feature = "std", derive(ink::storage::traits::StorageLayout))]
    pub struct Wager {
        pub competitor: u8,
        pub amount: Balance,
        pub claimed: bool,
    }

    /// What `withdraw` would do for an account
    enum Claim {
        Winnings(Balance),
        Refund(Balance),
    }

    // ============================================================================
    // EVENTS
    // ============================================================================

    #[ink(event)]
    pub struct RaceScheduled {
        #[ink(topic)]
        race_id: RaceId,
        post_time: Timestamp,
    }

    #[ink(event)]
    pub struct BetPlaced {
        #[ink(topic)]
        race_id: RaceId,
        #[ink(topic)]
        bettor: AccountId,
        competitor: u8,
        amount: Balance,
    }

    #[ink(event)]
    pub struct RaceResultsDetermined {
        #[ink(topic)]
        race_id: RaceId,
        winning_competitor: u8,
    }

    #[ink(event)]
    pub struct WinningsWithdrawn {
        #[ink(topic)]
        race_id: RaceId,
        #[ink(topic)]
        account: AccountId,
        amount: Balance,
    }

    #[ink(event)]
    pub struct StakeRefunded {
        #[ink(topic)]
        race_id: RaceId,
        #[ink(topic)]
        account: AccountId,
        amount: Balance,
    }

    #[ink(event)]
    pub struct TakeoutCollected {
        #[ink(topic)]
        race_id: RaceId,
        amount: Balance,
    }

    // ============================================================================
    // CONTRACT STORAGE
    // ============================================================================

    #[ink(storage)]
    pub struct RaceLedger {
        /// Owner and randomness strategy
        config: LedgerConfig,

        /// Number of races scheduled; also the next race id
        race_count: RaceId,

        /// Append-only race records
        races: Mapping<RaceId, Race>,

        /// Sum of wagers per (race, competitor)
        competitor_pools: Mapping<(RaceId, u8), Balance>,

        /// Wagers per (race, bettor), in placement order
        wagers: Mapping<(RaceId, AccountId), Vec<Wager>>,
    }

    // ============================================================================
    // IMPLEMENTATION
    // ============================================================================

    impl RaceLedger {
        /// Production deployment: races settle on block entropy
        #[ink(constructor)]
        pub fn new() -> Self {
            Self::with_randomness(RandomnessMode::BlockEntropy)
        }

        /// Reproducible deployment for tests and staging
        #[ink(constructor)]
        pub fn new_seeded() -> Self {
            Self::with_randomness(RandomnessMode::Seeded)
        }

        fn with_randomness(randomness: RandomnessMode) -> Self {
            Self {
                config: LedgerConfig {
                    owner: Self::env().caller(),
                    randomness,
                },
                race_count: 0,
                races: Mapping::default(),
                competitor_pools: Mapping::default(),
                wagers: Mapping::default(),
            }
        }

        // ========================================================================
        // RACE REGISTRY
        // ========================================================================

        /// Schedule a race. Anyone may call this.
        ///
        /// `post_time` is in milliseconds, like the block timestamp.
        #[ink(message)]
        pub fn schedule_race(
            &mut self,
            post_time: Timestamp,
            takeout_percentage: u8,
            num_competitors: u8,
        ) -> Result<RaceId> {
            if takeout_percentage > MAX_TAKEOUT_PERCENTAGE {
                return Err(Error::InvalidTakeout);
            }
            if post_time <= self.env().block_timestamp() {
                return Err(Error::InvalidPostTime);
            }
            if num_competitors == 0 {
                return Err(Error::InvalidCompetitorCount);
            }

            let id = self.race_count;
            self.race_count = id.checked_add(1).ok_or(Error::Overflow)?;
            self.races.insert(
                id,
                &Race {
                    id,
                    post_time,
                    takeout_percentage,
                    num_competitors,
                    pool: 0,
                    finished: false,
                    winning_competitor: None,
                    takeout_collected: false,
                },
            );

            self.env().emit_event(RaceScheduled {
                race_id: id,
                post_time,
            });

            Ok(id)
        }

        /// Get a race by id
        #[ink(message)]
        pub fn get_race(&self, race_id: RaceId) -> Result<Race> {
            self.races.get(race_id).ok_or(Error::NotFound)
        }

        /// Number of races scheduled so far
        #[ink(message)]
        pub fn race_count(&self) -> RaceId {
            self.race_count
        }

        /// Current lifecycle phase of a race
        #[ink(message)]
        pub fn race_phase(&self, race_id: RaceId) -> Result<RacePhase> {
            let race = self.get_race(race_id)?;
            Ok(race.phase(self.env().block_timestamp()))
        }

        // ========================================================================
        // WAGER LEDGER
        // ========================================================================

        /// Wager the attached value on `competitor`
        #[ink(message, payable)]
        pub fn place_bet(&mut self, race_id: RaceId, competitor: u8) -> Result<()> {
            let mut race = self.get_race(race_id)?;
            if race.phase(self.env().block_timestamp()) != RacePhase::Open {
                return Err(Error::RaceClosed);
            }

            let amount = self.env().transferred_value();
            if amount < MINIMUM_BET {
                return Err(Error::BetTooSmall);
            }
            if !race.is_valid_competitor(competitor) {
                return Err(Error::InvalidCompetitor);
            }

            let competitor_pool = self
                .competitor_pools
                .get((race_id, competitor))
                .unwrap_or(0)
                .checked_add(amount)
                .ok_or(Error::Overflow)?;
            race.pool = race.pool.checked_add(amount).ok_or(Error::Overflow)?;

            let bettor = self.env().caller();
            let mut wagers = self.wagers.get((race_id, bettor)).unwrap_or_default();
            if wagers.len() >= MAX_WAGERS_PER_BETTOR {
                return Err(Error::TooManyWagers);
            }
            wagers.push(Wager {
                competitor,
                amount,
                claimed: false,
            });

            self.competitor_pools
                .insert((race_id, competitor), &competitor_pool);
            self.wagers.insert((race_id, bettor), &wagers);
            self.races.insert(race_id, &race);

            self.env().emit_event(BetPlaced {
                race_id,
                bettor,
                competitor,
                amount,
            });

            Ok(())
        }

        /// Total wagered on one competitor
        #[ink(message)]
        pub fn total_on_competitor(&self, race_id: RaceId, competitor: u8) -> Result<Balance> {
            let race = self.get_race(race_id)?;
            if !race.is_valid_competitor(competitor) {
                return Err(Error::InvalidCompetitor);
            }
            Ok(self.competitor_pools.get((race_id, competitor)).unwrap_or(0))
        }

        /// All wagers `account` placed on a race
        #[ink(message)]
        pub fn get_wagers(&self, race_id: RaceId, account: AccountId) -> Vec<Wager> {
            self.wagers.get((race_id, account)).unwrap_or_default()
        }

        // ========================================================================
        // SETTLEMENT ENGINE
        // ========================================================================

        /// Draw the winner of a closed race. Succeeds at most once per race.
        #[ink(message)]
        pub fn determine_results(&mut self, race_id: RaceId) -> Result<u8> {
            let race = self.get_race(race_id)?;
            match race.phase(self.env().block_timestamp()) {
                RacePhase::Open => return Err(Error::NotYetClosed),
                RacePhase::Settled => return Err(Error::AlreadySettled),
                RacePhase::Closed => {}
            }

            let winner = match self.config.randomness {
                RandomnessMode::Seeded => self.settle(race, &SeededDraw),
                RandomnessMode::BlockEntropy => {
                    let source = BlockEntropyDraw {
                        block_number: self.env().block_number(),
                        block_timestamp: self.env().block_timestamp(),
                    };
                    self.settle(race, &source)
                }
            };

            ink::env::debug_println!("race {} settled, winner {}", race_id, winner);
            self.env().emit_event(RaceResultsDetermined {
                race_id,
                winning_competitor: winner,
            });

            Ok(winner)
        }

        fn settle<R: RandomnessSource>(&mut self, mut race: Race, source: &R) -> u8 {
            let winner = source.winning_competitor(&race.draw_input());
            race.finished = true;
            race.winning_competitor = Some(winner);
            self.races.insert(race.id, &race);
            winner
        }

        // ========================================================================
        // PAYOUT DISPATCHER
        // ========================================================================

        /// Collect everything the caller is owed on a settled race
        #[ink(message)]
        pub fn withdraw(&mut self, race_id: RaceId) -> Result<Balance> {
            let race = self.get_race(race_id)?;
            let caller = self.env().caller();
            let mut wagers = self.wagers.get((race_id, caller)).unwrap_or_default();

            let claim = self.claim_for(&race, &wagers)?;
            let refund = matches!(claim, Claim::Refund(_));
            let winner = race.winning_competitor.ok_or(Error::NotSettled)?;

            // Claims are consumed before any value leaves the contract.
            for wager in wagers.iter_mut().filter(|w| !w.claimed) {
                if refund || wager.competitor == winner {
                    wager.claimed = true;
                }
            }
            self.wagers.insert((race_id, caller), &wagers);

            match claim {
                Claim::Winnings(amount) => {
                    self.transfer_out(caller, amount)?;
                    self.env().emit_event(WinningsWithdrawn {
                        race_id,
                        account: caller,
                        amount,
                    });
                    Ok(amount)
                }
                Claim::Refund(amount) => {
                    self.transfer_out(caller, amount)?;
                    self.env().emit_event(StakeRefunded {
                        race_id,
                        account: caller,
                        amount,
                    });
                    Ok(amount)
                }
            }
        }

        /// What `withdraw` would pay `account` right now
        #[ink(message)]
        pub fn claimable(&self, race_id: RaceId, account: AccountId) -> Result<Balance> {
            let race = self.get_race(race_id)?;
            let wagers = self.wagers.get((race_id, account)).unwrap_or_default();
            match self.claim_for(&race, &wagers) {
                Ok(Claim::Winnings(amount)) | Ok(Claim::Refund(amount)) => Ok(amount),
                Err(Error::NothingToClaim) => Ok(0),
                Err(error) => Err(error),
            }
        }

        /// Send the house share of a settled race to the owner, once
        #[ink(message)]
        pub fn collect_takeout(&mut self, race_id: RaceId) -> Result<Balance> {
            let owner = self.config.owner;
            if self.env().caller() != owner {
                return Err(Error::NotOwner);
            }

            let mut race = self.get_race(race_id)?;
            let winner = race.winning_competitor.ok_or(Error::NotSettled)?;
            if race.takeout_collected {
                return Err(Error::NothingToClaim);
            }
            // Void races refund everything, so the house keeps nothing.
            if self.competitor_pools.get((race_id, winner)).unwrap_or(0) == 0 {
                return Err(Error::NothingToClaim);
            }

            let amount = payout::takeout(race.pool, race.takeout_percentage);
            if amount == 0 {
                return Err(Error::NothingToClaim);
            }

            race.takeout_collected = true;
            self.races.insert(race_id, &race);

            self.transfer_out(owner, amount)?;
            self.env().emit_event(TakeoutCollected { race_id, amount });

            Ok(amount)
        }

        fn claim_for(&self, race: &Race, wagers: &[Wager]) -> Result<Claim> {
            let winner = race.winning_competitor.ok_or(Error::NotSettled)?;
            let winning_total = self.competitor_pools.get((race.id, winner)).unwrap_or(0);
            let unclaimed = wagers.iter().filter(|w| !w.claimed);

            if winning_total == 0 {
                let stake = Self::sum(unclaimed)?;
                if stake == 0 {
                    return Err(Error::NothingToClaim);
                }
                return Ok(Claim::Refund(stake));
            }

            let stake = Self::sum(unclaimed.filter(|w| w.competitor == winner))?;
            if stake == 0 {
                return Err(Error::NothingToClaim);
            }
            let pot = payout::distributable(race.pool, race.takeout_percentage);
            let amount =
                payout::winning_share(pot, stake, winning_total).ok_or(Error::LedgerMismatch)?;
            Ok(Claim::Winnings(amount))
        }

        fn sum<'a>(mut wagers: impl Iterator<Item = &'a Wager>) -> Result<Balance> {
            wagers.try_fold(0, |total: Balance, wager| {
                total.checked_add(wager.amount).ok_or(Error::Overflow)
            })
        }

        fn transfer_out(&self, to: AccountId, amount: Balance) -> Result<()> {
            self.env().transfer(to, amount).map_err(|_| {
                ink::env::debug_println!("transfer of {} failed", amount);
                Error::TransferFailed
            })
        }

        // ========================================================================
        // GETTERS
        // ========================================================================

        /// Get contract owner
        #[ink(message)]
        pub fn get_owner(&self) -> AccountId {
            self.config.owner
        }

        /// Get deployment settings
        #[ink(message)]
        pub fn get_config(&self) -> LedgerConfig {
            self.config.clone()
        }
    }

    // ============================================================================
    // UNIT TESTS
    // ============================================================================


    // ============================================================================
    // E2E TESTS
    // ============================================================================

    #[cfg(all(test, feature = "e2e-tests"))]
    mod e2e_tests {
        use super::*;
        use ink_e2e::ContractsBackend;

        type E2EResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

        #[ink_e2e::test]
        async fn e2e_schedule_race(mut client: ink_e2e::Client<C, E>) -> E2EResult<()> {
            let mut constructor = RaceLedgerRef::new_seeded();
            let contract = client
                .instantiate("race_ledger", &ink_e2e::alice(), &mut constructor)
                .submit()
                .await
                .expect("instantiate failed");

            let mut call_builder = contract.call_builder::<RaceLedger>();

            // Far enough ahead of any dev node clock.
            let post_time: Timestamp = u64::MAX / 2;
            let schedule = call_builder.schedule_race(post_time, 5, 5);
            let scheduled = client
                .call(&ink_e2e::bob(), &schedule)
                .submit()
                .await
                .expect("schedule_race failed");
            assert_eq!(scheduled.return_value(), Ok(0));

            let get_race = call_builder.get_race(0);
            let result = client.call(&ink_e2e::bob(), &get_race).dry_run().await?;
            let race = result.return_value().expect("race exists");
            assert_eq!(race.post_time, post_time);
            assert_eq!(race.pool, 0);
            assert!(!race.finished);

            Ok(())
        }
    }
}
