//! Shared data types used across all Tiervault contracts.
//! The vault, strategy manager and staking ledger all agree on these definitions.
#![no_std]
use soroban_sdk::{contractclient, contracttype, Address, Env};

// ============================================================================
// Tier Model
// ============================================================================

/// Service level derived from the governance token stake.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Tier {
    Free = 0,
    Premium = 1,
    Pro = 2,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TierConfig {
    pub deposit_limit: i128,       // Max principal a user may hold in the vault
    pub rebalance_frequency: u64,  // Seconds between two user-triggered rebalances
    pub reward_multiplier: i128,   // Staking reward multiplier in basis points
}

// ============================================================================
// Constants
// ============================================================================

/// Basis points representing 100% (10000 basis points = 100%)
pub const MAX_BASIS_POINTS: i128 = 10000;

pub const SECONDS_PER_HOUR: u64 = 3600;

/// Seconds in a day
pub const SECONDS_PER_DAY: u64 = 86400;

/// Seconds in a year (365 days)
pub const SECONDS_PER_YEAR: u64 = 365 * SECONDS_PER_DAY;

/// One whole token (7 decimals)
pub const PRECISION_FACTOR: i128 = 10_000_000;

/// Minimum stake for the Premium tier (100 tokens)
pub const PREMIUM_STAKE_THRESHOLD: i128 = 100 * PRECISION_FACTOR;

/// Minimum stake for the Pro tier (500 tokens)
pub const PRO_STAKE_THRESHOLD: i128 = 500 * PRECISION_FACTOR;

// ============================================================================
// Tier Functions
// ============================================================================

/// Map a staked amount to its tier. Non-decreasing in `amount`.
pub fn tier_for_stake(amount: i128) -> Tier {
    if amount >= PRO_STAKE_THRESHOLD {
        Tier::Pro
    } else if amount >= PREMIUM_STAKE_THRESHOLD {
        Tier::Premium
    } else {
        Tier::Free
    }
}

/// Deployment defaults for each tier.
pub fn default_tier_config(tier: Tier) -> TierConfig {
    match tier {
        Tier::Free => TierConfig {
            deposit_limit: 10_000 * PRECISION_FACTOR,
            rebalance_frequency: 24 * SECONDS_PER_HOUR,
            reward_multiplier: 10000, // 1x
        },
        Tier::Premium => TierConfig {
            deposit_limit: 100_000 * PRECISION_FACTOR,
            rebalance_frequency: 4 * SECONDS_PER_HOUR,
            reward_multiplier: 15000, // 1.5x
        },
        Tier::Pro => TierConfig {
            deposit_limit: 1_000_000 * PRECISION_FACTOR,
            rebalance_frequency: SECONDS_PER_HOUR,
            reward_multiplier: 20000, // 2x
        },
    }
}

pub const ALL_TIERS: [Tier; 3] = [Tier::Free, Tier::Premium, Tier::Pro];

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Coarse classification of contract errors, so callers can react to a
/// failure without matching on individual codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    /// Bad amounts, unsupported tokens, limits exceeded, missing records
    Validation,
    /// Caller is not the admin, oracle or vault
    Authorization,
    /// Operation attempted before its eligibility window
    Timing,
    /// Contract state prevents the call (not initialized, paused, overflow)
    Environment,
}

// ============================================================================
// Cross-Contract Interfaces
// ============================================================================

/// Read side of the staking ledger the vault depends on.
#[contractclient(name = "StakingClient")]
pub trait StakingInterface {
    fn get_user_tier(env: Env, user: Address) -> Tier;
}

/// Entry points the strategy manager exposes to its vault. Every call
/// names the vault explicitly; the manager checks it against its stored vault.
///
/// `withdraw_funds` pays out `amount` but shrinks the user's book by
/// `principal_part`, so the book always equals the vault position's
/// principal. `close` drains the book whatever is left in it.
#[contractclient(name = "StrategyManagerClient")]
pub trait StrategyManagerInterface {
    fn execute_strategy(env: Env, vault: Address, user: Address, token: Address, amount: i128);
    fn rebalance_portfolio(env: Env, vault: Address, user: Address) -> bool;
    fn withdraw_funds(
        env: Env,
        vault: Address,
        user: Address,
        token: Address,
        amount: i128,
        principal_part: i128,
        close: bool,
    );
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: i128) -> bool {
    amount > 0
}

/// Validate that a percentage is within valid range (0-100%)
pub fn validate_basis_points(basis_points: i128) -> bool {
    (0..=MAX_BASIS_POINTS).contains(&basis_points)
}

/// `amount * bps / 10000`, rounding toward zero. `None` on overflow.
pub fn apply_basis_points(amount: i128, bps: i128) -> Option<i128> {
    amount.checked_mul(bps)?.checked_div(MAX_BASIS_POINTS)
}

/// `a * b / denominator` with overflow and zero-denominator checks.
pub fn mul_div(a: i128, b: i128, denominator: i128) -> Option<i128> {
    if denominator == 0 {
        return None;
    }
    a.checked_mul(b)?.checked_div(denominator)
}

/// Floor of the square root (Newton's method). Negative input yields 0.
pub fn integer_sqrt(value: i128) -> i128 {
    if value < 2 {
        return value.max(0);
    }
    let mut x = value;
    let mut y = value / 2 + (value & 1);
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    x
}
