#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
};
use tiervault_shared::{
    default_tier_config, tier_for_stake, validate_basis_points, validate_positive_amount,
    ErrorCategory, Tier, MAX_BASIS_POINTS, SECONDS_PER_DAY, SECONDS_PER_YEAR,
};

/// A stake must sit this long before an unstake can be requested.
pub const MIN_STAKE_DURATION: u64 = 7 * SECONDS_PER_DAY;

/// Wait between `request_unstake` and `unstake`.
pub const UNSTAKE_COOLDOWN: u64 = 4 * SECONDS_PER_DAY;

/// Upper bound for the base reward rate (100% APR).
pub const MAX_REWARD_RATE: i128 = MAX_BASIS_POINTS;

// Data Types
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakeRecord {
    pub amount: i128,
    pub tier: Tier,
    pub stake_timestamp: u64,
    pub unstake_available_at: u64, // 0 while no unstake request is open
    pub pending_rewards: i128,
    pub last_reward_update: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakingConfig {
    pub admin: Address,
    pub governance_token: Address,
    pub base_reward_rate: i128, // Annual percentage in basis points
    pub max_supply: i128,       // Hard cap on governance token supply
    pub emergency_pause: bool,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    UserStake(Address),
    TotalStaked,
    MintedSupply,
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum StakingError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    InvalidAmount = 4,
    InsufficientStake = 5,
    StakeNotFound = 6,
    MinimumDurationNotMet = 7,
    UnstakeNotRequested = 8,
    CooldownActive = 9,
    ContractPaused = 10,
    InvalidConfiguration = 11,
    NoRewardsToClaim = 12,
    MaxSupplyReached = 13,
    NumericOverflow = 14,
}

impl StakingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StakingError::Unauthorized => ErrorCategory::Authorization,
            StakingError::MinimumDurationNotMet | StakingError::CooldownActive => {
                ErrorCategory::Timing
            }
            StakingError::NotInitialized
            | StakingError::AlreadyInitialized
            | StakingError::ContractPaused
            | StakingError::NumericOverflow => ErrorCategory::Environment,
            _ => ErrorCategory::Validation,
        }
    }
}

// Events
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakedEvent {
    pub user: Address,
    pub amount: i128,
    pub total_staked: i128,
    pub tier: Tier,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnstakeRequestedEvent {
    pub user: Address,
    pub available_at: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnstakedEvent {
    pub user: Address,
    pub amount: i128,
    pub remaining: i128,
    pub tier: Tier,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardsClaimedEvent {
    pub user: Address,
    pub amount: i128,
    pub timestamp: u64,
}

#[contract]
pub struct StakingContract;

#[contractimpl]
impl StakingContract {
    /// Initialize the staking ledger.
    ///
    /// `initial_supply` is the governance token amount already in circulation;
    /// reward minting never pushes the total past `max_supply`.
    pub fn initialize(
        env: Env,
        admin: Address,
        governance_token: Address,
        base_reward_rate: i128,
        max_supply: i128,
        initial_supply: i128,
    ) -> Result<(), StakingError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(StakingError::AlreadyInitialized);
        }

        admin.require_auth();

        if !validate_basis_points(base_reward_rate)
            || !validate_positive_amount(max_supply)
            || initial_supply < 0
            || initial_supply > max_supply
        {
            return Err(StakingError::InvalidConfiguration);
        }

        let config = StakingConfig {
            admin: admin.clone(),
            governance_token,
            base_reward_rate,
            max_supply,
            emergency_pause: false,
        };

        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::TotalStaked, &0i128);
        env.storage().instance().set(&DataKey::MintedSupply, &initial_supply);

        log!(&env, "Staking contract initialized by admin: {}", admin);

        Ok(())
    }

    /// Stake governance tokens. Tier is recomputed immediately and returned.
    pub fn stake(env: Env, user: Address, amount: i128) -> Result<Tier, StakingError> {
        user.require_auth();

        let config = Self::get_config(env.clone())?;

        if config.emergency_pause {
            return Err(StakingError::ContractPaused);
        }

        if !validate_positive_amount(amount) {
            return Err(StakingError::InvalidAmount);
        }

        let now = env.ledger().timestamp();
        let mut record = Self::get_stake(env.clone(), user.clone()).unwrap_or(StakeRecord {
            amount: 0,
            tier: Tier::Free,
            stake_timestamp: now,
            unstake_available_at: 0,
            pending_rewards: 0,
            last_reward_update: now,
        });

        Self::accrue_rewards(&config, &mut record, now)?;

        record.amount = record
            .amount
            .checked_add(amount)
            .ok_or(StakingError::NumericOverflow)?;
        record.tier = tier_for_stake(record.amount);
        record.stake_timestamp = now;
        // Adding to the stake restarts the lock, so any open request is void.
        record.unstake_available_at = 0;

        env.storage()
            .persistent()
            .set(&DataKey::UserStake(user.clone()), &record);
        Self::adjust_total_staked(&env, amount)?;

        token::Client::new(&env, &config.governance_token).transfer(
            &user,
            &env.current_contract_address(),
            &amount,
        );

        let event = StakedEvent {
            user: user.clone(),
            amount,
            total_staked: record.amount,
            tier: record.tier,
            timestamp: now,
        };
        env.events().publish((symbol_short!("staked"),), event);

        log!(&env, "User {} staked {}, tier now {}", user, amount, record.tier);

        Ok(record.tier)
    }

    /// Open an unstake request. Returns the time at which `unstake` unlocks.
    pub fn request_unstake(env: Env, user: Address) -> Result<u64, StakingError> {
        user.require_auth();

        Self::get_config(env.clone())?;

        let mut record = Self::get_stake(env.clone(), user.clone())
            .filter(|record| record.amount > 0)
            .ok_or(StakingError::StakeNotFound)?;

        let now = env.ledger().timestamp();
        if now < record.stake_timestamp.saturating_add(MIN_STAKE_DURATION) {
            return Err(StakingError::MinimumDurationNotMet);
        }

        record.unstake_available_at = now.saturating_add(UNSTAKE_COOLDOWN);
        env.storage()
            .persistent()
            .set(&DataKey::UserStake(user.clone()), &record);

        let event = UnstakeRequestedEvent {
            user: user.clone(),
            available_at: record.unstake_available_at,
        };
        env.events().publish((symbol_short!("unstkreq"),), event);

        Ok(record.unstake_available_at)
    }

    /// Withdraw staked tokens once the cooldown has elapsed. Returns the
    /// remaining stake.
    pub fn unstake(env: Env, user: Address, amount: i128) -> Result<i128, StakingError> {
        user.require_auth();

        let config = Self::get_config(env.clone())?;

        let mut record = Self::get_stake(env.clone(), user.clone())
            .ok_or(StakingError::StakeNotFound)?;

        if !validate_positive_amount(amount) {
            return Err(StakingError::InvalidAmount);
        }
        if amount > record.amount {
            return Err(StakingError::InsufficientStake);
        }
        if record.unstake_available_at == 0 {
            return Err(StakingError::UnstakeNotRequested);
        }

        let now = env.ledger().timestamp();
        if now < record.unstake_available_at {
            return Err(StakingError::CooldownActive);
        }

        Self::accrue_rewards(&config, &mut record, now)?;

        record.amount -= amount;
        record.tier = tier_for_stake(record.amount);
        record.unstake_available_at = 0;

        env.storage()
            .persistent()
            .set(&DataKey::UserStake(user.clone()), &record);
        Self::adjust_total_staked(&env, -amount)?;

        token::Client::new(&env, &config.governance_token).transfer(
            &env.current_contract_address(),
            &user,
            &amount,
        );

        let event = UnstakedEvent {
            user: user.clone(),
            amount,
            remaining: record.amount,
            tier: record.tier,
            timestamp: now,
        };
        env.events().publish((symbol_short!("unstaked"),), event);

        log!(&env, "User {} unstaked {}, remaining {}", user, amount, record.amount);

        Ok(record.amount)
    }

    /// Mint accrued rewards to the user, bounded by the max supply.
    pub fn claim_rewards(env: Env, user: Address) -> Result<i128, StakingError> {
        user.require_auth();

        let config = Self::get_config(env.clone())?;

        if config.emergency_pause {
            return Err(StakingError::ContractPaused);
        }

        let mut record = Self::get_stake(env.clone(), user.clone())
            .ok_or(StakingError::StakeNotFound)?;

        let now = env.ledger().timestamp();
        Self::accrue_rewards(&config, &mut record, now)?;

        if record.pending_rewards <= 0 {
            return Err(StakingError::NoRewardsToClaim);
        }

        let minted: i128 = env
            .storage()
            .instance()
            .get(&DataKey::MintedSupply)
            .unwrap_or(0);
        let headroom = config.max_supply.saturating_sub(minted);
        if headroom <= 0 {
            return Err(StakingError::MaxSupplyReached);
        }

        let claim = record.pending_rewards.min(headroom);
        record.pending_rewards -= claim;

        env.storage()
            .persistent()
            .set(&DataKey::UserStake(user.clone()), &record);
        env.storage()
            .instance()
            .set(&DataKey::MintedSupply, &(minted + claim));

        token::StellarAssetClient::new(&env, &config.governance_token).mint(&user, &claim);

        let event = RewardsClaimedEvent {
            user: user.clone(),
            amount: claim,
            timestamp: now,
        };
        env.events().publish((symbol_short!("claimed"),), event);

        log!(&env, "User {} claimed {} reward tokens", user, claim);

        Ok(claim)
    }

    /// Get user's stake record
    pub fn get_stake(env: Env, user: Address) -> Option<StakeRecord> {
        env.storage().persistent().get(&DataKey::UserStake(user))
    }

    /// Current tier of a user; users without a stake are `Free`.
    pub fn get_user_tier(env: Env, user: Address) -> Tier {
        Self::get_stake(env, user)
            .map(|record| record.tier)
            .unwrap_or(Tier::Free)
    }

    /// Rewards claimable right now, including accrual since the last checkpoint.
    pub fn get_pending_rewards(env: Env, user: Address) -> Result<i128, StakingError> {
        let config = Self::get_config(env.clone())?;
        let mut record = Self::get_stake(env.clone(), user)
            .ok_or(StakingError::StakeNotFound)?;

        Self::accrue_rewards(&config, &mut record, env.ledger().timestamp())?;
        Ok(record.pending_rewards)
    }

    /// Get total amount staked in the contract
    pub fn get_total_staked(env: Env) -> i128 {
        env.storage().instance().get(&DataKey::TotalStaked).unwrap_or(0)
    }

    /// Governance tokens in circulation as tracked against the cap
    pub fn get_minted_supply(env: Env) -> i128 {
        env.storage().instance().get(&DataKey::MintedSupply).unwrap_or(0)
    }

    /// Get contract configuration
    pub fn get_config(env: Env) -> Result<StakingConfig, StakingError> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(StakingError::NotInitialized)
    }

    /// Admin function to pause/unpause staking and claiming
    pub fn set_emergency_pause(env: Env, admin: Address, paused: bool) -> Result<(), StakingError> {
        admin.require_auth();

        let mut config = Self::get_config(env.clone())?;

        if config.admin != admin {
            return Err(StakingError::Unauthorized);
        }

        config.emergency_pause = paused;
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Emergency pause set to: {}", paused);

        Ok(())
    }

    /// Admin function to update the base reward rate. Already-accrued
    /// rewards are not recomputed.
    pub fn update_reward_rate(env: Env, admin: Address, new_rate: i128) -> Result<(), StakingError> {
        admin.require_auth();

        let mut config = Self::get_config(env.clone())?;

        if config.admin != admin {
            return Err(StakingError::Unauthorized);
        }

        if !validate_basis_points(new_rate) {
            return Err(StakingError::InvalidConfiguration);
        }

        config.base_reward_rate = new_rate;
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Base reward rate updated to: {}", new_rate);

        Ok(())
    }

    // Internal helper functions

    /// Checkpoint time-weighted rewards into `record.pending_rewards`.
    fn accrue_rewards(
        config: &StakingConfig,
        record: &mut StakeRecord,
        now: u64,
    ) -> Result<(), StakingError> {
        let elapsed = now.saturating_sub(record.last_reward_update);

        if elapsed > 0 && record.amount > 0 {
            let multiplier = default_tier_config(record.tier).reward_multiplier;

            // amount * rate * elapsed / (year * 10000), then scaled by the tier multiplier
            let base_reward = record
                .amount
                .checked_mul(config.base_reward_rate)
                .ok_or(StakingError::NumericOverflow)?
                .checked_mul(elapsed as i128)
                .ok_or(StakingError::NumericOverflow)?
                / (SECONDS_PER_YEAR as i128 * MAX_BASIS_POINTS);

            let reward = base_reward
                .checked_mul(multiplier)
                .ok_or(StakingError::NumericOverflow)?
                / MAX_BASIS_POINTS;

            record.pending_rewards = record
                .pending_rewards
                .checked_add(reward)
                .ok_or(StakingError::NumericOverflow)?;
        }

        record.last_reward_update = now;
        Ok(())
    }

    fn adjust_total_staked(env: &Env, delta: i128) -> Result<(), StakingError> {
        let total: i128 = env.storage().instance().get(&DataKey::TotalStaked).unwrap_or(0);
        let total = total.checked_add(delta).ok_or(StakingError::NumericOverflow)?;
        env.storage().instance().set(&DataKey::TotalStaked, &total);
        Ok(())
    }
}
