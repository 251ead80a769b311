#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
    Vec,
};
use tiervault_shared::{
    default_tier_config, ErrorCategory, StakingClient, StrategyManagerClient, Tier, TierConfig,
    ALL_TIERS, PRECISION_FACTOR,
};

pub mod math;

pub use math::WithdrawalSplit;

/// Smallest accepted deposit (1 token)
pub const MIN_DEPOSIT: i128 = PRECISION_FACTOR;

/// Largest accepted single deposit (1M tokens)
pub const MAX_DEPOSIT: i128 = 1_000_000 * PRECISION_FACTOR;

/// 0.5% of realized profit
pub const DEFAULT_PERFORMANCE_FEE: i128 = 50;

/// 20% of realized profit
pub const MAX_PERFORMANCE_FEE: i128 = 2000;

// Data Types
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserPosition {
    pub principal: i128,
    pub current_value: i128,
    pub total_returns: i128, // current_value - principal, negative on a loss
    pub last_update_time: u64,
    pub deposit_token: Option<Address>, // Fixed while the position is open
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VaultConfig {
    pub admin: Address,
    pub oracle: Address,
    pub staking_contract: Address,
    pub strategy_manager: Address,
    pub fee_recipient: Address,
    pub performance_fee: i128, // Basis points, charged on profit only
    pub emergency_pause: bool,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    TierConfig(Tier),
    SupportedToken(Address),
    Position(Address),
    LastRebalance(Address),
    TotalValueLocked(Address),
    FeesCollected(Address),
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum VaultError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    ContractPaused = 4,
    InvalidConfiguration = 5,
    UnsupportedToken = 6,
    BelowMinimumDeposit = 7,
    AboveMaximumDeposit = 8,
    TierLimitExceeded = 9,
    TokenMismatch = 10,
    NoPosition = 11,
    InsufficientValue = 12,
    InvalidAmount = 13,
    RebalanceTooSoon = 14,
    NumericOverflow = 15,
    StrategyCallFailed = 16,
}

impl VaultError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            VaultError::Unauthorized => ErrorCategory::Authorization,
            VaultError::RebalanceTooSoon => ErrorCategory::Timing,
            VaultError::NotInitialized
            | VaultError::AlreadyInitialized
            | VaultError::ContractPaused
            | VaultError::InvalidConfiguration
            | VaultError::NumericOverflow
            | VaultError::StrategyCallFailed => ErrorCategory::Environment,
            _ => ErrorCategory::Validation,
        }
    }
}

// Events
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DepositEvent {
    pub user: Address,
    pub token: Address,
    pub amount: i128,
    pub principal: i128,
    pub tier: Tier,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawalEvent {
    pub user: Address,
    pub token: Address,
    pub amount: i128,
    pub principal_returned: i128,
    pub fee: i128,
    pub net_amount: i128,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValueUpdatedEvent {
    pub user: Address,
    pub old_value: i128,
    pub new_value: i128,
    pub total_returns: i128,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RebalanceEvent {
    pub user: Address,
    pub tier: Tier,
    pub moved: bool,
    pub next_eligible: u64,
}

#[contract]
pub struct VaultContract;

#[contractimpl]
impl VaultContract {
    /// Initialize the vault. Tier tables are written here and never change.
    pub fn initialize(
        env: Env,
        admin: Address,
        staking_contract: Address,
        strategy_manager: Address,
        fee_recipient: Address,
        performance_fee: i128,
        supported_tokens: Vec<Address>,
    ) -> Result<(), VaultError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(VaultError::AlreadyInitialized);
        }

        admin.require_auth();

        if !(0..=MAX_PERFORMANCE_FEE).contains(&performance_fee) {
            return Err(VaultError::InvalidConfiguration);
        }

        let config = VaultConfig {
            admin: admin.clone(),
            oracle: admin.clone(),
            staking_contract,
            strategy_manager,
            fee_recipient,
            performance_fee,
            emergency_pause: false,
        };
        env.storage().instance().set(&DataKey::Config, &config);

        for tier in ALL_TIERS {
            env.storage()
                .instance()
                .set(&DataKey::TierConfig(tier), &default_tier_config(tier));
        }

        for token in supported_tokens.iter() {
            env.storage()
                .instance()
                .set(&DataKey::SupportedToken(token), &true);
        }

        log!(&env, "Vault initialized by admin: {}", admin);

        Ok(())
    }

    /// Deposit `amount` of `token` and hand it to the strategy manager.
    /// Returns the new principal.
    pub fn deposit(env: Env, user: Address, token: Address, amount: i128) -> Result<i128, VaultError> {
        user.require_auth();

        let config = Self::get_config(env.clone())?;

        if config.emergency_pause {
            return Err(VaultError::ContractPaused);
        }

        if !Self::is_supported_token(env.clone(), token.clone()) {
            return Err(VaultError::UnsupportedToken);
        }

        if amount < MIN_DEPOSIT {
            return Err(VaultError::BelowMinimumDeposit);
        }
        if amount > MAX_DEPOSIT {
            return Err(VaultError::AboveMaximumDeposit);
        }

        let mut position = Self::load_position(&env, &user);
        if let Some(open_token) = &position.deposit_token {
            if *open_token != token {
                return Err(VaultError::TokenMismatch);
            }
        }

        let tier = StakingClient::new(&env, &config.staking_contract).get_user_tier(&user);
        let tier_config = Self::get_tier_config(env.clone(), tier)?;
        let principal = position
            .principal
            .checked_add(amount)
            .ok_or(VaultError::NumericOverflow)?;
        if principal > tier_config.deposit_limit {
            return Err(VaultError::TierLimitExceeded);
        }

        let now = env.ledger().timestamp();
        position.principal = principal;
        position.current_value = position
            .current_value
            .checked_add(amount)
            .ok_or(VaultError::NumericOverflow)?;
        position.total_returns = position.current_value - position.principal;
        position.last_update_time = now;
        position.deposit_token = Some(token.clone());

        env.storage()
            .persistent()
            .set(&DataKey::Position(user.clone()), &position);
        Self::adjust_tvl(&env, &token, amount)?;

        let vault = env.current_contract_address();
        let token_client = token::Client::new(&env, &token);
        token_client.transfer(&user, &vault, &amount);
        token_client.transfer(&vault, &config.strategy_manager, &amount);
        Self::strategy_call(
            StrategyManagerClient::new(&env, &config.strategy_manager)
                .try_execute_strategy(&vault, &user, &token, &amount),
        )?;

        let event = DepositEvent {
            user: user.clone(),
            token,
            amount,
            principal,
            tier,
            timestamp: now,
        };
        env.events().publish((symbol_short!("deposit"),), event);

        log!(&env, "User {} deposited {}, principal {}", user, amount, principal);

        Ok(principal)
    }

    /// Withdraw `amount` of the position's value; 0 withdraws everything.
    /// Returns the amount received after the performance fee.
    pub fn withdraw(env: Env, user: Address, amount: i128) -> Result<i128, VaultError> {
        user.require_auth();

        let config = Self::get_config(env.clone())?;

        let mut position = Self::load_position(&env, &user);
        let token = position
            .deposit_token
            .clone()
            .ok_or(VaultError::NoPosition)?;

        if amount < 0 {
            return Err(VaultError::InvalidAmount);
        }
        let amount = if amount == 0 {
            position.current_value
        } else {
            amount
        };
        if amount > position.current_value {
            return Err(VaultError::InsufficientValue);
        }

        let split = math::split_withdrawal(
            position.principal,
            position.current_value,
            amount,
            config.performance_fee,
        )
        .ok_or(VaultError::NumericOverflow)?;

        let now = env.ledger().timestamp();
        let close = amount == position.current_value;
        if close {
            position = UserPosition {
                principal: 0,
                current_value: 0,
                total_returns: 0,
                last_update_time: now,
                deposit_token: None,
            };
        } else {
            position.principal -= split.principal_part;
            position.current_value -= amount;
            position.total_returns = position.current_value - position.principal;
            position.last_update_time = now;
        }

        env.storage()
            .persistent()
            .set(&DataKey::Position(user.clone()), &position);
        Self::adjust_tvl(&env, &token, -amount)?;
        Self::record_fee(&env, &token, split.fee)?;

        let vault = env.current_contract_address();
        Self::strategy_call(
            StrategyManagerClient::new(&env, &config.strategy_manager).try_withdraw_funds(
                &vault,
                &user,
                &token,
                &amount,
                &split.principal_part,
                &close,
            ),
        )?;

        if amount > 0 {
            let token_client = token::Client::new(&env, &token);
            token_client.transfer(&vault, &user, &split.net_amount);
            if split.fee > 0 {
                token_client.transfer(&vault, &config.fee_recipient, &split.fee);
            }
        }

        let event = WithdrawalEvent {
            user: user.clone(),
            token,
            amount,
            principal_returned: split.principal_part,
            fee: split.fee,
            net_amount: split.net_amount,
            timestamp: now,
        };
        env.events().publish((symbol_short!("withdraw"),), event);

        log!(&env, "User {} withdrew {} (fee {})", user, amount, split.fee);

        Ok(split.net_amount)
    }

    /// Ask the strategy manager to re-optimise the user's book. Rate limited
    /// by the user's tier. Returns whether allocations changed.
    pub fn rebalance(env: Env, user: Address) -> Result<bool, VaultError> {
        user.require_auth();

        let config = Self::get_config(env.clone())?;

        if config.emergency_pause {
            return Err(VaultError::ContractPaused);
        }

        if Self::load_position(&env, &user).deposit_token.is_none() {
            return Err(VaultError::NoPosition);
        }

        let tier = StakingClient::new(&env, &config.staking_contract).get_user_tier(&user);
        let frequency = Self::get_tier_config(env.clone(), tier)?.rebalance_frequency;

        let now = env.ledger().timestamp();
        let last: Option<u64> = env
            .storage()
            .persistent()
            .get(&DataKey::LastRebalance(user.clone()));
        if let Some(last) = last {
            if now < last.saturating_add(frequency) {
                return Err(VaultError::RebalanceTooSoon);
            }
        }

        env.storage()
            .persistent()
            .set(&DataKey::LastRebalance(user.clone()), &now);

        let moved = Self::strategy_call(
            StrategyManagerClient::new(&env, &config.strategy_manager)
                .try_rebalance_portfolio(&env.current_contract_address(), &user),
        )?;

        let event = RebalanceEvent {
            user: user.clone(),
            tier,
            moved,
            next_eligible: now.saturating_add(frequency),
        };
        env.events().publish((symbol_short!("rebalance"),), event);

        log!(&env, "Rebalance for {} at tier {}: moved {}", user, tier, moved);

        Ok(moved)
    }

    /// Oracle/admin hook that marks a position to its latest value.
    pub fn update_position_value(
        env: Env,
        caller: Address,
        user: Address,
        new_value: i128,
    ) -> Result<(), VaultError> {
        caller.require_auth();

        let config = Self::get_config(env.clone())?;
        if caller != config.admin && caller != config.oracle {
            return Err(VaultError::Unauthorized);
        }

        if new_value < 0 {
            return Err(VaultError::InvalidAmount);
        }

        let mut position = Self::load_position(&env, &user);
        let token = position
            .deposit_token
            .clone()
            .ok_or(VaultError::NoPosition)?;

        let now = env.ledger().timestamp();
        let old_value = position.current_value;
        position.current_value = new_value;
        position.total_returns = new_value - position.principal;
        position.last_update_time = now;

        env.storage()
            .persistent()
            .set(&DataKey::Position(user.clone()), &position);
        Self::adjust_tvl(&env, &token, new_value - old_value)?;

        let event = ValueUpdatedEvent {
            user,
            old_value,
            new_value,
            total_returns: position.total_returns,
            timestamp: now,
        };
        env.events().publish((symbol_short!("valupdate"),), event);

        Ok(())
    }

    // Getters
    pub fn get_user_position(env: Env, user: Address) -> Option<UserPosition> {
        env.storage().persistent().get(&DataKey::Position(user))
    }

    pub fn total_value_locked(env: Env, token: Address) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::TotalValueLocked(token))
            .unwrap_or(0)
    }

    pub fn fees_collected(env: Env, token: Address) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::FeesCollected(token))
            .unwrap_or(0)
    }

    pub fn get_tier_config(env: Env, tier: Tier) -> Result<TierConfig, VaultError> {
        env.storage()
            .instance()
            .get(&DataKey::TierConfig(tier))
            .ok_or(VaultError::NotInitialized)
    }

    pub fn get_user_tier(env: Env, user: Address) -> Result<Tier, VaultError> {
        let config = Self::get_config(env.clone())?;
        Ok(StakingClient::new(&env, &config.staking_contract).get_user_tier(&user))
    }

    /// Earliest timestamp at which `rebalance` succeeds for the user's
    /// current tier. 0 when no rebalance has happened yet.
    pub fn next_rebalance_time(env: Env, user: Address) -> Result<u64, VaultError> {
        let last: Option<u64> = env
            .storage()
            .persistent()
            .get(&DataKey::LastRebalance(user.clone()));

        match last {
            None => Ok(0),
            Some(last) => {
                let tier = Self::get_user_tier(env.clone(), user)?;
                let frequency = Self::get_tier_config(env, tier)?.rebalance_frequency;
                Ok(last.saturating_add(frequency))
            }
        }
    }

    /// What `withdraw(user, amount)` would pay out right now.
    pub fn preview_withdrawal(env: Env, user: Address, amount: i128) -> Result<WithdrawalSplit, VaultError> {
        let config = Self::get_config(env.clone())?;
        let position = Self::load_position(&env, &user);

        if position.deposit_token.is_none() {
            return Err(VaultError::NoPosition);
        }
        if amount < 0 {
            return Err(VaultError::InvalidAmount);
        }
        let amount = if amount == 0 {
            position.current_value
        } else {
            amount
        };
        if amount > position.current_value {
            return Err(VaultError::InsufficientValue);
        }

        math::split_withdrawal(
            position.principal,
            position.current_value,
            amount,
            config.performance_fee,
        )
        .ok_or(VaultError::NumericOverflow)
    }

    pub fn is_supported_token(env: Env, token: Address) -> bool {
        env.storage()
            .instance()
            .get(&DataKey::SupportedToken(token))
            .unwrap_or(false)
    }

    pub fn get_config(env: Env) -> Result<VaultConfig, VaultError> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(VaultError::NotInitialized)
    }

    // Admin functions
    pub fn set_oracle(env: Env, admin: Address, oracle: Address) -> Result<(), VaultError> {
        let mut config = Self::require_admin(&env, &admin)?;

        config.oracle = oracle.clone();
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Oracle set to: {}", oracle);

        Ok(())
    }

    pub fn set_fee_recipient(env: Env, admin: Address, fee_recipient: Address) -> Result<(), VaultError> {
        let mut config = Self::require_admin(&env, &admin)?;

        config.fee_recipient = fee_recipient.clone();
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Fee recipient set to: {}", fee_recipient);

        Ok(())
    }

    pub fn set_performance_fee(env: Env, admin: Address, performance_fee: i128) -> Result<(), VaultError> {
        let mut config = Self::require_admin(&env, &admin)?;

        if !(0..=MAX_PERFORMANCE_FEE).contains(&performance_fee) {
            return Err(VaultError::InvalidConfiguration);
        }

        config.performance_fee = performance_fee;
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Performance fee set to: {}", performance_fee);

        Ok(())
    }

    pub fn add_supported_token(env: Env, admin: Address, token: Address) -> Result<(), VaultError> {
        Self::require_admin(&env, &admin)?;

        env.storage()
            .instance()
            .set(&DataKey::SupportedToken(token.clone()), &true);

        log!(&env, "Token {} supported", token);

        Ok(())
    }

    /// Stops new deposits in `token`. Open positions can still withdraw.
    pub fn remove_supported_token(env: Env, admin: Address, token: Address) -> Result<(), VaultError> {
        Self::require_admin(&env, &admin)?;

        env.storage()
            .instance()
            .remove(&DataKey::SupportedToken(token.clone()));

        log!(&env, "Token {} no longer supported", token);

        Ok(())
    }

    /// Pausing blocks deposits and rebalances; withdrawals stay open.
    pub fn set_emergency_pause(env: Env, admin: Address, paused: bool) -> Result<(), VaultError> {
        let mut config = Self::require_admin(&env, &admin)?;

        config.emergency_pause = paused;
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Emergency pause set to: {}", paused);

        Ok(())
    }

    // Internal helper functions
    fn require_admin(env: &Env, admin: &Address) -> Result<VaultConfig, VaultError> {
        admin.require_auth();

        let config = Self::get_config(env.clone())?;
        if config.admin != *admin {
            return Err(VaultError::Unauthorized);
        }
        Ok(config)
    }

    /// Strategy manager failures surface as one vault error rather than the
    /// manager's own code.
    fn strategy_call<T, E, F>(result: Result<Result<T, E>, F>) -> Result<T, VaultError> {
        match result {
            Ok(Ok(value)) => Ok(value),
            _ => Err(VaultError::StrategyCallFailed),
        }
    }

    fn load_position(env: &Env, user: &Address) -> UserPosition {
        Self::get_user_position(env.clone(), user.clone()).unwrap_or(UserPosition {
            principal: 0,
            current_value: 0,
            total_returns: 0,
            last_update_time: 0,
            deposit_token: None,
        })
    }

    fn adjust_tvl(env: &Env, token: &Address, delta: i128) -> Result<(), VaultError> {
        let key = DataKey::TotalValueLocked(token.clone());
        let tvl: i128 = env.storage().instance().get(&key).unwrap_or(0);
        let tvl = tvl.checked_add(delta).ok_or(VaultError::NumericOverflow)?;
        env.storage().instance().set(&key, &tvl);
        Ok(())
    }

    fn record_fee(env: &Env, token: &Address, fee: i128) -> Result<(), VaultError> {
        if fee == 0 {
            return Ok(());
        }
        let key = DataKey::FeesCollected(token.clone());
        let total: i128 = env.storage().instance().get(&key).unwrap_or(0);
        let total = total.checked_add(fee).ok_or(VaultError::NumericOverflow)?;
        env.storage().instance().set(&key, &total);
        Ok(())
    }
}
