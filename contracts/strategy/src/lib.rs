#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
    String, Vec,
};
use tiervault_shared::{validate_positive_amount, ErrorCategory};

pub mod allocation;

/// Upper bound on protocols a single user book is spread over.
pub const MAX_PROTOCOLS_PER_STRATEGY: u32 = 5;

/// Smallest weight (bps) a selected protocol may receive.
pub const MIN_ALLOCATION_PERCENTAGE: u32 = 500;

/// Weight drift (bps) below which a rebalance is skipped.
pub const REBALANCE_THRESHOLD: u32 = 1000;

pub const MAX_RISK_SCORE: u32 = 10;

/// 1000% APY in basis points
pub const MAX_APY: u32 = 100_000;

// Data Types
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolEntry {
    pub id: u32,
    pub address: Address,
    pub name: String,
    pub apy_bps: u32,
    pub risk_score: u32, // 1 (safest) to MAX_RISK_SCORE
    pub tvl: i128,
    pub is_active: bool,
    pub allocation: i128, // Amount placed here across all user books
    pub last_update: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Allocation {
    pub protocol_id: u32,
    pub weight_bps: u32,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserStrategy {
    pub token: Address,
    pub allocations: Vec<Allocation>,
    pub total_amount: i128,
    pub last_rebalance: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StrategyConfig {
    pub admin: Address,
    pub oracle: Address,
    pub vault: Option<Address>,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    Protocol(u32),
    ProtocolCount,
    UserStrategy(Address),
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum StrategyError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    VaultNotSet = 4,
    InvalidProtocolData = 5,
    ProtocolNotFound = 6,
    NoActiveProtocols = 7,
    StrategyNotFound = 8,
    InvalidAmount = 9,
    TokenMismatch = 10,
    InsufficientFunds = 11,
    NumericOverflow = 12,
}

impl StrategyError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StrategyError::Unauthorized => ErrorCategory::Authorization,
            StrategyError::NotInitialized
            | StrategyError::AlreadyInitialized
            | StrategyError::VaultNotSet
            | StrategyError::NumericOverflow => ErrorCategory::Environment,
            _ => ErrorCategory::Validation,
        }
    }
}

// Events
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolAddedEvent {
    pub id: u32,
    pub address: Address,
    pub name: String,
    pub apy_bps: u32,
    pub risk_score: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolUpdatedEvent {
    pub id: u32,
    pub apy_bps: u32,
    pub risk_score: u32,
    pub tvl: i128,
    pub timestamp: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StrategyExecutedEvent {
    pub user: Address,
    pub token: Address,
    pub amount: i128,
    pub total_amount: i128,
    pub protocols: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortfolioRebalancedEvent {
    pub user: Address,
    pub total_amount: i128,
    pub drift_bps: u32,
    pub timestamp: u64,
}

#[contract]
pub struct StrategyManager;

#[contractimpl]
impl StrategyManager {
    /// Initialize the strategy manager. The vault is wired later with `set_vault`.
    pub fn initialize(env: Env, admin: Address, oracle: Address) -> Result<(), StrategyError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(StrategyError::AlreadyInitialized);
        }

        admin.require_auth();

        let config = StrategyConfig {
            admin: admin.clone(),
            oracle,
            vault: None,
        };

        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::ProtocolCount, &0u32);

        log!(&env, "Strategy manager initialized by admin: {}", admin);

        Ok(())
    }

    pub fn set_vault(env: Env, admin: Address, vault: Address) -> Result<(), StrategyError> {
        let mut config = Self::require_admin(&env, &admin)?;

        config.vault = Some(vault.clone());
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Vault set to: {}", vault);

        Ok(())
    }

    pub fn set_oracle(env: Env, admin: Address, oracle: Address) -> Result<(), StrategyError> {
        let mut config = Self::require_admin(&env, &admin)?;

        config.oracle = oracle.clone();
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Oracle set to: {}", oracle);

        Ok(())
    }

    /// Register a yield protocol. Ids are sequential and never reused.
    pub fn add_protocol(
        env: Env,
        admin: Address,
        address: Address,
        name: String,
        apy_bps: u32,
        risk_score: u32,
    ) -> Result<u32, StrategyError> {
        Self::require_admin(&env, &admin)?;
        Self::validate_protocol_data(apy_bps, risk_score)?;

        if name.len() == 0 {
            return Err(StrategyError::InvalidProtocolData);
        }

        let id = Self::protocol_count(env.clone());
        let protocol = ProtocolEntry {
            id,
            address: address.clone(),
            name: name.clone(),
            apy_bps,
            risk_score,
            tvl: 0,
            is_active: true,
            allocation: 0,
            last_update: env.ledger().timestamp(),
        };

        env.storage().persistent().set(&DataKey::Protocol(id), &protocol);
        env.storage().instance().set(&DataKey::ProtocolCount, &(id + 1));

        let event = ProtocolAddedEvent {
            id,
            address,
            name,
            apy_bps,
            risk_score,
        };
        env.events().publish((symbol_short!("proto_add"),), event);

        log!(&env, "Protocol {} added with apy {} and risk {}", id, apy_bps, risk_score);

        Ok(id)
    }

    /// Oracle or admin refresh of a protocol's market data.
    pub fn update_protocol_data(
        env: Env,
        caller: Address,
        id: u32,
        apy_bps: u32,
        risk_score: u32,
        tvl: i128,
    ) -> Result<(), StrategyError> {
        caller.require_auth();

        let config = Self::get_config(env.clone())?;
        if caller != config.admin && caller != config.oracle {
            return Err(StrategyError::Unauthorized);
        }

        Self::validate_protocol_data(apy_bps, risk_score)?;
        if tvl < 0 {
            return Err(StrategyError::InvalidProtocolData);
        }

        let mut protocol = Self::load_protocol(&env, id)?;
        let now = env.ledger().timestamp();
        protocol.apy_bps = apy_bps;
        protocol.risk_score = risk_score;
        protocol.tvl = tvl;
        protocol.last_update = now;
        env.storage().persistent().set(&DataKey::Protocol(id), &protocol);

        let event = ProtocolUpdatedEvent {
            id,
            apy_bps,
            risk_score,
            tvl,
            timestamp: now,
        };
        env.events().publish((symbol_short!("proto_upd"),), event);

        Ok(())
    }

    /// Soft delete or restore a protocol. The entry and its id stay in place.
    pub fn set_protocol_active(
        env: Env,
        admin: Address,
        id: u32,
        active: bool,
    ) -> Result<(), StrategyError> {
        Self::require_admin(&env, &admin)?;

        let mut protocol = Self::load_protocol(&env, id)?;
        protocol.is_active = active;
        protocol.last_update = env.ledger().timestamp();
        env.storage().persistent().set(&DataKey::Protocol(id), &protocol);

        log!(&env, "Protocol {} active status set to: {}", id, active);

        Ok(())
    }

    /// Place `amount` (already transferred to this contract) into the
    /// user's book and re-split the whole book over the current targets.
    pub fn execute_strategy(
        env: Env,
        vault: Address,
        user: Address,
        token: Address,
        amount: i128,
    ) -> Result<(), StrategyError> {
        Self::require_vault(&env, &vault)?;

        if !validate_positive_amount(amount) {
            return Err(StrategyError::InvalidAmount);
        }

        let weights = allocation::target_weights(&env, &Self::get_protocols(env.clone()));
        if weights.is_empty() {
            return Err(StrategyError::NoActiveProtocols);
        }

        let now = env.ledger().timestamp();
        let existing = Self::get_user_strategy(env.clone(), user.clone());
        let (previous, held, last_rebalance) = match existing {
            Some(strategy) => {
                if strategy.token != token {
                    return Err(StrategyError::TokenMismatch);
                }
                (strategy.allocations, strategy.total_amount, strategy.last_rebalance)
            }
            None => (Vec::new(&env), 0, now),
        };

        let total_amount = held.checked_add(amount).ok_or(StrategyError::NumericOverflow)?;
        let allocations = allocation::split_amount(&env, &weights, total_amount)
            .ok_or(StrategyError::NumericOverflow)?;

        Self::move_allocations(&env, &previous, &allocations)?;

        let strategy = UserStrategy {
            token: token.clone(),
            allocations,
            total_amount,
            last_rebalance,
        };
        env.storage()
            .persistent()
            .set(&DataKey::UserStrategy(user.clone()), &strategy);

        let event = StrategyExecutedEvent {
            user: user.clone(),
            token,
            amount,
            total_amount,
            protocols: weights.len(),
        };
        env.events().publish((symbol_short!("strategy"),), event);

        log!(&env, "Strategy executed for {}: {} across {} protocols", user, amount, weights.len());

        Ok(())
    }

    /// Move the user's book to the current target weights when it has
    /// drifted by at least `REBALANCE_THRESHOLD`. Returns whether it moved.
    pub fn rebalance_portfolio(env: Env, vault: Address, user: Address) -> Result<bool, StrategyError> {
        Self::require_vault(&env, &vault)?;

        let mut strategy = Self::get_user_strategy(env.clone(), user.clone())
            .ok_or(StrategyError::StrategyNotFound)?;

        let weights = allocation::target_weights(&env, &Self::get_protocols(env.clone()));
        if weights.is_empty() {
            return Err(StrategyError::NoActiveProtocols);
        }

        let drift = allocation::max_weight_drift(&strategy.allocations, &weights);
        // Funds parked in a deactivated protocol always move, whatever the drift.
        let holds_inactive = strategy.allocations.iter().any(|held| {
            !Self::load_protocol(&env, held.protocol_id)
                .map(|protocol| protocol.is_active)
                .unwrap_or(false)
        });

        if drift < REBALANCE_THRESHOLD && !holds_inactive {
            log!(&env, "Rebalance skipped for {}: drift {} bps", user, drift);
            return Ok(false);
        }

        let allocations = allocation::split_amount(&env, &weights, strategy.total_amount)
            .ok_or(StrategyError::NumericOverflow)?;
        Self::move_allocations(&env, &strategy.allocations, &allocations)?;

        let now = env.ledger().timestamp();
        strategy.allocations = allocations;
        strategy.last_rebalance = now;
        env.storage()
            .persistent()
            .set(&DataKey::UserStrategy(user.clone()), &strategy);

        let event = PortfolioRebalancedEvent {
            user: user.clone(),
            total_amount: strategy.total_amount,
            drift_bps: drift,
            timestamp: now,
        };
        env.events().publish((symbol_short!("portrebal"),), event);

        log!(&env, "Portfolio rebalanced for {}: drift {} bps", user, drift);

        Ok(true)
    }

    /// Return `amount` of `token` to the vault and shrink the user's book by
    /// `principal_part`. Any surplus over the principal is yield and is paid
    /// from the manager's balance. `close` drains the book, including value
    /// lost to a markdown.
    pub fn withdraw_funds(
        env: Env,
        vault: Address,
        user: Address,
        token: Address,
        amount: i128,
        principal_part: i128,
        close: bool,
    ) -> Result<(), StrategyError> {
        Self::require_vault(&env, &vault)?;

        if amount < 0 || principal_part < 0 || (amount == 0 && !close) {
            return Err(StrategyError::InvalidAmount);
        }

        let strategy = Self::get_user_strategy(env.clone(), user.clone())
            .ok_or(StrategyError::StrategyNotFound)?;
        if strategy.token != token {
            return Err(StrategyError::TokenMismatch);
        }
        if !close && principal_part > strategy.total_amount {
            return Err(StrategyError::InvalidAmount);
        }

        let token_client = token::Client::new(&env, &token);
        if token_client.balance(&env.current_contract_address()) < amount {
            return Err(StrategyError::InsufficientFunds);
        }

        let remaining = if close {
            0
        } else {
            strategy.total_amount - principal_part
        };
        let key = DataKey::UserStrategy(user.clone());

        if remaining == 0 {
            Self::move_allocations(&env, &strategy.allocations, &Vec::new(&env))?;
            env.storage().persistent().remove(&key);
        } else {
            let allocations = allocation::split_amount(&env, &strategy.allocations, remaining)
                .ok_or(StrategyError::NumericOverflow)?;
            Self::move_allocations(&env, &strategy.allocations, &allocations)?;
            let updated = UserStrategy {
                allocations,
                total_amount: remaining,
                ..strategy
            };
            env.storage().persistent().set(&key, &updated);
        }

        if amount > 0 {
            token_client.transfer(&env.current_contract_address(), &vault, &amount);
        }

        log!(&env, "Returned {} to vault for {}, book now {}", amount, user, remaining);

        Ok(())
    }

    // Getters
    pub fn get_protocol(env: Env, id: u32) -> Option<ProtocolEntry> {
        env.storage().persistent().get(&DataKey::Protocol(id))
    }

    /// All registered protocols, active or not, in id order.
    pub fn get_protocols(env: Env) -> Vec<ProtocolEntry> {
        let mut protocols = Vec::new(&env);
        for id in 0..Self::protocol_count(env.clone()) {
            if let Some(protocol) = Self::get_protocol(env.clone(), id) {
                protocols.push_back(protocol);
            }
        }
        protocols
    }

    pub fn protocol_count(env: Env) -> u32 {
        env.storage().instance().get(&DataKey::ProtocolCount).unwrap_or(0)
    }

    pub fn get_user_strategy(env: Env, user: Address) -> Option<UserStrategy> {
        env.storage().persistent().get(&DataKey::UserStrategy(user))
    }

    pub fn calculate_score(env: Env, id: u32) -> Result<i128, StrategyError> {
        let protocol = Self::load_protocol(&env, id)?;
        Ok(allocation::risk_adjusted_score(protocol.apy_bps, protocol.risk_score))
    }

    /// Weights a new deposit would receive right now.
    pub fn preview_allocation(env: Env) -> Vec<Allocation> {
        allocation::target_weights(&env, &Self::get_protocols(env.clone()))
    }

    pub fn get_config(env: Env) -> Result<StrategyConfig, StrategyError> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(StrategyError::NotInitialized)
    }

    // Internal helper functions
    fn require_admin(env: &Env, admin: &Address) -> Result<StrategyConfig, StrategyError> {
        admin.require_auth();

        let config = Self::get_config(env.clone())?;
        if config.admin != *admin {
            return Err(StrategyError::Unauthorized);
        }
        Ok(config)
    }

    fn require_vault(env: &Env, vault: &Address) -> Result<(), StrategyError> {
        vault.require_auth();

        let config = Self::get_config(env.clone())?;
        match config.vault {
            None => Err(StrategyError::VaultNotSet),
            Some(stored) if stored == *vault => Ok(()),
            Some(_) => Err(StrategyError::Unauthorized),
        }
    }

    fn validate_protocol_data(apy_bps: u32, risk_score: u32) -> Result<(), StrategyError> {
        if risk_score == 0 || risk_score > MAX_RISK_SCORE || apy_bps > MAX_APY {
            return Err(StrategyError::InvalidProtocolData);
        }
        Ok(())
    }

    fn load_protocol(env: &Env, id: u32) -> Result<ProtocolEntry, StrategyError> {
        Self::get_protocol(env.clone(), id).ok_or(StrategyError::ProtocolNotFound)
    }

    /// Keep each protocol's aggregate `allocation` in step with a user book change.
    fn move_allocations(
        env: &Env,
        previous: &Vec<Allocation>,
        next: &Vec<Allocation>,
    ) -> Result<(), StrategyError> {
        for held in previous.iter() {
            Self::adjust_protocol_allocation(env, held.protocol_id, -held.amount)?;
        }
        for placed in next.iter() {
            Self::adjust_protocol_allocation(env, placed.protocol_id, placed.amount)?;
        }
        Ok(())
    }

    fn adjust_protocol_allocation(env: &Env, id: u32, delta: i128) -> Result<(), StrategyError> {
        let mut protocol = Self::load_protocol(env, id)?;
        protocol.allocation = protocol
            .allocation
            .checked_add(delta)
            .ok_or(StrategyError::NumericOverflow)?
            .max(0);
        env.storage().persistent().set(&DataKey::Protocol(id), &protocol);
        Ok(())
    }
}

mod test;
