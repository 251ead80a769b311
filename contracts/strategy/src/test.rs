#![cfg(test)]
use super::*;
use soroban_sdk::{
    symbol_short,
    testutils::{Address as _, Events},
    token::{StellarAssetClient, TokenClient},
    Env, Symbol, TryFromVal,
};
use tiervault_shared::PRECISION_FACTOR;

struct Setup {
    env: Env,
    contract_id: Address,
    admin: Address,
    oracle: Address,
    vault: Address,
    user: Address,
    token: Address,
    client: StrategyManagerClient<'static>,
}

fn create_test_contract() -> (Env, Address, StrategyManagerClient<'static>) {
    let env = Env::default();
    let contract_id = env.register_contract(None, StrategyManager);
    let client = StrategyManagerClient::new(&env, &contract_id);
    (env, contract_id, client)
}

fn setup() -> Setup {
    let (env, contract_id, client) = create_test_contract();
    env.mock_all_auths();

    let admin = Address::generate(&env);
    let oracle = Address::generate(&env);
    let vault = Address::generate(&env);
    let user = Address::generate(&env);
    let token = env.register_stellar_asset_contract_v2(admin.clone()).address();

    client.initialize(&admin, &oracle);
    client.set_vault(&admin, &vault);

    Setup {
        env,
        contract_id,
        admin,
        oracle,
        vault,
        user,
        token,
        client,
    }
}

/// Three protocols scoring 40_000 / 60_000 / 40_000.
fn add_default_protocols(s: &Setup) {
    add_protocol(s, "Aave", 800, 4);
    add_protocol(s, "Compound", 600, 1);
    add_protocol(s, "Curve", 1200, 9);
}

fn add_protocol(s: &Setup, name: &str, apy_bps: u32, risk_score: u32) -> u32 {
    let address = Address::generate(&s.env);
    s.client.add_protocol(
        &s.admin,
        &address,
        &String::from_str(&s.env, name),
        &apy_bps,
        &risk_score,
    )
}

/// Simulate the vault handing funds over, then record them.
fn deposit(s: &Setup, amount: i128) {
    StellarAssetClient::new(&s.env, &s.token).mint(&s.contract_id, &amount);
    s.client.execute_strategy(&s.vault, &s.user, &s.token, &amount);
}

fn emitted(env: &Env, contract: &Address, topic: Symbol) -> bool {
    env.events().all().iter().any(|(source, topics, _)| {
        source == *contract
            && topics
                .get(0)
                .and_then(|value| Symbol::try_from_val(env, &value).ok())
                .map(|symbol| symbol == topic)
                .unwrap_or(false)
    })
}

#[test]
fn test_initialize_twice_fails() {
    let s = setup();

    let result = s.client.try_initialize(&s.admin, &s.oracle);
    assert_eq!(result, Err(Ok(StrategyError::AlreadyInitialized)));

    let config = s.client.get_config();
    assert_eq!(config.vault, Some(s.vault.clone()));
    assert_eq!(config.oracle, s.oracle);
}

#[test]
fn test_add_protocol_assigns_sequential_ids() {
    let s = setup();

    assert_eq!(add_protocol(&s, "Aave", 800, 4), 0);
    assert!(emitted(&s.env, &s.contract_id, symbol_short!("proto_add")));
    assert_eq!(add_protocol(&s, "Compound", 600, 1), 1);
    assert_eq!(s.client.protocol_count(), 2);

    let protocol = s.client.get_protocol(&1).unwrap();
    assert_eq!(protocol.name, String::from_str(&s.env, "Compound"));
    assert_eq!(protocol.apy_bps, 600);
    assert_eq!(protocol.is_active, true);
    assert_eq!(protocol.allocation, 0);
}

#[test]
fn test_add_protocol_validates_risk_score() {
    let s = setup();
    let address = Address::generate(&s.env);
    let name = String::from_str(&s.env, "Risky");

    let result = s.client.try_add_protocol(&s.admin, &address, &name, &500, &0);
    assert_eq!(result, Err(Ok(StrategyError::InvalidProtocolData)));

    let result = s.client.try_add_protocol(&s.admin, &address, &name, &500, &(MAX_RISK_SCORE + 1));
    assert_eq!(result, Err(Ok(StrategyError::InvalidProtocolData)));

    let result = s.client.try_add_protocol(&s.admin, &address, &String::from_str(&s.env, ""), &500, &1);
    assert_eq!(result, Err(Ok(StrategyError::InvalidProtocolData)));
}

#[test]
fn test_only_admin_adds_protocols() {
    let s = setup();
    let stranger = Address::generate(&s.env);

    let result = s.client.try_add_protocol(
        &stranger,
        &Address::generate(&s.env),
        &String::from_str(&s.env, "Aave"),
        &800,
        &4,
    );
    assert_eq!(result, Err(Ok(StrategyError::Unauthorized)));
}

#[test]
fn test_update_protocol_data_by_oracle() {
    let s = setup();
    add_default_protocols(&s);

    s.client.update_protocol_data(&s.oracle, &0, &900, &4, &(5_000 * PRECISION_FACTOR));
    let protocol = s.client.get_protocol(&0).unwrap();
    assert_eq!(protocol.apy_bps, 900);
    assert_eq!(protocol.tvl, 5_000 * PRECISION_FACTOR);

    let stranger = Address::generate(&s.env);
    let result = s.client.try_update_protocol_data(&stranger, &0, &900, &4, &0);
    assert_eq!(result, Err(Ok(StrategyError::Unauthorized)));

    let result = s.client.try_update_protocol_data(&s.oracle, &9, &900, &4, &0);
    assert_eq!(result, Err(Ok(StrategyError::ProtocolNotFound)));
}

#[test]
fn test_calculate_score() {
    let s = setup();
    add_default_protocols(&s);

    assert_eq!(s.client.calculate_score(&0), 40_000);
    assert_eq!(s.client.calculate_score(&1), 60_000);
    assert_eq!(s.client.calculate_score(&2), 40_000);
}

#[test]
fn test_soft_delete_keeps_index() {
    let s = setup();
    add_default_protocols(&s);

    s.client.set_protocol_active(&s.admin, &1, &false);

    assert_eq!(s.client.protocol_count(), 3);
    let protocol = s.client.get_protocol(&1).unwrap();
    assert_eq!(protocol.is_active, false);
    assert_eq!(protocol.id, 1);

    let preview = s.client.preview_allocation();
    assert_eq!(preview.len(), 2);
    assert!(preview.iter().all(|weight| weight.protocol_id != 1));
}

#[test]
fn test_execute_strategy_splits_by_score() {
    let s = setup();
    add_default_protocols(&s);

    let amount = 1_000 * PRECISION_FACTOR;
    deposit(&s, amount);
    assert!(emitted(&s.env, &s.contract_id, symbol_short!("strategy")));

    let strategy = s.client.get_user_strategy(&s.user).unwrap();
    assert_eq!(strategy.total_amount, amount);
    assert_eq!(strategy.allocations.len(), 3);

    let top = strategy.allocations.get(0).unwrap();
    assert_eq!(top.protocol_id, 1);
    assert_eq!(top.weight_bps, 4286);
    assert_eq!(top.amount, 428_6000000);

    let placed: i128 = strategy.allocations.iter().map(|a| a.amount).sum();
    assert_eq!(placed, amount);

    // Aggregate allocation tracks the user book
    assert_eq!(s.client.get_protocol(&1).unwrap().allocation, 428_6000000);
    assert_eq!(s.client.get_protocol(&0).unwrap().allocation, 285_7000000);
    assert_eq!(s.client.get_protocol(&2).unwrap().allocation, 285_7000000);
}

#[test]
fn test_execute_strategy_accumulates_deposits() {
    let s = setup();
    add_default_protocols(&s);

    deposit(&s, 1_000 * PRECISION_FACTOR);
    deposit(&s, 500 * PRECISION_FACTOR);

    let strategy = s.client.get_user_strategy(&s.user).unwrap();
    assert_eq!(strategy.total_amount, 1_500 * PRECISION_FACTOR);

    let aggregate: i128 = s.client.get_protocols().iter().map(|p| p.allocation).sum();
    assert_eq!(aggregate, 1_500 * PRECISION_FACTOR);
}

#[test]
fn test_execute_strategy_only_vault() {
    let s = setup();
    add_default_protocols(&s);
    let stranger = Address::generate(&s.env);

    let result = s
        .client
        .try_execute_strategy(&stranger, &s.user, &s.token, &(10 * PRECISION_FACTOR));
    assert_eq!(result, Err(Ok(StrategyError::Unauthorized)));

    let result = s.client.try_rebalance_portfolio(&stranger, &s.user);
    assert_eq!(result, Err(Ok(StrategyError::Unauthorized)));

    let result = s.client.try_withdraw_funds(
        &stranger,
        &s.user,
        &s.token,
        &(10 * PRECISION_FACTOR),
        &(10 * PRECISION_FACTOR),
        &false,
    );
    assert_eq!(result, Err(Ok(StrategyError::Unauthorized)));
}

#[test]
fn test_execute_strategy_without_vault_configured() {
    let (env, _contract_id, client) = create_test_contract();
    env.mock_all_auths();
    let admin = Address::generate(&env);
    let caller = Address::generate(&env);

    client.initialize(&admin, &admin);

    let result = client.try_execute_strategy(&caller, &caller, &caller, &PRECISION_FACTOR);
    assert_eq!(result, Err(Ok(StrategyError::VaultNotSet)));
}

#[test]
fn test_execute_strategy_needs_active_protocol() {
    let s = setup();
    add_protocol(&s, "Aave", 800, 4);
    s.client.set_protocol_active(&s.admin, &0, &false);

    let result = s
        .client
        .try_execute_strategy(&s.vault, &s.user, &s.token, &(10 * PRECISION_FACTOR));
    assert_eq!(result, Err(Ok(StrategyError::NoActiveProtocols)));
}

#[test]
fn test_small_score_change_does_not_rebalance() {
    let s = setup();
    add_default_protocols(&s);
    deposit(&s, 1_000 * PRECISION_FACTOR);

    s.client.update_protocol_data(&s.oracle, &0, &820, &4, &0);

    let moved = s.client.rebalance_portfolio(&s.vault, &s.user);
    assert_eq!(moved, false);

    let strategy = s.client.get_user_strategy(&s.user).unwrap();
    assert_eq!(strategy.allocations.get(0).unwrap().weight_bps, 4286);
}

#[test]
fn test_large_score_change_rebalances() {
    let s = setup();
    add_default_protocols(&s);
    deposit(&s, 1_000 * PRECISION_FACTOR);

    // Curve jumps to a 200_000 score
    s.client.update_protocol_data(&s.oracle, &2, &6000, &9, &0);

    let moved = s.client.rebalance_portfolio(&s.vault, &s.user);
    assert_eq!(moved, true);
    assert!(emitted(&s.env, &s.contract_id, symbol_short!("portrebal")));

    let strategy = s.client.get_user_strategy(&s.user).unwrap();
    let top = strategy.allocations.get(0).unwrap();
    assert_eq!(top.protocol_id, 2);
    assert_eq!(top.weight_bps, 6667);
    assert_eq!(top.amount, 666_7000000);
    assert_eq!(s.client.get_protocol(&2).unwrap().allocation, 666_7000000);
    assert_eq!(s.client.get_protocol(&1).unwrap().allocation, 200_0000000);
}

#[test]
fn test_deactivated_protocol_forces_rebalance() {
    let s = setup();
    add_protocol(&s, "Aave", 1000, 1);
    add_protocol(&s, "Dust", 60, 1);
    deposit(&s, 1_000 * PRECISION_FACTOR);

    // Dust holds a 566 bps slice, under the drift threshold
    let before = s.client.get_user_strategy(&s.user).unwrap();
    assert_eq!(before.allocations.len(), 2);

    s.client.set_protocol_active(&s.admin, &1, &false);
    assert_eq!(s.client.rebalance_portfolio(&s.vault, &s.user), true);

    let after = s.client.get_user_strategy(&s.user).unwrap();
    assert_eq!(after.allocations.len(), 1);
    assert_eq!(s.client.get_protocol(&1).unwrap().allocation, 0);
}

#[test]
fn test_rebalance_without_strategy_fails() {
    let s = setup();
    add_default_protocols(&s);

    let result = s.client.try_rebalance_portfolio(&s.vault, &s.user);
    assert_eq!(result, Err(Ok(StrategyError::StrategyNotFound)));
}

#[test]
fn test_withdraw_funds_returns_tokens_to_vault() {
    let s = setup();
    add_default_protocols(&s);
    deposit(&s, 1_000 * PRECISION_FACTOR);
    let token = TokenClient::new(&s.env, &s.token);

    s.client.withdraw_funds(
        &s.vault,
        &s.user,
        &s.token,
        &(400 * PRECISION_FACTOR),
        &(400 * PRECISION_FACTOR),
        &false,
    );
    assert_eq!(token.balance(&s.vault), 400 * PRECISION_FACTOR);

    let strategy = s.client.get_user_strategy(&s.user).unwrap();
    assert_eq!(strategy.total_amount, 600 * PRECISION_FACTOR);
    let placed: i128 = strategy.allocations.iter().map(|a| a.amount).sum();
    assert_eq!(placed, 600 * PRECISION_FACTOR);

    s.client.withdraw_funds(
        &s.vault,
        &s.user,
        &s.token,
        &(600 * PRECISION_FACTOR),
        &(600 * PRECISION_FACTOR),
        &false,
    );
    assert!(s.client.get_user_strategy(&s.user).is_none());
    let aggregate: i128 = s.client.get_protocols().iter().map(|p| p.allocation).sum();
    assert_eq!(aggregate, 0);
}

#[test]
fn test_withdraw_funds_pays_yield_from_balance() {
    let s = setup();
    add_default_protocols(&s);
    deposit(&s, 1_000 * PRECISION_FACTOR);

    // Not enough tokens on hand for the accrued value yet
    let result = s.client.try_withdraw_funds(
        &s.vault,
        &s.user,
        &s.token,
        &(1_100 * PRECISION_FACTOR),
        &(1_000 * PRECISION_FACTOR),
        &true,
    );
    assert_eq!(result, Err(Ok(StrategyError::InsufficientFunds)));

    // Yield lands in the manager's balance
    StellarAssetClient::new(&s.env, &s.token).mint(&s.contract_id, &(200 * PRECISION_FACTOR));

    // 600 out of an 1200 value: half the principal leaves the book
    s.client.withdraw_funds(
        &s.vault,
        &s.user,
        &s.token,
        &(600 * PRECISION_FACTOR),
        &(500 * PRECISION_FACTOR),
        &false,
    );
    let strategy = s.client.get_user_strategy(&s.user).unwrap();
    assert_eq!(strategy.total_amount, 500 * PRECISION_FACTOR);

    s.client.withdraw_funds(
        &s.vault,
        &s.user,
        &s.token,
        &(600 * PRECISION_FACTOR),
        &(500 * PRECISION_FACTOR),
        &true,
    );
    assert_eq!(TokenClient::new(&s.env, &s.token).balance(&s.vault), 1_200 * PRECISION_FACTOR);
    assert!(s.client.get_user_strategy(&s.user).is_none());
}

#[test]
fn test_closing_drains_book_after_loss() {
    let s = setup();
    add_default_protocols(&s);
    deposit(&s, 1_000 * PRECISION_FACTOR);

    s.client.withdraw_funds(
        &s.vault,
        &s.user,
        &s.token,
        &(900 * PRECISION_FACTOR),
        &(1_000 * PRECISION_FACTOR),
        &true,
    );
    assert!(s.client.get_user_strategy(&s.user).is_none());
    let aggregate: i128 = s.client.get_protocols().iter().map(|p| p.allocation).sum();
    assert_eq!(aggregate, 0);

    // A worthless position closes with nothing paid out
    deposit(&s, 100 * PRECISION_FACTOR);
    s.client.withdraw_funds(&s.vault, &s.user, &s.token, &0, &(100 * PRECISION_FACTOR), &true);
    assert!(s.client.get_user_strategy(&s.user).is_none());
}

#[test]
fn test_withdraw_funds_validates_amounts() {
    let s = setup();
    add_default_protocols(&s);
    deposit(&s, 100 * PRECISION_FACTOR);

    let result = s.client.try_withdraw_funds(&s.vault, &s.user, &s.token, &0, &0, &false);
    assert_eq!(result, Err(Ok(StrategyError::InvalidAmount)));

    let result = s.client.try_withdraw_funds(
        &s.vault,
        &s.user,
        &s.token,
        &(10 * PRECISION_FACTOR),
        &(101 * PRECISION_FACTOR),
        &false,
    );
    assert_eq!(result, Err(Ok(StrategyError::InvalidAmount)));
}

#[test]
fn test_withdraw_funds_wrong_token() {
    let s = setup();
    add_default_protocols(&s);
    deposit(&s, 100 * PRECISION_FACTOR);
    let other_token = s.env.register_stellar_asset_contract_v2(s.admin.clone()).address();

    let result = s.client.try_withdraw_funds(
        &s.vault,
        &s.user,
        &other_token,
        &(10 * PRECISION_FACTOR),
        &(10 * PRECISION_FACTOR),
        &false,
    );
    assert_eq!(result, Err(Ok(StrategyError::TokenMismatch)));
}

#[test]
fn test_error_categories() {
    assert_eq!(StrategyError::Unauthorized.category(), ErrorCategory::Authorization);
    assert_eq!(StrategyError::NoActiveProtocols.category(), ErrorCategory::Validation);
    assert_eq!(StrategyError::VaultNotSet.category(), ErrorCategory::Environment);
}
