mod common;

use alloy::primitives::U256;
use std::sync::Arc;

use common::*;
use defi_lending_aggregator::adapters::LendingAdapter;
use defi_lending_aggregator::models::{
    ActionErrorCode, ActionKind, ActionParams, ActionWarningCode, LendingMarket, Protocol, SimulatedAction,
};
use defi_lending_aggregator::services::LendingService;
use defi_lending_aggregator::utils::math::from_units;

struct Book {
    usdc: LendingMarket,
    weth: LendingMarket,
}

/// $10,000 USDC supplied (LT 0.825) against $6,000 of WETH debt
fn leveraged_account() -> (Book, FakeAdapter) {
    let usdc = market(Protocol::AaveV3, "USDC", token(0xa1), 4.0, 5.0);
    let mut weth = market(Protocol::AaveV3, "WETH", token(0xa2), 2.0, 3.0);
    weth.price_usd = 2_000.0;
    weth.asset_decimals = 18;

    let mut debt = position(&weth, 0.0, 3.0);
    debt.borrow_balance_usd = 6_000.0;
    let adapter = FakeAdapter::new(Protocol::AaveV3, vec![usdc.clone(), weth.clone()])
        .with_positions(vec![position(&usdc, 10_000.0, 0.0), debt]);
    (Book { usdc, weth }, adapter)
}

/// $10,000 USDC supplied (LT 0.825) against $7,500 of WETH debt: HF 1.1
fn stretched_account() -> (Book, FakeAdapter) {
    let (book, adapter) = leveraged_account();
    let mut debt = position(&book.weth, 0.0, 3.75);
    debt.borrow_balance_usd = 7_500.0;
    let adapter = adapter.with_positions(vec![position(&book.usdc, 10_000.0, 0.0), debt]);
    (book, adapter)
}

fn params(market: &LendingMarket, amount: f64) -> ActionParams {
    ActionParams {
        market_id: market.id.clone(),
        account: account(),
        amount: from_units(amount, market.asset_decimals),
    }
}

#[tokio::test]
async fn test_withdraw_below_liquidation_is_rejected() {
    let (book, adapter) = leveraged_account();

    // (10_000 - 3_000) * 0.825 / 6_000
    let result = adapter.validate_withdraw(&params(&book.usdc, 3_000.0)).await;

    assert!(!result.valid);
    assert!(result.would_cause_liquidation);
    assert!(result.has_error(ActionErrorCode::WouldCauseLiquidation));
    let projected = result.projected_health_factor.unwrap();
    assert!((projected - 0.9625).abs() < 1e-9);
    let error = result
        .errors
        .iter()
        .find(|e| e.code == ActionErrorCode::WouldCauseLiquidation)
        .unwrap();
    assert_eq!(error.suggestion.as_deref(), Some("repay debt first"));
}

#[tokio::test]
async fn test_small_withdraw_passes_with_warning() {
    let (book, adapter) = leveraged_account();

    // (10_000 - 1_000) * 0.825 / 6_000 = 1.2375
    let result = adapter.validate_withdraw(&params(&book.usdc, 1_000.0)).await;

    assert!(result.valid);
    assert!(result.errors.is_empty());
    assert!(result.has_warning(ActionWarningCode::ModerateHealthFactor));
}

#[tokio::test]
async fn test_borrow_below_one_is_rejected_despite_liquidity() {
    let (book, adapter) = leveraged_account();

    // 1 WETH more: 8_250 / 8_000 is fine, 2 WETH more: 8_250 / 10_000 is not
    let ok = adapter.validate_borrow(&params(&book.weth, 1.0)).await;
    assert!(!ok.has_error(ActionErrorCode::WouldCauseLiquidation));

    let result = adapter.validate_borrow(&params(&book.weth, 2.0)).await;
    assert!(!result.valid);
    assert!(!result.insufficient_liquidity);
    assert!(!result.exceeds_cap);
    assert!(result.has_error(ActionErrorCode::WouldCauseLiquidation));
    assert!((result.projected_health_factor.unwrap() - 0.825).abs() < 1e-9);
}

#[tokio::test]
async fn test_repay_never_lowers_health_factor() {
    let (book, adapter) = leveraged_account();
    let current = adapter.calculate_health_factor(account()).await.unwrap();

    for amount in [0.0001, 0.5, 1.0, 2.9, 3.0, 10.0] {
        let action = SimulatedAction {
            kind: ActionKind::Repay,
            market_id: book.weth.id.clone(),
            amount: from_units(amount, book.weth.asset_decimals),
        };
        let projected = adapter.simulate_health_factor(account(), &action).await.unwrap();
        assert!(projected >= current, "repay of {} lowered HF to {}", amount, projected);
    }

    let result = adapter.validate_repay(&params(&book.weth, 10.0)).await;
    assert!(result.valid);
    assert!(result.has_warning(ActionWarningCode::Overpay));
}

#[tokio::test]
async fn test_every_check_runs_and_reports_in_order() {
    let mut usdc = market(Protocol::AaveV3, "USDC", token(0xa1), 4.0, 5.0);
    usdc.status.is_frozen = true;
    usdc.supply_cap = Some(1_000_500.0);
    let adapter = FakeAdapter::new(Protocol::AaveV3, vec![usdc.clone()]).with_wallet(U256::ZERO);

    let result = adapter.validate_supply(&params(&usdc, 1_000.0)).await;

    let codes: Vec<ActionErrorCode> = result.errors.iter().map(|e| e.code).collect();
    assert_eq!(
        codes,
        vec![
            ActionErrorCode::InsufficientBalance,
            ActionErrorCode::MarketFrozen,
            ActionErrorCode::ExceedsSupplyCap,
        ]
    );
    assert!(result.insufficient_balance);
    assert!(result.exceeds_cap);
    assert!(!result.valid);
}

#[tokio::test]
async fn test_service_validation_dispatches_and_rejects_unknown_protocol() {
    let (book, adapter) = leveraged_account();
    let service = LendingService::with_adapters(
        CHAIN_ID,
        Arc::new(NullTransport),
        vec![Arc::new(adapter) as Arc<dyn LendingAdapter>],
    );

    let result = service.validate_withdraw(&params(&book.usdc, 3_000.0)).await;
    assert!(result.has_error(ActionErrorCode::WouldCauseLiquidation));

    let unknown = ActionParams {
        market_id: "spark:8453:0x01".to_string(),
        ..params(&book.usdc, 1.0)
    };
    let result = service.validate_borrow(&unknown).await;
    assert!(!result.valid);
    assert!(result.has_error(ActionErrorCode::ProtocolNotSupported));

    let missing = ActionParams {
        market_id: "aave_v3:8453:0x01".to_string(),
        ..params(&book.usdc, 1.0)
    };
    let result = service.validate_supply(&missing).await;
    assert!(result.has_error(ActionErrorCode::MarketNotFound));
}

#[tokio::test]
async fn test_borrow_rejected_on_approximate_projection_when_oracle_fails() {
    let (book, adapter) = stretched_account();
    let adapter = adapter.without_simulation();

    // 1.1 * 0.85
    let result = adapter.validate_borrow(&params(&book.weth, 0.1)).await;

    assert!(!result.valid);
    assert!(result.would_cause_liquidation);
    assert!(result.has_error(ActionErrorCode::WouldCauseLiquidation));
    assert!(!result.has_warning(ActionWarningCode::SimulationUnavailable));
    assert!((result.projected_health_factor.unwrap() - 0.935).abs() < 1e-9);

    // 1.1 * 0.90
    let result = adapter.validate_withdraw(&params(&book.usdc, 100.0)).await;
    assert!(result.has_error(ActionErrorCode::WouldCauseLiquidation));
    assert!((result.projected_health_factor.unwrap() - 0.99).abs() < 1e-9);
}

#[tokio::test]
async fn test_simulation_unavailable_only_when_every_health_read_fails() {
    let (book, adapter) = stretched_account();
    let adapter = adapter.without_simulation().without_health_reads();

    let result = adapter.validate_borrow(&params(&book.weth, 0.1)).await;

    assert!(result.has_warning(ActionWarningCode::SimulationUnavailable));
    assert!(result.projected_health_factor.is_none());
    assert!(!result.has_error(ActionErrorCode::WouldCauseLiquidation));
}

#[tokio::test]
async fn test_service_simulation_falls_back_to_approximation() {
    let (book, adapter) = stretched_account();
    let service = LendingService::with_adapters(
        CHAIN_ID,
        Arc::new(NullTransport),
        vec![Arc::new(adapter.without_simulation()) as Arc<dyn LendingAdapter>],
    );
    let action = SimulatedAction {
        kind: ActionKind::Repay,
        market_id: book.weth.id.clone(),
        amount: from_units(1.0, book.weth.asset_decimals),
    };

    let projected = service.simulate_health_factor(account(), &action).await.unwrap();
    assert!((projected - 1.265).abs() < 1e-9);

    let missing = SimulatedAction {
        market_id: "aave_v3:8453:0x01".to_string(),
        ..action
    };
    assert!(service.simulate_health_factor(account(), &missing).await.is_err());
}
