// Protocol-agnostic helpers and pre-flight validation shared by every adapter
use alloy::primitives::{Address, U256};
use std::collections::HashMap;

use crate::adapters::contracts::IERC20;
use crate::adapters::traits::{AdapterError, LendingAdapter};
use crate::blockchain::{read_contract, ChainTransport};
use crate::models::{
    ActionErrorCode, ActionKind, ActionParams, ActionWarningCode, LendingMarket, LendingPosition, MarketKind,
    Protocol, Severity, SimulatedAction, TransactionCall, ValidationResult,
};
use crate::risk::{self, HealthBand, HealthFactorMode, LOW_HEALTH_FACTOR, MODERATE_HEALTH_FACTOR};
use crate::utils::math::{to_units, SECONDS_PER_YEAR};

/// Share of borrowing power above which a borrow is flagged
pub const HIGH_LTV_UTILIZATION: f64 = 0.8;

const REDUCE_AMOUNT: &str = "reduce amount";
const ADD_COLLATERAL: &str = "add collateral first";
const REPAY_DEBT: &str = "repay debt first";

/// Per-second rate (as a fraction) to a compounded APY in percent
pub fn rate_to_apy(rate_per_second: f64) -> f64 {
    if !rate_per_second.is_finite() || rate_per_second <= 0.0 {
        return 0.0;
    }
    ((1.0 + rate_per_second).powf(SECONDS_PER_YEAR) - 1.0) * 100.0
}

/// Yearly rate (as a fraction) compounded per second, in percent
pub fn apr_to_apy(apr: f64) -> f64 {
    rate_to_apy(apr / SECONDS_PER_YEAR)
}

/// Coarse asset classes used for reward estimates and price fallbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetCategory {
    Stablecoin,
    Eth,
    Btc,
    Other,
}

impl AssetCategory {
    pub fn of(symbol: &str) -> Self {
        let symbol = symbol.to_ascii_uppercase();
        match symbol.as_str() {
            "USDC" | "USDC.E" | "USDBC" | "USDT" | "USDT0" | "DAI" | "GHO" | "LUSD" | "FRAX" | "USDE" | "SUSDE"
            | "CRVUSD" | "PYUSD" | "USDS" | "EURC" => AssetCategory::Stablecoin,
            "ETH" | "WETH" | "WSTETH" | "CBETH" | "RETH" | "WEETH" | "EZETH" | "WRSETH" => AssetCategory::Eth,
            "WBTC" | "CBBTC" | "TBTC" | "LBTC" => AssetCategory::Btc,
            _ => AssetCategory::Other,
        }
    }
}

pub async fn erc20_balance(
    transport: &dyn ChainTransport,
    token: Address,
    account: Address,
) -> Result<U256, AdapterError> {
    let balance = read_contract(transport, token, IERC20::balanceOfCall { account }).await?;
    Ok(balance._0)
}

/// ERC-20 metadata (symbol, decimals) read from the token itself
pub async fn erc20_metadata(transport: &dyn ChainTransport, token: Address) -> Result<(String, u8), AdapterError> {
    let (symbol, decimals) = tokio::join!(
        read_contract(transport, token, IERC20::symbolCall {}),
        read_contract(transport, token, IERC20::decimalsCall {}),
    );
    Ok((symbol?._0, decimals?._0))
}

/// Unlimited approval for `spender`, only when the live allowance does not cover `amount`
pub async fn approval_if_needed(
    transport: &dyn ChainTransport,
    token: Address,
    owner: Address,
    spender: Address,
    amount: U256,
    symbol: &str,
) -> Result<Option<TransactionCall>, AdapterError> {
    let allowance = read_contract(transport, token, IERC20::allowanceCall { owner, spender }).await?._0;
    if allowance >= amount {
        return Ok(None);
    }

    let call = IERC20::approveCall {
        spender,
        amount: U256::MAX,
    };
    Ok(Some(TransactionCall::new(token, &call, format!("Approve {}", symbol))))
}

/// Split a composite market id, checking the protocol prefix and chain
pub fn market_id_parts<'a>(
    market_id: &'a str,
    protocol: Protocol,
    chain_id: u64,
) -> Result<Vec<&'a str>, AdapterError> {
    let parts: Vec<&str> = market_id.split(':').collect();
    if parts.len() < 3 || parts[0] != protocol.as_str() {
        return Err(AdapterError::MarketNotFound(market_id.to_string()));
    }
    if parts[1].parse::<u64>().ok() != Some(chain_id) {
        return Err(AdapterError::UnsupportedChain(parts[1].parse().unwrap_or_default()));
    }
    Ok(parts)
}

pub fn parse_address(value: &str) -> Result<Address, AdapterError> {
    value
        .parse()
        .map_err(|_| AdapterError::InvalidData(format!("Invalid address: {}", value)))
}

pub async fn validate_supply<A: LendingAdapter + ?Sized>(adapter: &A, params: &ActionParams) -> ValidationResult {
    let mut result = ValidationResult::new();
    let Some(market) = load_market(adapter, &params.market_id, &mut result).await else {
        return result;
    };
    let positions = load_positions(adapter, params.account).await;
    let amount = to_units(params.amount, market.asset_decimals);

    check_amount(params.amount, &mut result);
    match adapter.wallet_balance(market.asset, params.account).await {
        Ok(balance) if balance < params.amount => result.error(
            ActionErrorCode::InsufficientBalance,
            format!(
                "Wallet holds {:.4} {}, {:.4} requested",
                to_units(balance, market.asset_decimals),
                market.asset_symbol,
                amount
            ),
            Some(REDUCE_AMOUNT),
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!(market_id = %market.id, error = %e, "Wallet balance read failed"),
    }

    check_market_state(&market, ActionKind::Supply, &mut result);
    if let Some(headroom) = market.supply_headroom() {
        if amount > headroom {
            result.error(
                ActionErrorCode::ExceedsSupplyCap,
                format!("Supply cap leaves room for {:.4} {}", headroom, market.asset_symbol),
                Some(REDUCE_AMOUNT),
            );
        }
    }

    if has_debt(&positions) {
        check_risk(adapter, params, ActionKind::Supply, &mut result).await;
    }
    result
}

pub async fn validate_withdraw<A: LendingAdapter + ?Sized>(adapter: &A, params: &ActionParams) -> ValidationResult {
    let mut result = ValidationResult::new();
    let Some(market) = load_market(adapter, &params.market_id, &mut result).await else {
        return result;
    };
    let positions = load_positions(adapter, params.account).await;
    let position = find_position(&positions, &market.id, &mut result);
    let amount = to_units(params.amount, market.asset_decimals);

    check_amount(params.amount, &mut result);
    if let Some(position) = position {
        let withdrawable = position.supply_balance + position.collateral_balance;
        if params.amount > withdrawable {
            result.error(
                ActionErrorCode::InsufficientSupplyPosition,
                format!(
                    "Position holds {:.4} {}, {:.4} requested",
                    to_units(withdrawable, market.asset_decimals),
                    market.asset_symbol,
                    amount
                ),
                Some(REDUCE_AMOUNT),
            );
        }
    }

    check_market_state(&market, ActionKind::Withdraw, &mut result);
    if market.kind == MarketKind::Lending {
        check_liquidity(&market, amount, &mut result);
    }

    if has_debt(&positions) {
        check_risk(adapter, params, ActionKind::Withdraw, &mut result).await;
    }
    result
}

pub async fn validate_borrow<A: LendingAdapter + ?Sized>(adapter: &A, params: &ActionParams) -> ValidationResult {
    let mut result = ValidationResult::new();
    let Some(market) = load_market(adapter, &params.market_id, &mut result).await else {
        return result;
    };
    let positions = load_positions(adapter, params.account).await;
    let amount = to_units(params.amount, market.asset_decimals);

    check_amount(params.amount, &mut result);

    check_market_state(&market, ActionKind::Borrow, &mut result);
    if let Some(headroom) = market.borrow_headroom() {
        if amount > headroom {
            result.error(
                ActionErrorCode::ExceedsBorrowCap,
                format!("Borrow cap leaves room for {:.4} {}", headroom, market.asset_symbol),
                Some(REDUCE_AMOUNT),
            );
        }
    }
    check_liquidity(&market, amount, &mut result);

    check_risk(adapter, params, ActionKind::Borrow, &mut result).await;

    check_ltv_utilization(adapter, &positions, amount * market.price_usd, &mut result).await;
    result
}

pub async fn validate_repay<A: LendingAdapter + ?Sized>(adapter: &A, params: &ActionParams) -> ValidationResult {
    let mut result = ValidationResult::new();
    let Some(market) = load_market(adapter, &params.market_id, &mut result).await else {
        return result;
    };
    let positions = load_positions(adapter, params.account).await;
    let position = find_position(&positions, &market.id, &mut result);

    check_amount(params.amount, &mut result);
    let debt = position.map(|p| p.borrow_balance).unwrap_or(U256::ZERO);
    let needed = params.amount.min(debt);
    match adapter.wallet_balance(market.asset, params.account).await {
        Ok(balance) if balance < needed => result.error(
            ActionErrorCode::InsufficientBalance,
            format!(
                "Wallet holds {:.4} {}, {:.4} needed",
                to_units(balance, market.asset_decimals),
                market.asset_symbol,
                to_units(needed, market.asset_decimals)
            ),
            Some(REDUCE_AMOUNT),
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!(market_id = %market.id, error = %e, "Wallet balance read failed"),
    }
    if position.is_some() && params.amount > debt {
        result.warning(
            ActionWarningCode::Overpay,
            format!(
                "Repaying {:.4} {} against {:.4} of debt, the excess is not pulled",
                to_units(params.amount, market.asset_decimals),
                market.asset_symbol,
                to_units(debt, market.asset_decimals)
            ),
            Severity::Low,
        );
    }

    check_market_state(&market, ActionKind::Repay, &mut result);

    if has_debt(&positions) {
        check_risk(adapter, params, ActionKind::Repay, &mut result).await;
    }
    result
}

async fn load_market<A: LendingAdapter + ?Sized>(
    adapter: &A,
    market_id: &str,
    result: &mut ValidationResult,
) -> Option<LendingMarket> {
    match adapter.get_market(market_id).await {
        Ok(Some(market)) => Some(market),
        Ok(None) => {
            result.error(
                ActionErrorCode::MarketNotFound,
                format!("Market {} not found on {}", market_id, adapter.protocol().display_name()),
                None,
            );
            None
        }
        Err(e) => {
            result.error(
                ActionErrorCode::MarketNotFound,
                format!("Market {} could not be loaded: {}", market_id, e),
                None,
            );
            None
        }
    }
}

async fn load_positions<A: LendingAdapter + ?Sized>(adapter: &A, account: Address) -> Vec<LendingPosition> {
    adapter.get_user_positions(account).await.unwrap_or_else(|e| {
        tracing::warn!(
            protocol = %adapter.protocol(),
            account = %account,
            error = %e,
            "Position read failed during validation"
        );
        Vec::new()
    })
}

fn find_position<'a>(
    positions: &'a [LendingPosition],
    market_id: &str,
    result: &mut ValidationResult,
) -> Option<&'a LendingPosition> {
    let position = positions.iter().find(|p| p.market_id.eq_ignore_ascii_case(market_id));
    if position.is_none() {
        result.error(
            ActionErrorCode::PositionNotFound,
            format!("No position in market {}", market_id),
            None,
        );
    }
    position
}

fn has_debt(positions: &[LendingPosition]) -> bool {
    positions.iter().any(LendingPosition::has_debt)
}

fn check_amount(amount: U256, result: &mut ValidationResult) {
    if amount.is_zero() {
        result.error(ActionErrorCode::InvalidAmount, "Amount must be greater than zero", None);
    }
}

fn check_market_state(market: &LendingMarket, kind: ActionKind, result: &mut ValidationResult) {
    let status = &market.status;
    if !status.is_active {
        result.error(
            ActionErrorCode::MarketInactive,
            format!("{} market is not active", market.asset_symbol),
            None,
        );
    }
    // Frozen markets still accept withdrawals and repayments
    if status.is_frozen && matches!(kind, ActionKind::Supply | ActionKind::Borrow) {
        result.error(
            ActionErrorCode::MarketFrozen,
            format!("{} market is frozen", market.asset_symbol),
            None,
        );
    }
    if status.is_paused {
        result.error(
            ActionErrorCode::MarketPaused,
            format!("{} market is paused", market.asset_symbol),
            None,
        );
    }
    match kind {
        ActionKind::Supply if !status.can_supply => result.error(
            ActionErrorCode::SupplyDisabled,
            format!("Supplying {} is disabled", market.asset_symbol),
            None,
        ),
        ActionKind::Borrow if !status.can_borrow => result.error(
            ActionErrorCode::BorrowDisabled,
            format!("Borrowing {} is disabled", market.asset_symbol),
            None,
        ),
        _ => {}
    }
}

fn check_liquidity(market: &LendingMarket, amount: f64, result: &mut ValidationResult) {
    if amount > market.available_liquidity {
        result.error(
            ActionErrorCode::InsufficientLiquidity,
            format!(
                "Only {:.4} {} available in the market",
                market.available_liquidity, market.asset_symbol
            ),
            Some(REDUCE_AMOUNT),
        );
    }
}

/// Projected health factor after `action`.
///
/// When the exact projection fails on a read, the current health factor is scaled
/// by the per-action multiplier instead. Errors only when both reads fail or the
/// protocol rejects the action outright.
pub async fn project_health_factor<A: LendingAdapter + ?Sized>(
    adapter: &A,
    account: Address,
    action: &SimulatedAction,
) -> Result<f64, AdapterError> {
    let exact_error = match adapter.simulate_health_factor(account, action).await {
        Ok(projected) => return Ok(projected),
        Err(e) if e.is_read_failure() => e,
        Err(e) => return Err(e),
    };

    match adapter.calculate_health_factor(account).await {
        Ok(current) => {
            tracing::warn!(
                protocol = %adapter.protocol(),
                market_id = %action.market_id,
                mode = ?HealthFactorMode::Approximate,
                error = %exact_error,
                "Exact health factor projection failed, approximating"
            );
            Ok(risk::approximate(current, action.kind))
        }
        Err(e) => {
            tracing::warn!(
                protocol = %adapter.protocol(),
                market_id = %action.market_id,
                error = %e,
                "Current health factor unreadable"
            );
            Err(exact_error)
        }
    }
}

/// Sets the account health factor on every position once any of them carries debt.
/// A failed read leaves the positions without one.
pub fn attach_health_factor(
    protocol: Protocol,
    account: Address,
    positions: &mut [LendingPosition],
    health_factor: Result<f64, AdapterError>,
) {
    if !positions.iter().any(LendingPosition::has_debt) {
        return;
    }
    match health_factor {
        Ok(health_factor) => {
            for position in positions.iter_mut() {
                position.health_factor = Some(health_factor);
            }
        }
        Err(e) => {
            tracing::warn!(%protocol, account = %account, error = %e, "Health factor read failed, positions returned without it");
        }
    }
}

async fn check_risk<A: LendingAdapter + ?Sized>(
    adapter: &A,
    params: &ActionParams,
    kind: ActionKind,
    result: &mut ValidationResult,
) {
    let action = SimulatedAction::from_params(kind, params);
    let projected = match project_health_factor(adapter, params.account, &action).await {
        Ok(projected) => projected,
        Err(e) => {
            result.warning(
                ActionWarningCode::SimulationUnavailable,
                format!("Health factor could not be simulated: {}", e),
                Severity::Medium,
            );
            return;
        }
    };
    result.projected_health_factor = Some(projected);

    match HealthBand::of(projected) {
        HealthBand::Liquidatable if kind.increases_risk() => {
            let suggestion = if kind == ActionKind::Borrow { ADD_COLLATERAL } else { REPAY_DEBT };
            result.error(
                ActionErrorCode::WouldCauseLiquidation,
                format!("Health factor would drop to {:.4}, below the liquidation threshold", projected),
                Some(suggestion),
            );
        }
        HealthBand::Liquidatable | HealthBand::Low => result.warning(
            ActionWarningCode::LowHealthFactor,
            format!("Health factor would be {:.4}, below {}", projected, LOW_HEALTH_FACTOR),
            Severity::High,
        ),
        HealthBand::Moderate => result.warning(
            ActionWarningCode::ModerateHealthFactor,
            format!("Health factor would be {:.4}, below {}", projected, MODERATE_HEALTH_FACTOR),
            Severity::Medium,
        ),
        HealthBand::Healthy => {}
    }
}

async fn check_ltv_utilization<A: LendingAdapter + ?Sized>(
    adapter: &A,
    positions: &[LendingPosition],
    borrow_usd: f64,
    result: &mut ValidationResult,
) {
    let markets = match adapter.get_markets().await {
        Ok(markets) => markets,
        Err(e) => {
            tracing::warn!(protocol = %adapter.protocol(), error = %e, "Market read failed during LTV check");
            return;
        }
    };
    let ltv_by_market: HashMap<&str, f64> = markets.iter().map(|m| (m.id.as_str(), m.ltv)).collect();

    let borrowing_power: f64 = positions
        .iter()
        .map(|p| p.collateral_value_usd() * ltv_by_market.get(p.market_id.as_str()).copied().unwrap_or(0.0))
        .sum();
    let borrowed: f64 = positions.iter().map(|p| p.borrow_balance_usd).sum::<f64>() + borrow_usd;

    let utilization = if borrowing_power > 0.0 {
        borrowed / borrowing_power
    } else if borrowed > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    if utilization > 1.0 {
        result.error(
            ActionErrorCode::InsufficientCollateral,
            format!(
                "Borrowing ${:.2} would use {:.1}% of ${:.2} borrowing power",
                borrowed,
                utilization * 100.0,
                borrowing_power
            ),
            Some(ADD_COLLATERAL),
        );
    } else if utilization > HIGH_LTV_UTILIZATION {
        result.warning(
            ActionWarningCode::HighLtvUtilization,
            format!("Borrow would use {:.1}% of available borrowing power", utilization * 100.0),
            Severity::Medium,
        );
    }
}
