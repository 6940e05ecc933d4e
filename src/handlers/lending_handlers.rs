use alloy::primitives::{Address, U256};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AppError;
use crate::models::{
    ActionKind, ActionParams, CollateralParams, LendingMarket, PlanGasEstimate, PortfolioPositions, Protocol,
    RoutingSuggestion, SimulatedAction, TransactionCall, ValidationResult,
};
use crate::AppState;

// Request/Response DTOs
#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub refresh: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct MarketsResponse {
    pub chain_id: u64,
    pub markets: Vec<LendingMarket>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct RoutingQuery {
    pub asset: String,
    /// Whole asset units
    pub amount: f64,
    pub account: Option<String>,
}

/// Amounts travel as decimal or 0x-prefixed strings of base units
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub market_id: String,
    pub account: String,
    pub amount: String,
    #[serde(default)]
    pub estimate_gas: bool,
}

#[derive(Debug, Deserialize)]
pub struct CollateralRequest {
    pub market_id: String,
    pub account: String,
    pub enabled: bool,
    #[serde(default)]
    pub estimate_gas: bool,
}

#[derive(Debug, Serialize)]
pub struct TransactionPlanResponse {
    pub action: ActionKind,
    pub calls: Vec<TransactionCall>,
    pub gas: Option<PlanGasEstimate>,
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    pub account: String,
    pub action: String,
    pub market_id: String,
    #[serde(default)]
    pub amount: Option<String>,
}

/// Health factors are `null` when the account carries no debt
#[derive(Debug, Serialize)]
pub struct HealthFactorResponse {
    pub protocol: Protocol,
    pub account: Address,
    pub health_factor: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SimulationResponse {
    pub account: Address,
    pub action: ActionKind,
    pub market_id: String,
    pub projected_health_factor: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub chain_id: u64,
    pub protocols: Vec<Protocol>,
}

// Helper functions
fn parse_address(raw: &str) -> Result<Address, AppError> {
    Address::from_str(raw.trim()).map_err(|_| AppError::ValidationError(format!("Invalid address: {}", raw)))
}

fn parse_amount(raw: &str) -> Result<U256, AppError> {
    U256::from_str(raw.trim()).map_err(|_| AppError::ValidationError(format!("Invalid amount: {}", raw)))
}

fn parse_action(raw: &str) -> Result<ActionKind, AppError> {
    ActionKind::from_str(raw).map_err(AppError::ValidationError)
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

impl ActionRequest {
    fn params(&self) -> Result<ActionParams, AppError> {
        Ok(ActionParams {
            market_id: self.market_id.clone(),
            account: parse_address(&self.account)?,
            amount: parse_amount(&self.amount)?,
        })
    }
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        chain_id: state.service.chain_id(),
        protocols: state.service.protocols(),
    })
}

pub async fn list_markets(
    State(state): State<AppState>,
    Query(query): Query<MarketsQuery>,
) -> Json<MarketsResponse> {
    let markets = state.service.get_markets(query.refresh.unwrap_or(false)).await;
    let total = markets.len();
    Json(MarketsResponse {
        chain_id: state.service.chain_id(),
        markets,
        total,
    })
}

pub async fn get_market(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
) -> Result<Json<LendingMarket>, AppError> {
    Ok(Json(state.service.get_market(&market_id).await?))
}

pub async fn get_positions(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<PortfolioPositions>, AppError> {
    let account = parse_address(&account)?;
    Ok(Json(state.service.get_user_positions(account).await))
}

pub async fn supply_routing(
    State(state): State<AppState>,
    Query(query): Query<RoutingQuery>,
) -> Result<Json<RoutingSuggestion>, AppError> {
    let account = query.account.as_deref().map(parse_address).transpose()?;
    state
        .service
        .get_supply_routing_suggestion(&query.asset, query.amount, account)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No market accepts a supply of {} {}", query.amount, query.asset)))
}

pub async fn borrow_routing(
    State(state): State<AppState>,
    Query(query): Query<RoutingQuery>,
) -> Result<Json<RoutingSuggestion>, AppError> {
    let account = query.account.as_deref().map(parse_address).transpose()?;
    state
        .service
        .get_borrow_routing_suggestion(&query.asset, query.amount, account)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No market can lend {} {}", query.amount, query.asset)))
}

pub async fn build_transaction(
    State(state): State<AppState>,
    Path(action): Path<String>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<TransactionPlanResponse>, AppError> {
    let action = parse_action(&action)?;
    let params = request.params()?;

    let calls = match action {
        ActionKind::Supply => state.service.build_supply(&params).await?,
        ActionKind::Withdraw => state.service.build_withdraw(&params).await?,
        ActionKind::Borrow => state.service.build_borrow(&params).await?,
        ActionKind::Repay => state.service.build_repay(&params).await?,
        ActionKind::EnableCollateral => {
            return Err(AppError::ValidationError(
                "Use /transactions/collateral to toggle collateral".to_string(),
            ))
        }
    };

    let gas = if request.estimate_gas {
        Some(state.service.estimate_plan_gas(params.account, &calls).await?)
    } else {
        None
    };

    tracing::info!(action = %action, market_id = %params.market_id, call_count = calls.len(), "Built transaction plan");
    Ok(Json(TransactionPlanResponse { action, calls, gas }))
}

pub async fn build_collateral_transaction(
    State(state): State<AppState>,
    Json(request): Json<CollateralRequest>,
) -> Result<Json<TransactionPlanResponse>, AppError> {
    let params = CollateralParams {
        market_id: request.market_id.clone(),
        account: parse_address(&request.account)?,
        enabled: request.enabled,
    };
    let calls = state.service.build_enable_collateral(&params).await?;
    let gas = if request.estimate_gas {
        Some(state.service.estimate_plan_gas(params.account, &calls).await?)
    } else {
        None
    };

    Ok(Json(TransactionPlanResponse {
        action: ActionKind::EnableCollateral,
        calls,
        gas,
    }))
}

pub async fn validate_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<ValidationResult>, AppError> {
    let action = parse_action(&action)?;
    let params = request.params()?;

    let result = match action {
        ActionKind::Supply => state.service.validate_supply(&params).await,
        ActionKind::Withdraw => state.service.validate_withdraw(&params).await,
        ActionKind::Borrow => state.service.validate_borrow(&params).await,
        ActionKind::Repay => state.service.validate_repay(&params).await,
        ActionKind::EnableCollateral => {
            return Err(AppError::ValidationError(format!("{} has no validation", action)))
        }
    };
    Ok(Json(result))
}

pub async fn get_health_factor(
    State(state): State<AppState>,
    Path((protocol, account)): Path<(String, String)>,
) -> Result<Json<HealthFactorResponse>, AppError> {
    let protocol = Protocol::from_str(&protocol).map_err(|e| AppError::ProtocolNotSupported(e.0))?;
    let account = parse_address(&account)?;
    let health_factor = state.service.calculate_health_factor(protocol, account).await?;

    Ok(Json(HealthFactorResponse {
        protocol,
        account,
        health_factor: finite(health_factor),
    }))
}

pub async fn simulate_health_factor(
    State(state): State<AppState>,
    Json(request): Json<SimulateRequest>,
) -> Result<Json<SimulationResponse>, AppError> {
    let account = parse_address(&request.account)?;
    let kind = parse_action(&request.action)?;
    let amount = match request.amount.as_deref() {
        Some(raw) => parse_amount(raw)?,
        None if kind == ActionKind::EnableCollateral => U256::ZERO,
        None => return Err(AppError::ValidationError(format!("{} requires an amount", kind))),
    };
    let action = SimulatedAction {
        kind,
        market_id: request.market_id,
        amount,
    };
    let projected = state.service.simulate_health_factor(account, &action).await?;

    Ok(Json(SimulationResponse {
        account,
        action: kind,
        market_id: action.market_id,
        projected_health_factor: finite(projected),
    }))
}

pub fn create_lending_routes() -> Router<AppState> {
    Router::new()
        .route("/markets", get(list_markets))
        .route("/markets/:id", get(get_market))
        .route("/positions/:account", get(get_positions))
        .route("/routing/supply", get(supply_routing))
        .route("/routing/borrow", get(borrow_routing))
        .route("/transactions/collateral", post(build_collateral_transaction))
        .route("/transactions/:action", post(build_transaction))
        .route("/validate/:action", post(validate_action))
        .route("/health-factor/simulate", post(simulate_health_factor))
        .route("/health-factor/:protocol/:account", get(get_health_factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let request = ActionRequest {
            market_id: "aave_v3:1:0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".to_string(),
            account: "0x00000000000000000000000000000000000000aa".to_string(),
            amount: "1000000".to_string(),
            estimate_gas: false,
        };
        let params = request.params().unwrap();
        assert_eq!(params.amount, U256::from(1_000_000u64));
        assert_eq!(params.account, Address::with_last_byte(0xaa));

        assert!(parse_amount("0x10").is_ok_and(|a| a == U256::from(16u64)));
        assert!(matches!(parse_address("0x123"), Err(AppError::ValidationError(_))));
        assert!(matches!(parse_action("liquidate"), Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_infinite_health_factor_is_null() {
        let response = HealthFactorResponse {
            protocol: Protocol::AaveV3,
            account: Address::ZERO,
            health_factor: finite(f64::INFINITY),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["health_factor"].is_null());
        assert_eq!(finite(1.5), Some(1.5));
    }
}
