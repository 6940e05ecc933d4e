use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use crate::adapters::base;
use crate::blockchain::TransportError;
use crate::models::{
    ActionKind, ActionParams, CollateralParams, LendingMarket, LendingPosition, Protocol, SimulatedAction,
    TransactionCall, ValidationResult,
};

/// Common error type for all lending protocol adapters
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Contract call failed: {0}")]
    ContractError(String),

    #[error("Invalid market data: {0}")]
    InvalidData(String),

    #[error("Chain {0} is not supported by this protocol")]
    UnsupportedChain(u64),

    #[error("Protocol not supported: {0}")]
    UnsupportedProtocol(String),

    #[error("{protocol} does not support {action} on market {market_id}")]
    UnsupportedAction {
        protocol: Protocol,
        action: ActionKind,
        market_id: String,
    },

    #[error("Market not found: {0}")]
    MarketNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

impl AdapterError {
    /// Chain or oracle reads that failed, as opposed to a request the protocol rejects
    pub fn is_read_failure(&self) -> bool {
        matches!(
            self,
            AdapterError::ContractError(_)
                | AdapterError::InvalidData(_)
                | AdapterError::RpcError(_)
                | AdapterError::CalculationError(_)
                | AdapterError::Timeout(_)
        )
    }
}

impl From<TransportError> for AdapterError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::RpcError(msg) | TransportError::InvalidAddress(msg) => AdapterError::RpcError(msg),
            TransportError::MaxRetriesExceeded(n) => AdapterError::RpcError(format!("max retries exceeded ({})", n)),
            other => AdapterError::ContractError(other.to_string()),
        }
    }
}

/// Uniform interface over one lending protocol deployment on one chain.
///
/// Reads never mutate chain state. `build_*` methods return the ordered call list a
/// wallet has to submit; an ERC-20 approval is prepended only when the live
/// allowance is below the requested amount.
#[async_trait]
pub trait LendingAdapter: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn chain_id(&self) -> u64;

    /// All markets of the deployment. A market that fails to load is skipped.
    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError>;

    async fn get_market(&self, market_id: &str) -> Result<Option<LendingMarket>, AdapterError> {
        let markets = self.get_markets().await?;
        Ok(markets.into_iter().find(|m| m.id.eq_ignore_ascii_case(market_id)))
    }

    /// Non-empty positions of `account`; every position carries the protocol
    /// health factor when the account has debt and the health read succeeds
    async fn get_user_positions(&self, account: Address) -> Result<Vec<LendingPosition>, AdapterError>;

    /// ERC-20 balance held in the wallet
    async fn wallet_balance(&self, asset: Address, account: Address) -> Result<U256, AdapterError>;

    async fn build_supply(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError>;

    async fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError>;

    async fn build_borrow(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError>;

    async fn build_repay(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError>;

    async fn build_enable_collateral(&self, params: &CollateralParams) -> Result<Vec<TransactionCall>, AdapterError>;

    /// Risk-adjusted collateral over debt; `f64::INFINITY` without debt
    async fn calculate_health_factor(&self, account: Address) -> Result<f64, AdapterError>;

    /// Health factor after a hypothetical action, without touching chain state
    async fn simulate_health_factor(&self, account: Address, action: &SimulatedAction) -> Result<f64, AdapterError>;

    async fn validate_supply(&self, params: &ActionParams) -> ValidationResult {
        base::validate_supply(self, params).await
    }

    async fn validate_withdraw(&self, params: &ActionParams) -> ValidationResult {
        base::validate_withdraw(self, params).await
    }

    async fn validate_borrow(&self, params: &ActionParams) -> ValidationResult {
        base::validate_borrow(self, params).await
    }

    async fn validate_repay(&self, params: &ActionParams) -> ValidationResult {
        base::validate_repay(self, params).await
    }
}
