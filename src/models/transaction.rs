use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lending actions a caller can preview, validate and build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Supply,
    Withdraw,
    Borrow,
    Repay,
    EnableCollateral,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Supply => "supply",
            ActionKind::Withdraw => "withdraw",
            ActionKind::Borrow => "borrow",
            ActionKind::Repay => "repay",
            ActionKind::EnableCollateral => "enable_collateral",
        }
    }

    /// Actions that can only lower the health factor
    pub fn increases_risk(&self) -> bool {
        matches!(self, ActionKind::Withdraw | ActionKind::Borrow)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supply" => Ok(ActionKind::Supply),
            "withdraw" => Ok(ActionKind::Withdraw),
            "borrow" => Ok(ActionKind::Borrow),
            "repay" => Ok(ActionKind::Repay),
            "enable_collateral" | "collateral" => Ok(ActionKind::EnableCollateral),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

/// Parameters of a supply/withdraw/borrow/repay request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParams {
    pub market_id: String,
    pub account: Address,
    /// Amount in asset base units
    pub amount: U256,
}

/// Parameters of a collateral toggle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralParams {
    pub market_id: String,
    pub account: Address,
    pub enabled: bool,
}

/// Hypothetical action fed to health factor simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedAction {
    pub kind: ActionKind,
    pub market_id: String,
    /// Amount in asset base units; ignored for `EnableCollateral`
    pub amount: U256,
}

impl SimulatedAction {
    pub fn from_params(kind: ActionKind, params: &ActionParams) -> Self {
        Self {
            kind,
            market_id: params.market_id.clone(),
            amount: params.amount,
        }
    }
}

/// One atomic on-chain call. A `Vec<TransactionCall>` is an ordered action plan
/// the caller must submit sequentially (an approval lands before the spend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub description: String,
}

impl TransactionCall {
    pub fn new<C: SolCall>(to: Address, call: &C, description: impl Into<String>) -> Self {
        Self {
            to,
            data: Bytes::from(call.abi_encode()),
            value: U256::ZERO,
            description: description.into(),
        }
    }

    /// 4-byte function selector of the encoded payload
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).and_then(|s| s.try_into().ok())
    }
}

/// Gas estimate for a whole plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanGasEstimate {
    pub total_gas: u64,
    pub gas_price_wei: u128,
    pub total_cost_wei: U256,
    /// Indexes of calls whose estimate failed (typically calls depending on an earlier approval)
    pub unestimated_calls: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_parse() {
        assert_eq!("Supply".parse::<ActionKind>().unwrap(), ActionKind::Supply);
        assert_eq!("collateral".parse::<ActionKind>().unwrap(), ActionKind::EnableCollateral);
        assert!("liquidate".parse::<ActionKind>().is_err());
        assert!(ActionKind::Borrow.increases_risk());
        assert!(!ActionKind::Repay.increases_risk());
    }
}
