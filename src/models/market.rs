use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use super::protocol::Protocol;

/// Whether a market lends its asset or only accepts it as collateral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Lending,
    CollateralOnly,
}

/// Protocol-reported switches gating the actions a market accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatus {
    pub is_active: bool,
    pub is_frozen: bool,
    pub is_paused: bool,
    pub can_supply: bool,
    pub can_borrow: bool,
    pub can_use_as_collateral: bool,
}

impl MarketStatus {
    pub fn accepts_supply(&self) -> bool {
        self.is_active && !self.is_frozen && !self.is_paused && self.can_supply
    }

    pub fn accepts_borrow(&self) -> bool {
        self.is_active && !self.is_frozen && !self.is_paused && self.can_borrow
    }
}

/// One supply/borrow market of one protocol, normalized across protocols.
///
/// APYs are percentages (`4.1` means 4.1%). Ratios (`utilization`, `ltv`,
/// `liquidation_threshold`, `liquidation_penalty`) are fractions in `[0, 1]`.
/// Totals, caps and liquidity are in whole units of the market asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingMarket {
    pub id: String,
    pub protocol: Protocol,
    pub chain_id: u64,
    pub kind: MarketKind,
    /// Contract receiving this market's calls (pool, comet, morpho, mToken)
    pub contract: Address,
    pub asset: Address,
    pub asset_symbol: String,
    pub asset_decimals: u8,
    /// Paired asset for isolated markets (collateral of a loan market or loan token of a collateral market)
    pub paired_asset: Option<Address>,
    pub paired_symbol: Option<String>,
    /// Receipt token (aToken, comet, mToken); Morpho has none
    pub receipt_token: Option<Address>,
    pub price_usd: f64,

    pub supply_apy: f64,
    pub borrow_apy: f64,
    pub net_supply_apy: f64,
    pub net_borrow_apy: f64,

    pub total_supply: f64,
    pub total_supply_usd: f64,
    pub total_borrow: f64,
    pub total_borrow_usd: f64,
    pub available_liquidity: f64,
    pub available_liquidity_usd: f64,
    pub utilization: f64,

    pub ltv: f64,
    pub liquidation_threshold: f64,
    pub liquidation_penalty: f64,
    pub supply_cap: Option<f64>,
    pub borrow_cap: Option<f64>,

    pub status: MarketStatus,
    pub last_updated: u64,
}

impl LendingMarket {
    /// Borrowed share of supplied liquidity; zero for an empty market
    pub fn utilization_of(total_supply: f64, total_borrow: f64) -> f64 {
        if total_supply > 0.0 {
            (total_borrow / total_supply).max(0.0)
        } else {
            0.0
        }
    }

    /// Remaining room under the supply cap, `None` when uncapped
    pub fn supply_headroom(&self) -> Option<f64> {
        self.supply_cap.map(|cap| (cap - self.total_supply).max(0.0))
    }

    /// Remaining room under the borrow cap, `None` when uncapped
    pub fn borrow_headroom(&self) -> Option<f64> {
        self.borrow_cap.map(|cap| (cap - self.total_borrow).max(0.0))
    }

    pub fn is_collateral_only(&self) -> bool {
        self.kind == MarketKind::CollateralOnly
    }
}

/// Current unix timestamp in seconds
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_utilization_of_empty_market_is_zero() {
        assert_eq!(LendingMarket::utilization_of(0.0, 0.0), 0.0);
        assert_eq!(LendingMarket::utilization_of(0.0, 10.0), 0.0);
        assert!((LendingMarket::utilization_of(200.0, 50.0) - 0.25).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_utilization_matches_ratio(supply in 0.0f64..1e15, borrow in 0.0f64..1e15) {
            let utilization = LendingMarket::utilization_of(supply, borrow);
            prop_assert!(utilization >= 0.0);
            if supply > 0.0 {
                prop_assert!((utilization - borrow / supply).abs() <= 1e-9 * (borrow / supply).max(1.0));
            } else {
                prop_assert_eq!(utilization, 0.0);
            }
        }
    }

    #[test]
    fn test_status_gates() {
        let status = MarketStatus {
            is_active: true,
            is_frozen: true,
            is_paused: false,
            can_supply: true,
            can_borrow: true,
            can_use_as_collateral: true,
        };
        assert!(!status.accepts_supply());
        assert!(!status.accepts_borrow());
    }
}
