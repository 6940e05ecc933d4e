use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::protocol::Protocol;

/// One account's stake in one market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingPosition {
    pub id: String,
    pub market_id: String,
    pub protocol: Protocol,
    pub chain_id: u64,
    pub account: Address,
    pub asset: Address,
    pub asset_symbol: String,
    pub asset_decimals: u8,

    /// Supplied (lent) amount in asset base units
    pub supply_balance: U256,
    pub supply_shares: Option<U256>,
    /// Outstanding debt in asset base units
    pub borrow_balance: U256,
    pub borrow_shares: Option<U256>,
    /// Posted collateral that does not earn supply interest (Comet collateral, Morpho collateral)
    pub collateral_balance: U256,

    pub supply_balance_usd: f64,
    pub borrow_balance_usd: f64,
    pub collateral_balance_usd: f64,
    pub supply_apy: f64,
    pub borrow_apy: f64,
    pub collateral_enabled: bool,
    pub health_factor: Option<f64>,
}

impl LendingPosition {
    pub fn is_empty(&self) -> bool {
        self.supply_balance.is_zero() && self.borrow_balance.is_zero() && self.collateral_balance.is_zero()
    }

    pub fn has_debt(&self) -> bool {
        !self.borrow_balance.is_zero()
    }

    /// USD value counting toward borrowing power
    pub fn collateral_value_usd(&self) -> f64 {
        let supplied = if self.collateral_enabled { self.supply_balance_usd } else { 0.0 };
        supplied + self.collateral_balance_usd
    }

    /// Everything the account owns in this market (supplied plus posted collateral)
    pub fn deposit_value_usd(&self) -> f64 {
        self.supply_balance_usd + self.collateral_balance_usd
    }
}

/// Aggregate view of an account across every protocol on a network
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioPositions {
    pub account: Address,
    pub chain_id: u64,
    pub positions: Vec<LendingPosition>,
    pub total_supply_usd: f64,
    pub total_borrow_usd: f64,
    pub net_worth_usd: f64,
    /// USD-weighted average supply APY (percent)
    pub average_supply_apy: f64,
    /// USD-weighted average borrow APY (percent)
    pub average_borrow_apy: f64,
    /// Lowest health factor across all positions; infinite without debt
    pub health_factor: f64,
    pub protocol_health_factors: BTreeMap<Protocol, f64>,
}

impl PortfolioPositions {
    /// Compute totals, weighted APYs and the minimum health factor
    pub fn from_positions(account: Address, chain_id: u64, positions: Vec<LendingPosition>) -> Self {
        let total_supply_usd: f64 = positions.iter().map(|p| p.deposit_value_usd()).sum();
        let total_borrow_usd: f64 = positions.iter().map(|p| p.borrow_balance_usd).sum();

        let earning_usd: f64 = positions.iter().map(|p| p.supply_balance_usd).sum();
        let average_supply_apy = if earning_usd > 0.0 {
            positions
                .iter()
                .map(|p| p.supply_balance_usd * p.supply_apy)
                .sum::<f64>()
                / earning_usd
        } else {
            0.0
        };

        let average_borrow_apy = if total_borrow_usd > 0.0 {
            positions
                .iter()
                .map(|p| p.borrow_balance_usd * p.borrow_apy)
                .sum::<f64>()
                / total_borrow_usd
        } else {
            0.0
        };

        let mut protocol_health_factors: BTreeMap<Protocol, f64> = BTreeMap::new();
        for position in &positions {
            if let Some(hf) = position.health_factor {
                let entry = protocol_health_factors.entry(position.protocol).or_insert(f64::INFINITY);
                *entry = entry.min(hf);
            }
        }
        let health_factor = protocol_health_factors
            .values()
            .copied()
            .fold(f64::INFINITY, f64::min);

        Self {
            account,
            chain_id,
            positions,
            total_supply_usd,
            total_borrow_usd,
            net_worth_usd: total_supply_usd - total_borrow_usd,
            average_supply_apy,
            average_borrow_apy,
            health_factor,
            protocol_health_factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(protocol: Protocol, supply_usd: f64, supply_apy: f64, borrow_usd: f64, borrow_apy: f64, hf: Option<f64>) -> LendingPosition {
        LendingPosition {
            id: format!("{}-{}", protocol, supply_usd),
            market_id: format!("{}:1:0x00", protocol),
            protocol,
            chain_id: 1,
            account: Address::ZERO,
            asset: Address::ZERO,
            asset_symbol: "USDC".to_string(),
            asset_decimals: 6,
            supply_balance: U256::from((supply_usd * 1e6) as u128),
            supply_shares: None,
            borrow_balance: U256::from((borrow_usd * 1e6) as u128),
            borrow_shares: None,
            collateral_balance: U256::ZERO,
            supply_balance_usd: supply_usd,
            borrow_balance_usd: borrow_usd,
            collateral_balance_usd: 0.0,
            supply_apy,
            borrow_apy,
            collateral_enabled: true,
            health_factor: hf,
        }
    }

    #[test]
    fn test_portfolio_totals_and_weighted_apy() {
        let portfolio = PortfolioPositions::from_positions(
            Address::ZERO,
            1,
            vec![
                position(Protocol::AaveV3, 3000.0, 2.0, 0.0, 0.0, None),
                position(Protocol::CompoundV3, 1000.0, 6.0, 500.0, 8.0, Some(1.7)),
                position(Protocol::MorphoBlue, 0.0, 0.0, 500.0, 4.0, Some(1.3)),
            ],
        );

        assert_eq!(portfolio.total_supply_usd, 4000.0);
        assert_eq!(portfolio.total_borrow_usd, 1000.0);
        assert_eq!(portfolio.net_worth_usd, 3000.0);
        assert!((portfolio.average_supply_apy - 3.0).abs() < 1e-9);
        assert!((portfolio.average_borrow_apy - 6.0).abs() < 1e-9);
        assert_eq!(portfolio.health_factor, 1.3);
        assert_eq!(portfolio.protocol_health_factors.len(), 2);
    }

    #[test]
    fn test_empty_portfolio_has_infinite_health() {
        let portfolio = PortfolioPositions::from_positions(Address::ZERO, 1, Vec::new());
        assert!(portfolio.health_factor.is_infinite());
        assert_eq!(portfolio.average_supply_apy, 0.0);
    }
}
