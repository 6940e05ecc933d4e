// Health factor math shared by every adapter
use serde::{Deserialize, Serialize};

use crate::models::ActionKind;

/// Below this the position can be liquidated
pub const LIQUIDATION_HEALTH_FACTOR: f64 = 1.0;
/// Below this a projection raises a high severity warning
pub const LOW_HEALTH_FACTOR: f64 = 1.1;
/// Below this a projection raises a medium severity warning
pub const MODERATE_HEALTH_FACTOR: f64 = 1.5;

/// How a health factor figure was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthFactorMode {
    /// Recomputed from risk-adjusted collateral and debt
    Exact,
    /// Heuristic used when live collateral data cannot be read
    Approximate,
}

/// Where a health factor sits relative to the warning thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Liquidatable,
    Low,
    Moderate,
    Healthy,
}

impl HealthBand {
    pub fn of(health_factor: f64) -> Self {
        if health_factor < LIQUIDATION_HEALTH_FACTOR {
            HealthBand::Liquidatable
        } else if health_factor < LOW_HEALTH_FACTOR {
            HealthBand::Low
        } else if health_factor < MODERATE_HEALTH_FACTOR {
            HealthBand::Moderate
        } else {
            HealthBand::Healthy
        }
    }
}

/// Risk-adjusted collateral (each deposit weighted by its liquidation threshold) and debt,
/// both in the same unit of account
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub weighted_collateral: f64,
    pub debt: f64,
}

impl RiskSnapshot {
    pub fn new(weighted_collateral: f64, debt: f64) -> Self {
        Self {
            weighted_collateral: weighted_collateral.max(0.0),
            debt: debt.max(0.0),
        }
    }

    pub fn health_factor(&self) -> f64 {
        health_factor(self.weighted_collateral, self.debt)
    }

    /// Snapshot after `kind` moves `amount` (same unit as the snapshot) of an asset
    /// whose liquidation threshold is `liquidation_threshold`.
    ///
    /// `EnableCollateral` expects `amount` to be the supplied balance being switched on.
    pub fn apply(&self, kind: ActionKind, amount: f64, liquidation_threshold: f64) -> RiskSnapshot {
        let amount = amount.max(0.0);
        let weighted = amount * liquidation_threshold;
        match kind {
            ActionKind::Supply | ActionKind::EnableCollateral => {
                RiskSnapshot::new(self.weighted_collateral + weighted, self.debt)
            }
            ActionKind::Withdraw => RiskSnapshot::new(self.weighted_collateral - weighted, self.debt),
            ActionKind::Borrow => RiskSnapshot::new(self.weighted_collateral, self.debt + amount),
            ActionKind::Repay => RiskSnapshot::new(self.weighted_collateral, self.debt - amount.min(self.debt)),
        }
    }

    pub fn project(&self, kind: ActionKind, amount: f64, liquidation_threshold: f64) -> f64 {
        self.apply(kind, amount, liquidation_threshold).health_factor()
    }
}

/// `weighted_collateral / debt`, infinite without debt
pub fn health_factor(weighted_collateral: f64, debt: f64) -> f64 {
    if debt <= 0.0 {
        f64::INFINITY
    } else {
        (weighted_collateral / debt).max(0.0)
    }
}

/// Fixed multiplier projection used when only the current health factor is known
pub fn approximate(current: f64, kind: ActionKind) -> f64 {
    let multiplier = match kind {
        ActionKind::Supply => 1.10,
        ActionKind::Repay => 1.15,
        ActionKind::Withdraw => 0.90,
        ActionKind::Borrow => 0.85,
        ActionKind::EnableCollateral => 1.10,
    };
    current * multiplier
}

/// Coarse health factor from a comptroller's account liquidity and shortfall
/// (both in USD), used when per-market snapshots cannot be read
pub fn approximate_from_liquidity(liquidity: f64, shortfall: f64, debt: f64) -> f64 {
    if debt <= 0.0 {
        return f64::INFINITY;
    }
    if shortfall > 0.0 {
        return if shortfall > debt * 0.1 { 0.5 } else { 0.8 };
    }
    if liquidity <= 0.0 {
        1.0
    } else if liquidity < debt * 0.5 {
        1.5
    } else {
        2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_no_debt_is_infinite() {
        assert!(health_factor(1000.0, 0.0).is_infinite());
        assert!(RiskSnapshot::default().health_factor().is_infinite());
    }

    #[test]
    fn test_withdraw_projection_below_one() {
        // $10,000 supplied at 82.5% LT against $6,000 of debt, withdrawing $3,000
        let snapshot = RiskSnapshot::new(10_000.0 * 0.825, 6_000.0);
        let projected = snapshot.project(ActionKind::Withdraw, 3_000.0, 0.825);
        assert!((projected - 0.9625).abs() < 1e-9);
        assert_eq!(HealthBand::of(projected), HealthBand::Liquidatable);
    }

    #[test]
    fn test_repaying_everything_clears_debt() {
        let snapshot = RiskSnapshot::new(800.0, 500.0);
        assert!(snapshot.project(ActionKind::Repay, 10_000.0, 0.0).is_infinite());
    }

    #[test]
    fn test_approximate_multipliers() {
        assert!((approximate(2.0, ActionKind::Borrow) - 1.7).abs() < 1e-12);
        assert!((approximate(2.0, ActionKind::Repay) - 2.3).abs() < 1e-12);
        assert!(approximate(f64::INFINITY, ActionKind::Supply).is_infinite());
    }

    #[test]
    fn test_liquidity_buckets() {
        assert!(approximate_from_liquidity(0.0, 0.0, 0.0).is_infinite());
        assert_eq!(approximate_from_liquidity(0.0, 200.0, 1000.0), 0.5);
        assert_eq!(approximate_from_liquidity(0.0, 50.0, 1000.0), 0.8);
        assert_eq!(approximate_from_liquidity(0.0, 0.0, 1000.0), 1.0);
        assert_eq!(approximate_from_liquidity(400.0, 0.0, 1000.0), 1.5);
        assert_eq!(approximate_from_liquidity(600.0, 0.0, 1000.0), 2.0);
    }

    proptest! {
        #[test]
        fn prop_repay_never_lowers_health(collateral in 0.0f64..1e9, debt in 0.0f64..1e9, amount in 0.0f64..1e9) {
            let snapshot = RiskSnapshot::new(collateral, debt);
            prop_assert!(snapshot.project(ActionKind::Repay, amount, 0.8) >= snapshot.health_factor());
        }

        #[test]
        fn prop_borrow_never_raises_health(collateral in 0.0f64..1e9, debt in 0.0f64..1e9, amount in 0.0f64..1e9) {
            let snapshot = RiskSnapshot::new(collateral, debt);
            prop_assert!(snapshot.project(ActionKind::Borrow, amount, 0.8) <= snapshot.health_factor());
        }
    }
}
