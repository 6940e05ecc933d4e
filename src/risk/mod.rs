pub mod health_factor;

pub use health_factor::{
    approximate, approximate_from_liquidity, health_factor, HealthBand, HealthFactorMode, RiskSnapshot,
    LIQUIDATION_HEALTH_FACTOR, LOW_HEALTH_FACTOR, MODERATE_HEALTH_FACTOR,
};
