pub mod lending_service;
pub mod price_service;
pub mod reward_service;
pub mod routing;

pub use lending_service::{LendingService, MarketSnapshot};
pub use price_service::{price_or_zero, CoinGeckoPriceOracle, PriceError, PriceOracle};
pub use reward_service::{RewardError, RewardService};
