use serde::Serialize;

use super::protocol::Protocol;
use super::transaction::ActionKind;

/// Recommended market for a supply or borrow of one asset
#[derive(Debug, Clone, Serialize)]
pub struct RoutingSuggestion {
    pub action: ActionKind,
    pub asset_symbol: String,
    pub amount: f64,
    pub protocol: Protocol,
    pub market_id: String,
    /// Net APY of the recommended market (percent)
    pub net_apy: f64,
    pub reason: String,
    pub has_existing_position: bool,
    pub alternatives: Vec<RoutingAlternative>,
}

/// Runner-up market, ranked by distance from the recommendation
#[derive(Debug, Clone, Serialize)]
pub struct RoutingAlternative {
    pub protocol: Protocol,
    pub market_id: String,
    pub net_apy: f64,
    /// `net_apy - recommended.net_apy` (negative for supply, positive for borrow)
    pub apy_delta: f64,
    pub reason: String,
    pub has_existing_position: bool,
}
