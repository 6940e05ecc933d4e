// Incentive APYs from a DefiLlama style yield feed, with static fallbacks
use alloy::primitives::Address;
use moka::future::Cache;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::base::AssetCategory;
use crate::models::{chain_name, LendingMarket, MarketKind, Protocol};
use crate::utils::CacheConfig;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RewardError {
    #[error("Reward feed request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid reward feed response: {0}")]
    InvalidResponse(String),
}

/// One pool entry of the feed (`GET /pools`)
#[derive(Debug, Clone, Deserialize)]
pub struct YieldPool {
    pub chain: String,
    pub project: String,
    pub symbol: String,
    #[serde(rename = "apyReward", default)]
    pub apy_reward: Option<f64>,
    #[serde(rename = "apyRewardBorrow", default)]
    pub apy_reward_borrow: Option<f64>,
    #[serde(rename = "underlyingTokens", default)]
    pub underlying_tokens: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PoolsResponse {
    data: Vec<YieldPool>,
}

/// Incentive APYs (percent) paid on top of the base rates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RewardRates {
    pub supply: f64,
    pub borrow: f64,
}

impl YieldPool {
    fn matches(&self, chain: &str, project: &str, market: &LendingMarket) -> bool {
        if !self.chain.eq_ignore_ascii_case(chain) || !self.project.eq_ignore_ascii_case(project) {
            return false;
        }
        match self.underlying_tokens.as_deref() {
            Some(tokens) if !tokens.is_empty() => Self::tokens_match(tokens, market),
            _ => self.symbol.eq_ignore_ascii_case(&market.asset_symbol),
        }
    }

    /// The pool lists the market asset, and nothing besides it and the paired asset.
    /// Keeps isolated pairs lending the same token apart.
    fn tokens_match(tokens: &[String], market: &LendingMarket) -> bool {
        let known = |token: &str| {
            token_matches(token, market.asset) || market.paired_asset.is_some_and(|paired| token_matches(token, paired))
        };
        tokens.iter().any(|t| token_matches(t, market.asset)) && tokens.iter().all(|t| known(t))
    }

    fn rates(&self) -> RewardRates {
        RewardRates {
            supply: self.apy_reward.unwrap_or(0.0).max(0.0),
            borrow: self.apy_reward_borrow.unwrap_or(0.0).max(0.0),
        }
    }
}

fn token_matches(token: &str, asset: Address) -> bool {
    token.parse::<Address>().map_or(false, |t| t == asset)
}

/// Feed entry for a market, matched on chain, project and underlying tokens.
/// The symbol is only compared for entries that list no tokens.
pub fn lookup(pools: &[YieldPool], market: &LendingMarket) -> Option<RewardRates> {
    let chain = chain_name(market.chain_id);
    let project = market.protocol.feed_project();
    pools.iter().find(|p| p.matches(chain, project, market)).map(YieldPool::rates)
}

/// Typical incentive programs per protocol and asset class
pub fn static_estimate(protocol: Protocol, symbol: &str) -> RewardRates {
    let category = AssetCategory::of(symbol);
    let (supply, borrow) = match (protocol, category) {
        (Protocol::Moonwell, AssetCategory::Stablecoin) => (1.5, 1.0),
        (Protocol::Moonwell, AssetCategory::Eth) => (0.8, 0.4),
        (Protocol::Moonwell, _) => (0.5, 0.25),
        (Protocol::CompoundV3, AssetCategory::Stablecoin) => (0.5, 0.8),
        (Protocol::CompoundV3, AssetCategory::Eth) => (0.2, 0.3),
        _ => (0.0, 0.0),
    };
    RewardRates { supply, borrow }
}

/// Set net APYs from the feed, or the static estimate when the feed has no entry.
/// Returns how many markets were matched in the feed.
pub fn apply_rewards(markets: &mut [LendingMarket], pools: Option<&[YieldPool]>) -> usize {
    let mut matched = 0;
    for market in markets.iter_mut().filter(|m| m.kind == MarketKind::Lending) {
        let rates = match pools.and_then(|pools| lookup(pools, market)) {
            Some(rates) => {
                matched += 1;
                rates
            }
            None => static_estimate(market.protocol, &market.asset_symbol),
        };
        market.net_supply_apy = market.supply_apy + rates.supply;
        market.net_borrow_apy = market.borrow_apy - rates.borrow;
    }
    matched
}

pub struct RewardService {
    client: reqwest::Client,
    feed_url: String,
    cache: Cache<String, Arc<Vec<YieldPool>>>,
}

impl RewardService {
    pub fn new(feed_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("defi-lending-aggregator/0.1")
            .build()
            .unwrap_or_default();

        Self {
            client,
            feed_url: feed_url.into(),
            cache: CacheConfig::reward_feed().build(),
        }
    }

    pub async fn fetch_pools(&self) -> Result<Arc<Vec<YieldPool>>, RewardError> {
        if let Some(pools) = self.cache.get(&self.feed_url).await {
            return Ok(pools);
        }

        let response = self
            .client
            .get(&self.feed_url)
            .send()
            .await
            .map_err(|e| RewardError::RequestFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RewardError::RequestFailed(format!("status {}", response.status())));
        }
        let body: PoolsResponse = response
            .json()
            .await
            .map_err(|e| RewardError::InvalidResponse(e.to_string()))?;

        tracing::debug!(pool_count = body.data.len(), "Fetched reward feed");
        let pools = Arc::new(body.data);
        self.cache.insert(self.feed_url.clone(), pools.clone()).await;
        Ok(pools)
    }

    /// Apply feed or static rewards to `markets`; a feed failure falls back to the static table
    pub async fn enrich(&self, markets: &mut [LendingMarket]) -> usize {
        match self.fetch_pools().await {
            Ok(pools) => apply_rewards(markets, Some(pools.as_slice())),
            Err(e) => {
                tracing::warn!(error = %e, "Reward feed unavailable, using static reward estimates");
                apply_rewards(markets, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketStatus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USDC_BASE: Address = Address::repeat_byte(0xa0);

    fn market(protocol: Protocol, kind: MarketKind) -> LendingMarket {
        LendingMarket {
            id: format!("{}:8453:{:#x}", protocol, USDC_BASE),
            protocol,
            chain_id: 8453,
            kind,
            contract: Address::ZERO,
            asset: USDC_BASE,
            asset_symbol: "USDC".to_string(),
            asset_decimals: 6,
            paired_asset: None,
            paired_symbol: None,
            receipt_token: None,
            price_usd: 1.0,
            supply_apy: 4.0,
            borrow_apy: 6.0,
            net_supply_apy: 4.0,
            net_borrow_apy: 6.0,
            total_supply: 0.0,
            total_supply_usd: 0.0,
            total_borrow: 0.0,
            total_borrow_usd: 0.0,
            available_liquidity: 0.0,
            available_liquidity_usd: 0.0,
            utilization: 0.0,
            ltv: 0.0,
            liquidation_threshold: 0.0,
            liquidation_penalty: 0.0,
            supply_cap: None,
            borrow_cap: None,
            status: MarketStatus {
                is_active: true,
                is_frozen: false,
                is_paused: false,
                can_supply: true,
                can_borrow: true,
                can_use_as_collateral: false,
            },
            last_updated: 0,
        }
    }

    fn feed() -> serde_json::Value {
        serde_json::json!({
            "status": "success",
            "data": [
                {
                    "chain": "Base",
                    "project": "moonwell-lending",
                    "symbol": "USDC",
                    "apyBase": 4.0,
                    "apyReward": 2.25,
                    "apyRewardBorrow": 1.5,
                    "underlyingTokens": [format!("{:#x}", USDC_BASE)]
                },
                {
                    "chain": "Ethereum",
                    "project": "aave-v3",
                    "symbol": "USDC",
                    "apyReward": null
                }
            ]
        })
    }

    #[tokio::test]
    async fn test_feed_rewards_update_net_apys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(feed()))
            .expect(1)
            .mount(&server)
            .await;

        let service = RewardService::new(format!("{}/pools", server.uri()), Duration::from_secs(5));
        let mut markets = vec![
            market(Protocol::Moonwell, MarketKind::Lending),
            market(Protocol::AaveV3, MarketKind::Lending),
        ];
        assert_eq!(service.enrich(&mut markets).await, 1);
        assert_eq!(markets[0].net_supply_apy, 6.25);
        assert_eq!(markets[0].net_borrow_apy, 4.5);
        // No feed entry for Aave on Base and no static program
        assert_eq!(markets[1].net_supply_apy, 4.0);

        // Second call is served from cache
        service.enrich(&mut markets).await;
    }

    fn pool(symbol: &str, tokens: &[Address], reward: f64) -> YieldPool {
        YieldPool {
            chain: "Base".to_string(),
            project: "morpho-blue".to_string(),
            symbol: symbol.to_string(),
            apy_reward: Some(reward),
            apy_reward_borrow: None,
            underlying_tokens: Some(tokens.iter().map(|t| format!("{:#x}", t)).collect()),
        }
    }

    #[test]
    fn test_pairs_lending_same_token_get_their_own_rewards() {
        let weth = Address::repeat_byte(0xee);
        let cbbtc = Address::repeat_byte(0xcb);
        let bridged = Address::repeat_byte(0xa1);

        let mut weth_pair = market(Protocol::MorphoBlue, MarketKind::Lending);
        weth_pair.paired_asset = Some(weth);
        let mut btc_pair = market(Protocol::MorphoBlue, MarketKind::Lending);
        btc_pair.paired_asset = Some(cbbtc);

        let pools = vec![
            pool("USDC", &[bridged, weth], 9.0),
            pool("USDC", &[USDC_BASE, weth], 1.0),
            pool("USDC", &[USDC_BASE, cbbtc], 3.0),
        ];

        assert_eq!(lookup(&pools, &weth_pair).map(|r| r.supply), Some(1.0));
        assert_eq!(lookup(&pools, &btc_pair).map(|r| r.supply), Some(3.0));

        // Same symbol, different token: only entries without tokens fall back to the symbol
        let mut other_usdc = market(Protocol::MorphoBlue, MarketKind::Lending);
        other_usdc.asset = Address::repeat_byte(0x99);
        assert!(lookup(&pools, &other_usdc).is_none());
        let untagged = YieldPool {
            underlying_tokens: None,
            ..pool("USDC", &[], 0.5)
        };
        assert_eq!(lookup(&[untagged], &other_usdc).map(|r| r.supply), Some(0.5));
    }

    #[tokio::test]
    async fn test_feed_failure_uses_static_estimates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let service = RewardService::new(format!("{}/pools", server.uri()), Duration::from_secs(5));
        let mut markets = vec![
            market(Protocol::Moonwell, MarketKind::Lending),
            market(Protocol::MorphoBlue, MarketKind::CollateralOnly),
        ];
        assert_eq!(service.enrich(&mut markets).await, 0);
        assert_eq!(markets[0].net_supply_apy, 5.5);
        assert_eq!(markets[0].net_borrow_apy, 5.0);
        assert_eq!(markets[1].net_supply_apy, 4.0);
    }
}
