use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use std::time::Duration;

use crate::adapters::base::AssetCategory;
use crate::utils::CacheConfig;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PriceError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

/// USD spot prices by token symbol
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_asset_price_usd(&self, symbol: &str) -> Result<f64, PriceError>;
}

/// Price lookup that degrades to zero, logging the failure
pub async fn price_or_zero(oracle: &dyn PriceOracle, symbol: &str) -> f64 {
    match oracle.get_asset_price_usd(symbol).await {
        Ok(price) => price,
        Err(e) => {
            tracing::warn!(symbol, error = %e, "Price lookup failed, valuing asset at zero");
            0.0
        }
    }
}

/// CoinGecko `simple/price` client with a short-lived moka cache
pub struct CoinGeckoPriceOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cache: Cache<String, f64>,
}

impl CoinGeckoPriceOracle {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("defi-lending-aggregator/0.1")
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            cache: CacheConfig::price_data().build(),
        }
    }

    /// CoinGecko coin id for a token symbol
    pub fn coin_id(symbol: &str) -> Option<&'static str> {
        let id = match symbol.to_ascii_uppercase().as_str() {
            "ETH" | "WETH" => "ethereum",
            "WSTETH" => "wrapped-steth",
            "CBETH" => "coinbase-wrapped-staked-eth",
            "RETH" => "rocket-pool-eth",
            "WEETH" => "wrapped-eeth",
            "EZETH" => "renzo-restaked-eth",
            "WBTC" => "wrapped-bitcoin",
            "CBBTC" => "coinbase-wrapped-btc",
            "TBTC" => "tbtc",
            "USDC" | "USDC.E" | "USDBC" => "usd-coin",
            "USDT" | "USDT0" => "tether",
            "DAI" => "dai",
            "GHO" => "gho",
            "LUSD" => "liquity-usd",
            "FRAX" => "frax",
            "USDE" => "ethena-usde",
            "SUSDE" => "ethena-staked-usde",
            "EURC" => "euro-coin",
            "LINK" => "chainlink",
            "AAVE" => "aave",
            "UNI" => "uniswap",
            "COMP" => "compound-governance-token",
            "WELL" => "moonwell-artemis",
            "OP" => "optimism",
            "ARB" => "arbitrum",
            "MATIC" | "WMATIC" | "POL" | "WPOL" => "matic-network",
            "AERO" => "aerodrome-finance",
            _ => return None,
        };
        Some(id)
    }

    async fn fetch_price(&self, coin_id: &str) -> Result<f64, PriceError> {
        let mut request = self
            .client
            .get(format!("{}/simple/price", self.base_url))
            .query(&[("ids", coin_id), ("vs_currencies", "usd")]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("x_cg_demo_api_key", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PriceError::ApiError(format!("Request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PriceError::RateLimitExceeded);
        }
        if !response.status().is_success() {
            return Err(PriceError::ApiError(format!("API returned status: {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PriceError::InvalidResponse(format!("JSON parse error: {}", e)))?;

        body[coin_id]["usd"]
            .as_f64()
            .ok_or_else(|| PriceError::InvalidResponse(format!("{} price not found in response", coin_id)))
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoPriceOracle {
    async fn get_asset_price_usd(&self, symbol: &str) -> Result<f64, PriceError> {
        let key = symbol.to_ascii_uppercase();
        if let Some(price) = self.cache.get(&key).await {
            return Ok(price);
        }

        let result = match Self::coin_id(&key) {
            Some(coin_id) => self.fetch_price(coin_id).await,
            None => Err(PriceError::TokenNotFound(symbol.to_string())),
        };

        let price = match result {
            Ok(price) => price,
            // Dollar stablecoins hold their peg closely enough to value positions
            Err(e) if AssetCategory::of(&key) == AssetCategory::Stablecoin && key != "EURC" => {
                tracing::debug!(symbol, error = %e, "Using $1 peg for stablecoin");
                1.0
            }
            Err(e) => return Err(e),
        };

        self.cache.insert(key, price).await;
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetches_and_caches_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", "ethereum"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ethereum": {"usd": 3150.5}})))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = CoinGeckoPriceOracle::new(server.uri(), None, Duration::from_secs(5));
        assert_eq!(oracle.get_asset_price_usd("WETH").await.unwrap(), 3150.5);
        assert_eq!(oracle.get_asset_price_usd("weth").await.unwrap(), 3150.5);
    }

    #[tokio::test]
    async fn test_stablecoin_falls_back_to_peg() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let oracle = CoinGeckoPriceOracle::new(server.uri(), None, Duration::from_secs(5));
        assert_eq!(oracle.get_asset_price_usd("USDC").await.unwrap(), 1.0);
        assert!(oracle.get_asset_price_usd("LINK").await.is_err());
        assert_eq!(price_or_zero(&oracle, "UNKNOWN").await, 0.0);
    }
}
