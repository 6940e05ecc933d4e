use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{chain_name, supported_protocols};

/// Environment variable prefix; nested keys are joined with `__`
/// (`LENDING__BLOCKCHAIN__RPC_URL`, `LENDING__CACHE__MARKET_TTL_SECONDS`).
pub const ENV_PREFIX: &str = "LENDING";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub blockchain: BlockchainSettings,
    pub cache: CacheSettings,
    pub rewards: RewardSettings,
    pub prices: PriceSettings,
    pub morpho: MorphoSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockchainSettings {
    pub chain_id: u64,
    pub rpc_url: String,
    pub max_retries: u32,
    /// Per-adapter deadline for aggregate reads; 0 disables it
    pub adapter_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub market_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    pub enabled: bool,
    pub feed_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphoSettings {
    /// Morpho Blue market ids to track; empty uses the built-in list
    pub markets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for BlockchainSettings {
    fn default() -> Self {
        BlockchainSettings {
            chain_id: 1,
            rpc_url: "https://eth.llamarpc.com".to_string(),
            max_retries: 3,
            adapter_timeout_ms: 20_000,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings { market_ttl_seconds: 30 }
    }
}

impl Default for RewardSettings {
    fn default() -> Self {
        RewardSettings {
            enabled: true,
            feed_url: "https://yields.llama.fi/pools".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl Default for PriceSettings {
    fn default() -> Self {
        PriceSettings {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            api_key: None,
            timeout_seconds: 10,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl BlockchainSettings {
    pub fn adapter_timeout(&self) -> Option<Duration> {
        (self.adapter_timeout_ms > 0).then(|| Duration::from_millis(self.adapter_timeout_ms))
    }
}

impl CacheSettings {
    pub fn market_ttl(&self) -> Duration {
        Duration::from_secs(self.market_ttl_seconds)
    }
}

impl Settings {
    /// Defaults overlaid with `LENDING__*` environment variables
    pub fn new() -> Result<Self, config::ConfigError> {
        let settings: Settings = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("morpho.markets")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.blockchain.rpc_url.trim().is_empty() {
            return Err(config::ConfigError::Message("blockchain.rpc_url must be set".to_string()));
        }
        if self.blockchain.chain_id == 0 {
            return Err(config::ConfigError::Message("blockchain.chain_id cannot be zero".to_string()));
        }
        if self.api.port == 0 {
            return Err(config::ConfigError::Message("api.port cannot be zero".to_string()));
        }
        if self.rewards.enabled && url::Url::parse(&self.rewards.feed_url).is_err() {
            return Err(config::ConfigError::Message(format!(
                "rewards.feed_url is not a valid URL: {}",
                self.rewards.feed_url
            )));
        }
        if url::Url::parse(&self.prices.base_url).is_err() {
            return Err(config::ConfigError::Message(format!(
                "prices.base_url is not a valid URL: {}",
                self.prices.base_url
            )));
        }
        if supported_protocols(self.blockchain.chain_id).is_empty() {
            // Still a valid deployment: every query answers with empty results
            tracing::warn!(
                chain_id = self.blockchain.chain_id,
                chain = chain_name(self.blockchain.chain_id),
                "No lending protocol is supported on the configured network"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.cache.market_ttl(), Duration::from_secs(30));
        assert_eq!(settings.blockchain.adapter_timeout(), Some(Duration::from_millis(20_000)));
        assert!(settings.morpho.markets.is_empty());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.blockchain.rpc_url = "  ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.rewards.feed_url = "not a url".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.rewards.enabled = false;
        settings.rewards.feed_url = "not a url".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let mut settings = Settings::default();
        settings.blockchain.adapter_timeout_ms = 0;
        assert!(settings.blockchain.adapter_timeout().is_none());
    }
}
