use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chain ids of the networks the aggregator knows about
pub mod chains {
    pub const ETHEREUM: u64 = 1;
    pub const OPTIMISM: u64 = 10;
    pub const POLYGON: u64 = 137;
    pub const BASE: u64 = 8453;
    pub const ARBITRUM: u64 = 42161;
}

/// Lending protocols with an adapter implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Pooled market (one pool, many reserves)
    AaveV3,
    /// Single-base-asset market (Comet)
    CompoundV3,
    /// Isolated loan/collateral pairs
    MorphoBlue,
    /// Compound V2 fork (mToken markets behind a comptroller)
    Moonwell,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::AaveV3,
        Protocol::CompoundV3,
        Protocol::MorphoBlue,
        Protocol::Moonwell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::AaveV3 => "aave_v3",
            Protocol::CompoundV3 => "compound_v3",
            Protocol::MorphoBlue => "morpho_blue",
            Protocol::Moonwell => "moonwell",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Protocol::AaveV3 => "Aave V3",
            Protocol::CompoundV3 => "Compound V3",
            Protocol::MorphoBlue => "Morpho Blue",
            Protocol::Moonwell => "Moonwell",
        }
    }

    /// Project slug used by the yield feed (DefiLlama naming)
    pub fn feed_project(&self) -> &'static str {
        match self {
            Protocol::AaveV3 => "aave-v3",
            Protocol::CompoundV3 => "compound-v3",
            Protocol::MorphoBlue => "morpho-blue",
            Protocol::Moonwell => "moonwell-lending",
        }
    }

    /// Resolve the owning protocol from a composite market id (`<protocol>:<chain>:...`)
    pub fn from_market_id(market_id: &str) -> Option<Protocol> {
        market_id
            .split(':')
            .next()
            .and_then(|prefix| prefix.parse().ok())
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aave_v3" | "aave-v3" | "aave" => Ok(Protocol::AaveV3),
            "compound_v3" | "compound-v3" | "comet" => Ok(Protocol::CompoundV3),
            "morpho_blue" | "morpho-blue" | "morpho" => Ok(Protocol::MorphoBlue),
            "moonwell" => Ok(Protocol::Moonwell),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

/// Protocols deployed on a network. Unknown networks have none.
pub fn supported_protocols(chain_id: u64) -> &'static [Protocol] {
    match chain_id {
        chains::ETHEREUM => &[Protocol::AaveV3, Protocol::CompoundV3, Protocol::MorphoBlue],
        chains::BASE => &[
            Protocol::AaveV3,
            Protocol::CompoundV3,
            Protocol::MorphoBlue,
            Protocol::Moonwell,
        ],
        chains::ARBITRUM => &[Protocol::AaveV3, Protocol::CompoundV3],
        chains::OPTIMISM => &[Protocol::AaveV3, Protocol::CompoundV3, Protocol::Moonwell],
        chains::POLYGON => &[Protocol::AaveV3, Protocol::CompoundV3],
        _ => &[],
    }
}

/// Human readable chain name, also the chain key of the yield feed
pub fn chain_name(chain_id: u64) -> &'static str {
    match chain_id {
        chains::ETHEREUM => "Ethereum",
        chains::OPTIMISM => "Optimism",
        chains::POLYGON => "Polygon",
        chains::BASE => "Base",
        chains::ARBITRUM => "Arbitrum",
        _ => "Unknown",
    }
}
