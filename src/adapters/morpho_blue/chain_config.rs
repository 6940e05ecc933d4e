// Morpho Blue deployments and tracked markets
use alloy::primitives::{address, b256, Address, B256};

use crate::models::chains;

/// Morpho Blue singleton, same address on every deployment
pub const MORPHO: Address = address!("BBBBBbbBBb9cC5e90e3b3Af64bdAF62C37EEFFCb");

pub fn is_supported_chain(chain_id: u64) -> bool {
    matches!(chain_id, chains::ETHEREUM | chains::BASE)
}

/// Markets tracked when none are configured
pub fn default_markets(chain_id: u64) -> Vec<B256> {
    match chain_id {
        chains::ETHEREUM => vec![
            b256!("c54d7acf14de29e0e5527cabd7a576506870346a78a11a6762e2cca66322ec41"), // wstETH/WETH 94.5%
            b256!("b323495f7e4148be5643a4ea4a8221eef163e4bccfdedc2a6f4696baacbc86cc"), // wstETH/USDC 86%
            b256!("3a85e619751152991742810df6ec69ce473daef99e28a64ab2340d7b7ccfee49"), // WBTC/USDC 86%
        ],
        chains::BASE => vec![
            b256!("8793cf302b8ffd655ab97bd1c695dbd967807e8367a65cb2f4edaf1380ba1bda"), // WETH/USDC 86%
            b256!("dba352d93a64b17c71104cbddc6aef85cd432322a1446b5b65163cbbc615cd0c"), // cbETH/USDC 86%
        ],
        _ => Vec::new(),
    }
}

/// Parse configured `0x`-prefixed market ids, dropping malformed entries
pub fn parse_market_ids(ids: &[String]) -> Vec<B256> {
    ids.iter()
        .filter_map(|id| match id.trim().parse::<B256>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(market_id = %id, "Ignoring malformed Morpho market id");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_chains_have_markets() {
        for chain_id in [chains::ETHEREUM, chains::BASE] {
            assert!(is_supported_chain(chain_id));
            assert!(!default_markets(chain_id).is_empty());
        }
        assert!(!is_supported_chain(chains::ARBITRUM));
        assert!(default_markets(chains::POLYGON).is_empty());
    }

    #[test]
    fn test_parse_market_ids_skips_garbage() {
        let ids = parse_market_ids(&[
            "0xc54d7acf14de29e0e5527cabd7a576506870346a78a11a6762e2cca66322ec41".to_string(),
            "not-a-market".to_string(),
        ]);
        assert_eq!(ids.len(), 1);
    }
}
