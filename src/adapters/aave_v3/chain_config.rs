// Aave V3 deployments per chain
use alloy::primitives::{address, Address};

use crate::models::chains;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AaveV3Deployment {
    pub chain_id: u64,
    pub pool: Address,
    pub data_provider: Address,
}

pub fn deployment(chain_id: u64) -> Option<AaveV3Deployment> {
    let (pool, data_provider) = match chain_id {
        chains::ETHEREUM => (
            address!("87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2"),
            address!("7B4EB56E7CD4b454BA8ff71E4518426369a138a3"),
        ),
        // Same addresses on the three L2 deployments
        chains::ARBITRUM | chains::OPTIMISM | chains::POLYGON => (
            address!("794a61358D6845594F94dc1DB02A252b5b4814aD"),
            address!("69FA688f1Dc47d4B5d8029D5a35FB7a548310654"),
        ),
        chains::BASE => (
            address!("A238Dd80C259a72e81d7e4664a9801593F98d1c5"),
            address!("2d8A3C5677189723C4cB8873CfC9C8976FDF38Ac"),
        ),
        _ => return None,
    };

    Some(AaveV3Deployment {
        chain_id,
        pool,
        data_provider,
    })
}

pub mod validation {
    use super::*;

    pub fn validate_config(config: &AaveV3Deployment) -> Result<(), String> {
        if config.chain_id == 0 {
            return Err("Chain ID cannot be zero".to_string());
        }
        if config.pool == Address::ZERO {
            return Err("Pool address cannot be zero".to_string());
        }
        if config.data_provider == Address::ZERO {
            return Err("Data provider address cannot be zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{supported_protocols, Protocol};

    #[test]
    fn test_every_supported_chain_has_valid_deployment() {
        for chain_id in [chains::ETHEREUM, chains::OPTIMISM, chains::POLYGON, chains::BASE, chains::ARBITRUM] {
            assert!(supported_protocols(chain_id).contains(&Protocol::AaveV3));
            let config = deployment(chain_id).unwrap();
            assert!(validation::validate_config(&config).is_ok());
        }
        assert!(deployment(56).is_none());
    }

    #[test]
    fn test_zero_pool_rejected() {
        let config = AaveV3Deployment {
            chain_id: 1,
            pool: Address::ZERO,
            data_provider: Address::repeat_byte(1),
        };
        assert!(validation::validate_config(&config).is_err());
    }
}
