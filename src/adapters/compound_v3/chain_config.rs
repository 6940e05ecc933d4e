// Known Comet deployments per chain
use alloy::primitives::{address, Address};

use crate::models::chains;

/// Comet proxies deployed on `chain_id`, one per base asset
pub fn comets(chain_id: u64) -> &'static [Address] {
    const ETHEREUM_COMETS: &[Address] = &[
        address!("c3d688B66703497DAA19211EEdff47f25384cdc3"), // USDC
        address!("A17581A9E3356d9A858b789D68B4d866e593aE94"), // WETH
        address!("3Afdc9BCA9213A35503b077a6072F3D0d5AB0840"), // USDT
    ];
    const BASE_COMETS: &[Address] = &[
        address!("b125E6687d4313864e53df431d5425969c15Eb2F"), // USDC
        address!("9c4ec768c28520B50860ea7a15bd7213a9fF58bf"), // USDbC
        address!("46e6b214b524310239732D51387075E0e70970bf"), // WETH
    ];
    const ARBITRUM_COMETS: &[Address] = &[
        address!("9c4ec768c28520B50860ea7a15bd7213a9fF58bf"), // USDC
        address!("A5EDBDD9646f8dFF606d7448e414884C7d905dCA"), // USDC.e
        address!("6f7D514bbD4aFf3BcD1140B7344b32f063dEe486"), // WETH
    ];
    const OPTIMISM_COMETS: &[Address] = &[
        address!("2e44e174f7D53F0212823acC11C01A11d58c5bCB"), // USDC
        address!("995E394b8B2437aC8Ce61Ee0bC610D617962B214"), // USDT
        address!("E36A30D249f7761327fd973001A32010b521b6Fd"), // WETH
    ];
    const POLYGON_COMETS: &[Address] = &[
        address!("F25212E676D1F7F89Cd72fFEe66158f541246445"), // USDC.e
        address!("aeB318360f27748Acb200CE616E389A6C9409a07"), // USDT
        ];
    match chain_id {
        chains::ETHEREUM => ETHEREUM_COMETS,
        chains::BASE => BASE_COMETS,
        chains::ARBITRUM => ARBITRUM_COMETS,
        chains::OPTIMISM => OPTIMISM_COMETS,
        chains::POLYGON => POLYGON_COMETS,
        _ => &[],
    }
}

pub fn is_supported_chain(chain_id: u64) -> bool {
    !comets(chain_id).is_empty()
}

pub mod validation {
    use super::*;

    pub fn validate_comets(chain_id: u64, comets: &[Address]) -> Result<(), String> {
        if chain_id == 0 {
            return Err("Chain ID cannot be zero".to_string());
        }
        if comets.is_empty() {
            return Err("Must have at least one Comet address".to_string());
        }
        if comets.iter().any(|c| *c == Address::ZERO) {
            return Err("Comet address cannot be zero".to_string());
        }
        Ok(())
    }
}
