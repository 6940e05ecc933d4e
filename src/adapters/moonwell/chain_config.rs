// Moonwell comptrollers per chain
use alloy::primitives::{address, Address};

use crate::models::chains;

pub fn comptroller(chain_id: u64) -> Option<Address> {
    match chain_id {
        chains::BASE => Some(address!("fBb21d0380beE3312B33c4353c8936a0F13EF26C")),
        chains::OPTIMISM => Some(address!("Ca889f40aae37FFf165BccF69aeF1E82b5C511B9")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{supported_protocols, Protocol};

    #[test]
    fn test_comptroller_matches_support_map() {
        for chain_id in [chains::ETHEREUM, chains::OPTIMISM, chains::POLYGON, chains::BASE, chains::ARBITRUM] {
            let listed = supported_protocols(chain_id).contains(&Protocol::Moonwell);
            assert_eq!(comptroller(chain_id).is_some(), listed);
        }
    }
}
