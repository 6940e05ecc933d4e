pub mod ethereum_client;

#[cfg(test)]
pub mod mock;

pub use ethereum_client::{read_contract, ChainTransport, EthereumClient, TransportError};
