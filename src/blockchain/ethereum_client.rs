use alloy::{
    network::TransactionBuilder,
    primitives::{Address, Bytes, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::TransactionRequest,
    sol_types::SolCall,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use std::str::FromStr;
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("RPC connection failed: {0}")]
    RpcError(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Contract call failed: {0}")]
    ContractError(String),

    #[error("Failed to decode {signature} output: {message}")]
    DecodeError { signature: &'static str, message: String },

    #[error("Max retries exceeded: {0}")]
    MaxRetriesExceeded(u32),
}

/// Read/write boundary to the chain. Implementations are assumed idempotent;
/// retries belong to the caller.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// `eth_call` against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError>;

    async fn estimate_gas(&self, from: Address, to: Address, data: Bytes, value: U256) -> Result<u64, TransportError>;

    async fn gas_price(&self) -> Result<u128, TransportError>;
}

/// Encode a typed call, run it through the transport and decode its return values
pub async fn read_contract<C>(transport: &dyn ChainTransport, to: Address, call: C) -> Result<C::Return, TransportError>
where
    C: SolCall + Send,
{
    let data = Bytes::from(call.abi_encode());
    let output = transport.call(to, data).await?;
    C::abi_decode_returns(&output, true).map_err(|e| TransportError::DecodeError {
        signature: C::SIGNATURE,
        message: e.to_string(),
    })
}

/// HTTP JSON-RPC transport backed by an alloy provider
#[derive(Debug, Clone)]
pub struct EthereumClient {
    provider: RootProvider<Http<Client>>,
    rpc_url: String,
    max_retries: u32,
}

impl EthereumClient {
    /// Create a new client with the given RPC URL and check connectivity
    pub async fn new(rpc_url: &str) -> Result<Self, TransportError> {
        let url = rpc_url
            .parse()
            .map_err(|e| TransportError::RpcError(format!("Invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().on_http(url);

        let client = Self {
            provider,
            rpc_url: rpc_url.to_string(),
            max_retries: 3,
        };

        client.test_connection().await?;

        Ok(client)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Test the RPC connection by getting the latest block number
    pub async fn test_connection(&self) -> Result<(), TransportError> {
        match self.provider.get_block_number().await {
            Ok(block_number) => {
                tracing::info!(
                    rpc_url = %self.rpc_url,
                    block_number = %block_number,
                    "Ethereum RPC connection established"
                );
                Ok(())
            }
            Err(e) => Err(TransportError::RpcError(format!(
                "Failed to connect to Ethereum RPC: {}",
                e
            ))),
        }
    }

    /// Validate an account address supplied by a caller
    pub fn validate_address(address: &str) -> Result<Address, TransportError> {
        if address.ends_with(".eth") {
            return Err(TransportError::InvalidAddress(
                "ENS names are not resolved, pass a hex address".to_string(),
            ));
        }

        Address::from_str(address.trim())
            .map_err(|e| TransportError::InvalidAddress(format!("Invalid address format: {}", e)))
    }

    pub fn provider(&self) -> &RootProvider<Http<Client>> {
        &self.provider
    }

    /// Run an `eth_call` with linear backoff between attempts
    async fn call_with_retry(&self, tx: TransactionRequest) -> Result<Bytes, TransportError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            match self.provider.call(&tx).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Contract call failed"
                    );
                    last_error = e.to_string();

                    // Reverts are deterministic, no point retrying them
                    if last_error.contains("revert") {
                        break;
                    }
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    }
                }
            }
        }

        Err(TransportError::ContractError(last_error))
    }
}

#[async_trait]
impl ChainTransport for EthereumClient {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        self.call_with_retry(tx).await
    }

    async fn estimate_gas(&self, from: Address, to: Address, data: Bytes, value: U256) -> Result<u64, TransportError> {
        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(data)
            .with_value(value);

        self.provider
            .estimate_gas(&tx)
            .await
            .map(|gas| gas as u64)
            .map_err(|e| TransportError::RpcError(format!("Failed to estimate gas: {}", e)))
    }

    async fn gas_price(&self) -> Result<u128, TransportError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| TransportError::RpcError(format!("Failed to get gas price: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::contracts::IERC20;
    use crate::blockchain::mock::MockTransport;

    #[test]
    fn test_address_validation() {
        assert!(EthereumClient::validate_address("0x742d35Cc6634C0532925a3b8D8b7C8b8b8b8b8b8").is_ok());
        assert!(EthereumClient::validate_address("0xinvalid").is_err());
        assert!(EthereumClient::validate_address("vitalik.eth").is_err());
    }

    #[tokio::test]
    async fn test_client_creation_with_invalid_url() {
        let result = EthereumClient::new("invalid-url").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_contract_decodes_return_values() {
        let token = Address::repeat_byte(0x11);
        let transport = MockTransport::new();
        transport.respond::<IERC20::decimalsCall>(token, IERC20::decimalsCall::abi_encode_returns(&(6u8,)));

        let decimals = read_contract(&transport, token, IERC20::decimalsCall {}).await.unwrap();
        assert_eq!(decimals._0, 6);
    }

    #[tokio::test]
    async fn test_read_contract_reports_missing_response() {
        let transport = MockTransport::new();
        let result = read_contract(&transport, Address::ZERO, IERC20::symbolCall {}).await;
        assert!(matches!(result, Err(TransportError::ContractError(_))));
    }
}
