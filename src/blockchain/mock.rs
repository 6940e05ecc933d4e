use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::ethereum_client::{ChainTransport, TransportError};

/// In-memory transport answering `eth_call`s from canned responses.
///
/// Exact calldata matches win over `(address, selector)` matches, so a test can
/// register a catch-all for a function and override single argument sets.
#[derive(Default)]
pub struct MockTransport {
    exact: Mutex<HashMap<(Address, Vec<u8>), Bytes>>,
    by_selector: Mutex<HashMap<(Address, [u8; 4]), Bytes>>,
    gas: Mutex<HashMap<(Address, [u8; 4]), u64>>,
    gas_price: u128,
    calls: Mutex<Vec<(Address, Bytes)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            gas_price: 1_000_000_000,
            ..Default::default()
        }
    }

    /// Answer every call of `C` made to `to`
    pub fn respond<C: SolCall>(&self, to: Address, output: Vec<u8>) {
        self.by_selector
            .lock()
            .unwrap()
            .insert((to, C::SELECTOR), Bytes::from(output));
    }

    /// Answer one exact call
    pub fn respond_to<C: SolCall>(&self, to: Address, call: &C, output: Vec<u8>) {
        self.exact
            .lock()
            .unwrap()
            .insert((to, call.abi_encode()), Bytes::from(output));
    }

    /// Drop the canned answer for `C` on `to` so further calls revert
    pub fn revert<C: SolCall>(&self, to: Address) {
        self.by_selector.lock().unwrap().remove(&(to, C::SELECTOR));
        self.exact
            .lock()
            .unwrap()
            .retain(|(address, data), _| *address != to || !data.starts_with(&C::SELECTOR));
    }

    pub fn gas_for<C: SolCall>(&self, to: Address, gas: u64) {
        self.gas.lock().unwrap().insert((to, C::SELECTOR), gas);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn selector(data: &[u8]) -> [u8; 4] {
        let mut selector = [0u8; 4];
        if data.len() >= 4 {
            selector.copy_from_slice(&data[..4]);
        }
        selector
    }
}

#[async_trait]
impl ChainTransport for MockTransport {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        self.calls.lock().unwrap().push((to, data.clone()));

        if let Some(output) = self.exact.lock().unwrap().get(&(to, data.to_vec())) {
            return Ok(output.clone());
        }
        self.by_selector
            .lock()
            .unwrap()
            .get(&(to, Self::selector(&data)))
            .cloned()
            .ok_or_else(|| TransportError::ContractError(format!("execution reverted: no mock for {}", to)))
    }

    async fn estimate_gas(&self, _from: Address, to: Address, data: Bytes, _value: U256) -> Result<u64, TransportError> {
        self.gas
            .lock()
            .unwrap()
            .get(&(to, Self::selector(&data)))
            .copied()
            .ok_or_else(|| TransportError::RpcError("execution reverted".to_string()))
    }

    async fn gas_price(&self) -> Result<u128, TransportError> {
        Ok(self.gas_price)
    }
}
