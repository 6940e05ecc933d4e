#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use defi_lending_aggregator::adapters::{AdapterError, LendingAdapter};
use defi_lending_aggregator::blockchain::{ChainTransport, TransportError};
use defi_lending_aggregator::models::{
    now_secs, ActionParams, CollateralParams, LendingMarket, LendingPosition, MarketKind, MarketStatus, Protocol,
    SimulatedAction, TransactionCall,
};
use defi_lending_aggregator::risk::RiskSnapshot;
use defi_lending_aggregator::services::{PriceError, PriceOracle};
use defi_lending_aggregator::utils::math::{from_units, to_units};

pub const CHAIN_ID: u64 = 8453;

pub fn token(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn account() -> Address {
    Address::repeat_byte(0xee)
}

/// Open lending market with ample liquidity and no caps
pub fn market(protocol: Protocol, symbol: &str, asset: Address, supply_apy: f64, borrow_apy: f64) -> LendingMarket {
    LendingMarket {
        id: format!("{}:{}:{:#x}", protocol, CHAIN_ID, asset),
        protocol,
        chain_id: CHAIN_ID,
        kind: MarketKind::Lending,
        contract: Address::repeat_byte(0x50),
        asset,
        asset_symbol: symbol.to_string(),
        asset_decimals: 6,
        paired_asset: None,
        paired_symbol: None,
        receipt_token: None,
        price_usd: 1.0,
        supply_apy,
        borrow_apy,
        net_supply_apy: supply_apy,
        net_borrow_apy: borrow_apy,
        total_supply: 1_000_000.0,
        total_supply_usd: 1_000_000.0,
        total_borrow: 500_000.0,
        total_borrow_usd: 500_000.0,
        available_liquidity: 500_000.0,
        available_liquidity_usd: 500_000.0,
        utilization: 0.5,
        ltv: 0.8,
        liquidation_threshold: 0.825,
        liquidation_penalty: 0.05,
        supply_cap: None,
        borrow_cap: None,
        status: MarketStatus {
            is_active: true,
            is_frozen: false,
            is_paused: false,
            can_supply: true,
            can_borrow: true,
            can_use_as_collateral: true,
        },
        last_updated: now_secs(),
    }
}

/// Position in `market` valued at $1 per whole unit
pub fn position(market: &LendingMarket, supplied: f64, borrowed: f64) -> LendingPosition {
    LendingPosition {
        id: format!("{}:{:#x}", market.id, account()),
        market_id: market.id.clone(),
        protocol: market.protocol,
        chain_id: market.chain_id,
        account: account(),
        asset: market.asset,
        asset_symbol: market.asset_symbol.clone(),
        asset_decimals: market.asset_decimals,
        supply_balance: from_units(supplied, market.asset_decimals),
        supply_shares: None,
        borrow_balance: from_units(borrowed, market.asset_decimals),
        borrow_shares: None,
        collateral_balance: U256::ZERO,
        supply_balance_usd: supplied * market.price_usd,
        borrow_balance_usd: borrowed * market.price_usd,
        collateral_balance_usd: 0.0,
        supply_apy: market.supply_apy,
        borrow_apy: market.borrow_apy,
        collateral_enabled: supplied > 0.0,
        health_factor: None,
    }
}

/// In-memory adapter: markets and positions are fixed, health factor is the
/// liquidation-threshold weighted ratio over its own positions
pub struct FakeAdapter {
    pub protocol: Protocol,
    pub markets: Vec<LendingMarket>,
    pub positions: Vec<LendingPosition>,
    pub wallet: U256,
    pub fail_reads: bool,
    pub fail_simulation: bool,
    pub fail_health: bool,
    pub market_reads: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(protocol: Protocol, markets: Vec<LendingMarket>) -> Self {
        Self {
            protocol,
            markets,
            positions: Vec::new(),
            wallet: U256::MAX,
            fail_reads: false,
            fail_simulation: false,
            fail_health: false,
            market_reads: AtomicUsize::new(0),
        }
    }

    pub fn failing(protocol: Protocol) -> Self {
        Self {
            fail_reads: true,
            ..Self::new(protocol, Vec::new())
        }
    }

    pub fn with_positions(mut self, positions: Vec<LendingPosition>) -> Self {
        self.positions = positions;
        self
    }

    pub fn with_wallet(mut self, wallet: U256) -> Self {
        self.wallet = wallet;
        self
    }

    /// Exact projections fail as an unreachable oracle would
    pub fn without_simulation(mut self) -> Self {
        self.fail_simulation = true;
        self
    }

    /// Current health factor reads fail too
    pub fn without_health_reads(mut self) -> Self {
        self.fail_health = true;
        self
    }

    pub fn reads(&self) -> usize {
        self.market_reads.load(Ordering::SeqCst)
    }

    fn market(&self, market_id: &str) -> Result<&LendingMarket, AdapterError> {
        self.markets
            .iter()
            .find(|m| m.id == market_id)
            .ok_or_else(|| AdapterError::MarketNotFound(market_id.to_string()))
    }

    fn snapshot(&self) -> RiskSnapshot {
        let weighted = self
            .positions
            .iter()
            .filter(|p| p.collateral_enabled)
            .map(|p| {
                let lt = self.market(&p.market_id).map(|m| m.liquidation_threshold).unwrap_or(0.0);
                p.collateral_value_usd() * lt
            })
            .sum();
        let debt = self.positions.iter().map(|p| p.borrow_balance_usd).sum();
        RiskSnapshot::new(weighted, debt)
    }

    fn plan(&self, action: &str, market_id: &str) -> Result<Vec<TransactionCall>, AdapterError> {
        let market = self.market(market_id)?;
        Ok(vec![TransactionCall {
            to: market.contract,
            data: Bytes::new(),
            value: U256::ZERO,
            description: format!("{} {} {}", self.protocol, action, market.asset_symbol),
        }])
    }
}

#[async_trait]
impl LendingAdapter for FakeAdapter {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        self.market_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(AdapterError::RpcError("connection refused".to_string()));
        }
        Ok(self.markets.clone())
    }

    async fn get_user_positions(&self, _account: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        if self.fail_reads {
            return Err(AdapterError::RpcError("connection refused".to_string()));
        }
        let hf = self.snapshot().health_factor();
        let has_debt = self.positions.iter().any(|p| p.has_debt());
        Ok(self
            .positions
            .iter()
            .cloned()
            .map(|mut p| {
                p.health_factor = has_debt.then_some(hf);
                p
            })
            .collect())
    }

    async fn wallet_balance(&self, _asset: Address, _account: Address) -> Result<U256, AdapterError> {
        Ok(self.wallet)
    }

    async fn build_supply(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.plan("supply", &params.market_id)
    }

    async fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.plan("withdraw", &params.market_id)
    }

    async fn build_borrow(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.plan("borrow", &params.market_id)
    }

    async fn build_repay(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.plan("repay", &params.market_id)
    }

    async fn build_enable_collateral(&self, params: &CollateralParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.plan("collateral", &params.market_id)
    }

    async fn calculate_health_factor(&self, _account: Address) -> Result<f64, AdapterError> {
        if self.fail_health {
            return Err(AdapterError::RpcError("account data unavailable".to_string()));
        }
        Ok(self.snapshot().health_factor())
    }

    async fn simulate_health_factor(&self, _account: Address, action: &SimulatedAction) -> Result<f64, AdapterError> {
        let market = self.market(&action.market_id)?;
        if self.fail_simulation {
            return Err(AdapterError::ContractError("oracle price read reverted".to_string()));
        }
        let amount_usd = to_units(action.amount, market.asset_decimals) * market.price_usd;
        Ok(self
            .snapshot()
            .project(action.kind, amount_usd, market.liquidation_threshold))
    }
}

/// Transport with no contracts behind it
pub struct NullTransport;

#[async_trait]
impl ChainTransport for NullTransport {
    async fn call(&self, to: Address, _data: Bytes) -> Result<Bytes, TransportError> {
        Err(TransportError::ContractError(format!("no contract at {}", to)))
    }

    async fn estimate_gas(&self, _from: Address, _to: Address, _data: Bytes, _value: U256) -> Result<u64, TransportError> {
        Ok(21_000)
    }

    async fn gas_price(&self) -> Result<u128, TransportError> {
        Ok(2_000_000_000)
    }
}

pub struct FixedPrices(pub f64);

#[async_trait]
impl PriceOracle for FixedPrices {
    async fn get_asset_price_usd(&self, _symbol: &str) -> Result<f64, PriceError> {
        Ok(self.0)
    }
}
