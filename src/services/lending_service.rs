use alloy::primitives::{Address, U256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::adapters::{
    base, AaveV3Adapter, AdapterError, CompoundV3Adapter, LendingAdapter, MoonwellAdapter, MorphoBlueAdapter,
};
use crate::adapters::morpho_blue::chain_config::parse_market_ids;
use crate::blockchain::ChainTransport;
use crate::config::Settings;
use crate::models::{
    supported_protocols, ActionErrorCode, ActionParams, CollateralParams, LendingMarket, PlanGasEstimate,
    PortfolioPositions, Protocol, RoutingSuggestion, SimulatedAction, TransactionCall, ValidationResult,
};
use crate::services::price_service::PriceOracle;
use crate::services::reward_service::RewardService;
use crate::services::routing;
use crate::utils::gather;

/// Aggregated market list and when it was read
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub markets: Vec<LendingMarket>,
    pub fetched_at: Instant,
}

/// Entry point over every protocol adapter configured for one network
pub struct LendingService {
    chain_id: u64,
    transport: Arc<dyn ChainTransport>,
    adapters: BTreeMap<Protocol, Arc<dyn LendingAdapter>>,
    rewards: Option<Arc<RewardService>>,
    snapshot: Arc<RwLock<Option<MarketSnapshot>>>,
    market_ttl: Duration,
    adapter_timeout: Option<Duration>,
}

impl LendingService {
    /// One adapter per protocol deployed on `chain_id`; an adapter that fails to
    /// initialize is left out and logged
    pub fn new(
        chain_id: u64,
        transport: Arc<dyn ChainTransport>,
        prices: Arc<dyn PriceOracle>,
        settings: &Settings,
    ) -> Self {
        let mut adapters: Vec<Arc<dyn LendingAdapter>> = Vec::new();
        for protocol in supported_protocols(chain_id) {
            let adapter: Result<Arc<dyn LendingAdapter>, AdapterError> = match protocol {
                Protocol::AaveV3 => AaveV3Adapter::new(transport.clone(), prices.clone(), chain_id)
                    .map(|a| Arc::new(a) as Arc<dyn LendingAdapter>),
                Protocol::CompoundV3 => CompoundV3Adapter::new(transport.clone(), prices.clone(), chain_id)
                    .map(|a| Arc::new(a) as Arc<dyn LendingAdapter>),
                Protocol::MorphoBlue => MorphoBlueAdapter::new(
                    transport.clone(),
                    prices.clone(),
                    chain_id,
                    parse_market_ids(&settings.morpho.markets),
                )
                .map(|a| Arc::new(a) as Arc<dyn LendingAdapter>),
                Protocol::Moonwell => MoonwellAdapter::new(transport.clone(), prices.clone(), chain_id)
                    .map(|a| Arc::new(a) as Arc<dyn LendingAdapter>),
            };
            match adapter {
                Ok(adapter) => adapters.push(adapter),
                Err(e) => tracing::error!(protocol = %protocol, chain_id, error = %e, "Failed to initialize adapter"),
            }
        }

        let rewards = settings.rewards.enabled.then(|| {
            Arc::new(RewardService::new(
                settings.rewards.feed_url.clone(),
                Duration::from_secs(settings.rewards.timeout_seconds),
            ))
        });

        Self::with_adapters(chain_id, transport, adapters)
            .with_rewards(rewards)
            .with_market_ttl(settings.cache.market_ttl())
            .with_adapter_timeout(settings.blockchain.adapter_timeout())
    }

    /// Service over an explicit adapter set, without reward enrichment
    pub fn with_adapters(
        chain_id: u64,
        transport: Arc<dyn ChainTransport>,
        adapters: Vec<Arc<dyn LendingAdapter>>,
    ) -> Self {
        let adapters: BTreeMap<Protocol, Arc<dyn LendingAdapter>> =
            adapters.into_iter().map(|a| (a.protocol(), a)).collect();
        tracing::info!(
            chain_id,
            protocols = ?adapters.keys().collect::<Vec<_>>(),
            "Lending service ready"
        );

        Self {
            chain_id,
            transport,
            adapters,
            rewards: None,
            snapshot: Arc::new(RwLock::new(None)),
            market_ttl: Duration::from_secs(30),
            adapter_timeout: None,
        }
    }

    pub fn with_rewards(mut self, rewards: Option<Arc<RewardService>>) -> Self {
        self.rewards = rewards;
        self
    }

    pub fn with_market_ttl(mut self, ttl: Duration) -> Self {
        self.market_ttl = ttl;
        self
    }

    pub fn with_adapter_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.adapters.keys().copied().collect()
    }

    fn adapter(&self, protocol: Protocol) -> Result<&Arc<dyn LendingAdapter>, AdapterError> {
        self.adapters
            .get(&protocol)
            .ok_or_else(|| AdapterError::UnsupportedProtocol(format!("{} on chain {}", protocol, self.chain_id)))
    }

    fn adapter_for(&self, market_id: &str) -> Result<&Arc<dyn LendingAdapter>, AdapterError> {
        let protocol = Protocol::from_market_id(market_id).ok_or_else(|| {
            AdapterError::UnsupportedProtocol(market_id.split(':').next().unwrap_or_default().to_string())
        })?;
        self.adapter(protocol)
    }

    async fn cached_markets(&self) -> Option<Vec<LendingMarket>> {
        let guard = self.snapshot.read().await;
        guard
            .as_ref()
            .filter(|s| s.fetched_at.elapsed() < self.market_ttl)
            .map(|s| s.markets.clone())
    }

    /// Every market of every adapter, largest supply first. A failing adapter
    /// contributes nothing; the call itself never fails.
    pub async fn get_markets(&self, force_refresh: bool) -> Vec<LendingMarket> {
        if !force_refresh {
            if let Some(markets) = self.cached_markets().await {
                tracing::debug!(market_count = markets.len(), "Serving markets from cache");
                return markets;
            }
        }

        let tasks = self
            .adapters
            .iter()
            .map(|(protocol, adapter)| {
                let adapter = adapter.clone();
                (*protocol, async move { adapter.get_markets().await })
            })
            .collect();
        let report = gather(tasks, self.adapter_timeout).await;
        report.log_failures("get_markets");

        let should_cache = !report.successes.is_empty() || self.adapters.is_empty();
        let mut markets: Vec<LendingMarket> = report.into_values().flatten().collect();
        markets.sort_by(|a, b| {
            b.total_supply_usd
                .partial_cmp(&a.total_supply_usd)
                .unwrap_or(Ordering::Equal)
        });

        tracing::info!(chain_id = self.chain_id, market_count = markets.len(), "Fetched lending markets");

        if should_cache {
            let fetched_at = Instant::now();
            *self.snapshot.write().await = Some(MarketSnapshot {
                markets: markets.clone(),
                fetched_at,
            });
            self.spawn_reward_enrichment(fetched_at);
        }
        markets
    }

    /// Apply incentive APYs to the stored snapshot in the background. The update is
    /// dropped if a newer snapshot replaced the one it was started for.
    fn spawn_reward_enrichment(&self, fetched_at: Instant) {
        let Some(rewards) = self.rewards.clone() else {
            return;
        };
        let snapshot = self.snapshot.clone();

        tokio::spawn(async move {
            let Some(mut markets) = snapshot
                .read()
                .await
                .as_ref()
                .filter(|s| s.fetched_at == fetched_at)
                .map(|s| s.markets.clone())
            else {
                return;
            };
            if markets.is_empty() {
                return;
            }

            let matched = rewards.enrich(&mut markets).await;

            let mut guard = snapshot.write().await;
            match guard.as_mut() {
                Some(current) if current.fetched_at == fetched_at => {
                    current.markets = markets;
                    tracing::debug!(matched, "Applied reward APYs to market snapshot");
                }
                _ => tracing::debug!("Market snapshot replaced before rewards landed, discarding"),
            }
        });
    }

    pub async fn get_market(&self, market_id: &str) -> Result<LendingMarket, AdapterError> {
        let adapter = self.adapter_for(market_id)?;
        if let Some(market) = self
            .get_markets(false)
            .await
            .into_iter()
            .find(|m| m.id.eq_ignore_ascii_case(market_id))
        {
            return Ok(market);
        }
        adapter
            .get_market(market_id)
            .await?
            .ok_or_else(|| AdapterError::MarketNotFound(market_id.to_string()))
    }

    /// Positions across every protocol with totals and the lowest health factor
    pub async fn get_user_positions(&self, account: Address) -> PortfolioPositions {
        let tasks = self
            .adapters
            .iter()
            .map(|(protocol, adapter)| {
                let adapter = adapter.clone();
                (*protocol, async move { adapter.get_user_positions(account).await })
            })
            .collect();
        let report = gather(tasks, self.adapter_timeout).await;
        report.log_failures("get_user_positions");

        let positions = report.into_values().flatten().filter(|p| !p.is_empty()).collect();
        let portfolio = PortfolioPositions::from_positions(account, self.chain_id, positions);
        tracing::info!(
            account = %account,
            position_count = portfolio.positions.len(),
            health_factor = portfolio.health_factor,
            "Aggregated lending positions"
        );
        portfolio
    }

    async fn held_market_ids(&self, account: Option<Address>) -> HashSet<String> {
        match account {
            Some(account) => self
                .get_user_positions(account)
                .await
                .positions
                .into_iter()
                .map(|p| p.market_id)
                .collect(),
            None => HashSet::new(),
        }
    }

    /// Best market to supply `amount` (whole units) of `asset_symbol`
    pub async fn get_supply_routing_suggestion(
        &self,
        asset_symbol: &str,
        amount: f64,
        account: Option<Address>,
    ) -> Option<RoutingSuggestion> {
        let (markets, held) = tokio::join!(self.get_markets(false), self.held_market_ids(account));
        routing::suggest_supply(&markets, asset_symbol, amount, &held)
    }

    /// Cheapest market to borrow `amount` (whole units) of `asset_symbol`
    pub async fn get_borrow_routing_suggestion(
        &self,
        asset_symbol: &str,
        amount: f64,
        account: Option<Address>,
    ) -> Option<RoutingSuggestion> {
        let (markets, held) = tokio::join!(self.get_markets(false), self.held_market_ids(account));
        routing::suggest_borrow(&markets, asset_symbol, amount, &held)
    }

    pub async fn build_supply(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.adapter_for(&params.market_id)?.build_supply(params).await
    }

    pub async fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.adapter_for(&params.market_id)?.build_withdraw(params).await
    }

    pub async fn build_borrow(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.adapter_for(&params.market_id)?.build_borrow(params).await
    }

    pub async fn build_repay(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.adapter_for(&params.market_id)?.build_repay(params).await
    }

    pub async fn build_enable_collateral(&self, params: &CollateralParams) -> Result<Vec<TransactionCall>, AdapterError> {
        self.adapter_for(&params.market_id)?.build_enable_collateral(params).await
    }

    fn unsupported_protocol(error: AdapterError) -> ValidationResult {
        let mut result = ValidationResult::new();
        result.error(ActionErrorCode::ProtocolNotSupported, error.to_string(), None);
        result
    }

    pub async fn validate_supply(&self, params: &ActionParams) -> ValidationResult {
        match self.adapter_for(&params.market_id) {
            Ok(adapter) => adapter.validate_supply(params).await,
            Err(e) => Self::unsupported_protocol(e),
        }
    }

    pub async fn validate_withdraw(&self, params: &ActionParams) -> ValidationResult {
        match self.adapter_for(&params.market_id) {
            Ok(adapter) => adapter.validate_withdraw(params).await,
            Err(e) => Self::unsupported_protocol(e),
        }
    }

    pub async fn validate_borrow(&self, params: &ActionParams) -> ValidationResult {
        match self.adapter_for(&params.market_id) {
            Ok(adapter) => adapter.validate_borrow(params).await,
            Err(e) => Self::unsupported_protocol(e),
        }
    }

    pub async fn validate_repay(&self, params: &ActionParams) -> ValidationResult {
        match self.adapter_for(&params.market_id) {
            Ok(adapter) => adapter.validate_repay(params).await,
            Err(e) => Self::unsupported_protocol(e),
        }
    }

    pub async fn calculate_health_factor(&self, protocol: Protocol, account: Address) -> Result<f64, AdapterError> {
        self.adapter(protocol)?.calculate_health_factor(account).await
    }

    pub async fn simulate_health_factor(&self, account: Address, action: &SimulatedAction) -> Result<f64, AdapterError> {
        let adapter = self.adapter_for(&action.market_id)?;
        base::project_health_factor(adapter.as_ref(), account, action).await
    }

    /// Gas for a whole plan at the current gas price. Calls that cannot be
    /// estimated (typically ones waiting on an earlier approval) are listed, not fatal.
    pub async fn estimate_plan_gas(&self, from: Address, calls: &[TransactionCall]) -> Result<PlanGasEstimate, AdapterError> {
        let gas_price = self.transport.gas_price().await?;

        let mut total_gas = 0u64;
        let mut unestimated_calls = Vec::new();
        for (index, call) in calls.iter().enumerate() {
            match self
                .transport
                .estimate_gas(from, call.to, call.data.clone(), call.value)
                .await
            {
                Ok(gas) => total_gas = total_gas.saturating_add(gas),
                Err(e) => {
                    tracing::debug!(index, to = %call.to, error = %e, "Gas estimate failed for plan step");
                    unestimated_calls.push(index);
                }
            }
        }

        Ok(PlanGasEstimate {
            total_gas,
            gas_price_wei: gas_price,
            total_cost_wei: U256::from(total_gas) * U256::from(gas_price),
            unestimated_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::contracts::IERC20;
    use crate::blockchain::mock::MockTransport;
    use crate::services::price_service::PriceError;
    use async_trait::async_trait;

    struct FlatPrices;

    #[async_trait]
    impl PriceOracle for FlatPrices {
        async fn get_asset_price_usd(&self, _symbol: &str) -> Result<f64, PriceError> {
            Ok(1.0)
        }
    }

    #[tokio::test]
    async fn test_unsupported_network_has_no_adapters() {
        let transport = Arc::new(MockTransport::new());
        let service = LendingService::new(56, transport, Arc::new(FlatPrices), &Settings::default());

        assert!(service.protocols().is_empty());
        assert!(service.get_markets(false).await.is_empty());
        let portfolio = service.get_user_positions(Address::ZERO).await;
        assert!(portfolio.positions.is_empty());
        assert!(portfolio.health_factor.is_infinite());
    }

    #[tokio::test]
    async fn test_network_support_map_drives_adapters() {
        let transport = Arc::new(MockTransport::new());
        let mut settings = Settings::default();
        settings.rewards.enabled = false;
        let service = LendingService::new(8453, transport, Arc::new(FlatPrices), &settings);
        assert_eq!(service.protocols(), Protocol::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_unknown_protocol_is_rejected() {
        let service = LendingService::with_adapters(1, Arc::new(MockTransport::new()), Vec::new());
        let params = ActionParams {
            market_id: "spark:1:0x00".to_string(),
            account: Address::ZERO,
            amount: U256::from(1u64),
        };

        assert!(matches!(
            service.build_supply(&params).await,
            Err(AdapterError::UnsupportedProtocol(_))
        ));
        let result = service.validate_supply(&params).await;
        assert!(!result.valid);
        assert!(result.has_error(ActionErrorCode::ProtocolNotSupported));

        let params = ActionParams {
            market_id: "moonwell:1:0x00".to_string(),
            ..params
        };
        assert!(service.build_borrow(&params).await.is_err());
    }

    #[tokio::test]
    async fn test_plan_gas_skips_unestimable_steps() {
        let transport = Arc::new(MockTransport::new());
        let token = Address::repeat_byte(0xa0);
        transport.gas_for::<IERC20::approveCall>(token, 46_000);
        let service = LendingService::with_adapters(1, transport, Vec::new());

        let approve = TransactionCall::new(
            token,
            &IERC20::approveCall {
                spender: Address::repeat_byte(0x50),
                amount: U256::MAX,
            },
            "Approve USDC",
        );
        let transfer = TransactionCall::new(
            token,
            &IERC20::balanceOfCall { account: Address::ZERO },
            "Unmocked step",
        );
        let estimate = service
            .estimate_plan_gas(Address::repeat_byte(0x01), &[approve, transfer])
            .await
            .unwrap();

        assert_eq!(estimate.total_gas, 46_000);
        assert_eq!(estimate.gas_price_wei, 1_000_000_000);
        assert_eq!(estimate.total_cost_wei, U256::from(46_000_000_000_000u64));
        assert_eq!(estimate.unestimated_calls, vec![1]);
    }
}
