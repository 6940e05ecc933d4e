// Compound V3 adapter: one Comet per base asset, collateral posted per Comet
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

pub mod chain_config;
pub mod contracts;

use contracts::{IComet, FACTOR_SCALE, PRICE_SCALE};

use crate::adapters::base::{self, rate_to_apy};
use crate::adapters::traits::{AdapterError, LendingAdapter};
use crate::blockchain::{read_contract, ChainTransport};
use crate::models::{
    now_secs, ActionKind, ActionParams, CollateralParams, LendingMarket, LendingPosition, MarketKind, MarketStatus,
    Protocol, SimulatedAction, TransactionCall,
};
use crate::risk::{HealthFactorMode, RiskSnapshot};
use crate::services::price_service::{price_or_zero, PriceOracle};
use crate::utils::math::{to_units, u256_to_f64};
use crate::utils::TimedCache;

#[derive(Debug, Clone)]
struct CollateralConfig {
    asset: Address,
    price_feed: Address,
    scale: f64,
    liquidate_collateral_factor: f64,
    market: LendingMarket,
}

/// Everything read about one Comet
#[derive(Debug, Clone)]
struct CometState {
    comet: Address,
    base: LendingMarket,
    base_price_feed: Address,
    collaterals: Vec<CollateralConfig>,
}

/// One account's balances in one Comet
struct CometAccount {
    supplied: U256,
    borrowed: U256,
    /// `(index into CometState::collaterals, raw balance)`, non-zero only
    collateral: Vec<(usize, u128)>,
}

pub struct CompoundV3Adapter {
    transport: Arc<dyn ChainTransport>,
    prices: Arc<dyn PriceOracle>,
    chain_id: u64,
    comets: Vec<Address>,
    comet_cache: TimedCache<Vec<CometState>>,
}

impl CompoundV3Adapter {
    pub fn new(
        transport: Arc<dyn ChainTransport>,
        prices: Arc<dyn PriceOracle>,
        chain_id: u64,
    ) -> Result<Self, AdapterError> {
        if !chain_config::is_supported_chain(chain_id) {
            return Err(AdapterError::UnsupportedChain(chain_id));
        }
        let comets = chain_config::comets(chain_id);
        chain_config::validation::validate_comets(chain_id, comets).map_err(AdapterError::InvalidData)?;
        Ok(Self::with_comets(transport, prices, chain_id, comets.to_vec()))
    }

    pub fn with_comets(
        transport: Arc<dyn ChainTransport>,
        prices: Arc<dyn PriceOracle>,
        chain_id: u64,
        comets: Vec<Address>,
    ) -> Self {
        tracing::info!(chain_id, comet_count = comets.len(), "Initialized Compound V3 adapter");
        Self {
            transport,
            prices,
            chain_id,
            comets,
            comet_cache: TimedCache::new(Duration::from_secs(15)),
        }
    }

    fn market_id(&self, comet: Address, asset: Address) -> String {
        format!("{}:{}:{:#x}:{:#x}", Protocol::CompoundV3, self.chain_id, comet, asset)
    }

    async fn comet_states(&self) -> Result<Vec<CometState>, AdapterError> {
        if let Some(states) = self.comet_cache.get().await {
            return Ok(states);
        }

        let results = join_all(self.comets.iter().map(|&comet| self.fetch_comet(comet))).await;
        let mut states = Vec::new();
        for (comet, result) in self.comets.iter().zip(results) {
            match result {
                Ok(state) => states.push(state),
                Err(e) => tracing::warn!(chain_id = self.chain_id, comet = %comet, error = %e, "Skipping Comet"),
            }
        }
        if states.is_empty() && !self.comets.is_empty() {
            return Err(AdapterError::ContractError(format!(
                "No Compound V3 market could be read on chain {}",
                self.chain_id
            )));
        }

        self.comet_cache.put(states.clone()).await;
        Ok(states)
    }

    async fn fetch_comet(&self, comet: Address) -> Result<CometState, AdapterError> {
        let t = self.transport.as_ref();
        let (base_token, base_feed, num_assets, utilization, total_supply, total_borrow, supply_paused, withdraw_paused) = tokio::join!(
            read_contract(t, comet, IComet::baseTokenCall {}),
            read_contract(t, comet, IComet::baseTokenPriceFeedCall {}),
            read_contract(t, comet, IComet::numAssetsCall {}),
            read_contract(t, comet, IComet::getUtilizationCall {}),
            read_contract(t, comet, IComet::totalSupplyCall {}),
            read_contract(t, comet, IComet::totalBorrowCall {}),
            read_contract(t, comet, IComet::isSupplyPausedCall {}),
            read_contract(t, comet, IComet::isWithdrawPausedCall {}),
        );
        let base_token = base_token?._0;
        let utilization = utilization?._0;
        let supply_paused = supply_paused?._0;
        let withdraw_paused = withdraw_paused?._0;

        let (supply_rate, borrow_rate, metadata) = tokio::join!(
            read_contract(t, comet, IComet::getSupplyRateCall { utilization }),
            read_contract(t, comet, IComet::getBorrowRateCall { utilization }),
            base::erc20_metadata(t, base_token),
        );
        let (symbol, decimals) = metadata?;
        let price_usd = price_or_zero(self.prices.as_ref(), &symbol).await;

        let supplied = to_units(total_supply?._0, decimals);
        let borrowed = to_units(total_borrow?._0, decimals);
        let available = (supplied - borrowed).max(0.0);
        let supply_apy = rate_to_apy(supply_rate?._0 as f64 / FACTOR_SCALE);
        let borrow_apy = rate_to_apy(borrow_rate?._0 as f64 / FACTOR_SCALE);

        let base = LendingMarket {
            id: self.market_id(comet, base_token),
            protocol: Protocol::CompoundV3,
            chain_id: self.chain_id,
            kind: MarketKind::Lending,
            contract: comet,
            asset: base_token,
            asset_symbol: symbol.clone(),
            asset_decimals: decimals,
            paired_asset: None,
            paired_symbol: None,
            receipt_token: Some(comet),
            price_usd,
            supply_apy,
            borrow_apy,
            net_supply_apy: supply_apy,
            net_borrow_apy: borrow_apy,
            total_supply: supplied,
            total_supply_usd: supplied * price_usd,
            total_borrow: borrowed,
            total_borrow_usd: borrowed * price_usd,
            available_liquidity: available,
            available_liquidity_usd: available * price_usd,
            utilization: LendingMarket::utilization_of(supplied, borrowed),
            ltv: 0.0,
            liquidation_threshold: 0.0,
            liquidation_penalty: 0.0,
            supply_cap: None,
            borrow_cap: None,
            status: MarketStatus {
                is_active: true,
                is_frozen: false,
                is_paused: supply_paused && withdraw_paused,
                can_supply: !supply_paused,
                can_borrow: !withdraw_paused,
                can_use_as_collateral: false,
            },
            last_updated: now_secs(),
        };

        let num_assets = num_assets?._0;
        let results = join_all((0..num_assets).map(|i| self.fetch_collateral(comet, i, &base, supply_paused))).await;
        let mut collaterals = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(collateral) => collaterals.push(collateral),
                Err(e) => tracing::warn!(comet = %comet, index, error = %e, "Skipping Comet collateral asset"),
            }
        }

        tracing::info!(
            chain_id = self.chain_id,
            comet = %comet,
            base = %base.asset_symbol,
            collateral_count = collaterals.len(),
            "Loaded Compound V3 market"
        );

        Ok(CometState {
            comet,
            base,
            base_price_feed: base_feed?._0,
            collaterals,
        })
    }

    async fn fetch_collateral(
        &self,
        comet: Address,
        index: u8,
        base: &LendingMarket,
        supply_paused: bool,
    ) -> Result<CollateralConfig, AdapterError> {
        let t = self.transport.as_ref();
        let info = read_contract(t, comet, IComet::getAssetInfoCall { i: index }).await?._0;
        let (totals, metadata) = tokio::join!(
            read_contract(t, comet, IComet::totalsCollateralCall { asset: info.asset }),
            base::erc20_metadata(t, info.asset),
        );
        let (symbol, decimals) = metadata?;
        let scale = info.scale as f64;
        if scale <= 0.0 {
            return Err(AdapterError::InvalidData(format!("Collateral {} has zero scale", info.asset)));
        }

        let price_usd = price_or_zero(self.prices.as_ref(), &symbol).await;
        let total_supply = totals?._0.totalSupplyAsset as f64 / scale;
        let supply_cap = info.supplyCap as f64 / scale;
        let liquidate_collateral_factor = info.liquidateCollateralFactor as f64 / FACTOR_SCALE;

        let market = LendingMarket {
            id: self.market_id(comet, info.asset),
            protocol: Protocol::CompoundV3,
            chain_id: self.chain_id,
            kind: MarketKind::CollateralOnly,
            contract: comet,
            asset: info.asset,
            asset_symbol: symbol,
            asset_decimals: decimals,
            paired_asset: Some(base.asset),
            paired_symbol: Some(base.asset_symbol.clone()),
            receipt_token: None,
            price_usd,
            supply_apy: 0.0,
            borrow_apy: 0.0,
            net_supply_apy: 0.0,
            net_borrow_apy: 0.0,
            total_supply,
            total_supply_usd: total_supply * price_usd,
            total_borrow: 0.0,
            total_borrow_usd: 0.0,
            available_liquidity: 0.0,
            available_liquidity_usd: 0.0,
            utilization: 0.0,
            ltv: info.borrowCollateralFactor as f64 / FACTOR_SCALE,
            liquidation_threshold: liquidate_collateral_factor,
            liquidation_penalty: (1.0 - info.liquidationFactor as f64 / FACTOR_SCALE).max(0.0),
            supply_cap: (supply_cap > 0.0).then_some(supply_cap),
            borrow_cap: None,
            status: MarketStatus {
                is_active: true,
                is_frozen: false,
                is_paused: supply_paused,
                can_supply: !supply_paused && supply_cap > 0.0,
                can_borrow: false,
                can_use_as_collateral: true,
            },
            last_updated: now_secs(),
        };

        Ok(CollateralConfig {
            asset: info.asset,
            price_feed: info.priceFeed,
            scale,
            liquidate_collateral_factor,
            market,
        })
    }

    /// Comet state and market for a market id
    async fn resolve(&self, market_id: &str) -> Result<(CometState, LendingMarket), AdapterError> {
        let parts = base::market_id_parts(market_id, Protocol::CompoundV3, self.chain_id)?;
        if parts.len() != 4 {
            return Err(AdapterError::MarketNotFound(market_id.to_string()));
        }
        let comet = base::parse_address(parts[2])?;
        let asset = base::parse_address(parts[3])?;

        let states = self.comet_states().await?;
        let state = states
            .into_iter()
            .find(|s| s.comet == comet)
            .ok_or_else(|| AdapterError::MarketNotFound(market_id.to_string()))?;
        let market = if state.base.asset == asset {
            state.base.clone()
        } else {
            state
                .collaterals
                .iter()
                .find(|c| c.asset == asset)
                .map(|c| c.market.clone())
                .ok_or_else(|| AdapterError::MarketNotFound(market_id.to_string()))?
        };
        Ok((state, market))
    }

    async fn read_account(&self, state: &CometState, account: Address) -> Result<CometAccount, AdapterError> {
        let t = self.transport.as_ref();
        let (supplied, borrowed, collateral) = tokio::join!(
            read_contract(t, state.comet, IComet::balanceOfCall { account }),
            read_contract(t, state.comet, IComet::borrowBalanceOfCall { account }),
            join_all(state.collaterals.iter().map(|c| {
                read_contract(t, state.comet, IComet::collateralBalanceOfCall { account, asset: c.asset })
            })),
        );

        let mut balances = Vec::new();
        for (index, result) in collateral.into_iter().enumerate() {
            let balance = result?._0;
            if balance > 0 {
                balances.push((index, balance));
            }
        }
        Ok(CometAccount {
            supplied: supplied?._0,
            borrowed: borrowed?._0,
            collateral: balances,
        })
    }

    async fn comet_price(&self, comet: Address, price_feed: Address) -> Result<f64, AdapterError> {
        let price = read_contract(self.transport.as_ref(), comet, IComet::getPriceCall { priceFeed: price_feed }).await?;
        Ok(u256_to_f64(price._0) / PRICE_SCALE)
    }

    /// Comet feed price, or the oracle price already on `market` when the feed read fails
    async fn price_or_market(&self, comet: Address, price_feed: Address, market: &LendingMarket) -> Result<f64, AdapterError> {
        match self.comet_price(comet, price_feed).await {
            Ok(price) => Ok(price),
            Err(e) if market.price_usd > 0.0 => {
                tracing::warn!(
                    market_id = %market.id,
                    mode = ?HealthFactorMode::Approximate,
                    error = %e,
                    "Comet price feed unreadable, valuing at market price"
                );
                Ok(market.price_usd)
            }
            Err(e) => Err(e),
        }
    }

    /// Liquidation-weighted collateral and debt valued with the Comet's own price feeds
    async fn risk_snapshot(&self, state: &CometState, account: &CometAccount) -> Result<RiskSnapshot, AdapterError> {
        let debt = if account.borrowed.is_zero() {
            0.0
        } else {
            let base_price = self.price_or_market(state.comet, state.base_price_feed, &state.base).await?;
            to_units(account.borrowed, state.base.asset_decimals) * base_price
        };

        let prices = join_all(
            account
                .collateral
                .iter()
                .map(|(index, _)| {
                    let config = &state.collaterals[*index];
                    self.price_or_market(state.comet, config.price_feed, &config.market)
                }),
        )
        .await;

        let mut weighted = 0.0;
        for ((index, balance), price) in account.collateral.iter().zip(prices) {
            let config = &state.collaterals[*index];
            weighted += *balance as f64 / config.scale * price? * config.liquidate_collateral_factor;
        }
        Ok(RiskSnapshot::new(weighted, debt))
    }

    /// Lowest health factor over the Comets other than `exclude`
    async fn other_comets_health(&self, account: Address, states: &[CometState], exclude: Address) -> Result<f64, AdapterError> {
        let mut lowest = f64::INFINITY;
        for state in states.iter().filter(|s| s.comet != exclude) {
            let balances = self.read_account(state, account).await?;
            if balances.borrowed.is_zero() {
                continue;
            }
            lowest = lowest.min(self.risk_snapshot(state, &balances).await?.health_factor());
        }
        Ok(lowest)
    }

    fn require_base(&self, state: &CometState, market: &LendingMarket, action: ActionKind) -> Result<(), AdapterError> {
        if market.asset != state.base.asset {
            return Err(AdapterError::UnsupportedAction {
                protocol: Protocol::CompoundV3,
                action,
                market_id: market.id.clone(),
            });
        }
        Ok(())
    }

    async fn approval(&self, state: &CometState, market: &LendingMarket, params: &ActionParams) -> Result<Option<TransactionCall>, AdapterError> {
        base::approval_if_needed(
            self.transport.as_ref(),
            market.asset,
            params.account,
            state.comet,
            params.amount,
            &market.asset_symbol,
        )
        .await
    }
}

#[async_trait]
impl LendingAdapter for CompoundV3Adapter {
    fn protocol(&self) -> Protocol {
        Protocol::CompoundV3
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        let states = self.comet_states().await?;
        Ok(states
            .into_iter()
            .flat_map(|state| std::iter::once(state.base).chain(state.collaterals.into_iter().map(|c| c.market)))
            .collect())
    }

    async fn get_user_positions(&self, account: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        let states = self.comet_states().await?;
        let mut positions = Vec::new();
        let mut comet_health = Vec::new();

        for state in &states {
            let balances = match self.read_account(state, account).await {
                Ok(balances) => balances,
                Err(e) => {
                    tracing::warn!(comet = %state.comet, error = %e, "Comet account read failed");
                    continue;
                }
            };
            let start = positions.len();

            if !balances.supplied.is_zero() || !balances.borrowed.is_zero() {
                let market = &state.base;
                positions.push(LendingPosition {
                    id: format!("{}:{:#x}", market.id, account),
                    market_id: market.id.clone(),
                    protocol: Protocol::CompoundV3,
                    chain_id: self.chain_id,
                    account,
                    asset: market.asset,
                    asset_symbol: market.asset_symbol.clone(),
                    asset_decimals: market.asset_decimals,
                    supply_balance: balances.supplied,
                    supply_shares: None,
                    borrow_balance: balances.borrowed,
                    borrow_shares: None,
                    collateral_balance: U256::ZERO,
                    supply_balance_usd: to_units(balances.supplied, market.asset_decimals) * market.price_usd,
                    borrow_balance_usd: to_units(balances.borrowed, market.asset_decimals) * market.price_usd,
                    collateral_balance_usd: 0.0,
                    supply_apy: market.supply_apy,
                    borrow_apy: market.borrow_apy,
                    // Base supply earns interest but never backs a borrow
                    collateral_enabled: false,
                    health_factor: None,
                });
            }

            for (index, balance) in &balances.collateral {
                let market = &state.collaterals[*index].market;
                let amount = U256::from(*balance);
                positions.push(LendingPosition {
                    id: format!("{}:{:#x}", market.id, account),
                    market_id: market.id.clone(),
                    protocol: Protocol::CompoundV3,
                    chain_id: self.chain_id,
                    account,
                    asset: market.asset,
                    asset_symbol: market.asset_symbol.clone(),
                    asset_decimals: market.asset_decimals,
                    supply_balance: U256::ZERO,
                    supply_shares: None,
                    borrow_balance: U256::ZERO,
                    borrow_shares: None,
                    collateral_balance: amount,
                    supply_balance_usd: 0.0,
                    borrow_balance_usd: 0.0,
                    collateral_balance_usd: to_units(amount, market.asset_decimals) * market.price_usd,
                    supply_apy: 0.0,
                    borrow_apy: 0.0,
                    collateral_enabled: true,
                    health_factor: None,
                });
            }

            let health = if balances.borrowed.is_zero() {
                Some(f64::INFINITY)
            } else {
                match self.risk_snapshot(state, &balances).await {
                    Ok(snapshot) => Some(snapshot.health_factor()),
                    Err(e) => {
                        tracing::warn!(comet = %state.comet, error = %e, "Comet health factor read failed");
                        None
                    }
                }
            };
            comet_health.push((start..positions.len(), health));
        }

        if positions.iter().any(LendingPosition::has_debt) {
            for (range, health) in comet_health {
                for position in &mut positions[range] {
                    position.health_factor = health;
                }
            }
        }
        Ok(positions)
    }

    async fn wallet_balance(&self, asset: Address, account: Address) -> Result<U256, AdapterError> {
        base::erc20_balance(self.transport.as_ref(), asset, account).await
    }

    async fn build_supply(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (state, market) = self.resolve(&params.market_id).await?;
        let mut calls: Vec<TransactionCall> = self.approval(&state, &market, params).await?.into_iter().collect();
        let call = IComet::supplyCall {
            asset: market.asset,
            amount: params.amount,
        };
        calls.push(TransactionCall::new(
            state.comet,
            &call,
            format!("Supply {} to Compound V3 {}", market.asset_symbol, state.base.asset_symbol),
        ));
        Ok(calls)
    }

    async fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (state, market) = self.resolve(&params.market_id).await?;
        let call = IComet::withdrawCall {
            asset: market.asset,
            amount: params.amount,
        };
        Ok(vec![TransactionCall::new(
            state.comet,
            &call,
            format!("Withdraw {} from Compound V3 {}", market.asset_symbol, state.base.asset_symbol),
        )])
    }

    async fn build_borrow(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (state, market) = self.resolve(&params.market_id).await?;
        self.require_base(&state, &market, ActionKind::Borrow)?;
        // Withdrawing base beyond the supplied balance opens a borrow
        let call = IComet::withdrawCall {
            asset: market.asset,
            amount: params.amount,
        };
        Ok(vec![TransactionCall::new(
            state.comet,
            &call,
            format!("Borrow {} from Compound V3", market.asset_symbol),
        )])
    }

    async fn build_repay(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (state, market) = self.resolve(&params.market_id).await?;
        self.require_base(&state, &market, ActionKind::Repay)?;
        let mut calls: Vec<TransactionCall> = self.approval(&state, &market, params).await?.into_iter().collect();
        let call = IComet::supplyCall {
            asset: market.asset,
            amount: params.amount,
        };
        calls.push(TransactionCall::new(
            state.comet,
            &call,
            format!("Repay {} on Compound V3", market.asset_symbol),
        ));
        Ok(calls)
    }

    async fn build_enable_collateral(&self, params: &CollateralParams) -> Result<Vec<TransactionCall>, AdapterError> {
        Err(AdapterError::UnsupportedAction {
            protocol: Protocol::CompoundV3,
            action: ActionKind::EnableCollateral,
            market_id: params.market_id.clone(),
        })
    }

    async fn calculate_health_factor(&self, account: Address) -> Result<f64, AdapterError> {
        let states = self.comet_states().await?;
        self.other_comets_health(account, &states, Address::ZERO).await
    }

    async fn simulate_health_factor(&self, account: Address, action: &SimulatedAction) -> Result<f64, AdapterError> {
        let (state, market) = self.resolve(&action.market_id).await?;
        let balances = self.read_account(&state, account).await?;
        let snapshot = self.risk_snapshot(&state, &balances).await?;
        let is_base = market.asset == state.base.asset;

        let projected = match action.kind {
            // Collateral is always enabled on Comet
            ActionKind::EnableCollateral => snapshot.health_factor(),
            ActionKind::Borrow | ActionKind::Repay if !is_base => {
                return Err(AdapterError::UnsupportedAction {
                    protocol: Protocol::CompoundV3,
                    action: action.kind,
                    market_id: market.id,
                });
            }
            _ if is_base => {
                // Base supply repays debt first, base withdrawal beyond the balance borrows
                let (kind, amount) = match action.kind {
                    ActionKind::Supply | ActionKind::Repay => (ActionKind::Repay, action.amount),
                    ActionKind::Withdraw => (ActionKind::Borrow, action.amount.saturating_sub(balances.supplied)),
                    _ => (ActionKind::Borrow, action.amount),
                };
                let price = self.price_or_market(state.comet, state.base_price_feed, &state.base).await?;
                snapshot.project(kind, to_units(amount, market.asset_decimals) * price, 0.0)
            }
            _ => {
                let Some(config) = state.collaterals.iter().find(|c| c.asset == market.asset) else {
                    return Err(AdapterError::MarketNotFound(market.id));
                };
                let price = self.price_or_market(state.comet, config.price_feed, &config.market).await?;
                let amount = u256_to_f64(action.amount) / config.scale * price;
                snapshot.project(action.kind, amount, config.liquidate_collateral_factor)
            }
        };

        let states = self.comet_states().await?;
        let others = self.other_comets_health(account, &states, state.comet).await?;
        Ok(projected.min(others))
    }
}
