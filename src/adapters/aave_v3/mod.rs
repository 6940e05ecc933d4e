// Aave V3 adapter: one pool per chain, many reserves
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

pub mod chain_config;
pub mod contracts;

use chain_config::AaveV3Deployment;
use contracts::{IPool, IPoolDataProvider, VARIABLE_RATE_MODE};

use crate::adapters::base::{self, apr_to_apy};
use crate::adapters::traits::{AdapterError, LendingAdapter};
use crate::blockchain::{read_contract, ChainTransport};
use crate::models::{
    now_secs, ActionKind, ActionParams, CollateralParams, LendingMarket, LendingPosition, MarketKind, MarketStatus,
    Protocol, SimulatedAction, TransactionCall,
};
use crate::risk::{self, HealthFactorMode, RiskSnapshot};
use crate::services::price_service::{price_or_zero, PriceOracle};
use crate::utils::math::{bps_to_ratio, ray_to_f64, to_units, u256_to_f64, wad_to_f64};
use crate::utils::TimedCache;

/// Aave reports account totals in its base currency, USD with 8 decimals
const BASE_CURRENCY_UNIT: f64 = 1e8;

pub struct AaveV3Adapter {
    transport: Arc<dyn ChainTransport>,
    prices: Arc<dyn PriceOracle>,
    deployment: AaveV3Deployment,
    reserve_cache: TimedCache<Vec<LendingMarket>>,
}

impl AaveV3Adapter {
    /// Create a new Aave V3 adapter for the specified chain
    pub fn new(
        transport: Arc<dyn ChainTransport>,
        prices: Arc<dyn PriceOracle>,
        chain_id: u64,
    ) -> Result<Self, AdapterError> {
        let deployment = chain_config::deployment(chain_id).ok_or(AdapterError::UnsupportedChain(chain_id))?;
        chain_config::validation::validate_config(&deployment).map_err(AdapterError::InvalidData)?;
        Ok(Self::with_deployment(transport, prices, deployment))
    }

    pub fn with_deployment(
        transport: Arc<dyn ChainTransport>,
        prices: Arc<dyn PriceOracle>,
        deployment: AaveV3Deployment,
    ) -> Self {
        Self {
            transport,
            prices,
            deployment,
            reserve_cache: TimedCache::new(Duration::from_secs(15)),
        }
    }

    pub fn deployment(&self) -> &AaveV3Deployment {
        &self.deployment
    }

    fn market_id(&self, asset: Address) -> String {
        format!("{}:{}:{:#x}", Protocol::AaveV3, self.deployment.chain_id, asset)
    }

    /// Reserve behind a market id, loaded from the (cached) market list
    async fn reserve(&self, market_id: &str) -> Result<LendingMarket, AdapterError> {
        base::market_id_parts(market_id, Protocol::AaveV3, self.deployment.chain_id)?;
        self.get_market(market_id)
            .await?
            .ok_or_else(|| AdapterError::MarketNotFound(market_id.to_string()))
    }

    async fn fetch_reserve(&self, asset: Address) -> Result<LendingMarket, AdapterError> {
        let transport = self.transport.as_ref();
        let provider = self.deployment.data_provider;

        let (config, data, caps, paused, tokens, metadata) = tokio::join!(
            read_contract(transport, provider, IPoolDataProvider::getReserveConfigurationDataCall { asset }),
            read_contract(transport, provider, IPoolDataProvider::getReserveDataCall { asset }),
            read_contract(transport, provider, IPoolDataProvider::getReserveCapsCall { asset }),
            read_contract(transport, provider, IPoolDataProvider::getPausedCall { asset }),
            read_contract(transport, provider, IPoolDataProvider::getReserveTokensAddressesCall { asset }),
            base::erc20_metadata(transport, asset),
        );
        let config = config?;
        let data = data?;
        let caps = caps?;
        let (symbol, _) = metadata?;
        // Older data providers lack getPaused
        let is_paused = paused.map(|p| p.isPaused).unwrap_or(false);
        let receipt_token = tokens.ok().map(|t| t.aTokenAddress);

        let decimals = u8::try_from(config.decimals)
            .map_err(|_| AdapterError::InvalidData(format!("Reserve {} decimals out of range", asset)))?;
        let price_usd = price_or_zero(self.prices.as_ref(), &symbol).await;

        let total_supply = to_units(data.totalAToken, decimals);
        let total_borrow = to_units(data.totalStableDebt + data.totalVariableDebt, decimals);
        let available_liquidity = (total_supply - total_borrow).max(0.0);
        let supply_apy = apr_to_apy(ray_to_f64(data.liquidityRate));
        let borrow_apy = apr_to_apy(ray_to_f64(data.variableBorrowRate));
        let liquidation_threshold = bps_to_ratio(config.liquidationThreshold);

        Ok(LendingMarket {
            id: self.market_id(asset),
            protocol: Protocol::AaveV3,
            chain_id: self.deployment.chain_id,
            kind: MarketKind::Lending,
            contract: self.deployment.pool,
            asset,
            asset_symbol: symbol,
            asset_decimals: decimals,
            paired_asset: None,
            paired_symbol: None,
            receipt_token,
            price_usd,
            supply_apy,
            borrow_apy,
            net_supply_apy: supply_apy,
            net_borrow_apy: borrow_apy,
            total_supply,
            total_supply_usd: total_supply * price_usd,
            total_borrow,
            total_borrow_usd: total_borrow * price_usd,
            available_liquidity,
            available_liquidity_usd: available_liquidity * price_usd,
            utilization: LendingMarket::utilization_of(total_supply, total_borrow),
            ltv: bps_to_ratio(config.ltv),
            liquidation_threshold,
            liquidation_penalty: (bps_to_ratio(config.liquidationBonus) - 1.0).max(0.0),
            supply_cap: (!caps.supplyCap.is_zero()).then(|| u256_to_f64(caps.supplyCap)),
            borrow_cap: (!caps.borrowCap.is_zero()).then(|| u256_to_f64(caps.borrowCap)),
            status: MarketStatus {
                is_active: config.isActive,
                is_frozen: config.isFrozen,
                is_paused,
                can_supply: config.isActive,
                can_borrow: config.borrowingEnabled,
                can_use_as_collateral: config.usageAsCollateralEnabled && liquidation_threshold > 0.0,
            },
            last_updated: now_secs(),
        })
    }

    async fn account_data(&self, account: Address) -> Result<IPool::getUserAccountDataReturn, AdapterError> {
        Ok(read_contract(
            self.transport.as_ref(),
            self.deployment.pool,
            IPool::getUserAccountDataCall { user: account },
        )
        .await?)
    }

    async fn approval(&self, market: &LendingMarket, params: &ActionParams) -> Result<Option<TransactionCall>, AdapterError> {
        base::approval_if_needed(
            self.transport.as_ref(),
            market.asset,
            params.account,
            self.deployment.pool,
            params.amount,
            &market.asset_symbol,
        )
        .await
    }
}

#[async_trait]
impl LendingAdapter for AaveV3Adapter {
    fn protocol(&self) -> Protocol {
        Protocol::AaveV3
    }

    fn chain_id(&self) -> u64 {
        self.deployment.chain_id
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        if let Some(markets) = self.reserve_cache.get().await {
            return Ok(markets);
        }

        let reserves = read_contract(self.transport.as_ref(), self.deployment.pool, IPool::getReservesListCall {})
            .await
            .map_err(|e| AdapterError::ContractError(format!("Reserves fetch failed: {}", e)))?
            ._0;

        let results = join_all(reserves.iter().map(|&asset| self.fetch_reserve(asset))).await;
        let mut markets = Vec::with_capacity(results.len());
        for (asset, result) in reserves.iter().zip(results) {
            match result {
                Ok(market) => markets.push(market),
                Err(e) => tracing::warn!(
                    chain_id = self.deployment.chain_id,
                    reserve = %asset,
                    error = %e,
                    "Skipping Aave V3 reserve"
                ),
            }
        }

        tracing::info!(
            chain_id = self.deployment.chain_id,
            market_count = markets.len(),
            "Loaded Aave V3 reserves"
        );
        self.reserve_cache.put(markets.clone()).await;
        Ok(markets)
    }

    async fn get_user_positions(&self, account: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        let markets = self.get_markets().await?;
        let transport = self.transport.as_ref();
        let provider = self.deployment.data_provider;

        let reads = join_all(markets.iter().map(|market| {
            read_contract(
                transport,
                provider,
                IPoolDataProvider::getUserReserveDataCall {
                    asset: market.asset,
                    user: account,
                },
            )
        }))
        .await;

        let mut positions = Vec::new();
        for (market, read) in markets.iter().zip(reads) {
            let reserve = match read {
                Ok(reserve) => reserve,
                Err(e) => {
                    tracing::warn!(market_id = %market.id, error = %e, "User reserve read failed");
                    continue;
                }
            };
            let supply_balance = reserve.currentATokenBalance;
            let borrow_balance = reserve.currentStableDebt + reserve.currentVariableDebt;
            if supply_balance.is_zero() && borrow_balance.is_zero() {
                continue;
            }

            positions.push(LendingPosition {
                id: format!("{}:{:#x}", market.id, account),
                market_id: market.id.clone(),
                protocol: Protocol::AaveV3,
                chain_id: self.deployment.chain_id,
                account,
                asset: market.asset,
                asset_symbol: market.asset_symbol.clone(),
                asset_decimals: market.asset_decimals,
                supply_balance,
                supply_shares: None,
                borrow_balance,
                borrow_shares: None,
                collateral_balance: U256::ZERO,
                supply_balance_usd: to_units(supply_balance, market.asset_decimals) * market.price_usd,
                borrow_balance_usd: to_units(borrow_balance, market.asset_decimals) * market.price_usd,
                collateral_balance_usd: 0.0,
                supply_apy: market.supply_apy,
                borrow_apy: market.borrow_apy,
                collateral_enabled: reserve.usageAsCollateralEnabled,
                health_factor: None,
            });
        }

        if positions.iter().any(LendingPosition::has_debt) {
            let health_factor = self.calculate_health_factor(account).await;
            base::attach_health_factor(Protocol::AaveV3, account, &mut positions, health_factor);
        }
        Ok(positions)
    }

    async fn wallet_balance(&self, asset: Address, account: Address) -> Result<U256, AdapterError> {
        base::erc20_balance(self.transport.as_ref(), asset, account).await
    }

    async fn build_supply(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let market = self.reserve(&params.market_id).await?;
        let mut calls: Vec<TransactionCall> = self.approval(&market, params).await?.into_iter().collect();
        let call = IPool::supplyCall {
            asset: market.asset,
            amount: params.amount,
            onBehalfOf: params.account,
            referralCode: 0,
        };
        calls.push(TransactionCall::new(
            self.deployment.pool,
            &call,
            format!("Supply {} to Aave V3", market.asset_symbol),
        ));
        Ok(calls)
    }

    async fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let market = self.reserve(&params.market_id).await?;
        let call = IPool::withdrawCall {
            asset: market.asset,
            amount: params.amount,
            to: params.account,
        };
        Ok(vec![TransactionCall::new(
            self.deployment.pool,
            &call,
            format!("Withdraw {} from Aave V3", market.asset_symbol),
        )])
    }

    async fn build_borrow(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let market = self.reserve(&params.market_id).await?;
        let call = IPool::borrowCall {
            asset: market.asset,
            amount: params.amount,
            interestRateMode: U256::from(VARIABLE_RATE_MODE),
            referralCode: 0,
            onBehalfOf: params.account,
        };
        Ok(vec![TransactionCall::new(
            self.deployment.pool,
            &call,
            format!("Borrow {} from Aave V3", market.asset_symbol),
        )])
    }

    async fn build_repay(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let market = self.reserve(&params.market_id).await?;
        let mut calls: Vec<TransactionCall> = self.approval(&market, params).await?.into_iter().collect();
        let call = IPool::repayCall {
            asset: market.asset,
            amount: params.amount,
            interestRateMode: U256::from(VARIABLE_RATE_MODE),
            onBehalfOf: params.account,
        };
        calls.push(TransactionCall::new(
            self.deployment.pool,
            &call,
            format!("Repay {} on Aave V3", market.asset_symbol),
        ));
        Ok(calls)
    }

    async fn build_enable_collateral(&self, params: &CollateralParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let market = self.reserve(&params.market_id).await?;
        let call = IPool::setUserUseReserveAsCollateralCall {
            asset: market.asset,
            useAsCollateral: params.enabled,
        };
        let verb = if params.enabled { "Enable" } else { "Disable" };
        Ok(vec![TransactionCall::new(
            self.deployment.pool,
            &call,
            format!("{} {} as collateral on Aave V3", verb, market.asset_symbol),
        )])
    }

    async fn calculate_health_factor(&self, account: Address) -> Result<f64, AdapterError> {
        let data = self.account_data(account).await?;
        if data.totalDebtBase.is_zero() {
            return Ok(f64::INFINITY);
        }
        Ok(wad_to_f64(data.healthFactor))
    }

    async fn simulate_health_factor(&self, account: Address, action: &SimulatedAction) -> Result<f64, AdapterError> {
        let market = self.reserve(&action.market_id).await?;
        let data = self.account_data(account).await?;
        let snapshot = RiskSnapshot::new(
            u256_to_f64(data.totalCollateralBase) / BASE_CURRENCY_UNIT * bps_to_ratio(data.currentLiquidationThreshold),
            u256_to_f64(data.totalDebtBase) / BASE_CURRENCY_UNIT,
        );

        if market.price_usd <= 0.0 {
            let current = snapshot.health_factor();
            tracing::warn!(
                market_id = %market.id,
                mode = ?HealthFactorMode::Approximate,
                "No price for reserve, projecting health factor approximately"
            );
            return Ok(risk::approximate(current, action.kind));
        }

        let amount_usd = match action.kind {
            ActionKind::Borrow | ActionKind::Repay => to_units(action.amount, market.asset_decimals) * market.price_usd,
            ActionKind::Supply | ActionKind::Withdraw | ActionKind::EnableCollateral => {
                let read = read_contract(
                    self.transport.as_ref(),
                    self.deployment.data_provider,
                    IPoolDataProvider::getUserReserveDataCall {
                        asset: market.asset,
                        user: account,
                    },
                )
                .await;
                let reserve = match read {
                    Ok(reserve) => reserve,
                    Err(e) => {
                        tracing::warn!(
                            market_id = %market.id,
                            mode = ?HealthFactorMode::Approximate,
                            error = %e,
                            "User reserve unreadable, projecting health factor approximately"
                        );
                        return Ok(risk::approximate(snapshot.health_factor(), action.kind));
                    }
                };
                let supplied = reserve.currentATokenBalance;
                // First supply of a collateral-eligible reserve is enabled as collateral automatically
                let counts_as_collateral = if supplied.is_zero() {
                    market.status.can_use_as_collateral
                } else {
                    reserve.usageAsCollateralEnabled
                };

                match action.kind {
                    ActionKind::EnableCollateral if reserve.usageAsCollateralEnabled => 0.0,
                    ActionKind::EnableCollateral => to_units(supplied, market.asset_decimals) * market.price_usd,
                    _ if !counts_as_collateral => 0.0,
                    _ => to_units(action.amount, market.asset_decimals) * market.price_usd,
                }
            }
        };

        Ok(snapshot.project(action.kind, amount_usd, market.liquidation_threshold))
    }
}
