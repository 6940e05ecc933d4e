// Morpho Blue adapter: isolated loan/collateral pairs on one singleton contract
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

pub mod chain_config;
pub mod contracts;

use contracts::{
    IIrm, IMorpho, IOracle, Market, MarketParams, LIQUIDATION_CURSOR, MAX_LIQUIDATION_INCENTIVE_FACTOR,
    ORACLE_PRICE_SCALE, VIRTUAL_ASSETS, VIRTUAL_SHARES,
};

use crate::adapters::base::{self, rate_to_apy};
use crate::adapters::traits::{AdapterError, LendingAdapter};
use crate::blockchain::{read_contract, ChainTransport};
use crate::models::{
    now_secs, ActionKind, ActionParams, CollateralParams, LendingMarket, LendingPosition, MarketKind, MarketStatus,
    Protocol, SimulatedAction, TransactionCall,
};
use crate::risk::{HealthFactorMode, RiskSnapshot};
use crate::services::price_service::{price_or_zero, PriceOracle};
use crate::utils::math::{to_units, u256_to_f64, wad_to_f64};

/// Market id suffix addressing the collateral side of a pair
const COLLATERAL_SUFFIX: &str = "collateral";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Loan,
    Collateral,
}

#[derive(Debug, Clone)]
struct PairParams {
    loan_token: Address,
    collateral_token: Address,
    oracle: Address,
    irm: Address,
    lltv: U256,
}

impl PairParams {
    fn to_sol(&self) -> MarketParams {
        MarketParams {
            loanToken: self.loan_token,
            collateralToken: self.collateral_token,
            oracle: self.oracle,
            irm: self.irm,
            lltv: self.lltv,
        }
    }
}

#[derive(Debug, Clone)]
struct PairState {
    id: B256,
    params: PairParams,
    total_supply_assets: U256,
    total_supply_shares: U256,
    total_borrow_assets: U256,
    total_borrow_shares: U256,
    loan: LendingMarket,
    collateral: LendingMarket,
}

impl PairState {
    fn market(&self, side: Side) -> &LendingMarket {
        match side {
            Side::Loan => &self.loan,
            Side::Collateral => &self.collateral,
        }
    }

    fn lltv(&self) -> f64 {
        wad_to_f64(self.params.lltv)
    }
}

struct PairPosition {
    supply_shares: U256,
    borrow_shares: U256,
    collateral: U256,
}

/// Shares to assets, rounding down
fn to_assets_down(shares: U256, total_assets: U256, total_shares: U256) -> U256 {
    shares * (total_assets + U256::from(VIRTUAL_ASSETS)) / (total_shares + U256::from(VIRTUAL_SHARES))
}

/// Shares to assets, rounding up (debt owed)
fn to_assets_up(shares: U256, total_assets: U256, total_shares: U256) -> U256 {
    let denominator = total_shares + U256::from(VIRTUAL_SHARES);
    (shares * (total_assets + U256::from(VIRTUAL_ASSETS)) + denominator - U256::from(1)) / denominator
}

/// Bonus paid to liquidators, as a fraction of repaid debt
pub fn liquidation_penalty(lltv: f64) -> f64 {
    let factor = 1.0 / (1.0 - LIQUIDATION_CURSOR * (1.0 - lltv));
    factor.min(MAX_LIQUIDATION_INCENTIVE_FACTOR) - 1.0
}

pub struct MorphoBlueAdapter {
    transport: Arc<dyn ChainTransport>,
    prices: Arc<dyn PriceOracle>,
    chain_id: u64,
    morpho: Address,
    market_ids: Vec<B256>,
    pair_cache: crate::utils::TimedCache<Vec<PairState>>,
}

impl MorphoBlueAdapter {
    /// Tracks `market_ids`, or the chain's default markets when empty
    pub fn new(
        transport: Arc<dyn ChainTransport>,
        prices: Arc<dyn PriceOracle>,
        chain_id: u64,
        market_ids: Vec<B256>,
    ) -> Result<Self, AdapterError> {
        if !chain_config::is_supported_chain(chain_id) {
            return Err(AdapterError::UnsupportedChain(chain_id));
        }
        let market_ids = if market_ids.is_empty() {
            chain_config::default_markets(chain_id)
        } else {
            market_ids
        };
        Ok(Self::with_markets(transport, prices, chain_id, chain_config::MORPHO, market_ids))
    }

    pub fn with_markets(
        transport: Arc<dyn ChainTransport>,
        prices: Arc<dyn PriceOracle>,
        chain_id: u64,
        morpho: Address,
        market_ids: Vec<B256>,
    ) -> Self {
        tracing::info!(chain_id, market_count = market_ids.len(), "Initialized Morpho Blue adapter");
        Self {
            transport,
            prices,
            chain_id,
            morpho,
            market_ids,
            pair_cache: crate::utils::TimedCache::new(Duration::from_secs(15)),
        }
    }

    fn market_id(&self, id: B256, side: Side) -> String {
        match side {
            Side::Loan => format!("{}:{}:{:#x}", Protocol::MorphoBlue, self.chain_id, id),
            Side::Collateral => format!("{}:{}:{:#x}:{}", Protocol::MorphoBlue, self.chain_id, id, COLLATERAL_SUFFIX),
        }
    }

    async fn pairs(&self) -> Result<Vec<PairState>, AdapterError> {
        if let Some(pairs) = self.pair_cache.get().await {
            return Ok(pairs);
        }

        let results = join_all(self.market_ids.iter().map(|&id| self.fetch_pair(id))).await;
        let mut pairs = Vec::new();
        for (id, result) in self.market_ids.iter().zip(results) {
            match result {
                Ok(pair) => pairs.push(pair),
                Err(e) => tracing::warn!(chain_id = self.chain_id, market = %id, error = %e, "Skipping Morpho market"),
            }
        }

        tracing::info!(chain_id = self.chain_id, market_count = pairs.len(), "Loaded Morpho Blue markets");
        self.pair_cache.put(pairs.clone()).await;
        Ok(pairs)
    }

    async fn borrow_rate(&self, params: &PairParams, market: Market) -> Result<U256, AdapterError> {
        if params.irm == Address::ZERO {
            return Ok(U256::ZERO);
        }
        let call = IIrm::borrowRateViewCall {
            marketParams: params.to_sol(),
            market,
        };
        Ok(read_contract(self.transport.as_ref(), params.irm, call).await?._0)
    }

    async fn fetch_pair(&self, id: B256) -> Result<PairState, AdapterError> {
        let t = self.transport.as_ref();
        let (totals, params) = tokio::join!(
            read_contract(t, self.morpho, IMorpho::marketCall { id }),
            read_contract(t, self.morpho, IMorpho::idToMarketParamsCall { id }),
        );
        let totals = totals?;
        let params = params?;
        if params.loanToken == Address::ZERO {
            return Err(AdapterError::InvalidData(format!("Morpho market {:#x} does not exist", id)));
        }
        let params = PairParams {
            loan_token: params.loanToken,
            collateral_token: params.collateralToken,
            oracle: params.oracle,
            irm: params.irm,
            lltv: params.lltv,
        };

        let market = Market {
            totalSupplyAssets: totals.totalSupplyAssets,
            totalSupplyShares: totals.totalSupplyShares,
            totalBorrowAssets: totals.totalBorrowAssets,
            totalBorrowShares: totals.totalBorrowShares,
            lastUpdate: totals.lastUpdate,
            fee: totals.fee,
        };
        let (loan_meta, collateral_meta, rate) = tokio::join!(
            base::erc20_metadata(t, params.loan_token),
            base::erc20_metadata(t, params.collateral_token),
            self.borrow_rate(&params, market),
        );
        let (loan_symbol, loan_decimals) = loan_meta?;
        let (collateral_symbol, collateral_decimals) = collateral_meta?;
        let (loan_price, collateral_price) = tokio::join!(
            price_or_zero(self.prices.as_ref(), &loan_symbol),
            price_or_zero(self.prices.as_ref(), &collateral_symbol),
        );

        let supplied = to_units(U256::from(totals.totalSupplyAssets), loan_decimals);
        let borrowed = to_units(U256::from(totals.totalBorrowAssets), loan_decimals);
        let available = (supplied - borrowed).max(0.0);
        let utilization = LendingMarket::utilization_of(supplied, borrowed);
        let fee = totals.fee as f64 / 1e18;
        let borrow_rate = wad_to_f64(rate?);
        let borrow_apy = rate_to_apy(borrow_rate);
        let supply_apy = rate_to_apy(borrow_rate * utilization.min(1.0) * (1.0 - fee));
        let lltv = wad_to_f64(params.lltv);
        let penalty = liquidation_penalty(lltv);
        let updated = now_secs();
        let status = MarketStatus {
            is_active: true,
            is_frozen: false,
            is_paused: false,
            can_supply: true,
            can_borrow: params.irm != Address::ZERO,
            can_use_as_collateral: false,
        };

        let loan = LendingMarket {
            id: self.market_id(id, Side::Loan),
            protocol: Protocol::MorphoBlue,
            chain_id: self.chain_id,
            kind: MarketKind::Lending,
            contract: self.morpho,
            asset: params.loan_token,
            asset_symbol: loan_symbol.clone(),
            asset_decimals: loan_decimals,
            paired_asset: Some(params.collateral_token),
            paired_symbol: Some(collateral_symbol.clone()),
            receipt_token: None,
            price_usd: loan_price,
            supply_apy,
            borrow_apy,
            net_supply_apy: supply_apy,
            net_borrow_apy: borrow_apy,
            total_supply: supplied,
            total_supply_usd: supplied * loan_price,
            total_borrow: borrowed,
            total_borrow_usd: borrowed * loan_price,
            available_liquidity: available,
            available_liquidity_usd: available * loan_price,
            utilization,
            ltv: 0.0,
            liquidation_threshold: lltv,
            liquidation_penalty: penalty,
            supply_cap: None,
            borrow_cap: None,
            status,
            last_updated: updated,
        };

        // Morpho does not track collateral totals per market
        let collateral = LendingMarket {
            id: self.market_id(id, Side::Collateral),
            kind: MarketKind::CollateralOnly,
            asset: params.collateral_token,
            asset_symbol: collateral_symbol,
            asset_decimals: collateral_decimals,
            paired_asset: Some(params.loan_token),
            paired_symbol: Some(loan_symbol),
            price_usd: collateral_price,
            supply_apy: 0.0,
            borrow_apy: 0.0,
            net_supply_apy: 0.0,
            net_borrow_apy: 0.0,
            total_supply: 0.0,
            total_supply_usd: 0.0,
            total_borrow: 0.0,
            total_borrow_usd: 0.0,
            available_liquidity: 0.0,
            available_liquidity_usd: 0.0,
            utilization: 0.0,
            ltv: lltv,
            status: MarketStatus {
                can_borrow: false,
                can_use_as_collateral: true,
                ..status
            },
            ..loan.clone()
        };

        Ok(PairState {
            id,
            params,
            total_supply_assets: U256::from(totals.totalSupplyAssets),
            total_supply_shares: U256::from(totals.totalSupplyShares),
            total_borrow_assets: U256::from(totals.totalBorrowAssets),
            total_borrow_shares: U256::from(totals.totalBorrowShares),
            loan,
            collateral,
        })
    }

    async fn resolve(&self, market_id: &str) -> Result<(PairState, Side), AdapterError> {
        let parts = base::market_id_parts(market_id, Protocol::MorphoBlue, self.chain_id)?;
        let side = match parts.as_slice() {
            [_, _, _] => Side::Loan,
            [_, _, _, suffix] if suffix.eq_ignore_ascii_case(COLLATERAL_SUFFIX) => Side::Collateral,
            _ => return Err(AdapterError::MarketNotFound(market_id.to_string())),
        };
        let id: B256 = parts[2]
            .parse()
            .map_err(|_| AdapterError::MarketNotFound(market_id.to_string()))?;

        let pair = self
            .pairs()
            .await?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| AdapterError::MarketNotFound(market_id.to_string()))?;
        Ok((pair, side))
    }

    async fn read_position(&self, pair: &PairState, account: Address) -> Result<PairPosition, AdapterError> {
        let position = read_contract(
            self.transport.as_ref(),
            self.morpho,
            IMorpho::positionCall { id: pair.id, user: account },
        )
        .await?;
        Ok(PairPosition {
            supply_shares: position.supplyShares,
            borrow_shares: U256::from(position.borrowShares),
            collateral: U256::from(position.collateral),
        })
    }

    /// Collateral price in loan token base units per collateral base unit
    async fn oracle_price(&self, pair: &PairState) -> Result<f64, AdapterError> {
        let price = read_contract(self.transport.as_ref(), pair.params.oracle, IOracle::priceCall {}).await?;
        Ok(u256_to_f64(price._0) / ORACLE_PRICE_SCALE)
    }

    /// Oracle price, or the same ratio derived from the USD prices on both markets
    /// when the oracle read fails
    async fn price_or_market(&self, pair: &PairState) -> Result<f64, AdapterError> {
        let error = match self.oracle_price(pair).await {
            Ok(price) => return Ok(price),
            Err(e) => e,
        };
        if pair.loan.price_usd <= 0.0 || pair.collateral.price_usd <= 0.0 {
            return Err(error);
        }
        tracing::warn!(
            market = %pair.id,
            mode = ?HealthFactorMode::Approximate,
            error = %error,
            "Morpho oracle unreadable, valuing collateral at market prices"
        );
        let decimals = pair.loan.asset_decimals as i32 - pair.collateral.asset_decimals as i32;
        Ok(pair.collateral.price_usd / pair.loan.price_usd * 10f64.powi(decimals))
    }

    fn supplied_assets(pair: &PairState, position: &PairPosition) -> U256 {
        to_assets_down(position.supply_shares, pair.total_supply_assets, pair.total_supply_shares)
    }

    fn borrowed_assets(pair: &PairState, position: &PairPosition) -> U256 {
        to_assets_up(position.borrow_shares, pair.total_borrow_assets, pair.total_borrow_shares)
    }

    /// LLTV-weighted collateral and debt in loan token base units
    async fn risk_snapshot(&self, pair: &PairState, position: &PairPosition) -> Result<RiskSnapshot, AdapterError> {
        let debt = u256_to_f64(Self::borrowed_assets(pair, position));
        let weighted = if position.collateral.is_zero() {
            0.0
        } else {
            u256_to_f64(position.collateral) * self.price_or_market(pair).await? * pair.lltv()
        };
        Ok(RiskSnapshot::new(weighted, debt))
    }

    async fn other_pairs_health(&self, account: Address, pairs: &[PairState], exclude: Option<B256>) -> Result<f64, AdapterError> {
        let mut lowest = f64::INFINITY;
        for pair in pairs.iter().filter(|p| Some(p.id) != exclude) {
            let position = self.read_position(pair, account).await?;
            if position.borrow_shares.is_zero() {
                continue;
            }
            lowest = lowest.min(self.risk_snapshot(pair, &position).await?.health_factor());
        }
        Ok(lowest)
    }

    fn unsupported(&self, action: ActionKind, market_id: &str) -> AdapterError {
        AdapterError::UnsupportedAction {
            protocol: Protocol::MorphoBlue,
            action,
            market_id: market_id.to_string(),
        }
    }

    async fn approval(
        &self,
        market: &LendingMarket,
        params: &ActionParams,
    ) -> Result<Option<TransactionCall>, AdapterError> {
        base::approval_if_needed(
            self.transport.as_ref(),
            market.asset,
            params.account,
            self.morpho,
            params.amount,
            &market.asset_symbol,
        )
        .await
    }

    fn pair_label(pair: &PairState) -> String {
        format!("{}/{}", pair.collateral.asset_symbol, pair.loan.asset_symbol)
    }
}

#[async_trait]
impl LendingAdapter for MorphoBlueAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::MorphoBlue
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        let pairs = self.pairs().await?;
        Ok(pairs.into_iter().flat_map(|p| [p.loan, p.collateral]).collect())
    }

    async fn get_user_positions(&self, account: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        let pairs = self.pairs().await?;
        let reads = join_all(pairs.iter().map(|pair| self.read_position(pair, account))).await;

        let mut positions = Vec::new();
        let mut pair_health = Vec::new();
        for (pair, read) in pairs.iter().zip(reads) {
            let position = match read {
                Ok(position) => position,
                Err(e) => {
                    tracing::warn!(market = %pair.id, error = %e, "Morpho position read failed");
                    continue;
                }
            };
            let start = positions.len();
            let supplied = Self::supplied_assets(pair, &position);
            let borrowed = Self::borrowed_assets(pair, &position);

            if !supplied.is_zero() || !borrowed.is_zero() {
                let market = &pair.loan;
                positions.push(LendingPosition {
                    id: format!("{}:{:#x}", market.id, account),
                    market_id: market.id.clone(),
                    protocol: Protocol::MorphoBlue,
                    chain_id: self.chain_id,
                    account,
                    asset: market.asset,
                    asset_symbol: market.asset_symbol.clone(),
                    asset_decimals: market.asset_decimals,
                    supply_balance: supplied,
                    supply_shares: Some(position.supply_shares),
                    borrow_balance: borrowed,
                    borrow_shares: Some(position.borrow_shares),
                    collateral_balance: U256::ZERO,
                    supply_balance_usd: to_units(supplied, market.asset_decimals) * market.price_usd,
                    borrow_balance_usd: to_units(borrowed, market.asset_decimals) * market.price_usd,
                    collateral_balance_usd: 0.0,
                    supply_apy: market.supply_apy,
                    borrow_apy: market.borrow_apy,
                    collateral_enabled: false,
                    health_factor: None,
                });
            }

            if !position.collateral.is_zero() {
                let market = &pair.collateral;
                positions.push(LendingPosition {
                    id: format!("{}:{:#x}", market.id, account),
                    market_id: market.id.clone(),
                    protocol: Protocol::MorphoBlue,
                    chain_id: self.chain_id,
                    account,
                    asset: market.asset,
                    asset_symbol: market.asset_symbol.clone(),
                    asset_decimals: market.asset_decimals,
                    supply_balance: U256::ZERO,
                    supply_shares: None,
                    borrow_balance: U256::ZERO,
                    borrow_shares: None,
                    collateral_balance: position.collateral,
                    supply_balance_usd: 0.0,
                    borrow_balance_usd: 0.0,
                    collateral_balance_usd: to_units(position.collateral, market.asset_decimals) * market.price_usd,
                    supply_apy: 0.0,
                    borrow_apy: 0.0,
                    collateral_enabled: true,
                    health_factor: None,
                });
            }

            let health = if borrowed.is_zero() {
                Some(f64::INFINITY)
            } else {
                match self.risk_snapshot(pair, &position).await {
                    Ok(snapshot) => Some(snapshot.health_factor()),
                    Err(e) => {
                        tracing::warn!(market = %pair.id, error = %e, "Morpho health factor read failed");
                        None
                    }
                }
            };
            pair_health.push((start..positions.len(), health));
        }

        if positions.iter().any(LendingPosition::has_debt) {
            for (range, health) in pair_health {
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
        let (pair, side) = self.resolve(&params.market_id).await?;
        let market = pair.market(side);
        let mut calls: Vec<TransactionCall> = self.approval(market, params).await?.into_iter().collect();

        let call = match side {
            Side::Loan => TransactionCall::new(
                self.morpho,
                &IMorpho::supplyCall {
                    marketParams: pair.params.to_sol(),
                    assets: params.amount,
                    shares: U256::ZERO,
                    onBehalf: params.account,
                    data: Bytes::new(),
                },
                format!("Supply {} to Morpho {}", market.asset_symbol, Self::pair_label(&pair)),
            ),
            Side::Collateral => TransactionCall::new(
                self.morpho,
                &IMorpho::supplyCollateralCall {
                    marketParams: pair.params.to_sol(),
                    assets: params.amount,
                    onBehalf: params.account,
                    data: Bytes::new(),
                },
                format!("Post {} collateral on Morpho {}", market.asset_symbol, Self::pair_label(&pair)),
            ),
        };
        calls.push(call);
        Ok(calls)
    }

    async fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (pair, side) = self.resolve(&params.market_id).await?;
        let market = pair.market(side);

        let call = match side {
            Side::Loan => {
                let position = self.read_position(&pair, params.account).await?;
                if position.supply_shares.is_zero() {
                    return Err(AdapterError::InvalidAmount(format!(
                        "no {} supplied on Morpho {}",
                        market.asset_symbol,
                        Self::pair_label(&pair)
                    )));
                }
                // Full exits go by shares so no dust is left behind
                let (assets, shares) = if params.amount >= Self::supplied_assets(&pair, &position) {
                    (U256::ZERO, position.supply_shares)
                } else {
                    (params.amount, U256::ZERO)
                };
                TransactionCall::new(
                    self.morpho,
                    &IMorpho::withdrawCall {
                        marketParams: pair.params.to_sol(),
                        assets,
                        shares,
                        onBehalf: params.account,
                        receiver: params.account,
                    },
                    format!("Withdraw {} from Morpho {}", market.asset_symbol, Self::pair_label(&pair)),
                )
            }
            Side::Collateral => TransactionCall::new(
                self.morpho,
                &IMorpho::withdrawCollateralCall {
                    marketParams: pair.params.to_sol(),
                    assets: params.amount,
                    onBehalf: params.account,
                    receiver: params.account,
                },
                format!("Withdraw {} collateral from Morpho {}", market.asset_symbol, Self::pair_label(&pair)),
            ),
        };
        Ok(vec![call])
    }

    async fn build_borrow(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (pair, side) = self.resolve(&params.market_id).await?;
        if side == Side::Collateral {
            return Err(self.unsupported(ActionKind::Borrow, &params.market_id));
        }
        let call = IMorpho::borrowCall {
            marketParams: pair.params.to_sol(),
            assets: params.amount,
            shares: U256::ZERO,
            onBehalf: params.account,
            receiver: params.account,
        };
        Ok(vec![TransactionCall::new(
            self.morpho,
            &call,
            format!("Borrow {} from Morpho {}", pair.loan.asset_symbol, Self::pair_label(&pair)),
        )])
    }

    async fn build_repay(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (pair, side) = self.resolve(&params.market_id).await?;
        if side == Side::Collateral {
            return Err(self.unsupported(ActionKind::Repay, &params.market_id));
        }
        let position = self.read_position(&pair, params.account).await?;
        if position.borrow_shares.is_zero() {
            return Err(AdapterError::InvalidAmount(format!(
                "no {} debt on Morpho {}",
                pair.loan.asset_symbol,
                Self::pair_label(&pair)
            )));
        }
        let (assets, shares) = if params.amount >= Self::borrowed_assets(&pair, &position) {
            (U256::ZERO, position.borrow_shares)
        } else {
            (params.amount, U256::ZERO)
        };

        let mut calls: Vec<TransactionCall> = self.approval(&pair.loan, params).await?.into_iter().collect();
        let call = IMorpho::repayCall {
            marketParams: pair.params.to_sol(),
            assets,
            shares,
            onBehalf: params.account,
            data: Bytes::new(),
        };
        calls.push(TransactionCall::new(
            self.morpho,
            &call,
            format!("Repay {} on Morpho {}", pair.loan.asset_symbol, Self::pair_label(&pair)),
        ));
        Ok(calls)
    }

    async fn build_enable_collateral(&self, params: &CollateralParams) -> Result<Vec<TransactionCall>, AdapterError> {
        Err(self.unsupported(ActionKind::EnableCollateral, &params.market_id))
    }

    async fn calculate_health_factor(&self, account: Address) -> Result<f64, AdapterError> {
        let pairs = self.pairs().await?;
        self.other_pairs_health(account, &pairs, None).await
    }

    async fn simulate_health_factor(&self, account: Address, action: &SimulatedAction) -> Result<f64, AdapterError> {
        let (pair, side) = self.resolve(&action.market_id).await?;
        let position = self.read_position(&pair, account).await?;
        let snapshot = self.risk_snapshot(&pair, &position).await?;

        let projected = match (side, action.kind) {
            (_, ActionKind::EnableCollateral) => snapshot.health_factor(),
            // Supplied loan tokens never back the pair's debt
            (Side::Loan, ActionKind::Supply | ActionKind::Withdraw) => snapshot.health_factor(),
            (Side::Loan, kind) => snapshot.project(kind, u256_to_f64(action.amount), 0.0),
            (Side::Collateral, ActionKind::Supply | ActionKind::Withdraw) => {
                let value = u256_to_f64(action.amount) * self.price_or_market(&pair).await?;
                snapshot.project(action.kind, value, pair.lltv())
            }
            (Side::Collateral, kind) => return Err(self.unsupported(kind, &action.market_id)),
        };

        let pairs = self.pairs().await?;
        let others = self.other_pairs_health(account, &pairs, Some(pair.id)).await?;
        Ok(projected.min(others))
    }
}
