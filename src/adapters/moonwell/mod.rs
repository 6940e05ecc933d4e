// Moonwell adapter: Compound V2 style comptroller with one mToken per asset
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub mod chain_config;
pub mod contracts;

use contracts::{IComptroller, IMToken, IPriceOracle, MANTISSA_SCALE};

use crate::adapters::base::{self, rate_to_apy};
use crate::adapters::traits::{AdapterError, LendingAdapter};
use crate::blockchain::{read_contract, ChainTransport};
use crate::models::{
    now_secs, ActionKind, ActionParams, CollateralParams, LendingMarket, LendingPosition, MarketKind, MarketStatus,
    Protocol, SimulatedAction, TransactionCall,
};
use crate::risk::{self, HealthFactorMode, RiskSnapshot};
use crate::services::price_service::{price_or_zero, PriceOracle};
use crate::utils::math::{to_units, u256_to_f64, wad_to_f64};
use crate::utils::TimedCache;

#[derive(Debug, Clone)]
struct MTokenState {
    m_token: Address,
    collateral_factor: f64,
    market: LendingMarket,
}

/// One account's balances in one mToken, in underlying base units
#[derive(Debug, Clone, Copy)]
struct MTokenBalance {
    supplied: U256,
    borrowed: U256,
}

/// Balances of an account across every market, with the markets it entered
struct AccountBook {
    balances: Vec<(usize, MTokenBalance)>,
    entered: HashSet<Address>,
    /// Markets whose snapshot could not be read
    unreadable: usize,
}

impl AccountBook {
    fn debt_usd(&self, states: &[MTokenState]) -> f64 {
        self.balances
            .iter()
            .map(|(i, b)| to_units(b.borrowed, states[*i].market.asset_decimals) * states[*i].market.price_usd)
            .sum()
    }

    fn snapshot(&self, states: &[MTokenState]) -> RiskSnapshot {
        let weighted = self
            .balances
            .iter()
            .filter(|(i, _)| self.entered.contains(&states[*i].m_token))
            .map(|(i, b)| {
                let state = &states[*i];
                to_units(b.supplied, state.market.asset_decimals) * state.market.price_usd * state.collateral_factor
            })
            .sum();
        RiskSnapshot::new(weighted, self.debt_usd(states))
    }

    fn balance_of(&self, index: usize) -> Option<MTokenBalance> {
        self.balances.iter().find(|(i, _)| *i == index).map(|(_, b)| *b)
    }
}

pub struct MoonwellAdapter {
    transport: Arc<dyn ChainTransport>,
    prices: Arc<dyn PriceOracle>,
    chain_id: u64,
    comptroller: Address,
    mtoken_cache: TimedCache<Vec<MTokenState>>,
}

impl MoonwellAdapter {
    pub fn new(
        transport: Arc<dyn ChainTransport>,
        prices: Arc<dyn PriceOracle>,
        chain_id: u64,
    ) -> Result<Self, AdapterError> {
        let comptroller = chain_config::comptroller(chain_id).ok_or(AdapterError::UnsupportedChain(chain_id))?;
        Ok(Self::with_comptroller(transport, prices, chain_id, comptroller))
    }

    pub fn with_comptroller(
        transport: Arc<dyn ChainTransport>,
        prices: Arc<dyn PriceOracle>,
        chain_id: u64,
        comptroller: Address,
    ) -> Self {
        tracing::info!(chain_id, comptroller = %comptroller, "Initialized Moonwell adapter");
        Self {
            transport,
            prices,
            chain_id,
            comptroller,
            mtoken_cache: TimedCache::new(Duration::from_secs(15)),
        }
    }

    async fn mtokens(&self) -> Result<Vec<MTokenState>, AdapterError> {
        if let Some(states) = self.mtoken_cache.get().await {
            return Ok(states);
        }

        let t = self.transport.as_ref();
        let (all_markets, oracle, incentive) = tokio::join!(
            read_contract(t, self.comptroller, IComptroller::getAllMarketsCall {}),
            read_contract(t, self.comptroller, IComptroller::oracleCall {}),
            read_contract(t, self.comptroller, IComptroller::liquidationIncentiveMantissaCall {}),
        );
        let m_tokens = all_markets?._0;
        let oracle = oracle.map(|o| o._0).ok();
        let penalty = incentive.map(|i| (wad_to_f64(i._0) - 1.0).max(0.0)).unwrap_or(0.0);

        let results = join_all(m_tokens.iter().map(|&m| self.fetch_mtoken(m, oracle, penalty))).await;
        let mut states = Vec::new();
        for (m_token, result) in m_tokens.iter().zip(results) {
            match result {
                Ok(Some(state)) => states.push(state),
                Ok(None) => tracing::debug!(m_token = %m_token, "Skipping unlisted mToken"),
                Err(e) => tracing::warn!(chain_id = self.chain_id, m_token = %m_token, error = %e, "Skipping Moonwell market"),
            }
        }

        tracing::info!(chain_id = self.chain_id, market_count = states.len(), "Loaded Moonwell markets");
        self.mtoken_cache.put(states.clone()).await;
        Ok(states)
    }

    async fn fetch_mtoken(
        &self,
        m_token: Address,
        oracle: Option<Address>,
        penalty: f64,
    ) -> Result<Option<MTokenState>, AdapterError> {
        let t = self.transport.as_ref();
        let (listing, underlying, supply_rate, borrow_rate, cash, borrows, reserves) = tokio::join!(
            read_contract(t, self.comptroller, IComptroller::marketsCall { mToken: m_token }),
            read_contract(t, m_token, IMToken::underlyingCall {}),
            read_contract(t, m_token, IMToken::supplyRatePerTimestampCall {}),
            read_contract(t, m_token, IMToken::borrowRatePerTimestampCall {}),
            read_contract(t, m_token, IMToken::getCashCall {}),
            read_contract(t, m_token, IMToken::totalBorrowsCall {}),
            read_contract(t, m_token, IMToken::totalReservesCall {}),
        );
        let listing = listing?;
        if !listing.isListed {
            return Ok(None);
        }
        let asset = underlying?._0;

        let (metadata, mint_paused, borrow_paused, supply_cap, borrow_cap) = tokio::join!(
            base::erc20_metadata(t, asset),
            read_contract(t, self.comptroller, IComptroller::mintGuardianPausedCall { mToken: m_token }),
            read_contract(t, self.comptroller, IComptroller::borrowGuardianPausedCall { mToken: m_token }),
            read_contract(t, self.comptroller, IComptroller::supplyCapsCall { mToken: m_token }),
            read_contract(t, self.comptroller, IComptroller::borrowCapsCall { mToken: m_token }),
        );
        let (symbol, decimals) = metadata?;
        let price_usd = self.underlying_price(m_token, oracle, decimals, &symbol).await;

        let cash = to_units(cash?._0, decimals);
        let borrowed = to_units(borrows?._0, decimals);
        let reserves = to_units(reserves?._0, decimals);
        let supplied = (cash + borrowed - reserves).max(0.0);
        let supply_apy = rate_to_apy(wad_to_f64(supply_rate?._0));
        let borrow_apy = rate_to_apy(wad_to_f64(borrow_rate?._0));
        let collateral_factor = wad_to_f64(listing.collateralFactorMantissa);
        let supply_cap = to_units(supply_cap?._0, decimals);
        let borrow_cap = to_units(borrow_cap?._0, decimals);
        let mint_paused = mint_paused?._0;
        let borrow_paused = borrow_paused?._0;

        let market = LendingMarket {
            id: format!("{}:{}:{:#x}", Protocol::Moonwell, self.chain_id, asset),
            protocol: Protocol::Moonwell,
            chain_id: self.chain_id,
            kind: MarketKind::Lending,
            contract: m_token,
            asset,
            asset_symbol: symbol,
            asset_decimals: decimals,
            paired_asset: None,
            paired_symbol: None,
            receipt_token: Some(m_token),
            price_usd,
            supply_apy,
            borrow_apy,
            net_supply_apy: supply_apy,
            net_borrow_apy: borrow_apy,
            total_supply: supplied,
            total_supply_usd: supplied * price_usd,
            total_borrow: borrowed,
            total_borrow_usd: borrowed * price_usd,
            available_liquidity: cash,
            available_liquidity_usd: cash * price_usd,
            utilization: LendingMarket::utilization_of(supplied, borrowed),
            ltv: collateral_factor,
            liquidation_threshold: collateral_factor,
            liquidation_penalty: penalty,
            // Zero cap means uncapped on Compound V2 forks
            supply_cap: (supply_cap > 0.0).then_some(supply_cap),
            borrow_cap: (borrow_cap > 0.0).then_some(borrow_cap),
            status: MarketStatus {
                is_active: true,
                is_frozen: false,
                is_paused: mint_paused && borrow_paused,
                can_supply: !mint_paused,
                can_borrow: !borrow_paused,
                can_use_as_collateral: collateral_factor > 0.0,
            },
            last_updated: now_secs(),
        };

        Ok(Some(MTokenState {
            m_token,
            collateral_factor,
            market,
        }))
    }

    /// USD price per whole underlying unit, from the protocol oracle when it answers
    async fn underlying_price(&self, m_token: Address, oracle: Option<Address>, decimals: u8, symbol: &str) -> f64 {
        if let Some(oracle) = oracle {
            match read_contract(self.transport.as_ref(), oracle, IPriceOracle::getUnderlyingPriceCall { mToken: m_token }).await {
                Ok(price) if !price._0.is_zero() => {
                    return u256_to_f64(price._0) / 10f64.powi(36 - decimals as i32);
                }
                Ok(_) => tracing::debug!(m_token = %m_token, "Oracle has no price, using price feed"),
                Err(e) => tracing::warn!(m_token = %m_token, error = %e, "Oracle read failed, using price feed"),
            }
        }
        price_or_zero(self.prices.as_ref(), symbol).await
    }

    async fn resolve(&self, market_id: &str) -> Result<(Vec<MTokenState>, usize), AdapterError> {
        let parts = base::market_id_parts(market_id, Protocol::Moonwell, self.chain_id)?;
        if parts.len() != 3 {
            return Err(AdapterError::MarketNotFound(market_id.to_string()));
        }
        let address = base::parse_address(parts[2])?;
        let states = self.mtokens().await?;
        let index = states
            .iter()
            .position(|s| s.market.asset == address || s.m_token == address)
            .ok_or_else(|| AdapterError::MarketNotFound(market_id.to_string()))?;
        Ok((states, index))
    }

    async fn read_balance(&self, m_token: Address, account: Address) -> Result<MTokenBalance, AdapterError> {
        let snapshot = read_contract(
            self.transport.as_ref(),
            m_token,
            IMToken::getAccountSnapshotCall { account },
        )
        .await?;
        if !snapshot.err.is_zero() {
            return Err(AdapterError::ContractError(format!(
                "getAccountSnapshot returned error code {}",
                snapshot.err
            )));
        }
        let supplied = snapshot.mTokenBalance * snapshot.exchangeRateMantissa / U256::from(10u64).pow(U256::from(18u64));
        Ok(MTokenBalance {
            supplied,
            borrowed: snapshot.borrowBalance,
        })
    }

    async fn account_book(&self, states: &[MTokenState], account: Address) -> Result<AccountBook, AdapterError> {
        let t = self.transport.as_ref();
        let (assets_in, reads) = tokio::join!(
            read_contract(t, self.comptroller, IComptroller::getAssetsInCall { account }),
            join_all(states.iter().map(|s| self.read_balance(s.m_token, account))),
        );

        let mut balances = Vec::new();
        let mut unreadable = 0;
        for (index, (state, read)) in states.iter().zip(reads).enumerate() {
            match read {
                Ok(balance) if balance.supplied.is_zero() && balance.borrowed.is_zero() => {}
                Ok(balance) => balances.push((index, balance)),
                Err(e) => {
                    tracing::warn!(m_token = %state.m_token, error = %e, "Moonwell account snapshot failed");
                    unreadable += 1;
                }
            }
        }
        Ok(AccountBook {
            balances,
            entered: assets_in?._0.into_iter().collect(),
            unreadable,
        })
    }

    /// Bucketed estimate from the comptroller's own liquidity figures
    async fn approximate_health(&self, book: &AccountBook, states: &[MTokenState], account: Address) -> Result<f64, AdapterError> {
        let liquidity = read_contract(
            self.transport.as_ref(),
            self.comptroller,
            IComptroller::getAccountLiquidityCall { account },
        )
        .await?;
        let excess = u256_to_f64(liquidity.liquidity) / MANTISSA_SCALE;
        let shortfall = u256_to_f64(liquidity.shortfall) / MANTISSA_SCALE;
        let debt = book.debt_usd(states);
        tracing::warn!(
            account = %account,
            mode = ?HealthFactorMode::Approximate,
            unreadable = book.unreadable,
            "Moonwell health factor from account liquidity"
        );
        if debt <= 0.0 && shortfall > 0.0 {
            return Ok(0.5);
        }
        Ok(risk::approximate_from_liquidity(excess, shortfall, debt))
    }

    async fn health_of(&self, book: &AccountBook, states: &[MTokenState], account: Address) -> Result<f64, AdapterError> {
        if book.unreadable > 0 {
            return self.approximate_health(book, states, account).await;
        }
        Ok(book.snapshot(states).health_factor())
    }

    async fn approval(&self, state: &MTokenState, params: &ActionParams) -> Result<Option<TransactionCall>, AdapterError> {
        base::approval_if_needed(
            self.transport.as_ref(),
            state.market.asset,
            params.account,
            state.m_token,
            params.amount,
            &state.market.asset_symbol,
        )
        .await
    }
}

#[async_trait]
impl LendingAdapter for MoonwellAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Moonwell
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        Ok(self.mtokens().await?.into_iter().map(|s| s.market).collect())
    }

    async fn get_user_positions(&self, account: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        let states = self.mtokens().await?;
        let book = self.account_book(&states, account).await?;

        let mut positions: Vec<LendingPosition> = book
            .balances
            .iter()
            .map(|(index, balance)| {
                let state = &states[*index];
                let market = &state.market;
                LendingPosition {
                    id: format!("{}:{:#x}", market.id, account),
                    market_id: market.id.clone(),
                    protocol: Protocol::Moonwell,
                    chain_id: self.chain_id,
                    account,
                    asset: market.asset,
                    asset_symbol: market.asset_symbol.clone(),
                    asset_decimals: market.asset_decimals,
                    supply_balance: balance.supplied,
                    supply_shares: None,
                    borrow_balance: balance.borrowed,
                    borrow_shares: None,
                    collateral_balance: U256::ZERO,
                    supply_balance_usd: to_units(balance.supplied, market.asset_decimals) * market.price_usd,
                    borrow_balance_usd: to_units(balance.borrowed, market.asset_decimals) * market.price_usd,
                    collateral_balance_usd: 0.0,
                    supply_apy: market.supply_apy,
                    borrow_apy: market.borrow_apy,
                    collateral_enabled: book.entered.contains(&state.m_token),
                    health_factor: None,
                }
            })
            .collect();

        if positions.iter().any(LendingPosition::has_debt) {
            let health = self.health_of(&book, &states, account).await;
            base::attach_health_factor(Protocol::Moonwell, account, &mut positions, health);
        }
        Ok(positions)
    }

    async fn wallet_balance(&self, asset: Address, account: Address) -> Result<U256, AdapterError> {
        base::erc20_balance(self.transport.as_ref(), asset, account).await
    }

    async fn build_supply(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (states, index) = self.resolve(&params.market_id).await?;
        let state = &states[index];
        let mut calls: Vec<TransactionCall> = self.approval(state, params).await?.into_iter().collect();
        calls.push(TransactionCall::new(
            state.m_token,
            &IMToken::mintCall { mintAmount: params.amount },
            format!("Supply {} to Moonwell", state.market.asset_symbol),
        ));
        Ok(calls)
    }

    async fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (states, index) = self.resolve(&params.market_id).await?;
        let state = &states[index];
        Ok(vec![TransactionCall::new(
            state.m_token,
            &IMToken::redeemUnderlyingCall {
                redeemAmount: params.amount,
            },
            format!("Withdraw {} from Moonwell", state.market.asset_symbol),
        )])
    }

    async fn build_borrow(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (states, index) = self.resolve(&params.market_id).await?;
        let state = &states[index];
        Ok(vec![TransactionCall::new(
            state.m_token,
            &IMToken::borrowCall {
                borrowAmount: params.amount,
            },
            format!("Borrow {} from Moonwell", state.market.asset_symbol),
        )])
    }

    async fn build_repay(&self, params: &ActionParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (states, index) = self.resolve(&params.market_id).await?;
        let state = &states[index];
        let debt = self.read_balance(state.m_token, params.account).await?.borrowed;
        // uint256 max repays the whole debt including interest accrued before inclusion
        let repay_amount = if !debt.is_zero() && params.amount >= debt {
            U256::MAX
        } else {
            params.amount
        };

        let mut calls: Vec<TransactionCall> = self.approval(state, params).await?.into_iter().collect();
        calls.push(TransactionCall::new(
            state.m_token,
            &IMToken::repayBorrowCall {
                repayAmount: repay_amount,
            },
            format!("Repay {} on Moonwell", state.market.asset_symbol),
        ));
        Ok(calls)
    }

    async fn build_enable_collateral(&self, params: &CollateralParams) -> Result<Vec<TransactionCall>, AdapterError> {
        let (states, index) = self.resolve(&params.market_id).await?;
        let state = &states[index];
        let call = if params.enabled {
            TransactionCall::new(
                self.comptroller,
                &IComptroller::enterMarketsCall {
                    mTokens: vec![state.m_token],
                },
                format!("Use {} as collateral on Moonwell", state.market.asset_symbol),
            )
        } else {
            TransactionCall::new(
                self.comptroller,
                &IComptroller::exitMarketCall { mToken: state.m_token },
                format!("Stop using {} as collateral on Moonwell", state.market.asset_symbol),
            )
        };
        Ok(vec![call])
    }

    async fn calculate_health_factor(&self, account: Address) -> Result<f64, AdapterError> {
        let states = self.mtokens().await?;
        let book = self.account_book(&states, account).await?;
        self.health_of(&book, &states, account).await
    }

    async fn simulate_health_factor(&self, account: Address, action: &SimulatedAction) -> Result<f64, AdapterError> {
        let (states, index) = self.resolve(&action.market_id).await?;
        let book = self.account_book(&states, account).await?;
        let state = &states[index];

        if book.unreadable > 0 || state.market.price_usd <= 0.0 {
            let current = self.health_of(&book, &states, account).await?;
            tracing::warn!(
                market_id = %state.market.id,
                mode = ?HealthFactorMode::Approximate,
                "Projecting Moonwell health factor approximately"
            );
            return Ok(risk::approximate(current, action.kind));
        }

        let snapshot = book.snapshot(&states);
        let entered = book.entered.contains(&state.m_token);
        let price = state.market.price_usd;
        let amount_usd = to_units(action.amount, state.market.asset_decimals) * price;

        let projected = match action.kind {
            ActionKind::Borrow | ActionKind::Repay => snapshot.project(action.kind, amount_usd, 0.0),
            ActionKind::Supply | ActionKind::Withdraw if entered => {
                snapshot.project(action.kind, amount_usd, state.collateral_factor)
            }
            ActionKind::Supply | ActionKind::Withdraw => snapshot.health_factor(),
            ActionKind::EnableCollateral if entered => snapshot.health_factor(),
            ActionKind::EnableCollateral => {
                let supplied = book.balance_of(index).map(|b| b.supplied).unwrap_or_default();
                let supplied_usd = to_units(supplied, state.market.asset_decimals) * price;
                snapshot.project(ActionKind::EnableCollateral, supplied_usd, state.collateral_factor)
            }
        };
        Ok(projected)
    }
}
