// Ranking of candidate markets for a supply or borrow of one asset
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{ActionKind, LendingMarket, RoutingAlternative, RoutingSuggestion};

pub const REASON_HIGHEST_APY: &str = "highest_apy";
pub const REASON_LOWEST_BORROW_APY: &str = "lowest_borrow_apy";

fn fits_under(headroom: Option<f64>, amount: f64) -> bool {
    headroom.map_or(true, |room| room >= amount)
}

/// Lending markets for `asset_symbol` able to take `amount` more supply, best net APY first
pub fn supply_candidates<'a>(markets: &'a [LendingMarket], asset_symbol: &str, amount: f64) -> Vec<&'a LendingMarket> {
    let mut candidates: Vec<&LendingMarket> = markets
        .iter()
        .filter(|m| m.asset_symbol.eq_ignore_ascii_case(asset_symbol))
        .filter(|m| !m.is_collateral_only() && m.status.accepts_supply())
        .filter(|m| fits_under(m.supply_headroom(), amount))
        .collect();
    candidates.sort_by(|a, b| {
        b.net_supply_apy
            .partial_cmp(&a.net_supply_apy)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.total_supply_usd.partial_cmp(&a.total_supply_usd).unwrap_or(Ordering::Equal))
    });
    candidates
}

/// Markets lending `asset_symbol` with at least `amount` available, cheapest net borrow APY first
pub fn borrow_candidates<'a>(markets: &'a [LendingMarket], asset_symbol: &str, amount: f64) -> Vec<&'a LendingMarket> {
    let mut candidates: Vec<&LendingMarket> = markets
        .iter()
        .filter(|m| m.asset_symbol.eq_ignore_ascii_case(asset_symbol))
        .filter(|m| !m.is_collateral_only() && m.status.accepts_borrow())
        .filter(|m| m.available_liquidity >= amount && fits_under(m.borrow_headroom(), amount))
        .collect();
    candidates.sort_by(|a, b| {
        a.net_borrow_apy
            .partial_cmp(&b.net_borrow_apy)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.available_liquidity_usd.partial_cmp(&a.available_liquidity_usd).unwrap_or(Ordering::Equal))
    });
    candidates
}

/// Best supply market plus runner-ups. `held` lists market ids the account already uses.
pub fn suggest_supply(
    markets: &[LendingMarket],
    asset_symbol: &str,
    amount: f64,
    held: &HashSet<String>,
) -> Option<RoutingSuggestion> {
    let candidates = supply_candidates(markets, asset_symbol, amount);
    build(ActionKind::Supply, &candidates, amount, held, |m| m.net_supply_apy)
}

pub fn suggest_borrow(
    markets: &[LendingMarket],
    asset_symbol: &str,
    amount: f64,
    held: &HashSet<String>,
) -> Option<RoutingSuggestion> {
    let candidates = borrow_candidates(markets, asset_symbol, amount);
    build(ActionKind::Borrow, &candidates, amount, held, |m| m.net_borrow_apy)
}

fn build(
    action: ActionKind,
    candidates: &[&LendingMarket],
    amount: f64,
    held: &HashSet<String>,
    apy: impl Fn(&LendingMarket) -> f64,
) -> Option<RoutingSuggestion> {
    let (best, rest) = candidates.split_first()?;
    let best_apy = apy(best);

    let alternatives = rest
        .iter()
        .map(|market| {
            let net_apy = apy(market);
            let apy_delta = net_apy - best_apy;
            let reason = match action {
                ActionKind::Borrow => format!("{:.2}% higher borrow APY", apy_delta),
                _ => format!("{:.2}% lower APY", -apy_delta),
            };
            RoutingAlternative {
                protocol: market.protocol,
                market_id: market.id.clone(),
                net_apy,
                apy_delta,
                reason,
                has_existing_position: held.contains(&market.id),
            }
        })
        .collect();

    Some(RoutingSuggestion {
        action,
        asset_symbol: best.asset_symbol.clone(),
        amount,
        protocol: best.protocol,
        market_id: best.id.clone(),
        net_apy: best_apy,
        reason: match action {
            ActionKind::Borrow => REASON_LOWEST_BORROW_APY,
            _ => REASON_HIGHEST_APY,
        }
        .to_string(),
        has_existing_position: held.contains(&best.id),
        alternatives,
    })
}
