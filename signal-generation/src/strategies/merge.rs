// Proposal netting
// Several strategies may trade the same asset in one cycle; their proposals
// are combined into at most one order per asset.

use chrono::Utc;
use common::{OrderSide, OrderSize, PriceConstraint, StrategyProposal};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

/// `strategy_id` of a proposal built from several strategies
pub const MERGED_STRATEGY_ID: &str = "merged";

/// Net proposals per asset.
///
/// A single proposal for an asset passes through untouched. Several are
/// netted by signed base quantity; the result lists every contributor in
/// `sources`. A net of zero yields no order. Output order follows the first
/// appearance of each asset.
pub fn merge_proposals(proposals: Vec<StrategyProposal>) -> Vec<StrategyProposal> {
    let mut groups: Vec<(String, Vec<StrategyProposal>)> = Vec::new();
    for proposal in proposals {
        match groups.iter_mut().find(|(asset, _)| *asset == proposal.asset) {
            Some((_, group)) => group.push(proposal),
            None => groups.push((proposal.asset.clone(), vec![proposal])),
        }
    }

    groups
        .into_iter()
        .filter_map(|(asset, mut group)| {
            if group.len() == 1 {
                group.pop()
            } else {
                net(&asset, group)
            }
        })
        .collect()
}

fn net(asset: &str, group: Vec<StrategyProposal>) -> Option<StrategyProposal> {
    let mut net_quantity = Decimal::ZERO;
    let mut contributors = Vec::new();
    for proposal in &group {
        match proposal.signed_quantity() {
            Some(quantity) => {
                net_quantity += quantity;
                contributors.push(proposal);
            }
            None => warn!(
                asset,
                strategy = %proposal.strategy_id,
                "Dropping proposal without a valid price"
            ),
        }
    }

    let mut sources: Vec<String> = Vec::new();
    for proposal in &contributors {
        for source in &proposal.sources {
            if !sources.contains(source) {
                sources.push(source.clone());
            }
        }
    }

    if net_quantity.is_zero() {
        debug!(asset, sources = ?sources, "Opposing proposals cancel out");
        return None;
    }

    let side = if net_quantity > Decimal::ZERO {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };

    let same_side: Vec<&&StrategyProposal> = contributors.iter().filter(|p| p.side == side).collect();
    let reference_price = same_side
        .first()
        .map(|p| p.reference_price)
        .unwrap_or(contributors[0].reference_price);
    let price = combined_price(side, same_side.iter().map(|p| &p.price));

    let rationale = contributors
        .iter()
        .map(|p| format!("{}: {} {}", p.strategy_id, p.side, p.rationale))
        .collect::<Vec<_>>()
        .join("; ");

    debug!(asset, %side, quantity = %net_quantity.abs(), sources = ?sources, "Merged proposals");

    Some(StrategyProposal {
        id: Uuid::new_v4(),
        strategy_id: MERGED_STRATEGY_ID.to_string(),
        sources,
        asset: asset.to_string(),
        side,
        size: OrderSize::Quantity(net_quantity.abs()),
        price,
        reference_price,
        rationale,
        created_at: Utc::now(),
    })
}

/// Market if any winning-side contributor is a market order, otherwise the
/// most conservative limit (lowest buy, highest sell)
fn combined_price<'a>(side: OrderSide, prices: impl Iterator<Item = &'a PriceConstraint>) -> PriceConstraint {
    let mut combined: Option<Decimal> = None;
    for price in prices {
        let limit = match price.limit() {
            Some(limit) => limit,
            None => return PriceConstraint::Market,
        };
        combined = Some(match (combined, side) {
            (None, _) => limit,
            (Some(current), OrderSide::Buy) => current.min(limit),
            (Some(current), OrderSide::Sell) => current.max(limit),
        });
    }
    combined.map(PriceConstraint::Limit).unwrap_or(PriceConstraint::Market)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy(strategy: &str, asset: &str, notional: Decimal) -> StrategyProposal {
        StrategyProposal::new(strategy, asset, OrderSide::Buy, OrderSize::Notional(notional), dec!(100))
    }

    fn sell(strategy: &str, asset: &str, quantity: Decimal) -> StrategyProposal {
        StrategyProposal::new(strategy, asset, OrderSide::Sell, OrderSize::Quantity(quantity), dec!(100))
    }

    #[test]
    fn test_single_proposal_passes_through() {
        let original = buy("dca", "BTC", dec!(300));
        let merged = merge_proposals(vec![original.clone()]);
        assert_eq!(merged, vec![original]);
    }

    #[test]
    fn test_opposing_proposals_net() {
        // Buy 5 units, sell 2 units
        let merged = merge_proposals(vec![buy("dca", "BTC", dec!(500)), sell("swing", "BTC", dec!(2))]);
        assert_eq!(merged.len(), 1);
        let order = &merged[0];
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.size, OrderSize::Quantity(dec!(3)));
        assert_eq!(order.strategy_id, MERGED_STRATEGY_ID);
        assert_eq!(order.sources, vec!["dca".to_string(), "swing".to_string()]);
    }

    #[test]
    fn test_exact_cancellation_yields_nothing() {
        let merged = merge_proposals(vec![buy("dca", "BTC", dec!(200)), sell("swing", "BTC", dec!(2))]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_assets_are_independent() {
        let merged = merge_proposals(vec![
            buy("dca", "BTC", dec!(100)),
            buy("dca", "ETH", dec!(100)),
            sell("swing", "BTC", dec!(3)),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].asset, "BTC");
        assert_eq!(merged[0].side, OrderSide::Sell);
        assert_eq!(merged[0].size, OrderSize::Quantity(dec!(2)));
        assert_eq!(merged[1].asset, "ETH");
        assert_eq!(merged[1].strategy_id, "dca");
    }

    #[test]
    fn test_conservative_limit() {
        let a = buy("grid", "BTC", dec!(100)).with_price(PriceConstraint::Limit(dec!(98)));
        let b = buy("grid2", "BTC", dec!(100)).with_price(PriceConstraint::Limit(dec!(95)));
        let merged = merge_proposals(vec![a, b]);
        assert_eq!(merged[0].price, PriceConstraint::Limit(dec!(95)));

        let c = buy("dca", "BTC", dec!(100));
        let d = buy("grid", "BTC", dec!(100)).with_price(PriceConstraint::Limit(dec!(95)));
        let merged = merge_proposals(vec![c, d]);
        assert_eq!(merged[0].price, PriceConstraint::Market);
    }
}
