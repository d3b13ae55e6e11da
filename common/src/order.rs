//! Orders, proposals, holdings and fills

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("buy"),
            OrderSide::Sell => f.write_str("sell"),
        }
    }
}

/// Order size, either in base units or in quote currency
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OrderSize {
    Quantity(Decimal),
    Notional(Decimal),
}

impl OrderSize {
    /// Base quantity at `price`. `None` when a notional cannot be converted.
    pub fn quantity_at(&self, price: Decimal) -> Option<Decimal> {
        match self {
            OrderSize::Quantity(q) => Some(*q),
            OrderSize::Notional(n) => n.checked_div(price),
        }
    }

    /// Quote-currency value at `price`
    pub fn notional_at(&self, price: Decimal) -> Decimal {
        match self {
            OrderSize::Quantity(q) => *q * price,
            OrderSize::Notional(n) => *n,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            OrderSize::Quantity(v) | OrderSize::Notional(v) => v.is_zero(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "price", rename_all = "snake_case")]
pub enum PriceConstraint {
    Market,
    Limit(Decimal),
}

impl PriceConstraint {
    pub fn limit(&self) -> Option<Decimal> {
        match self {
            PriceConstraint::Market => None,
            PriceConstraint::Limit(p) => Some(*p),
        }
    }
}

/// Price context handed to strategies alongside the composite analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price: Decimal,
    pub moving_average: Option<Decimal>,
}

impl MarketSnapshot {
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            moving_average: None,
        }
    }

    pub fn with_moving_average(mut self, moving_average: Decimal) -> Self {
        self.moving_average = Some(moving_average);
        self
    }
}

/// A strategy's proposed order.
///
/// Produced by one strategy (or by merging several, listed in `sources`) and
/// consumed exactly once by the risk gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyProposal {
    pub id: Uuid,
    pub strategy_id: String,
    pub sources: Vec<String>,
    pub asset: String,
    pub side: OrderSide,
    pub size: OrderSize,
    pub price: PriceConstraint,
    /// Price the proposal was sized against
    pub reference_price: Decimal,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

impl StrategyProposal {
    pub fn new(
        strategy_id: impl Into<String>,
        asset: impl Into<String>,
        side: OrderSide,
        size: OrderSize,
        reference_price: Decimal,
    ) -> Self {
        let strategy_id = strategy_id.into();
        Self {
            id: Uuid::new_v4(),
            sources: vec![strategy_id.clone()],
            strategy_id,
            asset: asset.into(),
            side,
            size,
            price: PriceConstraint::Market,
            reference_price,
            rationale: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_price(mut self, price: PriceConstraint) -> Self {
        self.price = price;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Price used for valuation: the limit if any, else the reference price
    pub fn execution_price(&self) -> Decimal {
        self.price.limit().unwrap_or(self.reference_price)
    }

    pub fn quantity(&self) -> Option<Decimal> {
        self.size.quantity_at(self.execution_price())
    }

    pub fn notional(&self) -> Decimal {
        self.size.notional_at(self.execution_price())
    }

    /// Signed base quantity: positive for buys, negative for sells
    pub fn signed_quantity(&self) -> Option<Decimal> {
        self.quantity().map(|q| q * self.side.sign())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetHolding {
    pub quantity: Decimal,
    pub average_cost: Option<Decimal>,
}

/// Balances as reported by the exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Holdings {
    /// Quote-currency balance
    pub cash: Decimal,
    pub assets: BTreeMap<String, AssetHolding>,
}

impl Holdings {
    pub fn new(cash: Decimal) -> Self {
        Self {
            cash,
            assets: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, asset: impl Into<String>, quantity: Decimal, average_cost: Decimal) -> Self {
        self.assets.insert(
            asset.into(),
            AssetHolding {
                quantity,
                average_cost: Some(average_cost),
            },
        );
        self
    }

    pub fn quantity(&self, asset: &str) -> Decimal {
        self.assets.get(asset).map(|h| h.quantity).unwrap_or(Decimal::ZERO)
    }

    pub fn average_cost(&self, asset: &str) -> Option<Decimal> {
        self.assets.get(asset).and_then(|h| h.average_cost)
    }
}

/// Result of a successful order placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: Uuid,
    pub proposal_id: Uuid,
    pub asset: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Fee in quote currency
    pub fee: Decimal,
    pub exchange: String,
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_size_conversion() {
        let size = OrderSize::Notional(dec!(300));
        assert_eq!(size.quantity_at(dec!(150)), Some(dec!(2)));
        assert_eq!(size.quantity_at(Decimal::ZERO), None);
        assert_eq!(size.notional_at(dec!(150)), dec!(300));

        let size = OrderSize::Quantity(dec!(0.5));
        assert_eq!(size.notional_at(dec!(1000)), dec!(500));
    }

    #[test]
    fn test_proposal_signed_quantity() {
        let proposal = StrategyProposal::new(
            "swing",
            "BTC",
            OrderSide::Sell,
            OrderSize::Quantity(dec!(0.25)),
            dec!(40000),
        );
        assert_eq!(proposal.signed_quantity(), Some(dec!(-0.25)));
        assert_eq!(proposal.sources, vec!["swing".to_string()]);

        let limited = proposal.with_price(PriceConstraint::Limit(dec!(42000)));
        assert_eq!(limited.execution_price(), dec!(42000));
        assert_eq!(limited.notional(), dec!(10500));
    }

    #[test]
    fn test_holdings_lookup() {
        let holdings = Holdings::new(dec!(1000)).with_asset("ETH", dec!(2), dec!(1800));
        assert_eq!(holdings.quantity("ETH"), dec!(2));
        assert_eq!(holdings.quantity("BTC"), Decimal::ZERO);
        assert_eq!(holdings.average_cost("ETH"), Some(dec!(1800)));
    }
}
