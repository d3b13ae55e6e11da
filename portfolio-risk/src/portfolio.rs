//! Portfolio valuation and position tracking

use common::{AssetHolding, Fill, Holdings, OrderSide};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cash plus asset positions, marked to the latest known prices.
///
/// Used by the risk gate (built from exchange balances each cycle) and by the
/// backtester as its simulated account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    /// Quote-currency balance
    cash: Decimal,

    /// Open positions by asset
    positions: BTreeMap<String, Position>,

    /// Equity at the start of the trading day, for daily loss
    day_start_equity: Decimal,

    /// Highest equity observed, for drawdown
    peak_equity: Decimal,

    /// Total realized PnL net of fees
    realized_pnl: Decimal,
}

impl Portfolio {
    /// Create a portfolio holding only cash
    pub fn new(cash: Decimal) -> Self {
        Self {
            cash,
            positions: BTreeMap::new(),
            day_start_equity: cash,
            peak_equity: cash,
            realized_pnl: Decimal::ZERO,
        }
    }

    /// Build from exchange balances, marking each asset at `prices`.
    ///
    /// Assets without a price are valued at their average cost, or zero.
    pub fn from_holdings(holdings: &Holdings, prices: &BTreeMap<String, Decimal>) -> Self {
        let mut portfolio = Self::new(holdings.cash);
        for (asset, holding) in &holdings.assets {
            if holding.quantity.is_zero() {
                continue;
            }
            let average_cost = holding.average_cost.unwrap_or(Decimal::ZERO);
            let last_price = prices.get(asset).copied().unwrap_or(average_cost);
            portfolio.positions.insert(
                asset.clone(),
                Position {
                    asset: asset.clone(),
                    quantity: holding.quantity,
                    average_cost,
                    last_price,
                },
            );
        }
        let equity = portfolio.equity();
        portfolio.day_start_equity = equity;
        portfolio.peak_equity = equity;
        portfolio
    }

    /// Carry day-start and peak equity over from an earlier valuation
    pub fn with_reference_equity(mut self, day_start_equity: Decimal, peak_equity: Decimal) -> Self {
        self.day_start_equity = day_start_equity;
        self.peak_equity = peak_equity.max(self.equity());
        self
    }

    /// Apply an executed fill. Returns the realized PnL of a sell (zero for buys).
    pub fn apply_fill(&mut self, fill: &Fill) -> anyhow::Result<Decimal> {
        if fill.quantity <= Decimal::ZERO {
            return Err(anyhow::anyhow!("Fill quantity must be positive"));
        }

        let notional = fill.notional();
        match fill.side {
            OrderSide::Buy => {
                let cost = notional + fill.fee;
                if cost > self.cash {
                    return Err(anyhow::anyhow!(
                        "Insufficient cash for {} {}: need {}, have {}",
                        fill.quantity,
                        fill.asset,
                        cost,
                        self.cash
                    ));
                }
                self.cash -= cost;

                let position = self
                    .positions
                    .entry(fill.asset.clone())
                    .or_insert_with(|| Position::empty(&fill.asset));
                position.update_on_buy(fill.quantity, cost, fill.price);
                self.update_peak();
                Ok(Decimal::ZERO)
            }
            OrderSide::Sell => {
                let position = self.positions.get_mut(&fill.asset).ok_or_else(|| {
                    anyhow::anyhow!("Position not found for asset {}", fill.asset)
                })?;
                let pnl = position.update_on_sell(fill.quantity, fill.price, fill.fee)?;
                if position.is_closed() {
                    self.positions.remove(&fill.asset);
                }
                self.cash += notional - fill.fee;
                self.realized_pnl += pnl;
                self.update_peak();
                Ok(pnl)
            }
        }
    }

    /// Mark a position to a new price
    pub fn mark_price(&mut self, asset: &str, price: Decimal) {
        if let Some(position) = self.positions.get_mut(asset) {
            position.last_price = price;
        }
        self.update_peak();
    }

    /// Start a new trading day at the current equity
    pub fn begin_day(&mut self) {
        self.day_start_equity = self.equity();
    }

    fn update_peak(&mut self) {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Cash plus marked position values
    pub fn equity(&self) -> Decimal {
        self.cash + self.positions.values().map(|p| p.market_value()).sum::<Decimal>()
    }

    pub fn position(&self, asset: &str) -> Option<&Position> {
        self.positions.get(asset)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn quantity(&self, asset: &str) -> Decimal {
        self.positions.get(asset).map(|p| p.quantity).unwrap_or(Decimal::ZERO)
    }

    pub fn position_value(&self, asset: &str) -> Decimal {
        self.positions.get(asset).map(|p| p.market_value()).unwrap_or(Decimal::ZERO)
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    pub fn day_start_equity(&self) -> Decimal {
        self.day_start_equity
    }

    /// Today's PnL as a fraction of day-start equity (negative for a loss)
    pub fn daily_pnl_pct(&self) -> f64 {
        if self.day_start_equity <= Decimal::ZERO {
            return 0.0;
        }
        ((self.equity() - self.day_start_equity) / self.day_start_equity)
            .to_f64()
            .unwrap_or(0.0)
    }

    /// Current drawdown from peak equity as a fraction
    pub fn drawdown_pct(&self) -> f64 {
        crate::metrics::drawdown_fraction(self.peak_equity, self.equity())
    }

    /// Balances in the shape strategies consume
    pub fn holdings(&self) -> Holdings {
        Holdings {
            cash: self.cash,
            assets: self
                .positions
                .iter()
                .map(|(asset, p)| {
                    (
                        asset.clone(),
                        AssetHolding {
                            quantity: p.quantity,
                            average_cost: Some(p.average_cost),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Single asset position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub asset: String,
    pub quantity: Decimal,
    /// Average cost per unit, fees included
    pub average_cost: Decimal,
    pub last_price: Decimal,
}

impl Position {
    fn empty(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            quantity: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            last_price: Decimal::ZERO,
        }
    }

    fn update_on_buy(&mut self, quantity: Decimal, cost: Decimal, price: Decimal) {
        let total_cost = self.average_cost * self.quantity + cost;
        self.quantity += quantity;
        self.average_cost = total_cost / self.quantity;
        self.last_price = price;
    }

    fn update_on_sell(&mut self, quantity: Decimal, price: Decimal, fee: Decimal) -> anyhow::Result<Decimal> {
        if quantity > self.quantity {
            return Err(anyhow::anyhow!(
                "Cannot sell {} {}: only {} held",
                quantity,
                self.asset,
                self.quantity
            ));
        }

        let pnl = (price - self.average_cost) * quantity - fee;
        self.quantity -= quantity;
        self.last_price = price;
        Ok(pnl)
    }

    pub fn is_closed(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn market_value(&self) -> Decimal {
        self.quantity * self.last_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.last_price - self.average_cost) * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::Uuid;
    use rust_decimal_macros::dec;

    fn fill(side: OrderSide, quantity: Decimal, price: Decimal, fee: Decimal) -> Fill {
        Fill {
            order_id: Uuid::new_v4(),
            proposal_id: Uuid::new_v4(),
            asset: "BTC".to_string(),
            side,
            quantity,
            price,
            fee,
            exchange: "paper".to_string(),
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_buy_and_sell_tracking() {
        let mut portfolio = Portfolio::new(dec!(10000));
        portfolio
            .apply_fill(&fill(OrderSide::Buy, dec!(0.1), dec!(20000), dec!(2)))
            .unwrap();

        assert_eq!(portfolio.cash(), dec!(7998));
        assert_eq!(portfolio.quantity("BTC"), dec!(0.1));
        assert_eq!(portfolio.position("BTC").unwrap().average_cost, dec!(20020));

        let pnl = portfolio
            .apply_fill(&fill(OrderSide::Sell, dec!(0.1), dec!(25000), dec!(2.5)))
            .unwrap();
        assert_eq!(pnl, dec!(495.5));
        assert!(portfolio.position("BTC").is_none());
        assert_eq!(portfolio.cash(), dec!(10495.5));
        assert_eq!(portfolio.realized_pnl(), dec!(495.5));
    }

    #[test]
    fn test_oversell_rejected() {
        let mut portfolio = Portfolio::new(dec!(1000));
        assert!(portfolio
            .apply_fill(&fill(OrderSide::Sell, dec!(1), dec!(10), Decimal::ZERO))
            .is_err());

        portfolio
            .apply_fill(&fill(OrderSide::Buy, dec!(1), dec!(10), Decimal::ZERO))
            .unwrap();
        assert!(portfolio
            .apply_fill(&fill(OrderSide::Sell, dec!(2), dec!(10), Decimal::ZERO))
            .is_err());
    }

    #[test]
    fn test_daily_pnl_and_drawdown() {
        let mut portfolio = Portfolio::new(dec!(5000));
        portfolio
            .apply_fill(&fill(OrderSide::Buy, dec!(1), dec!(5000), Decimal::ZERO))
            .unwrap();
        portfolio.begin_day();

        portfolio.mark_price("BTC", dec!(6000));
        assert_eq!(portfolio.peak_equity(), dec!(6000));
        assert!((portfolio.daily_pnl_pct() - 0.2).abs() < 1e-9);

        portfolio.mark_price("BTC", dec!(4500));
        assert!((portfolio.drawdown_pct() - 0.25).abs() < 1e-9);
        assert!((portfolio.daily_pnl_pct() + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_from_holdings() {
        let holdings = Holdings::new(dec!(1000)).with_asset("ETH", dec!(2), dec!(1500));
        let mut prices = BTreeMap::new();
        prices.insert("ETH".to_string(), dec!(2000));

        let portfolio = Portfolio::from_holdings(&holdings, &prices);
        assert_eq!(portfolio.equity(), dec!(5000));
        assert_eq!(portfolio.position_value("ETH"), dec!(4000));
        assert_eq!(portfolio.holdings(), holdings);
    }
}
