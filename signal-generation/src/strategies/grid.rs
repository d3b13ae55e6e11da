// Grid trading over a fixed price range
//
// Stateless: the grid defines a target inventory for every price (one
// `quantity_per_level` for each grid level above the current price) and the
// strategy proposes the difference between target and actual holdings.
// Falling through a level therefore buys one level's worth; rising through
// one sells it.

use super::{default_assets, Strategy};
use common::{
    CompositeAnalysis, Holdings, MarketSnapshot, OrderSide, OrderSize, PriceConstraint, StrategyProposal,
};
use portfolio_risk::RiskLimits;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_id")]
    pub id: String,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    /// Number of intervals between lower and upper price
    pub levels: u32,
    /// Base quantity held per level
    pub quantity_per_level: Decimal,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
}

fn default_id() -> String {
    "grid".to_string()
}

impl GridConfig {
    pub fn new(
        id: impl Into<String>,
        lower_price: Decimal,
        upper_price: Decimal,
        levels: u32,
        quantity_per_level: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            lower_price,
            upper_price,
            levels,
            quantity_per_level,
            assets: default_assets(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.lower_price <= Decimal::ZERO || self.upper_price <= self.lower_price {
            return Err(format!(
                "price range [{}, {}] must be positive and non-empty",
                self.lower_price, self.upper_price
            ));
        }
        if self.levels == 0 {
            return Err("levels must be at least 1".to_string());
        }
        if self.quantity_per_level <= Decimal::ZERO {
            return Err("quantity_per_level must be positive".to_string());
        }
        Ok(())
    }

    fn level_prices(&self) -> Vec<Decimal> {
        let step = (self.upper_price - self.lower_price) / Decimal::from(self.levels);
        (0..=self.levels)
            .map(|i| self.lower_price + step * Decimal::from(i))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct GridStrategy {
    config: GridConfig,
    levels: Vec<Decimal>,
}

impl GridStrategy {
    pub fn new(config: GridConfig) -> Self {
        let levels = config.level_prices();
        Self { config, levels }
    }

    /// Inventory the grid wants to hold at `price`
    pub fn target_quantity(&self, price: Decimal) -> Decimal {
        let above = self.levels.iter().filter(|level| **level > price).count();
        let above = above.min(self.config.levels as usize);
        self.config.quantity_per_level * Decimal::from(above)
    }

    fn level_at_or_above(&self, price: Decimal) -> Option<Decimal> {
        self.levels.iter().copied().find(|level| *level >= price)
    }

    fn level_at_or_below(&self, price: Decimal) -> Option<Decimal> {
        self.levels.iter().rev().copied().find(|level| *level <= price)
    }
}

impl Strategy for GridStrategy {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> &'static str {
        "grid"
    }

    fn assets(&self) -> &[String] {
        &self.config.assets
    }

    fn evaluate(
        &self,
        analysis: &CompositeAnalysis,
        market: &MarketSnapshot,
        holdings: &Holdings,
        _limits: &RiskLimits,
    ) -> Vec<StrategyProposal> {
        let held = holdings.quantity(&analysis.asset);
        let target = self.target_quantity(market.price);
        let difference = target - held;

        let (side, limit) = if difference > Decimal::ZERO {
            (OrderSide::Buy, self.level_at_or_above(market.price))
        } else if difference < Decimal::ZERO {
            (OrderSide::Sell, self.level_at_or_below(market.price))
        } else {
            return Vec::new();
        };

        let price = match limit {
            Some(level) => PriceConstraint::Limit(level),
            None => PriceConstraint::Market,
        };

        vec![StrategyProposal::new(
            &self.config.id,
            &analysis.asset,
            side,
            OrderSize::Quantity(difference.abs()),
            market.price,
        )
        .with_price(price)
        .with_rationale(format!(
            "grid target {} at price {}, holding {}",
            target, market.price, held
        ))]
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::analysis;
    use super::*;
    use rust_decimal_macros::dec;

    fn strategy() -> GridStrategy {
        // Levels at 100, 110, 120, 130, 140
        GridStrategy::new(GridConfig::new("grid", dec!(100), dec!(140), 4, dec!(1)))
    }

    fn evaluate(price: Decimal, held: Decimal) -> Vec<StrategyProposal> {
        let holdings = Holdings::new(dec!(10000)).with_asset("BTC", held, dec!(120));
        strategy().evaluate(
            &analysis("BTC", 0.0),
            &MarketSnapshot::new(price),
            &holdings,
            &RiskLimits::default(),
        )
    }

    #[test]
    fn test_target_inventory() {
        let grid = strategy();
        assert_eq!(grid.target_quantity(dec!(90)), dec!(4));
        assert_eq!(grid.target_quantity(dec!(100)), dec!(4));
        assert_eq!(grid.target_quantity(dec!(115)), dec!(3));
        assert_eq!(grid.target_quantity(dec!(140)), dec!(0));
        assert_eq!(grid.target_quantity(dec!(150)), dec!(0));
    }

    #[test]
    fn test_falling_through_level_buys() {
        // Target at 115 is 3
        let proposals = evaluate(dec!(115), dec!(2));
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].side, OrderSide::Buy);
        assert_eq!(proposals[0].size, OrderSize::Quantity(dec!(1)));
        assert_eq!(proposals[0].price, PriceConstraint::Limit(dec!(120)));
    }

    #[test]
    fn test_rising_through_level_sells() {
        // Target at 125 is 2
        let proposals = evaluate(dec!(125), dec!(3));
        assert_eq!(proposals[0].side, OrderSide::Sell);
        assert_eq!(proposals[0].size, OrderSize::Quantity(dec!(1)));
        assert_eq!(proposals[0].price, PriceConstraint::Limit(dec!(120)));
    }

    #[test]
    fn test_on_target_does_nothing() {
        assert!(evaluate(dec!(115), dec!(3)).is_empty());
    }

    #[test]
    fn test_above_range_sells_everything() {
        let proposals = evaluate(dec!(150), dec!(2));
        assert_eq!(proposals[0].side, OrderSide::Sell);
        assert_eq!(proposals[0].size, OrderSize::Quantity(dec!(2)));
        assert_eq!(proposals[0].price, PriceConstraint::Limit(dec!(140)));
    }

    #[test]
    fn test_validation() {
        assert!(GridConfig::new("g", dec!(100), dec!(100), 4, dec!(1)).validate().is_err());
        assert!(GridConfig::new("g", dec!(100), dec!(140), 0, dec!(1)).validate().is_err());
        assert!(GridConfig::new("g", dec!(100), dec!(140), 4, dec!(1)).validate().is_ok());
    }
}
