// Swing trading on sentiment extremes: accumulate in fear, take profit in greed

use super::{capped_buy, default_assets, fraction, scale, Strategy};
use common::{CompositeAnalysis, Holdings, MarketSnapshot, OrderSide, OrderSize, StrategyProposal};
use portfolio_risk::RiskLimits;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingConfig {
    #[serde(default = "default_id")]
    pub id: String,
    /// Quote amount per entry before the band multiplier
    pub base_amount: Decimal,
    /// Buy when the composite score is below this
    #[serde(default = "default_buy_below")]
    pub buy_below: f64,
    /// Take profit when the composite score is at or above this
    #[serde(default = "default_sell_above")]
    pub sell_above: f64,
    /// Double the exit fraction at or above this score
    #[serde(default = "default_strong_sell_above")]
    pub strong_sell_above: f64,
    /// Fraction of the holding sold per exit
    #[serde(default = "default_take_profit_fraction")]
    pub take_profit_fraction: f64,
    /// Exits only when price exceeds average cost by this fraction
    #[serde(default)]
    pub min_profit_pct: f64,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
}

fn default_id() -> String {
    "swing".to_string()
}

fn default_buy_below() -> f64 {
    -20.0
}

fn default_sell_above() -> f64 {
    20.0
}

fn default_strong_sell_above() -> f64 {
    60.0
}

fn default_take_profit_fraction() -> f64 {
    0.25
}

impl SwingConfig {
    pub fn new(id: impl Into<String>, base_amount: Decimal) -> Self {
        Self {
            id: id.into(),
            base_amount,
            buy_below: default_buy_below(),
            sell_above: default_sell_above(),
            strong_sell_above: default_strong_sell_above(),
            take_profit_fraction: default_take_profit_fraction(),
            min_profit_pct: 0.0,
            assets: default_assets(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.base_amount <= Decimal::ZERO {
            return Err(format!("base_amount {} must be positive", self.base_amount));
        }
        if !(self.buy_below < self.sell_above && self.sell_above <= self.strong_sell_above) {
            return Err("thresholds must satisfy buy_below < sell_above <= strong_sell_above".to_string());
        }
        if !(self.take_profit_fraction > 0.0 && self.take_profit_fraction <= 1.0) {
            return Err(format!(
                "take_profit_fraction {} must be in (0, 1]",
                self.take_profit_fraction
            ));
        }
        if !self.min_profit_pct.is_finite() || self.min_profit_pct < 0.0 {
            return Err(format!("min_profit_pct {} must be non-negative", self.min_profit_pct));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SwingStrategy {
    config: SwingConfig,
}

impl SwingStrategy {
    pub fn new(config: SwingConfig) -> Self {
        Self { config }
    }

    fn entry(&self, analysis: &CompositeAnalysis, market: &MarketSnapshot, holdings: &Holdings, limits: &RiskLimits) -> Option<StrategyProposal> {
        let scaled = scale(self.config.base_amount, analysis.recommendation.multiplier);
        let notional = capped_buy(&self.config.id, &analysis.asset, scaled, market.price, holdings, limits);
        if notional <= Decimal::ZERO {
            return None;
        }

        Some(
            StrategyProposal::new(
                &self.config.id,
                &analysis.asset,
                OrderSide::Buy,
                OrderSize::Notional(notional),
                market.price,
            )
            .with_rationale(format!(
                "swing entry: score {:.1} below {}",
                analysis.composite_score, self.config.buy_below
            )),
        )
    }

    fn exit(&self, analysis: &CompositeAnalysis, market: &MarketSnapshot, holdings: &Holdings) -> Option<StrategyProposal> {
        let held = holdings.quantity(&analysis.asset);
        if held <= Decimal::ZERO {
            return None;
        }

        if let Some(cost) = holdings.average_cost(&analysis.asset) {
            let floor = cost * (Decimal::ONE + fraction(self.config.min_profit_pct));
            if market.price < floor {
                return None;
            }
        }

        let mut exit_fraction = self.config.take_profit_fraction;
        if analysis.composite_score >= self.config.strong_sell_above {
            exit_fraction = (exit_fraction * 2.0).min(1.0);
        }
        let quantity = (held * fraction(exit_fraction)).round_dp(8).min(held);
        if quantity <= Decimal::ZERO {
            return None;
        }

        Some(
            StrategyProposal::new(
                &self.config.id,
                &analysis.asset,
                OrderSide::Sell,
                OrderSize::Quantity(quantity),
                market.price,
            )
            .with_rationale(format!(
                "swing exit: score {:.1}, selling {:.0}% of holding",
                analysis.composite_score,
                exit_fraction * 100.0
            )),
        )
    }
}

impl Strategy for SwingStrategy {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> &'static str {
        "swing"
    }

    fn assets(&self) -> &[String] {
        &self.config.assets
    }

    fn evaluate(
        &self,
        analysis: &CompositeAnalysis,
        market: &MarketSnapshot,
        holdings: &Holdings,
        limits: &RiskLimits,
    ) -> Vec<StrategyProposal> {
        let score = analysis.composite_score;
        let proposal = if score < self.config.buy_below {
            self.entry(analysis, market, holdings, limits)
        } else if score >= self.config.sell_above {
            self.exit(analysis, market, holdings)
        } else {
            None
        };
        proposal.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::analysis;
    use super::*;
    use rust_decimal_macros::dec;

    fn strategy() -> SwingStrategy {
        let mut config = SwingConfig::new("swing", dec!(100));
        config.min_profit_pct = 0.05;
        SwingStrategy::new(config)
    }

    fn evaluate(score: f64, price: Decimal, holdings: &Holdings) -> Vec<StrategyProposal> {
        strategy().evaluate(
            &analysis("BTC", score),
            &MarketSnapshot::new(price),
            holdings,
            &RiskLimits::default(),
        )
    }

    #[test]
    fn test_buys_in_fear() {
        let proposals = evaluate(-40.0, dec!(30000), &Holdings::new(dec!(10000)));
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].side, OrderSide::Buy);
        assert_eq!(proposals[0].size, OrderSize::Notional(dec!(200)));
    }

    #[test]
    fn test_holds_in_neutral() {
        let holdings = Holdings::new(dec!(10000)).with_asset("BTC", dec!(1), dec!(20000));
        assert!(evaluate(0.0, dec!(30000), &holdings).is_empty());
    }

    #[test]
    fn test_takes_profit_in_greed() {
        let holdings = Holdings::new(dec!(1000)).with_asset("BTC", dec!(2), dec!(20000));

        let greed = evaluate(30.0, dec!(30000), &holdings);
        assert_eq!(greed[0].side, OrderSide::Sell);
        assert_eq!(greed[0].size, OrderSize::Quantity(dec!(0.5)));

        let extreme = evaluate(75.0, dec!(30000), &holdings);
        assert_eq!(extreme[0].size, OrderSize::Quantity(dec!(1)));
    }

    #[test]
    fn test_no_exit_below_profit_floor() {
        let holdings = Holdings::new(dec!(1000)).with_asset("BTC", dec!(2), dec!(29000));
        assert!(evaluate(30.0, dec!(30000), &holdings).is_empty());
    }

    #[test]
    fn test_nothing_to_sell() {
        assert!(evaluate(75.0, dec!(30000), &Holdings::new(dec!(1000))).is_empty());
    }

    #[test]
    fn test_validation() {
        let mut config = SwingConfig::new("swing", dec!(100));
        assert!(config.validate().is_ok());
        config.buy_below = 30.0;
        assert!(config.validate().is_err());
    }
}
