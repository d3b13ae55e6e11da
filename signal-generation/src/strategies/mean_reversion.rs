// Mean reversion against a moving average

use super::{capped_buy, default_assets, fraction, Strategy};
use common::{CompositeAnalysis, Holdings, MarketSnapshot, OrderSide, OrderSize, StrategyProposal};
use portfolio_risk::RiskLimits;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanReversionConfig {
    #[serde(default = "default_id")]
    pub id: String,
    pub base_amount: Decimal,
    /// Deviation from the moving average that triggers a trade (0.10 = 10%)
    #[serde(default = "default_deviation_pct")]
    pub deviation_pct: f64,
    /// Fraction of the holding sold when price is stretched above the average
    #[serde(default = "default_sell_fraction")]
    pub sell_fraction: f64,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
}

fn default_id() -> String {
    "mean_reversion".to_string()
}

fn default_deviation_pct() -> f64 {
    0.10
}

fn default_sell_fraction() -> f64 {
    0.5
}

impl MeanReversionConfig {
    pub fn new(id: impl Into<String>, base_amount: Decimal) -> Self {
        Self {
            id: id.into(),
            base_amount,
            deviation_pct: default_deviation_pct(),
            sell_fraction: default_sell_fraction(),
            assets: default_assets(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.base_amount <= Decimal::ZERO {
            return Err(format!("base_amount {} must be positive", self.base_amount));
        }
        if !(self.deviation_pct > 0.0 && self.deviation_pct < 1.0) {
            return Err(format!("deviation_pct {} must be in (0, 1)", self.deviation_pct));
        }
        if !(self.sell_fraction > 0.0 && self.sell_fraction <= 1.0) {
            return Err(format!("sell_fraction {} must be in (0, 1]", self.sell_fraction));
        }
        Ok(())
    }
}

/// Buys when price sits `deviation_pct` below its moving average and sells
/// part of the holding when it sits the same distance above.
#[derive(Debug, Clone)]
pub struct MeanReversionStrategy {
    config: MeanReversionConfig,
}

impl MeanReversionStrategy {
    pub fn new(config: MeanReversionConfig) -> Self {
        Self { config }
    }
}

impl Strategy for MeanReversionStrategy {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> &'static str {
        "mean_reversion"
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
        let average = match market.moving_average {
            Some(ma) if ma > Decimal::ZERO => ma,
            _ => {
                debug!(strategy = %self.config.id, asset = %analysis.asset, "No moving average, skipping");
                return Vec::new();
            }
        };

        let deviation = (market.price - average) / average;
        let threshold = fraction(self.config.deviation_pct);

        if deviation <= -threshold {
            let notional = capped_buy(
                &self.config.id,
                &analysis.asset,
                self.config.base_amount,
                market.price,
                holdings,
                limits,
            );
            if notional <= Decimal::ZERO {
                return Vec::new();
            }
            return vec![StrategyProposal::new(
                &self.config.id,
                &analysis.asset,
                OrderSide::Buy,
                OrderSize::Notional(notional),
                market.price,
            )
            .with_rationale(format!(
                "price {} is {:.2}% below moving average {}",
                market.price,
                (-deviation * Decimal::ONE_HUNDRED).round_dp(2),
                average
            ))];
        }

        let held = holdings.quantity(&analysis.asset);
        if deviation >= threshold && held > Decimal::ZERO {
            let quantity = (held * fraction(self.config.sell_fraction)).round_dp(8).min(held);
            if quantity <= Decimal::ZERO {
                return Vec::new();
            }
            return vec![StrategyProposal::new(
                &self.config.id,
                &analysis.asset,
                OrderSide::Sell,
                OrderSize::Quantity(quantity),
                market.price,
            )
            .with_rationale(format!(
                "price {} is {:.2}% above moving average {}",
                market.price,
                (deviation * Decimal::ONE_HUNDRED).round_dp(2),
                average
            ))];
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::analysis;
    use super::*;
    use rust_decimal_macros::dec;

    fn evaluate(price: Decimal, average: Option<Decimal>, holdings: &Holdings) -> Vec<StrategyProposal> {
        let strategy = MeanReversionStrategy::new(MeanReversionConfig::new("mr", dec!(250)));
        let mut market = MarketSnapshot::new(price);
        market.moving_average = average;
        strategy.evaluate(&analysis("BTC", 0.0), &market, holdings, &RiskLimits::default())
    }

    #[test]
    fn test_buys_below_average() {
        let proposals = evaluate(dec!(85), Some(dec!(100)), &Holdings::new(dec!(10000)));
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].side, OrderSide::Buy);
        assert_eq!(proposals[0].size, OrderSize::Notional(dec!(250)));
    }

    #[test]
    fn test_sells_above_average() {
        let holdings = Holdings::new(dec!(1000)).with_asset("BTC", dec!(4), dec!(90));
        let proposals = evaluate(dec!(115), Some(dec!(100)), &holdings);
        assert_eq!(proposals[0].side, OrderSide::Sell);
        assert_eq!(proposals[0].size, OrderSize::Quantity(dec!(2)));
    }

    #[test]
    fn test_inside_band_does_nothing() {
        let holdings = Holdings::new(dec!(1000)).with_asset("BTC", dec!(4), dec!(90));
        assert!(evaluate(dec!(105), Some(dec!(100)), &holdings).is_empty());
        assert!(evaluate(dec!(95), Some(dec!(100)), &holdings).is_empty());
    }

    #[test]
    fn test_requires_moving_average() {
        assert!(evaluate(dec!(50), None, &Holdings::new(dec!(10000))).is_empty());
    }
}
