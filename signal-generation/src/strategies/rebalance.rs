// Rebalancing toward a target allocation

use super::{capped_buy, default_assets, fraction, Strategy};
use common::{CompositeAnalysis, Holdings, MarketSnapshot, OrderSide, OrderSize, StrategyProposal};
use portfolio_risk::RiskLimits;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceConfig {
    #[serde(default = "default_id")]
    pub id: String,
    /// Target share of (cash + asset value) held in the asset
    pub target_weight: f64,
    /// Trade only when the actual weight drifts further than this
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
}

fn default_id() -> String {
    "rebalance".to_string()
}

fn default_drift_threshold() -> f64 {
    0.05
}

impl RebalanceConfig {
    pub fn new(id: impl Into<String>, target_weight: f64) -> Self {
        Self {
            id: id.into(),
            target_weight,
            drift_threshold: default_drift_threshold(),
            assets: default_assets(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.target_weight) {
            return Err(format!("target_weight {} must be in [0, 1]", self.target_weight));
        }
        if !(self.drift_threshold > 0.0 && self.drift_threshold < 1.0) {
            return Err(format!("drift_threshold {} must be in (0, 1)", self.drift_threshold));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RebalanceStrategy {
    config: RebalanceConfig,
}

impl RebalanceStrategy {
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }
}

impl Strategy for RebalanceStrategy {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> &'static str {
        "rebalance"
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
        let held = holdings.quantity(&analysis.asset);
        let value = held * market.price;
        let total = holdings.cash + value;
        if total <= Decimal::ZERO {
            return Vec::new();
        }

        let current = value / total;
        let target = fraction(self.config.target_weight);
        let drift = current - target;
        if drift.abs() <= fraction(self.config.drift_threshold) {
            return Vec::new();
        }

        let notional = (drift.abs() * total).round_dp(8);
        let rationale = format!(
            "{} weight {:.2}% vs target {:.2}%",
            analysis.asset,
            (current * Decimal::ONE_HUNDRED).round_dp(2),
            (target * Decimal::ONE_HUNDRED).round_dp(2)
        );

        let proposal = if drift < Decimal::ZERO {
            let notional = capped_buy(&self.config.id, &analysis.asset, notional, market.price, holdings, limits);
            if notional <= Decimal::ZERO {
                return Vec::new();
            }
            StrategyProposal::new(
                &self.config.id,
                &analysis.asset,
                OrderSide::Buy,
                OrderSize::Notional(notional),
                market.price,
            )
        } else {
            let quantity = (notional / market.price).round_dp(8).min(held);
            if quantity <= Decimal::ZERO {
                return Vec::new();
            }
            StrategyProposal::new(
                &self.config.id,
                &analysis.asset,
                OrderSide::Sell,
                OrderSize::Quantity(quantity),
                market.price,
            )
        };

        vec![proposal.with_rationale(rationale)]
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::analysis;
    use super::*;
    use rust_decimal_macros::dec;

    fn evaluate(target: f64, holdings: &Holdings) -> Vec<StrategyProposal> {
        let strategy = RebalanceStrategy::new(RebalanceConfig::new("rebalance", target));
        strategy.evaluate(
            &analysis("BTC", 0.0),
            &MarketSnapshot::new(dec!(100)),
            holdings,
            &RiskLimits {
                max_risk_per_trade_pct: 0.5,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_overweight_sells_excess() {
        // 80% in BTC, target 50%: sell 3000 worth
        let holdings = Holdings::new(dec!(2000)).with_asset("BTC", dec!(80), dec!(90));
        let proposals = evaluate(0.5, &holdings);
        assert_eq!(proposals[0].side, OrderSide::Sell);
        assert_eq!(proposals[0].size, OrderSize::Quantity(dec!(30)));
    }

    #[test]
    fn test_underweight_buys() {
        // 30% in BTC, target 50%: buy 2000 worth
        let holdings = Holdings::new(dec!(7000)).with_asset("BTC", dec!(30), dec!(90));
        let proposals = evaluate(0.5, &holdings);
        assert_eq!(proposals[0].side, OrderSide::Buy);
        assert_eq!(proposals[0].size, OrderSize::Notional(dec!(2000)));
    }

    #[test]
    fn test_within_drift_does_nothing() {
        let holdings = Holdings::new(dec!(5200)).with_asset("BTC", dec!(48), dec!(90));
        assert!(evaluate(0.5, &holdings).is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(RebalanceConfig::new("r", 1.5).validate().is_err());
        assert!(RebalanceConfig::new("r", 0.6).validate().is_ok());
    }
}
