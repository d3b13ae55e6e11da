// Dollar-cost averaging scaled by the market-condition multiplier

use super::{capped_buy, default_assets, scale, Strategy};
use common::{CompositeAnalysis, Holdings, MarketSnapshot, OrderSide, OrderSize, StrategyProposal};
use portfolio_risk::RiskLimits;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaConfig {
    #[serde(default = "default_id")]
    pub id: String,
    /// Quote amount bought per interval at multiplier 1.0
    pub base_amount: Decimal,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
}

fn default_id() -> String {
    "dca".to_string()
}

impl DcaConfig {
    pub fn new(id: impl Into<String>, base_amount: Decimal) -> Self {
        Self {
            id: id.into(),
            base_amount,
            assets: default_assets(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.base_amount <= Decimal::ZERO {
            return Err(format!("base_amount {} must be positive", self.base_amount));
        }
        Ok(())
    }
}

/// Buys `base_amount * multiplier` every evaluation
#[derive(Debug, Clone)]
pub struct DcaStrategy {
    config: DcaConfig,
}

impl DcaStrategy {
    pub fn new(config: DcaConfig) -> Self {
        Self { config }
    }
}

impl Strategy for DcaStrategy {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> &'static str {
        "dca"
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
        let multiplier = analysis.recommendation.multiplier;
        let scaled = scale(self.config.base_amount, multiplier);
        let notional = capped_buy(&self.config.id, &analysis.asset, scaled, market.price, holdings, limits);

        if notional <= Decimal::ZERO {
            debug!(
                strategy = %self.config.id,
                asset = %analysis.asset,
                multiplier,
                "DCA skipped"
            );
            return Vec::new();
        }

        let mut rationale = format!(
            "DCA {} x {} ({} band)",
            self.config.base_amount, multiplier, analysis.recommendation.band
        );
        if notional < scaled {
            rationale.push_str(&format!(", capped at {} by risk limits", notional));
        }

        vec![StrategyProposal::new(
            &self.config.id,
            &analysis.asset,
            OrderSide::Buy,
            OrderSize::Notional(notional),
            market.price,
        )
        .with_rationale(rationale)]
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::analysis;
    use super::*;
    use rust_decimal_macros::dec;

    fn evaluate(score: f64, holdings: &Holdings) -> Vec<StrategyProposal> {
        let strategy = DcaStrategy::new(DcaConfig::new("dca", dec!(100)));
        strategy.evaluate(
            &analysis("BTC", score),
            &MarketSnapshot::new(dec!(30000)),
            holdings,
            &RiskLimits::default(),
        )
    }

    fn notional(proposals: &[StrategyProposal]) -> Decimal {
        proposals.iter().map(|p| p.notional()).sum()
    }

    #[test]
    fn test_extreme_fear_triples_base() {
        let proposals = evaluate(-70.0, &Holdings::new(dec!(10000)));
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].side, OrderSide::Buy);
        assert_eq!(proposals[0].size, OrderSize::Notional(dec!(300)));
        assert_eq!(proposals[0].sources, vec!["dca".to_string()]);
    }

    #[test]
    fn test_fear_buys_more_than_neutral() {
        let holdings = Holdings::new(dec!(10000));
        let fear = notional(&evaluate(-70.0, &holdings));
        let neutral = notional(&evaluate(0.0, &holdings));
        let greed = notional(&evaluate(40.0, &holdings));
        assert!(fear > neutral);
        assert!(neutral > greed);
        assert_eq!(greed, dec!(50));
    }

    #[test]
    fn test_zero_multiplier_buys_nothing() {
        assert!(evaluate(80.0, &Holdings::new(dec!(10000))).is_empty());
    }

    #[test]
    fn test_band_scaling_survives_when_budget_is_wide() {
        // 5% of 100000 equity = 5000, well above every scaled amount
        let holdings = Holdings::new(dec!(100000));
        let fear = notional(&evaluate(-70.0, &holdings));
        let neutral = notional(&evaluate(0.0, &holdings));
        assert_eq!(fear, dec!(300));
        assert_eq!(neutral, dec!(100));
        assert_eq!(fear, neutral * dec!(3));
        assert!(!evaluate(-70.0, &holdings)[0].rationale.contains("capped"));
    }

    #[test]
    fn test_capped_by_risk_limits() {
        // 5% of 4000 equity = 200 < 300
        let proposals = evaluate(-70.0, &Holdings::new(dec!(4000)));
        assert_eq!(proposals[0].size, OrderSize::Notional(dec!(200)));
    }

    #[test]
    fn test_deterministic() {
        let holdings = Holdings::new(dec!(10000));
        let a = evaluate(-35.0, &holdings);
        let b = evaluate(-35.0, &holdings);
        assert_eq!(a[0].size, b[0].size);
        assert_eq!(a[0].rationale, b[0].rationale);
    }
}
