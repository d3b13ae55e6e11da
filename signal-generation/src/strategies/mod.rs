// Strategy Layer
// Pure functions from (analysis, market, holdings, limits) to order proposals

mod dca;
mod grid;
mod mean_reversion;
mod merge;
mod rebalance;
mod swing;

pub use dca::{DcaConfig, DcaStrategy};
pub use grid::{GridConfig, GridStrategy};
pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};
pub use merge::{merge_proposals, MERGED_STRATEGY_ID};
pub use rebalance::{RebalanceConfig, RebalanceStrategy};
pub use swing::{SwingConfig, SwingStrategy};

use crate::ConfigError;
use common::{CompositeAnalysis, Holdings, MarketSnapshot, StrategyProposal};
use portfolio_risk::RiskLimits;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A trading strategy.
///
/// Implementations must be deterministic and side-effect free: the same
/// inputs always yield the same proposals (ids and timestamps aside).
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> &'static str;

    /// Assets this strategy trades; empty means every asset
    fn assets(&self) -> &[String];

    fn applies_to(&self, asset: &str) -> bool {
        let assets = self.assets();
        assets.is_empty() || assets.iter().any(|a| a == asset)
    }

    fn evaluate(
        &self,
        analysis: &CompositeAnalysis,
        market: &MarketSnapshot,
        holdings: &Holdings,
        limits: &RiskLimits,
    ) -> Vec<StrategyProposal>;
}

/// Strategy configuration, one entry per configured strategy instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Dca(DcaConfig),
    Swing(SwingConfig),
    MeanReversion(MeanReversionConfig),
    Grid(GridConfig),
    Rebalance(RebalanceConfig),
}

impl StrategyConfig {
    pub fn id(&self) -> &str {
        match self {
            StrategyConfig::Dca(c) => &c.id,
            StrategyConfig::Swing(c) => &c.id,
            StrategyConfig::MeanReversion(c) => &c.id,
            StrategyConfig::Grid(c) => &c.id,
            StrategyConfig::Rebalance(c) => &c.id,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id().trim().is_empty() {
            return Err(ConfigError::InvalidStrategy {
                id: self.id().to_string(),
                reason: "empty strategy id".to_string(),
            });
        }

        let result = match self {
            StrategyConfig::Dca(c) => c.validate(),
            StrategyConfig::Swing(c) => c.validate(),
            StrategyConfig::MeanReversion(c) => c.validate(),
            StrategyConfig::Grid(c) => c.validate(),
            StrategyConfig::Rebalance(c) => c.validate(),
        };
        result.map_err(|reason| ConfigError::InvalidStrategy {
            id: self.id().to_string(),
            reason,
        })
    }

    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::Dca(c) => Box::new(DcaStrategy::new(c.clone())),
            StrategyConfig::Swing(c) => Box::new(SwingStrategy::new(c.clone())),
            StrategyConfig::MeanReversion(c) => Box::new(MeanReversionStrategy::new(c.clone())),
            StrategyConfig::Grid(c) => Box::new(GridStrategy::new(c.clone())),
            StrategyConfig::Rebalance(c) => Box::new(RebalanceStrategy::new(c.clone())),
        }
    }
}

/// The set of active strategies
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and build every configured strategy
    pub fn from_configs(configs: &[StrategyConfig]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for config in configs {
            config.validate()?;
            registry.register(config.build())?;
        }
        Ok(registry)
    }

    /// Add a strategy. Ids must be unique.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) -> Result<(), ConfigError> {
        if self.strategies.iter().any(|s| s.id() == strategy.id()) {
            return Err(ConfigError::DuplicateStrategy(strategy.id().to_string()));
        }
        info!(id = strategy.id(), kind = strategy.kind(), "Registered strategy");
        self.strategies.push(strategy);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    /// Raw proposals of every strategy applicable to the analysed asset,
    /// in registration order
    pub fn propose(
        &self,
        analysis: &CompositeAnalysis,
        market: &MarketSnapshot,
        holdings: &Holdings,
        limits: &RiskLimits,
    ) -> Vec<StrategyProposal> {
        if market.price <= Decimal::ZERO {
            warn!(asset = %analysis.asset, price = %market.price, "Skipping strategies: no valid price");
            return Vec::new();
        }

        let mut proposals = Vec::new();
        for strategy in self.strategies.iter().filter(|s| s.applies_to(&analysis.asset)) {
            let produced = strategy.evaluate(analysis, market, holdings, limits);
            debug!(
                strategy = strategy.id(),
                asset = %analysis.asset,
                proposals = produced.len(),
                "Strategy evaluated"
            );
            proposals.extend(produced);
        }
        proposals
    }

    /// Proposals after netting conflicting orders per asset
    pub fn evaluate(
        &self,
        analysis: &CompositeAnalysis,
        market: &MarketSnapshot,
        holdings: &Holdings,
        limits: &RiskLimits,
    ) -> Vec<StrategyProposal> {
        merge_proposals(self.propose(analysis, market, holdings, limits))
    }
}

/// Fail on the first duplicate strategy id
pub fn ensure_unique_ids(configs: &[StrategyConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for config in configs {
        if !seen.insert(config.id()) {
            return Err(ConfigError::DuplicateStrategy(config.id().to_string()));
        }
    }
    Ok(())
}

/// `amount * factor`, rounded to 8 decimal places
pub(crate) fn scale(amount: Decimal, factor: f64) -> Decimal {
    Decimal::from_f64(factor)
        .map(|f| (amount * f).round_dp(8))
        .unwrap_or(Decimal::ZERO)
}

pub(crate) fn fraction(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

/// Largest buy notional that stays inside the per-trade limit and the cash
/// reserve. Equity is estimated from cash and this asset only.
pub(crate) fn buy_budget(asset: &str, price: Decimal, holdings: &Holdings, limits: &RiskLimits) -> Decimal {
    let equity = holdings.cash + holdings.quantity(asset) * price;
    let per_trade = equity * fraction(limits.max_risk_per_trade_pct);
    let spendable = holdings.cash - equity * fraction(limits.min_cash_reserve_pct);
    per_trade.min(spendable).max(Decimal::ZERO).round_dp(8)
}

/// `wanted` clamped to [`buy_budget`]
pub(crate) fn capped_buy(
    strategy_id: &str,
    asset: &str,
    wanted: Decimal,
    price: Decimal,
    holdings: &Holdings,
    limits: &RiskLimits,
) -> Decimal {
    let budget = buy_budget(asset, price, holdings, limits);
    if wanted > budget {
        debug!(strategy = strategy_id, asset, %wanted, %budget, "Buy capped by risk limits");
        return budget;
    }
    wanted
}

pub(crate) fn default_assets() -> Vec<String> {
    Vec::new()
}


#[cfg(test)]
mod tests {
    use super::test_support::analysis;
    use super::*;
    use common::{OrderSide, OrderSize};
    use rust_decimal_macros::dec;

    fn configs() -> Vec<StrategyConfig> {
        vec![
            StrategyConfig::Dca(DcaConfig::new("btc-dca", dec!(100))),
            StrategyConfig::Swing(SwingConfig::new("btc-swing", dec!(200))),
        ]
    }

    #[test]
    fn test_registry_from_configs() {
        let registry = StrategyRegistry::from_configs(&configs()).unwrap();
        assert_eq!(registry.ids(), vec!["btc-dca", "btc-swing"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut configs = configs();
        configs.push(StrategyConfig::Dca(DcaConfig::new("btc-dca", dec!(50))));
        assert_eq!(
            StrategyRegistry::from_configs(&configs).err(),
            Some(ConfigError::DuplicateStrategy("btc-dca".to_string()))
        );
        assert!(ensure_unique_ids(&configs).is_err());
    }

    #[test]
    fn test_config_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct File {
            strategies: Vec<StrategyConfig>,
        }

        let file: File = toml::from_str(
            r#"
            [[strategies]]
            type = "dca"
            id = "btc-dca"
            base_amount = "100"

            [[strategies]]
            type = "grid"
            id = "eth-grid"
            assets = ["ETH"]
            lower_price = "1500"
            upper_price = "2500"
            levels = 10
            quantity_per_level = "0.1"
            "#,
        )
        .unwrap();

        assert_eq!(file.strategies.len(), 2);
        assert_eq!(file.strategies[1].id(), "eth-grid");
        let registry = StrategyRegistry::from_configs(&file.strategies).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_asset_filter_and_merge() {
        let mut grid = GridConfig::new("eth-grid", dec!(1500), dec!(2500), 10, dec!(0.1));
        grid.assets = vec!["ETH".to_string()];
        let registry = StrategyRegistry::from_configs(&[
            StrategyConfig::Dca(DcaConfig::new("dca", dec!(100))),
            StrategyConfig::Grid(grid),
        ])
        .unwrap();

        let holdings = Holdings::new(dec!(10000));
        let limits = RiskLimits::default();
        let market = MarketSnapshot::new(dec!(30000));

        let proposals = registry.evaluate(&analysis("BTC", -70.0), &market, &holdings, &limits);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].strategy_id, "dca");
        assert_eq!(proposals[0].side, OrderSide::Buy);
        assert_eq!(proposals[0].size, OrderSize::Notional(dec!(300)));
    }

    #[test]
    fn test_invalid_price_yields_nothing() {
        let registry = StrategyRegistry::from_configs(&configs()).unwrap();
        let proposals = registry.propose(
            &analysis("BTC", -70.0),
            &MarketSnapshot::new(Decimal::ZERO),
            &Holdings::new(dec!(10000)),
            &RiskLimits::default(),
        );
        assert!(proposals.is_empty());
    }

    #[test]
    fn test_buy_budget() {
        let limits = RiskLimits::default();
        // 5% of 10_000 equity
        assert_eq!(buy_budget("BTC", dec!(100), &Holdings::new(dec!(10000)), &limits), dec!(500));

        // Reserve of 10% leaves only 50 spendable
        let thin = Holdings::new(dec!(1050)).with_asset("BTC", dec!(89.5), dec!(100));
        assert_eq!(buy_budget("BTC", dec!(100), &thin, &limits), dec!(50));
    }

    #[test]
    fn test_capped_buy() {
        let limits = RiskLimits::default();
        let holdings = Holdings::new(dec!(10000));
        assert_eq!(capped_buy("dca", "BTC", dec!(300), dec!(100), &holdings, &limits), dec!(300));
        assert_eq!(capped_buy("dca", "BTC", dec!(800), dec!(100), &holdings, &limits), dec!(500));
    }
}
