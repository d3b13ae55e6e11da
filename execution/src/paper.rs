//! Simulated exchange

use crate::{ExchangeClient, ExecutionError, OrderRequest};
use chrono::Utc;
use common::{AssetHolding, Fill, Holdings, OrderSide, PriceConstraint};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Paper exchange configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperExchangeConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Starting quote-currency balance
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,

    /// Fee charged on each fill as a fraction of notional
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,

    /// Fill price per asset
    #[serde(default)]
    pub prices: BTreeMap<String, Decimal>,
}

impl Default for PaperExchangeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            initial_cash: default_initial_cash(),
            fee_rate: default_fee_rate(),
            prices: BTreeMap::new(),
        }
    }
}

fn default_name() -> String {
    "paper".to_string()
}

fn default_initial_cash() -> Decimal {
    Decimal::from(10_000)
}

fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3)
}

#[derive(Debug)]
struct PaperState {
    holdings: Holdings,
    prices: HashMap<String, Decimal>,
    scripted_failures: u32,
    outage: Option<String>,
    fills: Vec<Fill>,
}

/// Exchange that fills instantly at a configured price.
///
/// Tracks its own balances, charges a proportional fee and can be scripted
/// to fail the next N orders or to go offline entirely.
#[derive(Debug)]
pub struct PaperExchange {
    name: String,
    fee_rate: Decimal,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(config: PaperExchangeConfig) -> Self {
        Self {
            name: config.name,
            fee_rate: config.fee_rate,
            state: Mutex::new(PaperState {
                holdings: Holdings::new(config.initial_cash),
                prices: config.prices.into_iter().collect(),
                scripted_failures: 0,
                outage: None,
                fills: Vec::new(),
            }),
        }
    }

    /// Seed an existing position
    pub async fn deposit(&self, asset: &str, quantity: Decimal, average_cost: Decimal) {
        let mut state = self.state.lock().await;
        state.holdings.assets.insert(
            asset.to_string(),
            AssetHolding {
                quantity,
                average_cost: Some(average_cost),
            },
        );
    }

    pub async fn set_price(&self, asset: &str, price: Decimal) {
        self.state.lock().await.prices.insert(asset.to_string(), price);
    }

    /// Fail the next `count` orders
    pub async fn fail_next(&self, count: u32) {
        self.state.lock().await.scripted_failures = count;
    }

    /// Reject every order with `reason` until cleared with `None`
    pub async fn set_outage(&self, reason: Option<String>) {
        self.state.lock().await.outage = reason;
    }

    pub async fn fills(&self) -> Vec<Fill> {
        self.state.lock().await.fills.clone()
    }

    fn fee(&self, notional: Decimal) -> Decimal {
        (notional * self.fee_rate).round_dp(8)
    }
}

#[async_trait::async_trait]
impl ExchangeClient for PaperExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_balances(&self) -> Result<Holdings, ExecutionError> {
        Ok(self.state.lock().await.holdings.clone())
    }

    async fn get_price(&self, asset: &str) -> Result<Decimal, ExecutionError> {
        self.state
            .lock()
            .await
            .prices
            .get(asset)
            .copied()
            .ok_or_else(|| ExecutionError::UnknownAsset(asset.to_string()))
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<Fill, ExecutionError> {
        let mut state = self.state.lock().await;

        if let Some(reason) = &state.outage {
            return Err(ExecutionError::Unavailable(reason.clone()));
        }
        if state.scripted_failures > 0 {
            state.scripted_failures -= 1;
            warn!(order_id = %order.id, asset = %order.asset, "Paper exchange failing order on request");
            return Err(ExecutionError::Unavailable("scripted failure".to_string()));
        }

        let price = state
            .prices
            .get(&order.asset)
            .copied()
            .ok_or_else(|| ExecutionError::UnknownAsset(order.asset.clone()))?;

        if let PriceConstraint::Limit(limit) = order.price {
            let marketable = match order.side {
                OrderSide::Buy => price <= limit,
                OrderSide::Sell => price >= limit,
            };
            if !marketable {
                return Err(ExecutionError::LimitNotReached { limit, price });
            }
        }

        let quantity = order
            .size
            .quantity_at(price)
            .map(|q| q.round_dp(8))
            .filter(|q| *q > Decimal::ZERO)
            .ok_or_else(|| ExecutionError::Rejected {
                reason: format!("order size {:?} rounds to nothing at {}", order.size, price),
            })?;
        let notional = quantity * price;
        let fee = self.fee(notional);

        match order.side {
            OrderSide::Buy => {
                let cost = notional + fee;
                if cost > state.holdings.cash {
                    return Err(ExecutionError::InsufficientFunds {
                        needed: cost,
                        available: state.holdings.cash,
                    });
                }
                state.holdings.cash -= cost;
                let holding = state.holdings.assets.entry(order.asset.clone()).or_default();
                let previous_cost = holding.quantity * holding.average_cost.unwrap_or(Decimal::ZERO);
                holding.quantity += quantity;
                holding.average_cost = Some((previous_cost + cost) / holding.quantity);
            }
            OrderSide::Sell => {
                let available = state.holdings.quantity(&order.asset);
                if quantity > available {
                    return Err(ExecutionError::InsufficientBalance {
                        asset: order.asset.clone(),
                        requested: quantity,
                        available,
                    });
                }
                if quantity == available {
                    state.holdings.assets.remove(&order.asset);
                } else if let Some(holding) = state.holdings.assets.get_mut(&order.asset) {
                    holding.quantity -= quantity;
                }
                state.holdings.cash += notional - fee;
            }
        }

        let fill = Fill {
            order_id: order.id,
            proposal_id: order.proposal_id,
            asset: order.asset.clone(),
            side: order.side,
            quantity,
            price,
            fee,
            exchange: self.name.clone(),
            executed_at: Utc::now(),
        };
        state.fills.push(fill.clone());

        info!(
            asset = %fill.asset,
            side = %fill.side,
            quantity = %fill.quantity,
            price = %fill.price,
            fee = %fill.fee,
            "Paper order filled"
        );
        debug!(cash = %state.holdings.cash, "Paper balance updated");
        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderSize, StrategyProposal};
    use rust_decimal_macros::dec;

    fn exchange() -> PaperExchange {
        PaperExchange::new(PaperExchangeConfig {
            initial_cash: dec!(10000),
            fee_rate: dec!(0.001),
            prices: [("BTC".to_string(), dec!(25000))].into_iter().collect(),
            ..Default::default()
        })
    }

    fn order(side: OrderSide, size: OrderSize) -> OrderRequest {
        OrderRequest::from_proposal(&StrategyProposal::new("dca", "BTC", side, size, dec!(25000)))
    }

    #[tokio::test]
    async fn test_notional_buy_updates_balances() {
        let exchange = exchange();
        let fill = exchange
            .place_order(&order(OrderSide::Buy, OrderSize::Notional(dec!(300))))
            .await
            .unwrap();

        assert_eq!(fill.quantity, dec!(0.012));
        assert_eq!(fill.notional(), dec!(300));
        assert_eq!(fill.fee, dec!(0.3));
        assert_eq!(fill.exchange, "paper");

        let balances = exchange.get_balances().await.unwrap();
        assert_eq!(balances.cash, dec!(9699.7));
        assert_eq!(balances.quantity("BTC"), dec!(0.012));
        assert_eq!(exchange.fills().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sell_more_than_held_fails() {
        let exchange = exchange();
        exchange.deposit("BTC", dec!(0.1), dec!(20000)).await;

        let err = exchange
            .place_order(&order(OrderSide::Sell, OrderSize::Quantity(dec!(0.2))))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InsufficientBalance { .. }));

        exchange
            .place_order(&order(OrderSide::Sell, OrderSize::Quantity(dec!(0.1))))
            .await
            .unwrap();
        let balances = exchange.get_balances().await.unwrap();
        assert_eq!(balances.quantity("BTC"), Decimal::ZERO);
        assert_eq!(balances.cash, dec!(10000) + dec!(2500) - dec!(2.5));
    }

    #[tokio::test]
    async fn test_scripted_failures_then_recovery() {
        let exchange = exchange();
        exchange.fail_next(2).await;
        let buy = order(OrderSide::Buy, OrderSize::Notional(dec!(100)));

        assert!(matches!(exchange.place_order(&buy).await, Err(ExecutionError::Unavailable(_))));
        assert!(exchange.place_order(&buy).await.is_err());
        assert!(exchange.place_order(&buy).await.is_ok());
    }

    #[tokio::test]
    async fn test_limit_must_be_marketable() {
        let exchange = exchange();
        let mut buy = order(OrderSide::Buy, OrderSize::Quantity(dec!(0.01)));
        buy.price = PriceConstraint::Limit(dec!(24000));
        assert!(matches!(
            exchange.place_order(&buy).await,
            Err(ExecutionError::LimitNotReached { .. })
        ));

        buy.price = PriceConstraint::Limit(dec!(26000));
        let fill = exchange.place_order(&buy).await.unwrap();
        assert_eq!(fill.price, dec!(25000));
    }

    #[tokio::test]
    async fn test_unknown_asset_and_outage() {
        let exchange = exchange();
        assert!(matches!(
            exchange.get_price("DOGE").await,
            Err(ExecutionError::UnknownAsset(_))
        ));

        exchange.set_outage(Some("maintenance".to_string())).await;
        let result = exchange
            .place_order(&order(OrderSide::Buy, OrderSize::Notional(dec!(100))))
            .await;
        assert_eq!(result, Err(ExecutionError::Unavailable("maintenance".to_string())));
    }
}
