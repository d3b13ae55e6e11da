//! Execution
//!
//! The boundary between the engine and an exchange. The engine only ever
//! talks to an [`ExchangeClient`]; any non-success result from
//! [`ExchangeClient::place_order`] counts as an execution failure for the
//! circuit breaker. [`PaperExchange`] is the simulated venue used by the
//! binary, dry runs and tests.

mod paper;

pub use paper::{PaperExchange, PaperExchangeConfig};

use common::{Fill, Holdings, OrderSide, OrderSize, PriceConstraint, StrategyProposal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an order could not be placed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("exchange rejected order: {reason}")]
    Rejected { reason: String },

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("insufficient {asset} balance: requested {requested}, have {available}")]
    InsufficientBalance {
        asset: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("limit {limit} not marketable at {price}")]
    LimitNotReached { limit: Decimal, price: Decimal },

    #[error("no price for asset {0}")]
    UnknownAsset(String),

    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    #[error("order timed out after {0} ms")]
    Timeout(u64),
}

/// An order as sent to the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub asset: String,
    pub side: OrderSide,
    pub size: OrderSize,
    pub price: PriceConstraint,
}

impl OrderRequest {
    pub fn from_proposal(proposal: &StrategyProposal) -> Self {
        Self {
            id: Uuid::new_v4(),
            proposal_id: proposal.id,
            asset: proposal.asset.clone(),
            side: proposal.side,
            size: proposal.size,
            price: proposal.price,
        }
    }
}

/// Exchange connectivity consumed by the engine
#[async_trait::async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Venue name recorded on fills and tax lots
    fn name(&self) -> &str;

    async fn get_balances(&self) -> Result<Holdings, ExecutionError>;

    /// Current reference price for an asset
    async fn get_price(&self, asset: &str) -> Result<Decimal, ExecutionError>;

    async fn place_order(&self, order: &OrderRequest) -> Result<Fill, ExecutionError>;
}
