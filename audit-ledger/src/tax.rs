//! Tax lots, lot selection and realized-gain reports
//!
//! Lots are rebuilt by replaying `order executed` ledger entries, so the
//! ledger stays the single source of truth for cost basis.

use crate::entry::{AuditAction, AuditEntry};
use chrono::{DateTime, Duration, Utc};
use common::{Fill, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Holding period beyond which a disposal is long-term
pub const LONG_TERM_DAYS: i64 = 365;

/// Order in which open lots are consumed by a sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotSelectionMethod {
    #[default]
    Fifo,
    Lifo,
    /// Highest cost per unit first
    Hifo,
    /// Lowest cost per unit first
    LowestCost,
}

impl LotSelectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotSelectionMethod::Fifo => "fifo",
            LotSelectionMethod::Lifo => "lifo",
            LotSelectionMethod::Hifo => "hifo",
            LotSelectionMethod::LowestCost => "lowest_cost",
        }
    }
}

impl fmt::Display for LotSelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LotSelectionMethod {
    type Err = TaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fifo" => Ok(LotSelectionMethod::Fifo),
            "lifo" => Ok(LotSelectionMethod::Lifo),
            "hifo" | "highest_cost" => Ok(LotSelectionMethod::Hifo),
            "lowest_cost" | "lofo" => Ok(LotSelectionMethod::LowestCost),
            other => Err(TaxError::UnknownMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaxError {
    #[error("cannot sell {requested} {asset}: only {available} held in open lots")]
    InsufficientLots {
        asset: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("invalid fill: {0}")]
    InvalidFill(String),

    #[error("entry {sequence} does not carry a fill: {reason}")]
    MalformedEntry { sequence: u64, reason: String },

    #[error("unknown lot selection method: {0}")]
    UnknownMethod(String),
}

/// One acquisition. Open until `disposed_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLot {
    pub id: Uuid,
    pub asset: String,
    pub acquired_at: DateTime<Utc>,
    pub quantity: Decimal,
    /// Total cost including buy fees
    pub cost_basis: Decimal,
    pub exchange: String,
    pub disposed_at: Option<DateTime<Utc>>,
    /// Net of sell fees
    pub proceeds: Option<Decimal>,
}

impl TaxLot {
    pub fn from_buy(fill: &Fill) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset: fill.asset.clone(),
            acquired_at: fill.executed_at,
            quantity: fill.quantity,
            cost_basis: fill.notional() + fill.fee,
            exchange: fill.exchange.clone(),
            disposed_at: None,
            proceeds: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.disposed_at.is_none()
    }

    pub fn unit_cost(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.cost_basis / self.quantity
        }
    }

    /// Realized gain of a disposed lot
    pub fn gain(&self) -> Option<Decimal> {
        self.proceeds.map(|p| p - self.cost_basis)
    }

    pub fn is_long_term(&self) -> bool {
        self.disposed_at
            .map(|d| d - self.acquired_at > Duration::days(LONG_TERM_DAYS))
            .unwrap_or(false)
    }
}

/// Open and disposed lots across all assets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxLotBook {
    lots: Vec<TaxLot>,
}

impl TaxLotBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lots(lots: Vec<TaxLot>) -> Self {
        Self { lots }
    }

    pub fn lots(&self) -> &[TaxLot] {
        &self.lots
    }

    pub fn open_lots<'a>(&'a self, asset: &'a str) -> impl Iterator<Item = &'a TaxLot> + 'a {
        self.lots.iter().filter(move |l| l.is_open() && l.asset == asset)
    }

    pub fn disposed_lots(&self) -> impl Iterator<Item = &TaxLot> {
        self.lots.iter().filter(|l| !l.is_open())
    }

    pub fn held(&self, asset: &str) -> Decimal {
        self.open_lots(asset).map(|l| l.quantity).sum()
    }

    /// Apply a fill. Returns the lots created or disposed by it.
    pub fn apply_fill(&mut self, fill: &Fill, method: LotSelectionMethod) -> Result<Vec<TaxLot>, TaxError> {
        if fill.quantity <= Decimal::ZERO {
            return Err(TaxError::InvalidFill(format!("non-positive quantity {}", fill.quantity)));
        }
        match fill.side {
            OrderSide::Buy => {
                let lot = TaxLot::from_buy(fill);
                self.lots.push(lot.clone());
                Ok(vec![lot])
            }
            OrderSide::Sell => self.dispose(fill, method),
        }
    }

    fn dispose(&mut self, fill: &Fill, method: LotSelectionMethod) -> Result<Vec<TaxLot>, TaxError> {
        let available = self.held(&fill.asset);
        if fill.quantity > available {
            return Err(TaxError::InsufficientLots {
                asset: fill.asset.clone(),
                requested: fill.quantity,
                available,
            });
        }

        let mut order: Vec<usize> = self
            .lots
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_open() && l.asset == fill.asset)
            .map(|(i, _)| i)
            .collect();
        match method {
            LotSelectionMethod::Fifo => order.sort_by_key(|&i| self.lots[i].acquired_at),
            LotSelectionMethod::Lifo => order.sort_by_key(|&i| std::cmp::Reverse(self.lots[i].acquired_at)),
            LotSelectionMethod::Hifo => {
                order.sort_by(|&a, &b| self.lots[b].unit_cost().cmp(&self.lots[a].unit_cost()))
            }
            LotSelectionMethod::LowestCost => {
                order.sort_by(|&a, &b| self.lots[a].unit_cost().cmp(&self.lots[b].unit_cost()))
            }
        }

        let total_proceeds = fill.notional() - fill.fee;
        let mut remaining = fill.quantity;
        let mut proceeds_left = total_proceeds;
        let mut disposed = Vec::new();
        let mut splits = Vec::new();

        for index in order {
            if remaining.is_zero() {
                break;
            }
            let lot = &mut self.lots[index];
            let take = remaining.min(lot.quantity);
            remaining -= take;

            let proceeds = if remaining.is_zero() {
                proceeds_left
            } else {
                (total_proceeds * take / fill.quantity).round_dp(8)
            };
            proceeds_left -= proceeds;

            if take == lot.quantity {
                lot.disposed_at = Some(fill.executed_at);
                lot.proceeds = Some(proceeds);
                disposed.push(lot.clone());
            } else {
                let basis = (lot.cost_basis * take / lot.quantity).round_dp(8);
                lot.quantity -= take;
                lot.cost_basis -= basis;
                let piece = TaxLot {
                    id: Uuid::new_v4(),
                    asset: lot.asset.clone(),
                    acquired_at: lot.acquired_at,
                    quantity: take,
                    cost_basis: basis,
                    exchange: lot.exchange.clone(),
                    disposed_at: Some(fill.executed_at),
                    proceeds: Some(proceeds),
                };
                disposed.push(piece.clone());
                splits.push(piece);
            }
        }

        self.lots.extend(splits);
        Ok(disposed)
    }
}

/// Realized gains for a period under one lot-selection method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxReport {
    pub method: LotSelectionMethod,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub disposals: Vec<TaxLot>,
    pub total_proceeds: Decimal,
    pub total_cost_basis: Decimal,
    pub short_term_gain: Decimal,
    pub long_term_gain: Decimal,
}

impl TaxReport {
    pub fn net_gain(&self) -> Decimal {
        self.short_term_gain + self.long_term_gain
    }

    /// Replay executed orders up to `period_end` and report disposals in the period
    pub fn from_entries(
        entries: &[AuditEntry],
        method: LotSelectionMethod,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Self, TaxError> {
        let mut fills = Vec::new();
        for entry in entries.iter().filter(|e| e.action == AuditAction::OrderExecuted) {
            let fill: Fill = entry
                .new_value_as()
                .map_err(|e| TaxError::MalformedEntry {
                    sequence: entry.sequence,
                    reason: e.to_string(),
                })?
                .ok_or_else(|| TaxError::MalformedEntry {
                    sequence: entry.sequence,
                    reason: "missing new value".to_string(),
                })?;
            if fill.executed_at <= period_end {
                fills.push(fill);
            }
        }
        Self::from_fills(&fills, method, period_start, period_end)
    }

    /// Report from fills in execution order
    pub fn from_fills(
        fills: &[Fill],
        method: LotSelectionMethod,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Self, TaxError> {
        let mut book = TaxLotBook::new();
        let mut disposals = Vec::new();
        for fill in fills {
            let touched = book.apply_fill(fill, method)?;
            if fill.side == OrderSide::Sell && fill.executed_at >= period_start && fill.executed_at <= period_end {
                disposals.extend(touched);
            }
        }

        let mut report = Self {
            method,
            period_start,
            period_end,
            disposals: Vec::new(),
            total_proceeds: Decimal::ZERO,
            total_cost_basis: Decimal::ZERO,
            short_term_gain: Decimal::ZERO,
            long_term_gain: Decimal::ZERO,
        };
        for lot in disposals {
            let gain = lot.gain().unwrap_or(Decimal::ZERO);
            report.total_proceeds += lot.proceeds.unwrap_or(Decimal::ZERO);
            report.total_cost_basis += lot.cost_basis;
            if lot.is_long_term() {
                report.long_term_gain += gain;
            } else {
                report.short_term_gain += gain;
            }
            report.disposals.push(lot);
        }
        Ok(report)
    }
}
