//! Evaluation cycle
//!
//! One cycle: verify the audit chain, then for every configured asset
//! aggregate signals, classify the composite score, evaluate the strategies,
//! net their proposals and push each one through the risk gate to the
//! exchange. Every proposal is handled by its own spawned task that appends
//! its approval, execution and breaker records as one ledger batch, so a
//! cancelled cycle never leaves half of a proposal on the chain. Each task
//! holds a share of the cycle guard, so the next cycle cannot start while an
//! order from a cancelled one is still in flight.

use crate::config::EngineConfig;
use crate::events::NotificationBus;
use anyhow::{Context, Result};
use audit_ledger::{
    AuditAction, AuditDraft, AuditEntry, AuditLedger, ChainReport, EntityType, LedgerError, LedgerQuery,
    LedgerStore, LotSelectionMethod, TaxLotBook, TaxReport,
};
use backtest::{BacktestConfig, BacktestError, BacktestResult, Backtester, HistoricalBar};
use chrono::{DateTime, NaiveDate, Utc};
use common::{
    CompositeAnalysis, EngineEvent, Fill, Holdings, MarketSnapshot, SignalCategory, StrategyProposal,
};
use execution::{ExchangeClient, ExecutionError, OrderRequest};
use portfolio_risk::{BreakerTransition, CircuitBreakerState, GateRejection, Portfolio, RiskGate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use signal_generation::{
    AnalysisStorage, DecisionEngine, InMemoryAnalysisStorage, MarketDataProvider, SignalAggregator,
    StrategyRegistry,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Entity id used for breaker and halt records
const RISK_GATE_ENTITY: &str = "risk_gate";

/// Held by the running cycle and every execution task it spawned
type CycleGuard = Arc<OwnedMutexGuard<()>>;

/// What happened to one proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProposalOutcome {
    Executed { fill: Fill },
    /// Dry run: the gate would have admitted it
    WouldExecute,
    Rejected { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalReport {
    pub proposal: StrategyProposal,
    pub outcome: ProposalOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReport {
    pub asset: String,
    pub analysis_id: Option<Uuid>,
    pub composite_score: Option<f64>,
    pub band: Option<String>,
    pub proposals: Vec<ProposalReport>,
    /// Why the asset produced no proposals, when it was cut short
    pub skipped: Option<String>,
}

impl AssetReport {
    fn skipped(asset: &str, analysis: Option<&CompositeAnalysis>, reason: impl Into<String>) -> Self {
        let mut report = Self::for_analysis(asset, analysis);
        report.skipped = Some(reason.into());
        report
    }

    fn for_analysis(asset: &str, analysis: Option<&CompositeAnalysis>) -> Self {
        Self {
            asset: asset.to_string(),
            analysis_id: analysis.map(|a| a.id),
            composite_score: analysis.map(|a| a.composite_score),
            band: analysis.map(|a| a.market_condition.clone()),
            proposals: Vec::new(),
            skipped: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Automated execution was halted for the whole cycle
    pub halted: bool,
    pub assets: Vec<AssetReport>,
}

impl CycleReport {
    fn outcomes(&self) -> impl Iterator<Item = &ProposalOutcome> {
        self.assets.iter().flat_map(|a| a.proposals.iter().map(|p| &p.outcome))
    }

    pub fn executed(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o, ProposalOutcome::Executed { .. }))
            .count()
    }

    pub fn would_execute(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o, ProposalOutcome::WouldExecute))
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o, ProposalOutcome::Rejected { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o, ProposalOutcome::Failed { .. }))
            .count()
    }

    pub fn fills(&self) -> Vec<&Fill> {
        self.outcomes()
            .filter_map(|o| match o {
                ProposalOutcome::Executed { fill } => Some(fill),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct EquityMarks {
    day: NaiveDate,
    day_start: Decimal,
    peak: Decimal,
}

/// The automation engine
pub struct Engine {
    assets: Vec<String>,
    categories: Vec<SignalCategory>,
    aggregator: SignalAggregator,
    registry: StrategyRegistry,
    analyses: Arc<dyn AnalysisStorage>,
    gate: Arc<RiskGate>,
    ledger: Arc<AuditLedger>,
    exchange: Arc<dyn ExchangeClient>,
    bus: NotificationBus,
    lots: Arc<Mutex<TaxLotBook>>,
    lot_method: LotSelectionMethod,
    verify_before_cycle: bool,
    execution_timeout: Duration,
    moving_average_window: usize,
    price_history: Mutex<HashMap<String, VecDeque<Decimal>>>,
    equity_marks: Mutex<Option<EquityMarks>>,
    cycle_lock: Arc<Mutex<()>>,
}

impl Engine {
    /// Build from validated configuration. Tax lots are restored from `store`.
    pub async fn new(
        config: &EngineConfig,
        provider: Arc<dyn MarketDataProvider>,
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self> {
        config.validate()?;

        let decision = Arc::new(DecisionEngine::new(config.bands.clone()));
        let aggregator = SignalAggregator::new(config.aggregator.clone(), provider, decision)
            .context("Invalid aggregator configuration")?;
        let registry =
            StrategyRegistry::from_configs(&config.strategies).context("Invalid strategy configuration")?;
        let lots = store.load_lots().await.context("Failed to load tax lots")?;

        info!(
            assets = ?config.assets,
            strategies = registry.len(),
            lots = lots.len(),
            lot_method = %config.tax.lot_method,
            "Engine initialized"
        );

        Ok(Self {
            assets: config.assets.clone(),
            categories: config.categories.clone(),
            aggregator,
            registry,
            analyses: Arc::new(InMemoryAnalysisStorage::default()),
            gate: Arc::new(RiskGate::new(config.risk.clone())),
            ledger: Arc::new(AuditLedger::new(store)),
            exchange,
            bus: NotificationBus::default(),
            lots: Arc::new(Mutex::new(TaxLotBook::from_lots(lots))),
            lot_method: config.tax.lot_method,
            verify_before_cycle: config.schedule.verify_before_cycle,
            execution_timeout: config.schedule.execution_timeout(),
            moving_average_window: config.schedule.moving_average_window,
            price_history: Mutex::new(HashMap::new()),
            equity_marks: Mutex::new(None),
            cycle_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Replace the notification bus, e.g. to share one between engines
    pub fn with_bus(mut self, bus: NotificationBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn gate(&self) -> &Arc<RiskGate> {
        &self.gate
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// Run a cycle, waiting for any cycle already in progress
    pub async fn run_cycle(&self, dry_run: bool) -> Result<CycleReport> {
        let guard = Arc::new(self.cycle_lock.clone().lock_owned().await);
        self.cycle(dry_run, guard).await
    }

    /// Run a cycle unless one is already in progress
    pub async fn try_run_cycle(&self, dry_run: bool) -> Result<Option<CycleReport>> {
        let Ok(guard) = self.cycle_lock.clone().try_lock_owned() else {
            info!(dry_run, "Cycle already running, skipping");
            return Ok(None);
        };
        self.cycle(dry_run, Arc::new(guard)).await.map(Some)
    }

    /// True while a cycle, or an execution task spawned by one, still runs
    pub fn is_cycle_running(&self) -> bool {
        self.cycle_lock.try_lock().is_err()
    }

    async fn cycle(&self, dry_run: bool, guard: CycleGuard) -> Result<CycleReport> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(cycle_id = %id, dry_run, assets = self.assets.len(), "Cycle started");

        if self.verify_before_cycle && !self.gate.is_halted().await {
            match self.verify_chain().await {
                Ok(_) | Err(LedgerError::Integrity(_)) => {}
                Err(e) => return Err(e).context("Failed to verify audit chain"),
            }
        }
        let halted = self.gate.is_halted().await;

        let holdings = self
            .exchange
            .get_balances()
            .await
            .context("Failed to read exchange balances")?;
        let mut prices = BTreeMap::new();
        for asset in &self.assets {
            match self.exchange.get_price(asset).await {
                Ok(price) => {
                    prices.insert(asset.clone(), price);
                }
                Err(e) => warn!(asset = %asset, error = %e, "No price for asset"),
            }
        }
        let mut portfolio = self.valued_portfolio(&holdings, &prices, started_at).await;

        let mut assets = Vec::with_capacity(self.assets.len());
        for asset in &self.assets {
            let price = prices.get(asset).copied();
            assets.push(
                self.evaluate_asset(asset, price, &mut portfolio, dry_run, halted, &guard)
                    .await,
            );
        }

        let report = CycleReport {
            id,
            started_at,
            finished_at: Utc::now(),
            dry_run,
            halted,
            assets,
        };
        info!(
            cycle_id = %id,
            executed = report.executed(),
            rejected = report.rejected(),
            failed = report.failed(),
            equity = %portfolio.equity(),
            "Cycle finished"
        );
        self.bus.publish(EngineEvent::CycleCompleted {
            assets: report.assets.len(),
            executed: report.executed(),
            rejected: report.rejected(),
            dry_run,
        });
        Ok(report)
    }

    /// Portfolio marked at current prices, carrying the day-start and peak
    /// equity observed by earlier cycles
    async fn valued_portfolio(
        &self,
        holdings: &Holdings,
        prices: &BTreeMap<String, Decimal>,
        now: DateTime<Utc>,
    ) -> Portfolio {
        let portfolio = Portfolio::from_holdings(holdings, prices);
        let equity = portfolio.equity();
        let today = now.date_naive();

        let mut marks = self.equity_marks.lock().await;
        let peak = marks.map(|m| m.peak).unwrap_or(equity).max(equity);
        let day_start = match *marks {
            Some(m) if m.day == today => m.day_start,
            _ => equity,
        };
        *marks = Some(EquityMarks {
            day: today,
            day_start,
            peak,
        });
        portfolio.with_reference_equity(day_start, peak)
    }

    async fn evaluate_asset(
        &self,
        asset: &str,
        price: Option<Decimal>,
        portfolio: &mut Portfolio,
        dry_run: bool,
        halted: bool,
        guard: &CycleGuard,
    ) -> AssetReport {
        let analysis = match self.aggregator.analyze(asset, &self.categories).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(asset, error = %e, "Skipping asset");
                return AssetReport::skipped(asset, None, e.to_string());
            }
        };

        self.track_band(&analysis).await;

        if !dry_run && !halted {
            if let Err(e) = self.record_analysis(&analysis).await {
                error!(asset, error = %e, "Failed to record analysis, skipping proposals");
                return AssetReport::skipped(asset, Some(&analysis), format!("ledger unavailable: {}", e));
            }
        }

        let Some(price) = price else {
            return AssetReport::skipped(asset, Some(&analysis), "no market price");
        };
        let market = self.market_snapshot(asset, price, !dry_run).await;
        let proposals = self
            .registry
            .evaluate(&analysis, &market, &portfolio.holdings(), self.gate.limits());

        let mut report = AssetReport::for_analysis(asset, Some(&analysis));
        for proposal in proposals {
            let outcome = if halted {
                self.preview_halted(&proposal, portfolio).await
            } else {
                self.process(proposal.clone(), portfolio.clone(), dry_run, guard.clone())
                    .await
            };
            if let ProposalOutcome::Executed { fill } = &outcome {
                if let Err(e) = portfolio.apply_fill(fill) {
                    warn!(asset, error = %e, "Fill could not be applied to the cycle portfolio");
                }
            }
            report.proposals.push(ProposalReport { proposal, outcome });
        }
        report
    }

    async fn track_band(&self, analysis: &CompositeAnalysis) {
        let previous = match self.analyses.latest(&analysis.asset).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(asset = %analysis.asset, error = %e, "Failed to read previous analysis");
                None
            }
        };
        if let Err(e) = self.analyses.store(analysis).await {
            warn!(asset = %analysis.asset, error = %e, "Failed to store analysis");
        }

        let from = previous.map(|p| p.market_condition);
        if from.as_deref() != Some(analysis.market_condition.as_str()) {
            info!(
                asset = %analysis.asset,
                from = ?from,
                to = %analysis.market_condition,
                score = analysis.composite_score,
                "Market band changed"
            );
            self.bus.publish(EngineEvent::BandChanged {
                asset: analysis.asset.clone(),
                from,
                to: analysis.market_condition.clone(),
                score: analysis.composite_score,
            });
        }
    }

    async fn record_analysis(&self, analysis: &CompositeAnalysis) -> Result<AuditEntry, LedgerError> {
        let draft = AuditDraft::new(EntityType::Analysis, analysis.id.to_string(), AuditAction::AnalysisRecorded)
            .with_new_value(analysis)?;
        self.ledger.append(draft).await
    }

    /// Reference price plus the moving average of recent cycle prices
    async fn market_snapshot(&self, asset: &str, price: Decimal, record: bool) -> MarketSnapshot {
        let mut history = self.price_history.lock().await;
        let window = history.entry(asset.to_string()).or_default();
        if record {
            window.push_back(price);
            while window.len() > self.moving_average_window {
                window.pop_front();
            }
        }

        let snapshot = MarketSnapshot::new(price);
        if window.len() < self.moving_average_window {
            return snapshot;
        }
        let sum: Decimal = window.iter().sum();
        snapshot.with_moving_average((sum / Decimal::from(window.len())).round_dp(8))
    }

    async fn preview_halted(&self, proposal: &StrategyProposal, portfolio: &Portfolio) -> ProposalOutcome {
        let reason = match self.gate.preview(proposal, portfolio, Utc::now()).await {
            Err(rejection) => rejection.to_string(),
            Ok(()) => "automated execution halted".to_string(),
        };
        ProposalOutcome::Rejected { reason }
    }

    /// Gate, execute and record one proposal in its own task
    async fn process(
        &self,
        proposal: StrategyProposal,
        portfolio: Portfolio,
        dry_run: bool,
        guard: CycleGuard,
    ) -> ProposalOutcome {
        let unit = ExecutionUnit {
            gate: self.gate.clone(),
            ledger: self.ledger.clone(),
            exchange: self.exchange.clone(),
            bus: self.bus.clone(),
            lots: self.lots.clone(),
            lot_method: self.lot_method,
            timeout: self.execution_timeout,
            _cycle: guard,
        };
        let proposal_id = proposal.id;
        match tokio::spawn(unit.run(proposal, portfolio, dry_run)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(proposal_id = %proposal_id, error = %e, "Proposal task failed");
                ProposalOutcome::Failed {
                    reason: format!("proposal task failed: {}", e),
                }
            }
        }
    }

    /// Recompute the audit chain. A broken chain halts automated execution
    /// until [`Engine::clear_halt`] is called.
    pub async fn verify_chain(&self) -> Result<ChainReport, LedgerError> {
        match self.ledger.verify_chain().await {
            Ok(report) => Ok(report),
            Err(LedgerError::Integrity(e)) => {
                let sequence = e.first_divergent_sequence();
                let reason = format!("audit chain verification failed: {}", e);
                self.gate.halt(reason.clone()).await;

                let draft = AuditDraft::new(EntityType::System, RISK_GATE_ENTITY, AuditAction::IntegrityHalt)
                    .with_new_value(&serde_json::json!({ "first_divergent_sequence": sequence, "reason": reason }));
                match draft {
                    Ok(draft) => {
                        if let Err(append_error) = self.ledger.append(draft).await {
                            error!(error = %append_error, "Failed to record integrity halt");
                        }
                    }
                    Err(serialize_error) => error!(error = %serialize_error, "Failed to record integrity halt"),
                }

                self.bus.publish(EngineEvent::IntegrityHalted { sequence, reason });
                Err(LedgerError::Integrity(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Operator acknowledgement that a ledger discrepancy has been resolved
    pub async fn clear_halt(&self) -> Result<(), LedgerError> {
        if !self.gate.is_halted().await {
            return Ok(());
        }
        self.gate.clear_halt().await;
        let draft = AuditDraft::new(EntityType::System, RISK_GATE_ENTITY, AuditAction::HaltCleared);
        self.ledger.append(draft).await?;
        Ok(())
    }

    pub async fn is_halted(&self) -> bool {
        self.gate.is_halted().await
    }

    pub async fn breaker_state(&self) -> CircuitBreakerState {
        self.gate.breaker_state().await
    }

    pub async fn latest_analysis(&self, asset: &str) -> Result<Option<CompositeAnalysis>> {
        self.analyses.latest(asset).await
    }

    pub async fn latest_analyses(&self) -> Result<Vec<CompositeAnalysis>> {
        self.analyses.latest_all().await
    }

    pub async fn ledger_entries(&self, query: &LedgerQuery) -> Result<Vec<AuditEntry>, LedgerError> {
        self.ledger.entries(query).await
    }

    /// Realized gains for a period; `None` uses the configured lot method
    pub async fn tax_report(
        &self,
        method: Option<LotSelectionMethod>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<TaxReport, LedgerError> {
        self.ledger
            .tax_report(method.unwrap_or(self.lot_method), from, to)
            .await
    }

    /// Lots as currently persisted
    pub async fn tax_lots(&self) -> TaxLotBook {
        self.lots.lock().await.clone()
    }

    /// Replay a historical series. Independent of live gate and ledger state.
    pub fn run_backtest(
        &self,
        config: BacktestConfig,
        bars: &[HistoricalBar],
    ) -> Result<BacktestResult, BacktestError> {
        Backtester::new(config)?.run(bars)
    }
}

/// Everything one proposal needs, owned so it can outlive a cancelled cycle
struct ExecutionUnit {
    gate: Arc<RiskGate>,
    ledger: Arc<AuditLedger>,
    exchange: Arc<dyn ExchangeClient>,
    bus: NotificationBus,
    lots: Arc<Mutex<TaxLotBook>>,
    lot_method: LotSelectionMethod,
    timeout: Duration,
    _cycle: CycleGuard,
}

impl ExecutionUnit {
    async fn run(self, proposal: StrategyProposal, portfolio: Portfolio, dry_run: bool) -> ProposalOutcome {
        if dry_run {
            return match self.gate.preview(&proposal, &portfolio, Utc::now()).await {
                Ok(()) => {
                    info!(
                        asset = %proposal.asset,
                        strategy = %proposal.strategy_id,
                        side = %proposal.side,
                        notional = %proposal.notional(),
                        "Dry run: proposal would execute"
                    );
                    ProposalOutcome::WouldExecute
                }
                Err(rejection) => {
                    info!(asset = %proposal.asset, reason = %rejection, "Dry run: proposal would be rejected");
                    ProposalOutcome::Rejected {
                        reason: rejection.to_string(),
                    }
                }
            };
        }

        let permit = match self.gate.admit(&proposal, &portfolio, Utc::now()).await {
            Ok(permit) => permit,
            Err(rejection) => return self.reject(&proposal, rejection).await,
        };
        if let Some(transition) = permit.transition {
            self.publish_transition(&transition);
        }
        let cooldown_transition = permit.transition;

        let order = OrderRequest::from_proposal(&proposal);
        let result = match tokio::time::timeout(self.timeout, self.exchange.place_order(&order)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout(self.timeout.as_millis() as u64)),
        };
        let outcome_transition = self
            .gate
            .record_execution(permit, result.is_ok(), Utc::now())
            .await;
        if let Some(transition) = &outcome_transition {
            self.publish_transition(transition);
        }

        let recorded = match self
            .record(&proposal, &order, &result, cooldown_transition, outcome_transition)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(proposal_id = %proposal.id, error = %e, "Failed to record proposal in audit ledger");
                false
            }
        };

        match result {
            Ok(fill) => {
                info!(
                    asset = %fill.asset,
                    strategy = %proposal.strategy_id,
                    side = %fill.side,
                    quantity = %fill.quantity,
                    price = %fill.price,
                    "Order executed"
                );
                if recorded {
                    self.update_lots(&fill).await;
                } else {
                    error!(
                        asset = %fill.asset,
                        order_id = %fill.order_id,
                        "Fill missing from audit ledger, tax lots left unchanged"
                    );
                }
                self.bus.publish(EngineEvent::OrderExecuted { fill: fill.clone() });
                ProposalOutcome::Executed { fill }
            }
            Err(e) => {
                error!(
                    asset = %proposal.asset,
                    strategy = %proposal.strategy_id,
                    error = %e,
                    "Order placement failed"
                );
                self.bus.publish(EngineEvent::ExecutionFailed {
                    asset: proposal.asset.clone(),
                    strategy_id: proposal.strategy_id.clone(),
                    reason: e.to_string(),
                });
                ProposalOutcome::Failed { reason: e.to_string() }
            }
        }
    }

    async fn reject(&self, proposal: &StrategyProposal, rejection: GateRejection) -> ProposalOutcome {
        let reason = rejection.to_string();
        warn!(
            asset = %proposal.asset,
            strategy = %proposal.strategy_id,
            reason = %reason,
            "Proposal rejected"
        );

        let draft = AuditDraft::new(EntityType::Proposal, proposal.id.to_string(), AuditAction::ProposalRejected)
            .with_new_value(&serde_json::json!({ "proposal": proposal, "reason": reason }));
        let recorded = match draft {
            Ok(draft) => self.ledger.append(draft).await.map(|_| ()),
            Err(e) => Err(LedgerError::from(e)),
        };
        if let Err(e) = recorded {
            error!(proposal_id = %proposal.id, error = %e, "Failed to record rejection in audit ledger");
        }

        self.bus.publish(EngineEvent::ProposalRejected {
            asset: proposal.asset.clone(),
            strategy_id: proposal.strategy_id.clone(),
            reason: reason.clone(),
        });
        ProposalOutcome::Rejected { reason }
    }

    /// Approval, execution result and breaker transitions as one batch
    async fn record(
        &self,
        proposal: &StrategyProposal,
        order: &OrderRequest,
        result: &Result<Fill, ExecutionError>,
        before: Option<BreakerTransition>,
        after: Option<BreakerTransition>,
    ) -> Result<(), LedgerError> {
        let mut drafts = Vec::with_capacity(4);
        if let Some(transition) = &before {
            drafts.push(transition_draft(transition)?);
        }
        drafts.push(
            AuditDraft::new(EntityType::Proposal, proposal.id.to_string(), AuditAction::ProposalApproved)
                .with_new_value(proposal)?,
        );
        drafts.push(match result {
            Ok(fill) => AuditDraft::new(EntityType::Order, fill.order_id.to_string(), AuditAction::OrderExecuted)
                .with_new_value(fill)?,
            Err(e) => AuditDraft::new(EntityType::Order, order.id.to_string(), AuditAction::OrderFailed)
                .with_new_value(&serde_json::json!({
                    "order": order,
                    "error": e.to_string(),
                    "outcome": order_outcome(e),
                }))?,
        });
        if let Some(transition) = &after {
            drafts.push(transition_draft(transition)?);
        }
        self.ledger.append_batch(drafts).await?;
        Ok(())
    }

    fn publish_transition(&self, transition: &BreakerTransition) {
        if transition.to == common::BreakerState::Open {
            error!(from = %transition.from, failures = transition.failures, "Circuit breaker opened");
        } else {
            warn!(from = %transition.from, to = %transition.to, "Circuit breaker transition");
        }
        self.bus.publish(EngineEvent::BreakerTransition {
            from: transition.from,
            to: transition.to,
            failures: transition.failures,
        });
    }

    async fn update_lots(&self, fill: &Fill) {
        let mut book = self.lots.lock().await;
        if let Err(e) = book.apply_fill(fill, self.lot_method) {
            warn!(asset = %fill.asset, error = %e, "Tax lots out of step with holdings");
            return;
        }
        let touched: Vec<_> = book.lots().iter().filter(|l| l.asset == fill.asset).cloned().collect();
        if let Err(e) = self.ledger.store().save_lots(&touched).await {
            error!(asset = %fill.asset, error = %e, "Failed to persist tax lots");
        } else {
            debug!(asset = %fill.asset, lots = touched.len(), "Tax lots persisted");
        }
    }
}

/// A timed-out order may still have filled on the exchange
fn order_outcome(error: &ExecutionError) -> &'static str {
    match error {
        ExecutionError::Timeout(_) => "unknown",
        _ => "failed",
    }
}

fn transition_draft(transition: &BreakerTransition) -> Result<AuditDraft, LedgerError> {
    Ok(
        AuditDraft::new(EntityType::CircuitBreaker, RISK_GATE_ENTITY, AuditAction::BreakerTransition)
            .with_old_value(&serde_json::json!({ "state": transition.from }))?
            .with_new_value(&serde_json::json!({ "state": transition.to, "failures": transition.failures }))?,
    )
}
