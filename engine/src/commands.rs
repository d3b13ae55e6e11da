//! Command surface for an external CLI or dashboard
//!
//! Commands travel over an mpsc channel to a single server task and are
//! answered on oneshot channels. Long-running work (cycles, backtests) is
//! spawned so the server keeps answering queries while it runs.

use crate::engine::{CycleReport, Engine};
use anyhow::{anyhow, Result};
use audit_ledger::{AuditEntry, ChainReport, LedgerQuery, LotSelectionMethod, TaxReport};
use backtest::{BacktestConfig, BacktestResult, HistoricalBar};
use chrono::{DateTime, Utc};
use common::CompositeAnalysis;
use portfolio_risk::CircuitBreakerState;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Commands accepted by the engine
pub enum ControlCommand {
    TriggerCycle {
        dry_run: bool,
        respond_to: Reply<CycleReport>,
    },
    GetAnalysis {
        asset: String,
        respond_to: Reply<Option<CompositeAnalysis>>,
    },
    QueryLedger {
        query: LedgerQuery,
        respond_to: Reply<Vec<AuditEntry>>,
    },
    VerifyChain {
        respond_to: Reply<ChainReport>,
    },
    ClearHalt {
        respond_to: Reply<()>,
    },
    RunBacktest {
        config: BacktestConfig,
        bars: Vec<HistoricalBar>,
        respond_to: Reply<BacktestResult>,
    },
    TaxReport {
        method: Option<LotSelectionMethod>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        respond_to: Reply<TaxReport>,
    },
    BreakerStatus {
        respond_to: Reply<CircuitBreakerState>,
    },
    Shutdown,
}

/// Start the command server for `engine`
pub fn spawn_command_server(engine: Arc<Engine>, buffer: usize) -> (EngineHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let server = tokio::spawn(serve(engine, rx));
    (EngineHandle { tx }, server)
}

async fn serve(engine: Arc<Engine>, mut rx: mpsc::Receiver<ControlCommand>) {
    info!("Command server started");
    while let Some(command) = rx.recv().await {
        if let ControlCommand::Shutdown = command {
            break;
        }
        handle_command(&engine, command).await;
    }
    info!("Command server stopped");
}

async fn handle_command(engine: &Arc<Engine>, command: ControlCommand) {
    match command {
        ControlCommand::TriggerCycle { dry_run, respond_to } => {
            debug!(dry_run, "Cycle requested");
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = respond_to.send(engine.run_cycle(dry_run).await);
            });
        }
        ControlCommand::GetAnalysis { asset, respond_to } => {
            let _ = respond_to.send(engine.latest_analysis(&asset).await);
        }
        ControlCommand::QueryLedger { query, respond_to } => {
            let _ = respond_to.send(engine.ledger_entries(&query).await.map_err(Into::into));
        }
        ControlCommand::VerifyChain { respond_to } => {
            let _ = respond_to.send(engine.verify_chain().await.map_err(Into::into));
        }
        ControlCommand::ClearHalt { respond_to } => {
            let _ = respond_to.send(engine.clear_halt().await.map_err(Into::into));
        }
        ControlCommand::RunBacktest {
            config,
            bars,
            respond_to,
        } => {
            let engine = engine.clone();
            tokio::spawn(async move {
                let result = tokio::task::spawn_blocking(move || engine.run_backtest(config, &bars))
                    .await
                    .map_err(|e| anyhow!("Backtest task failed: {}", e))
                    .and_then(|r| r.map_err(Into::into));
                let _ = respond_to.send(result);
            });
        }
        ControlCommand::TaxReport {
            method,
            from,
            to,
            respond_to,
        } => {
            let _ = respond_to.send(engine.tax_report(method, from, to).await.map_err(Into::into));
        }
        ControlCommand::BreakerStatus { respond_to } => {
            let _ = respond_to.send(Ok(engine.breaker_state().await));
        }
        ControlCommand::Shutdown => {}
    }
}

/// Handle for sending commands to a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl EngineHandle {
    async fn request<T>(&self, what: &str, command: impl FnOnce(Reply<T>) -> ControlCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(command(tx))
            .await
            .map_err(|e| anyhow!("Failed to send {} command: {}", what, e))?;
        rx.await
            .map_err(|_| anyhow!("{} response channel closed", what))?
    }

    /// Run an evaluation cycle, waiting for any cycle in progress
    pub async fn trigger_cycle(&self, dry_run: bool) -> Result<CycleReport> {
        self.request("cycle", |respond_to| ControlCommand::TriggerCycle { dry_run, respond_to })
            .await
    }

    pub async fn get_analysis(&self, asset: impl Into<String>) -> Result<Option<CompositeAnalysis>> {
        let asset = asset.into();
        self.request("analysis", |respond_to| ControlCommand::GetAnalysis { asset, respond_to })
            .await
    }

    pub async fn query_ledger(&self, query: LedgerQuery) -> Result<Vec<AuditEntry>> {
        self.request("ledger query", |respond_to| ControlCommand::QueryLedger { query, respond_to })
            .await
    }

    pub async fn verify_chain(&self) -> Result<ChainReport> {
        self.request("verify", |respond_to| ControlCommand::VerifyChain { respond_to })
            .await
    }

    pub async fn clear_halt(&self) -> Result<()> {
        self.request("clear halt", |respond_to| ControlCommand::ClearHalt { respond_to })
            .await
    }

    pub async fn run_backtest(&self, config: BacktestConfig, bars: Vec<HistoricalBar>) -> Result<BacktestResult> {
        self.request("backtest", |respond_to| ControlCommand::RunBacktest {
            config,
            bars,
            respond_to,
        })
        .await
    }

    pub async fn tax_report(
        &self,
        method: Option<LotSelectionMethod>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<TaxReport> {
        self.request("tax report", |respond_to| ControlCommand::TaxReport {
            method,
            from,
            to,
            respond_to,
        })
        .await
    }

    pub async fn breaker_status(&self) -> Result<CircuitBreakerState> {
        self.request("breaker status", |respond_to| ControlCommand::BreakerStatus { respond_to })
            .await
    }

    /// Stop the command server
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(ControlCommand::Shutdown)
            .await
            .map_err(|e| anyhow!("Failed to send shutdown command: {}", e))
    }
}
