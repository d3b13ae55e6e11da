//! Notification bus
//!
//! External notifiers subscribe to [`EngineEvent`]s. Publishing never fails
//! the engine: with no subscribers the event is dropped, and a subscriber
//! that falls behind loses the oldest events rather than blocking.

use common::EngineEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!(receivers, "Event published"),
            Err(broadcast::error::SendError(event)) => debug!(?event, "Event dropped, no subscribers"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Notifier that writes every event to the log
pub fn spawn_log_notifier(bus: &NotificationBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Log notifier lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::BandChanged { asset, from, to, score } => {
            info!(asset = %asset, from = ?from, to = %to, score, "Market band changed");
        }
        EngineEvent::BreakerTransition { from, to, failures } => {
            if event.is_breaker_trip() {
                error!(from = %from, to = %to, failures, "Circuit breaker tripped");
            } else {
                warn!(from = %from, to = %to, failures, "Circuit breaker transition");
            }
        }
        EngineEvent::ProposalRejected { asset, strategy_id, reason } => {
            warn!(asset = %asset, strategy = %strategy_id, reason = %reason, "Proposal rejected");
        }
        EngineEvent::OrderExecuted { fill } => {
            info!(
                asset = %fill.asset,
                side = %fill.side,
                quantity = %fill.quantity,
                price = %fill.price,
                "Order executed"
            );
        }
        EngineEvent::ExecutionFailed { asset, strategy_id, reason } => {
            error!(asset = %asset, strategy = %strategy_id, reason = %reason, "Execution failed");
        }
        EngineEvent::IntegrityHalted { sequence, reason } => {
            error!(sequence, reason = %reason, "Automated execution halted");
        }
        EngineEvent::CycleCompleted {
            assets,
            executed,
            rejected,
            dry_run,
        } => {
            info!(assets, executed, rejected, dry_run, "Cycle completed");
        }
    }
}
