//! Signal-driven portfolio automation engine
//!
//! Wires the aggregator, decision engine, strategies, risk gate, audit ledger
//! and exchange into scheduled evaluation cycles, and exposes them through a
//! command handle and the `signal-engine` binary.

pub mod commands;
pub mod config;
pub mod engine;
pub mod events;
pub mod logging;
pub mod provider;
pub mod scheduler;

pub use commands::{spawn_command_server, ControlCommand, EngineHandle};
pub use config::{EngineConfig, LedgerBackend, OverlapPolicy, ScheduleConfig};
pub use engine::{AssetReport, CycleReport, Engine, ProposalOutcome, ProposalReport};
pub use events::{spawn_log_notifier, NotificationBus};
pub use provider::SnapshotProvider;
pub use scheduler::{Scheduler, SchedulerShutdown};
