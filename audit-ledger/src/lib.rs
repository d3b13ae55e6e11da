//! Audit Ledger
//!
//! Append-only, hash-chained record of every analysis, proposal, execution
//! and rejection. Each entry's checksum covers its content and the checksum
//! of the entry before it, so altering or reordering any stored entry is
//! detected by [`AuditLedger::verify_chain`]. Tax lots and realized-gain
//! reports are rebuilt from the executed orders on the chain.

mod entry;
mod ledger;
mod postgres;
mod store;
mod tax;

pub use entry::{AuditAction, AuditDraft, AuditEntry, EntityType, GENESIS_CHECKSUM};
pub use ledger::{verify_entries, AuditLedger, ChainReport, ChainVerificationError, LedgerError};
pub use postgres::PostgresLedgerStore;
pub use store::{InMemoryLedgerStore, LedgerQuery, LedgerStore};
pub use tax::{LotSelectionMethod, TaxError, TaxLot, TaxLotBook, TaxReport, LONG_TERM_DAYS};
