//! Transactions: staging, isolation, conflict detection, audit.

mod audit;
mod manager;
mod state;

pub use audit::AuditEvent;
pub use state::IsolationLevel;

pub(crate) use audit::AuditLog;
pub(crate) use manager::TransactionManager;
pub(crate) use state::{EdgeOp, TxnState};
