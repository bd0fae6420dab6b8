//! The core of a driver for a transactional document ledger.
//!
//! A [`LedgerDriver`] keeps a pool of sessions against a single ledger and
//! runs units of work inside transactions via [`LedgerDriver::transact`],
//! committing on success and retrying on contention. How requests reach the
//! ledger is abstracted by [`api::LedgerService`]; [`memory::InMemoryLedger`]
//! is a complete in-process implementation for tests and demos.

pub mod api;
pub mod digest;
pub mod document;
pub mod driver;
pub mod error;
pub mod execution_stats;
pub mod memory;
pub mod pool;
pub mod results;
pub mod retry;
pub mod statement;
pub mod transaction;

pub use crate::document::{Document, DocumentSerializer, JsonSerializer, Value};
pub use crate::driver::{LedgerDriver, LedgerDriverBuilder};
pub use crate::error::{
    ArgumentMismatch, BuilderError, MappingError, ServiceError, TransactError,
};
pub use crate::execution_stats::ExecutionStats;
pub use crate::pool::PoolState;
pub use crate::results::{Materialized, ResultCursor};
pub use crate::statement::{Statement, StatementBuilder};
pub use crate::transaction::{Transaction, TransactionStatus};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[inline(always)]
pub fn version() -> &'static str {
    VERSION
}
