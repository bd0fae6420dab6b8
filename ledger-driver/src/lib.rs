//! A driver for transactional document ledgers.
//!
//! See [`LedgerDriver::transact`] to get started.

pub use ledger_driver_core::api::{self, LedgerService};
pub use ledger_driver_core::document::{self, Document, DocumentSerializer, JsonSerializer, Value};
pub use ledger_driver_core::error::{
    ArgumentMismatch, BuilderError, MappingError, ServiceError, TransactError,
};
pub use ledger_driver_core::execution_stats::{self, ExecutionStats};
pub use ledger_driver_core::memory::{self, InMemoryLedger};
pub use ledger_driver_core::{
    retry, version, LedgerDriver, LedgerDriverBuilder, Materialized, PoolState, ResultCursor,
    Statement, StatementBuilder, Transaction, TransactionStatus,
};
