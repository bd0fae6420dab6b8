use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::{FetchPageResult, TransactionId};
use crate::digest::CommitDigest;
use crate::document::{DocumentSerializer, Value};
use crate::error::{self, TransactError};
use crate::execution_stats::ExecutionStats;
use crate::pool::PooledSession;
use crate::results::ResultCursor;
use crate::statement::{Statement, StatementBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Open,
    Committed,
    Aborted,
}

/// Everything one transaction attempt owns. Shared (behind a mutex) between
/// the executor, the [`Transaction`] handles given to user code and any
/// [`ResultCursor`]s they create. The mutex also serializes statements, so
/// they reach the service in the order they were issued.
pub(crate) struct AttemptState {
    pub(crate) id: TransactionId,
    session: Option<PooledSession>,
    status: TransactionStatus,
    digest: CommitDigest,
    statements: usize,
    execution_stats: ExecutionStats,
}

impl AttemptState {
    pub(crate) fn is_open(&self) -> bool {
        self.status == TransactionStatus::Open
    }

    /// Fetches a further page of a statement's results. Only valid while the
    /// transaction is open.
    pub(crate) async fn fetch_page<E>(
        &mut self,
        next_page_token: &str,
    ) -> Result<FetchPageResult, TransactError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.is_open() {
            return Err(TransactError::CursorClosed);
        }
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| error::illegal_state("open transaction without a session"))?;

        let fetched = session
            .fetch_page(&self.id, next_page_token)
            .await
            .map_err(error::service_err)?;
        self.execution_stats.accumulate(&fetched);
        Ok(fetched)
    }
}

impl Drop for AttemptState {
    // Reached with an open transaction only if the attempt was abandoned,
    // e.g. the `transact` future was dropped mid-flight. Abort it so the
    // session can go back to the pool clean.
    fn drop(&mut self) {
        if self.status != TransactionStatus::Open {
            return;
        }
        let mut session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let id = self.id.clone();
                debug!(id = &id[..], "transaction abandoned, aborting");
                handle.spawn(async move {
                    if let Err(e) = session.abort_transaction().await {
                        debug!(error = %e, id = &id[..], "failed to abort abandoned transaction");
                        session.notify_invalid();
                    }
                });
            }
            Err(_) => {
                debug!(id = &self.id[..], "transaction abandoned outside a runtime, discarding session");
                session.notify_invalid();
            }
        }
    }
}

/// A handle to an open transaction, given to the unit of work passed to
/// [`LedgerDriver::transact`](crate::LedgerDriver::transact).
///
/// The ledger uses optimistic concurrency control. Transactions are
/// speculative until committed (they may be rejected due to interference), so
/// anything read through this handle should be treated as tentative until
/// `transact` returns.
///
/// Handles are cheap to clone; all clones refer to the same attempt.
///
/// `E` represents any custom error variant the user may throw.
pub struct Transaction<E = Infallible> {
    /// The id of this transaction attempt. If the attempt is retried, the new
    /// attempt gets a new id.
    id: TransactionId,
    state: Arc<Mutex<AttemptState>>,
    serializer: Arc<dyn DocumentSerializer>,
    err: PhantomData<fn() -> E>,
}

impl<E> Clone for Transaction<E> {
    fn clone(&self) -> Self {
        Transaction {
            id: self.id.clone(),
            state: self.state.clone(),
            serializer: self.serializer.clone(),
            err: PhantomData,
        }
    }
}

impl<E> Transaction<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn statement<S>(&self, partiql: S) -> StatementBuilder<'_, E>
    where
        S: Into<String>,
    {
        StatementBuilder::new(self, partiql.into())
    }

    /// Send a statement without any parameters. For example, this could be used
    /// to create a table where the name is already sanitized.
    pub async fn execute_statement<S>(
        &self,
        partiql: S,
    ) -> Result<ResultCursor<Value, E>, TransactError<E>>
    where
        S: Into<String>,
    {
        self.statement(partiql).execute().await
    }

    /// Executes a bound statement, yielding raw document trees.
    pub async fn execute(
        &self,
        statement: Statement,
    ) -> Result<ResultCursor<Value, E>, TransactError<E>> {
        self.query(statement).await
    }

    /// Executes a bound statement, mapping each resulting document onto `T`.
    pub async fn query<T>(&self, statement: Statement) -> Result<ResultCursor<T, E>, TransactError<E>>
    where
        T: DeserializeOwned,
    {
        let parameters = statement
            .params()
            .iter()
            .map(|value| self.serializer.serialize(value))
            .collect::<Result<Vec<_>, _>>()
            .map_err(error::mapping_err)?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !state.is_open() {
            return Err(error::illegal_state(format!(
                "transaction {} is {:?}, statements can only be executed while it is open",
                state.id, state.status
            )));
        }
        let session = state
            .session
            .as_deref_mut()
            .ok_or_else(|| error::illegal_state("open transaction without a session"))?;

        let result = session
            .execute_statement(&state.id, statement.partiql(), &parameters)
            .await
            .map_err(error::service_err)?;

        state.digest.fold_statement(statement.partiql(), &parameters);
        state.statements += 1;
        state.execution_stats.accumulate(&result);
        drop(guard);

        Ok(ResultCursor::new(
            self.state.clone(),
            self.serializer.clone(),
            result,
        ))
    }

    /// Asks the driver to abort this transaction instead of committing it.
    /// Return the result from your unit of work; the driver will not retry.
    ///
    /// ```no_run
    /// # use ledger_driver_core::{Transaction, TransactError};
    /// # async fn example(tx: Transaction) -> Result<u32, TransactError> {
    /// if 1 > 2 {
    ///     return tx.abort();
    /// }
    /// # Ok(1)
    /// # }
    /// ```
    pub fn abort<R>(&self) -> Result<R, TransactError<E>> {
        debug!(id = &self.id[..], "user code requested abort");
        Err(TransactError::Aborted)
    }

    pub async fn status(&self) -> TransactionStatus {
        self.state.lock().await.status
    }

    /// Number of statements successfully executed so far.
    pub async fn statement_count(&self) -> usize {
        self.state.lock().await.statements
    }

    /// Accumulates stats for this transaction attempt. Repeated calls of this
    /// method may return different results if additional API calls were made.
    /// The stats include the timing and IO usage for the start and commit
    /// calls too.
    pub async fn execution_stats(&self) -> ExecutionStats {
        self.state.lock().await.execution_stats
    }
}

/// The executor's side of an attempt: starts the transaction and finishes it
/// by committing or aborting. Finishing releases the session to the pool.
pub(crate) struct TransactionAttempt<E> {
    transaction: Transaction<E>,
}

impl<E> TransactionAttempt<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub(crate) async fn start(
        mut session: PooledSession,
        serializer: Arc<dyn DocumentSerializer>,
    ) -> Result<TransactionAttempt<E>, TransactError<E>> {
        let start_result = session
            .start_transaction()
            .await
            .map_err(error::service_err)?;

        let mut execution_stats = ExecutionStats::default();
        execution_stats.accumulate(&start_result);

        let id = start_result.transaction_id;
        if id.is_empty() {
            return Err(error::service_err(error::malformed_response(
                "StartTransaction did not return a transaction_id",
            )));
        }
        debug!(id = &id[..], session = &session.token()[..], "started transaction");

        let state = AttemptState {
            id: id.clone(),
            session: Some(session),
            status: TransactionStatus::Open,
            digest: CommitDigest::new(&id),
            statements: 0,
            execution_stats,
        };

        Ok(TransactionAttempt {
            transaction: Transaction {
                id,
                state: Arc::new(Mutex::new(state)),
                serializer,
                err: PhantomData,
            },
        })
    }

    pub(crate) fn transaction(&self) -> Transaction<E> {
        self.transaction.clone()
    }

    pub(crate) fn id(&self) -> &str {
        self.transaction.id()
    }

    /// Commits the attempt. If the commit fails the transaction is aborted
    /// before the error is returned; the caller decides whether to retry.
    pub(crate) async fn commit(self) -> Result<ExecutionStats, TransactError<E>> {
        debug!(id = self.id(), "transaction will be committed");
        let mut guard = self.transaction.state.lock().await;
        let state = &mut *guard;
        if !state.is_open() {
            return Err(error::illegal_state(format!(
                "transaction {} is {:?} and cannot be committed",
                state.id, state.status
            )));
        }
        let session = state
            .session
            .as_deref_mut()
            .ok_or_else(|| error::illegal_state("open transaction without a session"))?;

        let result = session
            .commit_transaction(&state.id, state.digest.bytes())
            .await;

        match result {
            Ok(committed) => {
                state.execution_stats.accumulate(&committed);
                state.status = TransactionStatus::Committed;
                state.session = None;
                debug!(
                    id = &state.id[..],
                    statements = state.statements,
                    "transaction committed"
                );
                Ok(state.execution_stats)
            }
            Err(e) => {
                drop(guard);
                self.abort().await;
                Err(error::service_err(e))
            }
        }
    }

    /// Aborts the attempt. Abort failures are logged and the session is
    /// discarded rather than returned to the pool.
    pub(crate) async fn abort(self) {
        debug!(id = self.id(), "transaction will be aborted");
        let mut guard = self.transaction.state.lock().await;
        let state = &mut *guard;
        if !state.is_open() {
            return;
        }

        let result = match state.session.as_deref_mut() {
            Some(session) => session.abort_transaction().await,
            None => return,
        };
        state.status = TransactionStatus::Aborted;

        match result {
            Ok(aborted) => state.execution_stats.accumulate(&aborted),
            Err(e) => {
                debug!(error = %e, id = &state.id[..], "ignoring failure to abort tx");
                if let Some(session) = state.session.as_deref_mut() {
                    session.notify_invalid();
                }
            }
        }
        state.session = None;
    }
}
