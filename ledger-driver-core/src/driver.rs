use bb8::Pool;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

use crate::api::LedgerService;
use crate::document::{DocumentSerializer, JsonSerializer};
use crate::error::{self, BuilderError, TransactError};
use crate::pool::{LoggingErrorSink, PoolState, SessionManager, SessionPool};
use crate::retry::{self, default_retry_policy, TransactionRetryPolicy};
use crate::transaction::{Transaction, TransactionAttempt};

const MAX_REAPER_RATE: Duration = Duration::from_secs(30);

/// A builder to help you customize a [`LedgerDriver`].
///
/// `ledger_name` _must_ be set, else the build methods return an `Err`.
/// Everything else has a default:
///
/// * `max_sessions`: 1500
/// * `session_acquire_timeout`: 10 seconds
/// * `session_idle_timeout`: none (idle sessions are kept)
/// * `transaction_retry_policy`: [`default_retry_policy`]
/// * `serializer`: [`JsonSerializer`]
pub struct LedgerDriverBuilder {
    ledger_name: Option<String>,
    transaction_retry_policy: Box<dyn TransactionRetryPolicy + Send + Sync>,
    max_concurrent_transactions: u32,
    session_acquire_timeout: Duration,
    session_idle_timeout: Option<Duration>,
    serializer: Arc<dyn DocumentSerializer>,
}

impl Default for LedgerDriverBuilder {
    fn default() -> Self {
        LedgerDriverBuilder {
            ledger_name: None,
            transaction_retry_policy: Box::new(default_retry_policy()),
            max_concurrent_transactions: 1500,
            session_acquire_timeout: Duration::from_secs(10),
            session_idle_timeout: None,
            serializer: Arc::new(JsonSerializer),
        }
    }
}

impl LedgerDriverBuilder {
    pub fn new() -> Self {
        LedgerDriverBuilder::default()
    }

    pub fn ledger_name<S>(mut self, ledger_name: S) -> Self
    where
        S: Into<String>,
    {
        self.ledger_name = Some(ledger_name.into());
        self
    }

    pub fn transaction_retry_policy<P>(mut self, transaction_retry_policy: P) -> Self
    where
        P: TransactionRetryPolicy + Send + Sync + 'static,
    {
        self.transaction_retry_policy = Box::new(transaction_retry_policy);
        self
    }

    /// The maximum number of sessions, and thus concurrent transactions.
    pub fn max_sessions(mut self, max_sessions: u32) -> Self {
        self.max_concurrent_transactions = max_sessions;
        self
    }

    /// How long `transact` waits for a session before failing with
    /// [`TransactError::PoolExhausted`].
    pub fn session_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.session_acquire_timeout = timeout;
        self
    }

    /// Sessions idle for longer than this are ended and removed from the
    /// pool. The pool checks at least this often (and at least every 30s).
    pub fn session_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    pub fn serializer<S>(mut self, serializer: S) -> Self
    where
        S: DocumentSerializer + 'static,
    {
        self.serializer = Arc::new(serializer);
        self
    }

    pub async fn build_with_service<S>(self, service: S) -> Result<LedgerDriver, BuilderError>
    where
        S: LedgerService + 'static,
    {
        self.build_with_shared_service(Arc::new(service)).await
    }

    pub async fn build_with_shared_service(
        self,
        service: Arc<dyn LedgerService>,
    ) -> Result<LedgerDriver, BuilderError> {
        let ledger_name = self
            .ledger_name
            .ok_or_else(|| error::usage_error("ledger_name must be initialized"))?;

        if self.max_concurrent_transactions == 0 {
            return Err(error::usage_error("max_sessions must be at least 1"));
        }
        if self.session_acquire_timeout == Duration::from_secs(0) {
            return Err(error::usage_error(
                "session_acquire_timeout must be greater than zero",
            ));
        }

        if self.session_idle_timeout == Some(Duration::from_secs(0)) {
            return Err(error::usage_error(
                "session_idle_timeout must be greater than zero",
            ));
        }
        let reaper_rate = self
            .session_idle_timeout
            .map_or(MAX_REAPER_RATE, |idle| idle.min(MAX_REAPER_RATE));

        let closed = Arc::new(AtomicBool::new(false));
        let pool = Pool::builder()
            .test_on_check_out(false)
            .max_lifetime(None)
            .idle_timeout(self.session_idle_timeout)
            .reaper_rate(reaper_rate)
            .max_size(self.max_concurrent_transactions)
            .connection_timeout(self.session_acquire_timeout)
            .error_sink(Box::new(LoggingErrorSink::new()))
            .build(SessionManager::new(service, ledger_name.clone(), closed.clone()))
            .await
            .map_err(error::build_err)?;

        Ok(LedgerDriver {
            ledger_name: Arc::new(ledger_name),
            session_pool: SessionPool::new(pool, self.session_acquire_timeout),
            transaction_retry_policy: Arc::new(Mutex::new(self.transaction_retry_policy)),
            serializer: self.serializer,
            closed,
        })
    }
}

/// The entry point for working with a ledger: owns the session pool and runs
/// transactions against it.
///
/// ## Concurrency
///
/// End users of the driver should call `clone` and drive concurrency off the
/// clones. Under the hood, no actual copy is made. The driver will pool
/// sessions across clones.
///
/// Each transaction attempt has a session to itself; attempts started from
/// different clones (or tasks) run concurrently on different sessions. Retry
/// policies are shared across clones behind a mutex, so a policy sees every
/// failure.
///
/// ## Lifecycle
///
/// A driver is built explicitly with [`LedgerDriverBuilder`] and torn down
/// with [`LedgerDriver::shutdown`], which ends the pooled sessions.
#[derive(Clone)]
pub struct LedgerDriver {
    ledger_name: Arc<String>,
    session_pool: SessionPool,
    transaction_retry_policy: Arc<Mutex<Box<dyn TransactionRetryPolicy + Send + Sync>>>,
    serializer: Arc<dyn DocumentSerializer>,
    closed: Arc<AtomicBool>,
}

impl LedgerDriver {
    pub fn ledger_name(&self) -> String {
        (*self.ledger_name).clone()
    }

    pub fn pool_state(&self) -> PoolState {
        self.session_pool.state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Execute a transaction against the ledger, retrying as necessary.
    ///
    /// This function is the primary way you should interact with the ledger.
    /// The driver will acquire a session and open a [`Transaction`], handing
    /// it to your code (the closure you pass in). When your code returns
    /// `Ok`, the driver commits the transaction and hands you the value.
    ///
    /// While executing the transaction, failures may occur. Conflicts with
    /// other transactions and transient service errors are retried: the
    /// driver aborts, acquires a new transaction and runs your code again.
    /// This means your code *must be idempotent*. Effects inside the
    /// transaction are rolled back on abort; effects outside it are not.
    ///
    /// If you wish to get results out of your transaction, you must return them
    /// from your closure. Result cursors cannot be read once the transaction
    /// has committed, so [`materialize`](crate::ResultCursor::materialize)
    /// them first.
    ///
    /// Note that the `transaction` argument is `Fn` not `FnOnce` or `FnMut`.
    /// This is to support retries (of the entire transaction) and ensure that
    /// your function cannot mutate the environment it captures.
    pub async fn transact<F, Fut, R, E>(&self, transaction: F) -> Result<R, TransactError<E>>
    where
        F: Fn(Transaction<E>) -> Fut,
        Fut: Future<Output = Result<R, TransactError<E>>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut attempt_number = 0u32;

        loop {
            attempt_number += 1;

            if self.is_closed() {
                return Err(TransactError::DriverClosed);
            }

            // One full attempt: acquire, start, run user code, commit. When
            // this future completes, one of the following happened:
            //
            // 1. The attempt committed. The user gets their data and we're
            // done.
            //
            // 2. The user code returned an `Err` (including `tx.abort()`), or
            // something outside the service went wrong (e.g. mapping or the
            // pool). The attempt was aborted and the error goes back to the
            // user unchanged.
            //
            // 3. A service error occurred. Whether to retry is up to the
            // policy.
            let service_err = match self.attempt(&transaction).await {
                Ok(user_data) => return Ok(user_data),
                Err(TransactError::Service { source }) => source,
                Err(other) => return Err(other),
            };

            let retry_ins = {
                let policy = self.transaction_retry_policy.lock().await;
                policy.on_err(&service_err, attempt_number)
            };

            if retry_ins.should_retry {
                debug!(
                    error = %service_err,
                    attempt_number, "transaction failed, will retry"
                );
                if let Some(duration) = retry_ins.delay {
                    debug!(
                        delay = duration.as_millis().to_string().as_str(),
                        "Retry will be delayed"
                    );
                    sleep(duration).await;
                }
            } else if retry::is_retriable(&service_err) {
                debug!(
                    "Not retrying after {} attempts due to error: {}",
                    attempt_number, service_err
                );

                return Err(TransactError::RetriesExhausted {
                    last_err: service_err,
                    attempts: attempt_number,
                });
            } else {
                return Err(error::service_err(service_err));
            }

            // Here we retry. We're in a loop, remember!
        }
    }

    async fn attempt<F, Fut, R, E>(&self, transaction: &F) -> Result<R, TransactError<E>>
    where
        F: Fn(Transaction<E>) -> Fut,
        Fut: Future<Output = Result<R, TransactError<E>>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let session = self.session_pool.acquire().await?;
        let attempt = TransactionAttempt::start(session, self.serializer.clone()).await?;

        match transaction(attempt.transaction()).await {
            Ok(user_data) => {
                attempt.commit().await?;
                Ok(user_data)
            }
            Err(e) => {
                debug!(error = %e, id = attempt.id(), "transaction failed with error");
                attempt.abort().await;
                Err(e)
            }
        }
    }

    /// Closes the driver. Idle sessions are ended right away; sessions in use
    /// by in-flight transactions are ended when those finish. Any later
    /// call to [`transact`](LedgerDriver::transact), on this or any clone,
    /// fails with [`TransactError::DriverClosed`].
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let ended = self.session_pool.drain().await;
        debug!(
            ledger = &self.ledger_name[..],
            sessions = ended,
            "driver shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;
    use std::convert::Infallible;
    use tokio::spawn;

    #[tokio::test]
    async fn ledger_name_is_required() {
        let result = LedgerDriverBuilder::new()
            .build_with_service(InMemoryLedger::new())
            .await;
        assert!(matches!(result, Err(BuilderError::UsageError(_))));
    }

    #[tokio::test]
    async fn zero_sessions_is_a_usage_error() {
        let result = LedgerDriverBuilder::new()
            .ledger_name("zero")
            .max_sessions(0)
            .build_with_service(InMemoryLedger::new())
            .await;
        assert!(matches!(result, Err(BuilderError::UsageError(_))));
    }

    #[tokio::test]
    async fn zero_idle_timeout_is_a_usage_error() {
        let result = LedgerDriverBuilder::new()
            .ledger_name("zero")
            .session_idle_timeout(Some(Duration::ZERO))
            .build_with_service(InMemoryLedger::new())
            .await;
        assert!(matches!(result, Err(BuilderError::UsageError(_))));
    }

    // This test shows how to clone the driver for use in a multi-threaded tokio
    // runtime.
    #[tokio::test(flavor = "multi_thread")]
    async fn multi_thread_example() -> Result<(), Box<dyn std::error::Error>> {
        let ledger = InMemoryLedger::new();
        let driver = LedgerDriverBuilder::new()
            .ledger_name("multi_thread_example")
            .build_with_service(ledger.clone())
            .await?;

        driver
            .transact(|tx: Transaction| async move {
                tx.execute_statement("CREATE TABLE Counter").await?;
                Ok(())
            })
            .await?;

        let fut_1 = spawn({
            let driver = driver.clone();
            async move {
                driver
                    .transact(|tx: Transaction| async move {
                        tx.statement("INSERT INTO Counter ?")
                            .param(serde_json::json!({"n": 1}))
                            .execute()
                            .await?;
                        Ok(())
                    })
                    .await
            }
        });

        let fut_2 = spawn({
            let driver = driver.clone();
            async move {
                driver
                    .transact(|tx: Transaction| async move {
                        tx.statement("INSERT INTO Counter ?")
                            .param(serde_json::json!({"n": 2}))
                            .execute()
                            .await?;
                        Ok(())
                    })
                    .await
            }
        });

        fut_1.await??;
        fut_2.await??;

        assert_eq!(2, ledger.documents("Counter").len());

        Ok(())
    }

    // There are very few reasons to call abort as nearly all transactions
    // *should* go through a commit to ensure the returned data was not
    // concurrently modified.
    #[tokio::test]
    async fn abort_usage() -> Result<(), Box<dyn std::error::Error>> {
        let ledger = InMemoryLedger::new();
        let driver = LedgerDriverBuilder::new()
            .ledger_name("abort_usage")
            .build_with_service(ledger.clone())
            .await?;

        let result = driver
            .transact(|tx: Transaction<Infallible>| async move {
                tx.execute_statement("CREATE TABLE Scratch").await?;
                if 1 < 2 {
                    return tx.abort();
                }
                Ok(42)
            })
            .await;

        assert!(matches!(result, Err(TransactError::Aborted)));
        assert!(!ledger.has_table("Scratch"));

        Ok(())
    }
}
