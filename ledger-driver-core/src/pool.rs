use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bb8::{ErrorSink, ManageConnection, Pool, PooledConnection, RunError};
use bytes::Bytes;
use tracing::debug;

use crate::api::{
    AbortTransactionResult, CommitTransactionResult, ExecuteStatementResult, FetchPageResult,
    LedgerService, SessionToken, StartTransactionResult, TransactionId,
};
use crate::document::Document;
use crate::error::{self, ServiceError, ServiceResult, TransactError};

/// A session checked out of the pool. Dropping it releases the session back
/// to the pool (or destroys it, if it was marked invalid).
pub type PooledSession = PooledConnection<'static, SessionManager>;

#[derive(Debug, Copy, Clone)]
pub struct LoggingErrorSink;

impl LoggingErrorSink {
    pub fn new() -> LoggingErrorSink {
        LoggingErrorSink {}
    }
}

impl Default for LoggingErrorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorSink<ServiceError> for LoggingErrorSink {
    fn sink(&self, error: ServiceError) {
        debug!(error = %error, "error in session pool");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<ServiceError>> {
        Box::new(*self)
    }
}

pub struct SessionManager {
    service: Arc<dyn LedgerService>,
    ledger_name: String,
    closed: Arc<AtomicBool>,
}

impl SessionManager {
    pub(crate) fn new(
        service: Arc<dyn LedgerService>,
        ledger_name: impl Into<String>,
        closed: Arc<AtomicBool>,
    ) -> SessionManager {
        SessionManager {
            service,
            ledger_name: ledger_name.into(),
            closed,
        }
    }
}

/// One logical connection slot to the ledger. A session is identified by an
/// opaque token handed out by the service and can have at most one open
/// transaction.
///
/// [`notify_invalid`](Session::notify_invalid) should be called if a response
/// ever indicates the session is broken; the pool then destroys the session
/// instead of handing it out again.
///
/// A session is ended on the service when it is destroyed, whether by
/// shutdown, the idle reaper or after being marked invalid. Sessions the
/// service already reported as invalid are not ended.
pub struct Session {
    service: Arc<dyn LedgerService>,
    token: SessionToken,
    created_at: Instant,
    last_used: Instant,
    discard: bool,
    ended: bool,
}

impl Session {
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn notify_invalid(&mut self) {
        self.discard = true;
    }

    pub fn is_invalid(&self) -> bool {
        self.discard
    }

    fn observe<T>(&mut self, result: ServiceResult<T>) -> ServiceResult<T> {
        self.last_used = Instant::now();
        if let Err(ServiceError::InvalidSession(_)) = result {
            debug!(session = &self.token[..], "session reported invalid, discarding");
            self.discard = true;
            self.ended = true;
        }
        result
    }

    pub(crate) async fn start_transaction(&mut self) -> ServiceResult<StartTransactionResult> {
        let result = self.service.start_transaction(&self.token).await;
        self.observe(result)
    }

    pub(crate) async fn execute_statement(
        &mut self,
        transaction_id: &TransactionId,
        statement: &str,
        parameters: &[Document],
    ) -> ServiceResult<ExecuteStatementResult> {
        debug!(
            session = &self.token[..],
            transaction = &transaction_id[..],
            statement,
            parameters = parameters.len(),
            "execute_statement"
        );
        let result = self
            .service
            .execute_statement(&self.token, transaction_id, statement, parameters)
            .await;
        self.observe(result)
    }

    pub(crate) async fn fetch_page(
        &mut self,
        transaction_id: &TransactionId,
        next_page_token: &str,
    ) -> ServiceResult<FetchPageResult> {
        debug!(
            session = &self.token[..],
            transaction = &transaction_id[..],
            "fetch_page"
        );
        let result = self
            .service
            .fetch_page(&self.token, transaction_id, next_page_token)
            .await;
        self.observe(result)
    }

    /// Commits and validates the response: the service must echo back the
    /// transaction id and the digest we sent.
    pub(crate) async fn commit_transaction(
        &mut self,
        transaction_id: &TransactionId,
        commit_digest: Bytes,
    ) -> ServiceResult<CommitTransactionResult> {
        let result = self
            .service
            .commit_transaction(&self.token, transaction_id, commit_digest.clone())
            .await;
        let committed = self.observe(result)?;

        if &committed.transaction_id != transaction_id {
            return Err(error::malformed_response(format!(
                "committed transaction {} but the service responded with {}",
                transaction_id, committed.transaction_id
            )));
        }

        if committed.commit_digest != commit_digest {
            return Err(error::malformed_response(format!(
                "the commit digest we sent ({:?}) did not match the one returned ({:?})",
                commit_digest, committed.commit_digest
            )));
        }

        Ok(committed)
    }

    pub(crate) async fn abort_transaction(&mut self) -> ServiceResult<AbortTransactionResult> {
        let result = self.service.abort_transaction(&self.token).await;
        self.observe(result)
    }

    /// Ends the session on the service side. The session is discarded either
    /// way.
    pub(crate) async fn end(&mut self) {
        if let Err(e) = self.service.end_session(&self.token).await {
            debug!(error = %e, session = &self.token[..], "ignoring failure to end session");
        }
        self.discard = true;
        self.ended = true;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.ended {
            return;
        }

        let service = self.service.clone();
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(session = &token[..], "session destroyed, ending it");
                handle.spawn(async move {
                    if let Err(e) = service.end_session(&token).await {
                        debug!(error = %e, session = &token[..], "ignoring failure to end session");
                    }
                });
            }
            Err(_) => {
                debug!(session = &token[..], "session destroyed outside a runtime, not ended");
            }
        }
    }
}

#[async_trait]
impl ManageConnection for SessionManager {
    type Connection = Session;
    type Error = ServiceError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let token = self.service.start_session(&self.ledger_name).await?;
        debug!(session = &token[..], ledger = &self.ledger_name[..], "started session");
        let now = Instant::now();
        Ok(Session {
            service: self.service.clone(),
            token,
            created_at: now,
            last_used: now,
            discard: false,
            ended: false,
        })
    }

    async fn is_valid(&self, _conn: &mut Self::Connection) -> Result<(), Self::Error> {
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.discard || self.closed.load(Ordering::SeqCst)
    }
}

/// Observed pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub sessions: u32,
    pub idle_sessions: u32,
}

/// The bounded set of sessions shared by every clone of a driver.
///
/// bb8 does the bookkeeping: it hands out idle sessions, opens new ones while
/// below `max_size` and parks callers until one is released. Access to the
/// idle set is serialized inside bb8.
#[derive(Clone)]
pub(crate) struct SessionPool {
    pool: Pool<SessionManager>,
    acquire_timeout: Duration,
}

impl SessionPool {
    pub(crate) fn new(pool: Pool<SessionManager>, acquire_timeout: Duration) -> SessionPool {
        SessionPool {
            pool,
            acquire_timeout,
        }
    }

    pub(crate) async fn acquire<E>(&self) -> Result<PooledSession, TransactError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self.pool.get_owned().await {
            Ok(session) => Ok(session),
            Err(RunError::TimedOut) => Err(TransactError::PoolExhausted {
                timeout: self.acquire_timeout,
            }),
            Err(RunError::User(e)) => Err(error::service_err(e)),
        }
    }

    pub(crate) fn state(&self) -> PoolState {
        let state = self.pool.state();
        PoolState {
            sessions: state.connections,
            idle_sessions: state.idle_connections,
        }
    }

    /// Ends every idle session. Sessions currently checked out are destroyed,
    /// and ended, when they are released (see [`SessionManager::has_broken`]),
    /// so the caller must flip the shared `closed` flag first.
    pub(crate) async fn drain(&self) -> usize {
        let mut ended = 0;
        while self.pool.state().idle_connections > 0 {
            match tokio::time::timeout(self.acquire_timeout, self.pool.get()).await {
                Ok(Ok(mut session)) => {
                    session.end().await;
                    ended += 1;
                }
                Ok(Err(e)) => {
                    debug!(error = ?e, "unable to check out session during shutdown");
                    break;
                }
                Err(_) => break,
            }
        }
        ended
    }
}
