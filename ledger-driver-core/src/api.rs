use async_trait::async_trait;
use bytes::Bytes;

use crate::document::Document;
use crate::error::ServiceResult;
use crate::execution_stats::{IoUsage, TimingInformation};

pub type SessionToken = String;
pub type TransactionId = String;

/// A page of documents. If `next_page_token` is set, more results can be
/// fetched with [`LedgerService::fetch_page`] while the transaction is open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub values: Vec<Document>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartTransactionResult {
    pub transaction_id: TransactionId,
    pub timing_information: TimingInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteStatementResult {
    pub first_page: Page,
    pub timing_information: TimingInformation,
    pub consumed_ios: IoUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchPageResult {
    pub page: Page,
    pub timing_information: TimingInformation,
    pub consumed_ios: IoUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitTransactionResult {
    pub transaction_id: TransactionId,
    pub commit_digest: Bytes,
    pub timing_information: TimingInformation,
    pub consumed_ios: IoUsage,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbortTransactionResult {
    pub timing_information: TimingInformation,
}

/// An abstraction over the ledger's session API, for the driver to use. It is
/// not expected that end-users call this trait. Rather, they should use the
/// abstractions provided by the [`LedgerDriver`](crate::LedgerDriver).
///
/// Implementations own the wire protocol, authentication and endpoint
/// selection; the driver hands them an already-configured instance. The
/// session API has the notion of commands that are sent back and forth, one
/// command per request:
///
/// * sessions are opened with `start_session` and closed with `end_session`;
/// * a session has at most one open transaction, started with
///   `start_transaction` and finished with `commit_transaction` or
///   `abort_transaction`;
/// * statements run inside the open transaction; large results are paged.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn start_session(&self, ledger_name: &str) -> ServiceResult<SessionToken>;

    async fn start_transaction(
        &self,
        session_token: &SessionToken,
    ) -> ServiceResult<StartTransactionResult>;

    async fn execute_statement(
        &self,
        session_token: &SessionToken,
        transaction_id: &TransactionId,
        statement: &str,
        parameters: &[Document],
    ) -> ServiceResult<ExecuteStatementResult>;

    async fn fetch_page(
        &self,
        session_token: &SessionToken,
        transaction_id: &TransactionId,
        next_page_token: &str,
    ) -> ServiceResult<FetchPageResult>;

    async fn commit_transaction(
        &self,
        session_token: &SessionToken,
        transaction_id: &TransactionId,
        commit_digest: Bytes,
    ) -> ServiceResult<CommitTransactionResult>;

    async fn abort_transaction(
        &self,
        session_token: &SessionToken,
    ) -> ServiceResult<AbortTransactionResult>;

    async fn end_session(&self, session_token: &SessionToken) -> ServiceResult<()>;
}
