use std::time::Duration;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error building the driver.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// Did not attempt to build a driver because the builder was incorrectly
    /// used, such as omitting a field.
    #[error("usage error: {0}")]
    UsageError(String),

    /// The builder was used correctly, but some configuration or environmental
    /// problem prevents the driver being built.
    #[error("unable to build driver: {source}")]
    BuildError {
        #[source]
        source: BoxError,
    },
}

pub(crate) fn build_err<E>(source: E) -> BuilderError
where
    E: std::error::Error + Send + Sync + 'static,
{
    BuilderError::BuildError {
        source: Box::new(source),
    }
}

pub(crate) fn usage_error<S>(message: S) -> BuilderError
where
    S: Into<String>,
{
    BuilderError::UsageError(message.into())
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failures reported by a [`LedgerService`](crate::api::LedgerService).
///
/// Whether a variant is worth retrying is decided by the
/// [`retry`](crate::retry) policy, not here.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Optimistic concurrency control rejected the commit (or a statement)
    /// because data the transaction touched was changed by another
    /// transaction.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    /// The session is no longer usable. The pool discards sessions that
    /// report this.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// The service is shedding load (rate, capacity or limit exceeded).
    #[error("throttled: {0}")]
    Throttled(String),

    /// The request was rejected, e.g. a malformed statement or a missing
    /// table. Sending it again will not help.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request could not be delivered or the response never arrived.
    // The underlying error is erased to discourage handling in user code.
    #[error("communication failure")]
    Transport {
        #[source]
        source: BoxError,
    },

    /// The service responded, but not with what the protocol promises.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

pub fn transport_err<E>(source: E) -> ServiceError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ServiceError::Transport {
        source: Box::new(source),
    }
}

pub(crate) fn malformed_response<S>(message: S) -> ServiceError
where
    S: Into<String>,
{
    ServiceError::MalformedResponse(message.into())
}

/// Converting between documents and Rust values failed.
#[derive(Debug, Error)]
pub enum MappingError {
    /// A required field was absent or held a value of the wrong kind.
    #[error("unable to map document: {0}")]
    Serde(#[from] serde_json::Error),

    /// The document bytes could not be decoded (or encoded) by the
    /// configured serializer.
    #[error("malformed document: {0}")]
    Document(String),
}

/// Returned by [`Statement::bind`](crate::statement::Statement::bind) when
/// the template and the arguments disagree.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("statement has {expected} placeholder(s) but {actual} argument(s) were bound")]
pub struct ArgumentMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Represents a failure in a call to
/// [`LedgerDriver::transact`](crate::LedgerDriver::transact). Failures could
/// be due to user code (e.g. mapping a document into a local type), or from
/// interacting with the ledger service.
///
/// `E` is any custom error the unit of work may return.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransactError<E = std::convert::Infallible>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Any error thrown by user code. The driver does not retry these.
    // This is the only variant that uses the From infrastructure to keep
    // user-code pleasant to write.
    #[error("{0}")]
    User(#[from] E),

    /// No session became idle, and none could be opened, within the
    /// configured acquire timeout.
    #[error("no session became available within {timeout:?}")]
    PoolExhausted { timeout: Duration },

    #[error("statement has {expected} placeholder(s) but {actual} argument(s) were bound")]
    ArgumentMismatch { expected: usize, actual: usize },

    #[error("{source}")]
    Mapping {
        #[source]
        source: MappingError,
    },

    /// A result cursor was used after it was exhausted, or after the
    /// transaction that produced it committed or aborted.
    #[error("cursor is closed")]
    CursorClosed,

    /// A ledger command failed. See [`retry`](crate::retry) for the policy on
    /// how these are handled.
    #[error("{source}")]
    Service {
        #[source]
        source: ServiceError,
    },

    #[error("transaction was aborted by user code")]
    Aborted,

    #[error("transaction failed after {attempts} attempts, last error: {last_err}")]
    RetriesExhausted { last_err: ServiceError, attempts: u32 },

    #[error("driver has been shut down")]
    DriverClosed,

    /// This variant is used in place of a panic. It represents a codepath
    /// that should not be taken. Panicing in libraries is bad!
    #[error("illegal state: {0}")]
    IllegalState(String),
}

impl<E> TransactError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The service error behind this failure, if any. For
    /// [`TransactError::RetriesExhausted`] this is the last error seen.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            TransactError::Service { source } => Some(source),
            TransactError::RetriesExhausted { last_err, .. } => Some(last_err),
            _ => None,
        }
    }
}

// `From` cannot be used for the variants below: it would overlap with
// `From<E>` when `E` is one of these types.

pub(crate) fn service_err<E>(source: ServiceError) -> TransactError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    TransactError::Service { source }
}

pub(crate) fn mapping_err<E>(source: MappingError) -> TransactError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    TransactError::Mapping { source }
}

pub(crate) fn argument_mismatch<E>(mismatch: ArgumentMismatch) -> TransactError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    TransactError::ArgumentMismatch {
        expected: mismatch.expected,
        actual: mismatch.actual,
    }
}

pub(crate) fn illegal_state<E, S>(message: S) -> TransactError<E>
where
    E: std::error::Error + Send + Sync + 'static,
    S: Into<String>,
{
    TransactError::IllegalState(message.into())
}
