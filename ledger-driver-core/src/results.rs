use std::collections::VecDeque;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::Stream;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::api::ExecuteStatementResult;
use crate::document::{self, Document, DocumentSerializer};
use crate::error::{self, TransactError};
use crate::execution_stats::{ExecutionStats, HasExecutionStats};
use crate::transaction::AttemptState;

/// The results of executing a statement.
///
/// A statement may return many pages of results. The cursor holds the current
/// page in memory and fetches the next one when it runs out, which is only
/// possible while the transaction that ran the statement is open. To use the
/// results after the transaction commits (e.g. to return them from
/// `transact`), [`materialize`](ResultCursor::materialize) them first.
///
/// The cursor is forward-only and single-pass. Calling `next` after it
/// returned `None`, or after its transaction finished, fails with
/// [`TransactError::CursorClosed`].
pub struct ResultCursor<T, E = Infallible> {
    attempt: Arc<Mutex<AttemptState>>,
    serializer: Arc<dyn DocumentSerializer>,
    buffered: VecDeque<Document>,
    next_page_token: Option<String>,
    exhausted: bool,
    execution_stats: ExecutionStats,
    marker: PhantomData<fn() -> (T, E)>,
}

impl<T, E> ResultCursor<T, E>
where
    T: DeserializeOwned,
    E: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn new(
        attempt: Arc<Mutex<AttemptState>>,
        serializer: Arc<dyn DocumentSerializer>,
        result: ExecuteStatementResult,
    ) -> ResultCursor<T, E> {
        let execution_stats = result.extract_owned();
        ResultCursor {
            attempt,
            serializer,
            buffered: result.first_page.values.into(),
            next_page_token: result.first_page.next_page_token,
            exhausted: false,
            execution_stats,
            marker: PhantomData,
        }
    }

    /// Server reported timing and IO usage, summed across the statement and
    /// every page fetched so far.
    pub fn execution_stats(&self) -> &ExecutionStats {
        &self.execution_stats
    }

    pub async fn next(&mut self) -> Result<Option<T>, TransactError<E>> {
        if self.exhausted {
            return Err(TransactError::CursorClosed);
        }

        let mut attempt = self.attempt.lock().await;
        if !attempt.is_open() {
            return Err(TransactError::CursorClosed);
        }

        loop {
            if let Some(document) = self.buffered.pop_front() {
                return decode(&*self.serializer, &document).map(Some);
            }

            let token = match self.next_page_token.take() {
                Some(token) => token,
                None => {
                    self.exhausted = true;
                    return Ok(None);
                }
            };

            let fetched = attempt.fetch_page(&token).await?;
            self.execution_stats.accumulate(&fetched);
            self.buffered.extend(fetched.page.values);
            self.next_page_token = fetched.page.next_page_token;
        }
    }

    /// Reads every remaining row into memory. Must be called before the
    /// transaction commits.
    pub async fn materialize(mut self) -> Result<Materialized<T>, TransactError<E>> {
        let mut values = vec![];
        while let Some(value) = self.next().await? {
            values.push(value);
        }

        Ok(Materialized {
            values,
            execution_stats: self.execution_stats,
        })
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T, TransactError<E>>> {
        futures::stream::try_unfold(self, |mut cursor| async move {
            let next = cursor.next().await?;
            Ok::<_, TransactError<E>>(next.map(|value| (value, cursor)))
        })
    }
}

fn decode<T, E>(
    serializer: &dyn DocumentSerializer,
    document: &Document,
) -> Result<T, TransactError<E>>
where
    T: DeserializeOwned,
    E: std::error::Error + Send + Sync + 'static,
{
    let value = serializer
        .deserialize(document)
        .map_err(error::mapping_err)?;
    document::from_value(value).map_err(error::mapping_err)
}

/// Results copied into memory. Unlike a [`ResultCursor`], these outlive the
/// transaction and can be iterated any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized<T> {
    values: Vec<T>,
    execution_stats: ExecutionStats,
}

impl<T> Materialized<T> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.values.iter()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    pub fn execution_stats(&self) -> &ExecutionStats {
        &self.execution_stats
    }

    pub fn into_vec(self) -> Vec<T> {
        self.values
    }
}

impl<T> IntoIterator for Materialized<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Materialized<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
