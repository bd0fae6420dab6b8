//! An in-memory [`LedgerService`].
//!
//! Useful for tests and demos: it speaks the same session protocol as a real
//! ledger (sessions, one open transaction per session, paged results, commit
//! digests, optimistic concurrency) but keeps everything in process memory.
//!
//! It is not a query engine. Only these statement shapes are understood:
//!
//! ```text
//! CREATE TABLE <table>
//! CREATE INDEX ON <table> (<field>)
//! INSERT INTO <table> [VALUE] ?
//! SELECT * FROM <table> [WHERE <field> = <operand>]
//! UPDATE <table> SET <field> = <operand> [WHERE <field> = <operand>]
//! DELETE FROM <table> [WHERE <field> = <operand>]
//! ```
//!
//! where `<operand>` is `?`, a `'string'`, a number, `true`, `false` or
//! `null`.
//!
//! Each transaction works on a snapshot of the tables taken when it started.
//! On commit, every table the transaction read or wrote must be unchanged
//! since that snapshot, otherwise the commit fails with
//! [`ServiceError::TransactionConflict`].
//!
//! Parameters and results are encoded with [`JsonSerializer`] unless
//! another serializer is given with [`InMemoryLedger::with_serializer`]; it
//! must match the one the driver was built with.
//!
//! Failures can be injected per command with [`InMemoryLedger::fail_next`],
//! and [`InMemoryLedger::command_count`] reports what the driver sent.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::api::{
    AbortTransactionResult, CommitTransactionResult, ExecuteStatementResult, FetchPageResult,
    LedgerService, Page, SessionToken, StartTransactionResult, TransactionId,
};
use crate::digest::CommitDigest;
use crate::document::{Document, DocumentSerializer, JsonSerializer, Value};
use crate::error::{ServiceError, ServiceResult};
use crate::execution_stats::{IoUsage, TimingInformation};
use crate::statement::placeholder_count;

const DEFAULT_PAGE_SIZE: usize = 200;

/// The commands of the session protocol, for fault injection and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {
    StartSession,
    StartTransaction,
    ExecuteStatement,
    FetchPage,
    CommitTransaction,
    AbortTransaction,
    EndSession,
}

/// An in-memory ledger. Clones share the same data, so a test can keep a
/// clone to inspect the ledger after handing one to a driver.
#[derive(Clone)]
pub struct InMemoryLedger {
    inner: Arc<Mutex<LedgerState>>,
}

#[derive(Debug, Clone, Default)]
struct Table {
    version: u64,
    indexes: BTreeSet<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone)]
struct Row {
    id: String,
    data: Value,
}

struct OpenTransaction {
    id: TransactionId,
    // Snapshot taken at start, with this transaction's own writes applied.
    tables: BTreeMap<String, Table>,
    // Every table read or written, with its version when the snapshot was
    // taken (`None` if it did not exist).
    base_versions: BTreeMap<String, Option<u64>>,
    writes: BTreeSet<String>,
    digest: CommitDigest,
    pages: HashMap<String, VecDeque<Document>>,
    pages_issued: u64,
}

struct LedgerState {
    page_size: usize,
    serializer: Arc<dyn DocumentSerializer>,
    tables: BTreeMap<String, Table>,
    sessions: HashMap<SessionToken, Option<OpenTransaction>>,
    injected: Vec<(Command, ServiceError)>,
    commands: HashMap<Command, usize>,
    next_id: u64,
}

impl LedgerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Counts the command and returns an injected failure, if one is queued.
    fn record(&mut self, command: Command) -> ServiceResult<()> {
        *self.commands.entry(command).or_insert(0) += 1;
        match self.injected.iter().position(|(c, _)| *c == command) {
            Some(i) => {
                let (_, error) = self.injected.remove(i);
                debug!(?command, error = %error, "injecting failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn transaction_mut(
        &mut self,
        session_token: &SessionToken,
        transaction_id: &TransactionId,
    ) -> ServiceResult<&mut OpenTransaction> {
        let slot = self
            .sessions
            .get_mut(session_token)
            .ok_or_else(|| unknown_session(session_token))?;
        match slot {
            Some(txn) if &txn.id == transaction_id => Ok(txn),
            _ => Err(ServiceError::BadRequest(format!(
                "transaction {} is not open on this session",
                transaction_id
            ))),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        InMemoryLedger::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> InMemoryLedger {
        InMemoryLedger {
            inner: Arc::new(Mutex::new(LedgerState {
                page_size: DEFAULT_PAGE_SIZE,
                serializer: Arc::new(JsonSerializer),
                tables: BTreeMap::new(),
                sessions: HashMap::new(),
                injected: vec![],
                commands: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Maximum number of documents per page of results.
    pub fn with_page_size(self, page_size: usize) -> InMemoryLedger {
        self.state().page_size = page_size.max(1);
        self
    }

    /// Encoding used for parameters and results.
    pub fn with_serializer<S>(self, serializer: S) -> InMemoryLedger
    where
        S: DocumentSerializer + 'static,
    {
        self.state().serializer = Arc::new(serializer);
        self
    }

    // No code panics while holding the lock, but if it ever did the data is
    // still consistent enough for a test double.
    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next `command` fails with `error` instead of running.
    pub fn fail_next(&self, command: Command, error: ServiceError) {
        self.state().injected.push((command, error));
    }

    pub fn command_count(&self, command: Command) -> usize {
        self.state().commands.get(&command).copied().unwrap_or(0)
    }

    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn open_transactions(&self) -> usize {
        self.state()
            .sessions
            .values()
            .filter(|slot| slot.is_some())
            .count()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state().tables.contains_key(table)
    }

    pub fn indexes(&self, table: &str) -> Vec<String> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.indexes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Committed documents of `table`, in insertion order.
    pub fn documents(&self, table: &str) -> Vec<Value> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.iter().map(|row| row.data.clone()).collect())
            .unwrap_or_default()
    }
}

fn unknown_session(session_token: &str) -> ServiceError {
    ServiceError::InvalidSession(format!("no such session: {}", session_token))
}

fn bad_request<S: Into<String>>(message: S) -> ServiceError {
    ServiceError::BadRequest(message.into())
}

fn timing() -> TimingInformation {
    TimingInformation {
        processing_time_milliseconds: 1,
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    async fn start_session(&self, ledger_name: &str) -> ServiceResult<SessionToken> {
        let mut state = self.state();
        state.record(Command::StartSession)?;
        let token = format!("session-{}-{}", ledger_name, state.next_id());
        state.sessions.insert(token.clone(), None);
        Ok(token)
    }

    async fn start_transaction(
        &self,
        session_token: &SessionToken,
    ) -> ServiceResult<StartTransactionResult> {
        let mut state = self.state();
        state.record(Command::StartTransaction)?;
        let id = format!("txn-{}", state.next_id());
        let snapshot = state.tables.clone();

        let slot = state
            .sessions
            .get_mut(session_token)
            .ok_or_else(|| unknown_session(session_token))?;
        if slot.is_some() {
            return Err(bad_request("session already has an open transaction"));
        }
        *slot = Some(OpenTransaction {
            id: id.clone(),
            tables: snapshot,
            base_versions: BTreeMap::new(),
            writes: BTreeSet::new(),
            digest: CommitDigest::new(&id),
            pages: HashMap::new(),
            pages_issued: 0,
        });

        Ok(StartTransactionResult {
            transaction_id: id,
            timing_information: timing(),
        })
    }

    async fn execute_statement(
        &self,
        session_token: &SessionToken,
        transaction_id: &TransactionId,
        statement: &str,
        parameters: &[Document],
    ) -> ServiceResult<ExecuteStatementResult> {
        let mut state = self.state();
        state.record(Command::ExecuteStatement)?;

        let expected = placeholder_count(statement);
        if expected != parameters.len() {
            return Err(bad_request(format!(
                "statement has {} placeholder(s) but {} parameter(s) were sent",
                expected,
                parameters.len()
            )));
        }
        let serializer = state.serializer.clone();
        let values = parameters
            .iter()
            .map(|p| serializer.deserialize(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| bad_request(e.to_string()))?;

        let parsed = parse(statement)?;
        let document_id = format!("doc-{}", state.next_id());
        let page_size = state.page_size;
        let txn = state.transaction_mut(session_token, transaction_id)?;

        let outcome = apply(txn, parsed, values, document_id)?;
        txn.digest.fold_statement(statement, parameters);

        let documents = outcome
            .documents
            .iter()
            .map(|value| serializer.serialize(value))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| bad_request(e.to_string()))?;

        Ok(ExecuteStatementResult {
            first_page: paginate(txn, documents.into(), page_size),
            timing_information: timing(),
            consumed_ios: IoUsage {
                read_ios: outcome.read as i64,
                write_ios: outcome.written as i64,
            },
        })
    }

    async fn fetch_page(
        &self,
        session_token: &SessionToken,
        transaction_id: &TransactionId,
        next_page_token: &str,
    ) -> ServiceResult<FetchPageResult> {
        let mut state = self.state();
        state.record(Command::FetchPage)?;
        let page_size = state.page_size;
        let txn = state.transaction_mut(session_token, transaction_id)?;

        let remaining = txn
            .pages
            .remove(next_page_token)
            .ok_or_else(|| bad_request(format!("unknown page token {}", next_page_token)))?;

        Ok(FetchPageResult {
            page: paginate(txn, remaining, page_size),
            timing_information: timing(),
            consumed_ios: IoUsage::default(),
        })
    }

    async fn commit_transaction(
        &self,
        session_token: &SessionToken,
        transaction_id: &TransactionId,
        commit_digest: Bytes,
    ) -> ServiceResult<CommitTransactionResult> {
        let mut state = self.state();
        state.record(Command::CommitTransaction)?;
        let txn = state.transaction_mut(session_token, transaction_id)?;
        let server_digest = txn.digest.bytes();
        if server_digest != commit_digest {
            return Err(bad_request(
                "commit digest does not match the statements executed",
            ));
        }

        // The transaction is over either way from here on.
        let txn = state
            .sessions
            .get_mut(session_token)
            .and_then(Option::take)
            .ok_or_else(|| unknown_session(session_token))?;

        for (table, base) in &txn.base_versions {
            let current = state.tables.get(table).map(|t| t.version);
            if current != *base {
                return Err(ServiceError::TransactionConflict(format!(
                    "{} was modified by another transaction",
                    table
                )));
            }
        }

        let OpenTransaction {
            id,
            mut tables,
            writes,
            ..
        } = txn;
        let mut written = 0;
        for name in writes {
            if let Some(mut table) = tables.remove(&name) {
                table.version = state.tables.get(&name).map_or(1, |t| t.version + 1);
                written += table.rows.len();
                state.tables.insert(name, table);
            }
        }
        debug!(id = &id[..], "committed");

        Ok(CommitTransactionResult {
            transaction_id: id,
            commit_digest: server_digest,
            timing_information: timing(),
            consumed_ios: IoUsage {
                read_ios: 0,
                write_ios: written as i64,
            },
        })
    }

    async fn abort_transaction(
        &self,
        session_token: &SessionToken,
    ) -> ServiceResult<AbortTransactionResult> {
        let mut state = self.state();
        state.record(Command::AbortTransaction)?;
        let slot = state
            .sessions
            .get_mut(session_token)
            .ok_or_else(|| unknown_session(session_token))?;
        *slot = None;
        Ok(AbortTransactionResult {
            timing_information: timing(),
        })
    }

    async fn end_session(&self, session_token: &SessionToken) -> ServiceResult<()> {
        let mut state = self.state();
        state.record(Command::EndSession)?;
        state
            .sessions
            .remove(session_token)
            .map(|_| ())
            .ok_or_else(|| unknown_session(session_token))
    }
}

/// Splits off the first page and parks the rest under a new token.
fn paginate(txn: &mut OpenTransaction, mut documents: VecDeque<Document>, page_size: usize) -> Page {
    let rest = if documents.len() > page_size {
        documents.split_off(page_size)
    } else {
        VecDeque::new()
    };

    let next_page_token = if rest.is_empty() {
        None
    } else {
        txn.pages_issued += 1;
        let token = format!("{}-page-{}", txn.id, txn.pages_issued);
        txn.pages.insert(token.clone(), rest);
        Some(token)
    };

    Page {
        values: documents.into(),
        next_page_token,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Param,
    Literal(Value),
}

type Filter = Option<(String, Operand)>;

#[derive(Debug, Clone, PartialEq)]
enum Parsed {
    CreateTable(String),
    CreateIndex {
        table: String,
        field: String,
    },
    Insert(String),
    Select {
        table: String,
        filter: Filter,
    },
    Update {
        table: String,
        field: String,
        value: Operand,
        filter: Filter,
    },
    Delete {
        table: String,
        filter: Filter,
    },
}

fn parse(statement: &str) -> ServiceResult<Parsed> {
    let spaced = statement.replace(|c: char| c == '(' || c == ')' || c == ',', " ");
    let raw: Vec<&str> = spaced.split_whitespace().collect();
    let upper: Vec<String> = raw.iter().map(|t| t.to_ascii_uppercase()).collect();
    let keywords: Vec<&str> = upper.iter().map(String::as_str).collect();

    let filter = |field: usize, operand: usize| -> ServiceResult<Filter> {
        Ok(Some((raw[field].to_string(), parse_operand(raw[operand])?)))
    };

    let parsed = match keywords.as_slice() {
        ["CREATE", "TABLE", _] => Parsed::CreateTable(raw[2].to_string()),
        ["CREATE", "INDEX", "ON", _, _] => Parsed::CreateIndex {
            table: raw[3].to_string(),
            field: raw[4].to_string(),
        },
        ["INSERT", "INTO", _, "?"] | ["INSERT", "INTO", _, "VALUE", "?"] => {
            Parsed::Insert(raw[2].to_string())
        }
        ["SELECT", "*", "FROM", _] => Parsed::Select {
            table: raw[3].to_string(),
            filter: None,
        },
        ["SELECT", "*", "FROM", _, "WHERE", _, "=", _] => Parsed::Select {
            table: raw[3].to_string(),
            filter: filter(5, 7)?,
        },
        ["UPDATE", _, "SET", _, "=", _] => Parsed::Update {
            table: raw[1].to_string(),
            field: raw[3].to_string(),
            value: parse_operand(raw[5])?,
            filter: None,
        },
        ["UPDATE", _, "SET", _, "=", _, "WHERE", _, "=", _] => Parsed::Update {
            table: raw[1].to_string(),
            field: raw[3].to_string(),
            value: parse_operand(raw[5])?,
            filter: filter(7, 9)?,
        },
        ["DELETE", "FROM", _] => Parsed::Delete {
            table: raw[2].to_string(),
            filter: None,
        },
        ["DELETE", "FROM", _, "WHERE", _, "=", _] => Parsed::Delete {
            table: raw[2].to_string(),
            filter: filter(4, 6)?,
        },
        _ => {
            return Err(bad_request(format!(
                "unsupported statement: {}",
                statement
            )))
        }
    };

    Ok(parsed)
}

fn parse_operand(token: &str) -> ServiceResult<Operand> {
    if token == "?" {
        return Ok(Operand::Param);
    }
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        let inner = &token[1..token.len() - 1];
        return Ok(Operand::Literal(Value::String(inner.replace("''", "'"))));
    }
    match token.to_ascii_lowercase().as_str() {
        "true" => return Ok(Operand::Literal(Value::Bool(true))),
        "false" => return Ok(Operand::Literal(Value::Bool(false))),
        "null" => return Ok(Operand::Literal(Value::Null)),
        _ => {}
    }
    if let Ok(n) = token.parse::<i64>() {
        return Ok(Operand::Literal(Value::from(n)));
    }
    if let Ok(f) = token.parse::<f64>() {
        return Ok(Operand::Literal(Value::from(f)));
    }
    Err(bad_request(format!("unsupported operand: {}", token)))
}

struct Outcome {
    documents: Vec<Value>,
    read: usize,
    written: usize,
}

fn apply(
    txn: &mut OpenTransaction,
    parsed: Parsed,
    params: Vec<Value>,
    document_id: String,
) -> ServiceResult<Outcome> {
    let mut params = params.into_iter();
    let mut resolve = |operand: Operand| -> ServiceResult<Value> {
        match operand {
            Operand::Param => params
                .next()
                .ok_or_else(|| bad_request("not enough parameters")),
            Operand::Literal(value) => Ok(value),
        }
    };

    match parsed {
        Parsed::CreateTable(name) => {
            if txn.tables.contains_key(&name) {
                return Err(bad_request(format!("table {} already exists", name)));
            }
            touch(txn, &name);
            txn.tables.insert(name.clone(), Table::default());
            txn.writes.insert(name.clone());
            Ok(Outcome {
                documents: vec![serde_json::json!({ "tableId": name })],
                read: 0,
                written: 0,
            })
        }
        Parsed::CreateIndex { table, field } => {
            let t = table_mut(txn, &table)?;
            t.indexes.insert(field);
            txn.writes.insert(table.clone());
            Ok(Outcome {
                documents: vec![serde_json::json!({ "tableId": table })],
                read: 0,
                written: 0,
            })
        }
        Parsed::Insert(table) => {
            let data = resolve(Operand::Param)?;
            if !data.is_object() {
                return Err(bad_request("only structs can be inserted"));
            }
            let t = table_mut(txn, &table)?;
            t.rows.push(Row {
                id: document_id.clone(),
                data,
            });
            txn.writes.insert(table);
            Ok(Outcome {
                documents: vec![serde_json::json!({ "documentId": document_id })],
                read: 0,
                written: 1,
            })
        }
        Parsed::Select { table, filter } => {
            let filter = resolve_filter(filter, &mut resolve)?;
            let t = table_mut(txn, &table)?;
            let documents: Vec<Value> = t
                .rows
                .iter()
                .filter(|row| row_matches(row, &filter))
                .map(|row| row.data.clone())
                .collect();
            Ok(Outcome {
                read: t.rows.len(),
                documents,
                written: 0,
            })
        }
        Parsed::Update {
            table,
            field,
            value,
            filter,
        } => {
            let value = resolve(value)?;
            let filter = resolve_filter(filter, &mut resolve)?;
            let t = table_mut(txn, &table)?;
            let read = t.rows.len();
            let mut documents = vec![];
            for row in t.rows.iter_mut().filter(|row| row_matches(row, &filter)) {
                if let Value::Object(fields) = &mut row.data {
                    fields.insert(field.clone(), value.clone());
                }
                documents.push(serde_json::json!({ "documentId": row.id }));
            }
            if !documents.is_empty() {
                txn.writes.insert(table);
            }
            Ok(Outcome {
                written: documents.len(),
                documents,
                read,
            })
        }
        Parsed::Delete { table, filter } => {
            let filter = resolve_filter(filter, &mut resolve)?;
            let t = table_mut(txn, &table)?;
            let read = t.rows.len();
            let mut documents = vec![];
            t.rows.retain(|row| {
                if row_matches(row, &filter) {
                    documents.push(serde_json::json!({ "documentId": row.id }));
                    false
                } else {
                    true
                }
            });
            if !documents.is_empty() {
                txn.writes.insert(table);
            }
            Ok(Outcome {
                written: documents.len(),
                documents,
                read,
            })
        }
    }
}

fn touch(txn: &mut OpenTransaction, table: &str) {
    let version = txn.tables.get(table).map(|t| t.version);
    txn.base_versions.entry(table.to_string()).or_insert(version);
}

fn table_mut<'t>(txn: &'t mut OpenTransaction, table: &str) -> ServiceResult<&'t mut Table> {
    touch(txn, table);
    txn.tables
        .get_mut(table)
        .ok_or_else(|| bad_request(format!("no such table: {}", table)))
}

fn resolve_filter<F>(filter: Filter, resolve: &mut F) -> ServiceResult<Option<(String, Value)>>
where
    F: FnMut(Operand) -> ServiceResult<Value>,
{
    match filter {
        Some((field, operand)) => Ok(Some((field, resolve(operand)?))),
        None => Ok(None),
    }
}

fn row_matches(row: &Row, filter: &Option<(String, Value)>) -> bool {
    match filter {
        Some((field, value)) => row.data.get(field) == Some(value),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        JsonSerializer.serialize(&value).unwrap()
    }

    #[test]
    fn parses_supported_shapes() {
        assert_eq!(
            Parsed::CreateIndex {
                table: "Person".into(),
                field: "firstName".into()
            },
            parse("CREATE INDEX ON Person(firstName)").unwrap()
        );
        assert_eq!(
            Parsed::Update {
                table: "Person".into(),
                field: "Age".into(),
                value: Operand::Param,
                filter: Some(("FirstName".into(), Operand::Literal(json!("John")))),
            },
            parse("update Person set Age = ? where FirstName = 'John'").unwrap()
        );
        assert!(matches!(
            parse("SELECT FirstName FROM Person"),
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn conflicting_commits() {
        let ledger = InMemoryLedger::new();
        let a = ledger.start_session("l").await.unwrap();
        let b = ledger.start_session("l").await.unwrap();

        // create the table first
        let tx = ledger.start_transaction(&a).await.unwrap().transaction_id;
        ledger
            .execute_statement(&a, &tx, "CREATE TABLE T", &[])
            .await
            .unwrap();
        let mut digest = CommitDigest::new(&tx);
        digest.fold_statement("CREATE TABLE T", &[]);
        ledger
            .commit_transaction(&a, &tx, digest.bytes())
            .await
            .unwrap();

        let tx_a = ledger.start_transaction(&a).await.unwrap().transaction_id;
        let tx_b = ledger.start_transaction(&b).await.unwrap().transaction_id;
        let insert = "INSERT INTO T ?";
        let params = [doc(json!({"k": 1}))];
        ledger
            .execute_statement(&a, &tx_a, insert, &params)
            .await
            .unwrap();
        ledger
            .execute_statement(&b, &tx_b, insert, &params)
            .await
            .unwrap();

        let mut digest_a = CommitDigest::new(&tx_a);
        digest_a.fold_statement(insert, &params);
        let mut digest_b = CommitDigest::new(&tx_b);
        digest_b.fold_statement(insert, &params);

        ledger
            .commit_transaction(&a, &tx_a, digest_a.bytes())
            .await
            .unwrap();
        let err = ledger
            .commit_transaction(&b, &tx_b, digest_b.bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TransactionConflict(_)));

        assert_eq!(vec![json!({"k": 1})], ledger.documents("T"));
        assert_eq!(0, ledger.open_transactions());
    }

    #[tokio::test]
    async fn rejects_a_wrong_digest() {
        let ledger = InMemoryLedger::new();
        let s = ledger.start_session("l").await.unwrap();
        let tx = ledger.start_transaction(&s).await.unwrap().transaction_id;
        ledger
            .execute_statement(&s, &tx, "CREATE TABLE T", &[])
            .await
            .unwrap();

        let err = ledger
            .commit_transaction(&s, &tx, CommitDigest::new(&tx).bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
        assert!(!ledger.has_table("T"));
    }

    #[tokio::test]
    async fn pages_results() {
        let ledger = InMemoryLedger::new().with_page_size(2);
        let s = ledger.start_session("l").await.unwrap();
        let tx = ledger.start_transaction(&s).await.unwrap().transaction_id;
        ledger
            .execute_statement(&s, &tx, "CREATE TABLE T", &[])
            .await
            .unwrap();
        for n in 0..5 {
            ledger
                .execute_statement(&s, &tx, "INSERT INTO T ?", &[doc(json!({ "n": n }))])
                .await
                .unwrap();
        }

        let first = ledger
            .execute_statement(&s, &tx, "SELECT * FROM T", &[])
            .await
            .unwrap()
            .first_page;
        assert_eq!(2, first.values.len());

        let token = first.next_page_token.expect("more pages");
        let second = ledger.fetch_page(&s, &tx, &token).await.unwrap().page;
        assert_eq!(2, second.values.len());

        let token = second.next_page_token.expect("more pages");
        let third = ledger.fetch_page(&s, &tx, &token).await.unwrap().page;
        assert_eq!(vec![doc(json!({"n": 4}))], third.values);
        assert_eq!(None, third.next_page_token);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next(Command::StartSession, ServiceError::Throttled("busy".into()));

        assert!(matches!(
            ledger.start_session("l").await,
            Err(ServiceError::Throttled(_))
        ));
        assert!(ledger.start_session("l").await.is_ok());
        assert_eq!(2, ledger.command_count(Command::StartSession));
        assert_eq!(1, ledger.open_sessions());
    }
}
