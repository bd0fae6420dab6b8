use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::document::{self, Value};
use crate::error::{self, ArgumentMismatch, MappingError, TransactError};
use crate::results::ResultCursor;
use crate::transaction::Transaction;

/// A PartiQL template plus the values bound to its `?` placeholders, in
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    partiql: String,
    params: Vec<Value>,
}

impl Statement {
    /// Binds `params` to the placeholders in `partiql`. Fails without talking
    /// to the service if the counts differ.
    pub fn bind<S>(partiql: S, params: Vec<Value>) -> Result<Statement, ArgumentMismatch>
    where
        S: Into<String>,
    {
        let partiql = partiql.into();
        let expected = placeholder_count(&partiql);
        if expected != params.len() {
            return Err(ArgumentMismatch {
                expected,
                actual: params.len(),
            });
        }

        Ok(Statement { partiql, params })
    }

    pub fn partiql(&self) -> &str {
        &self.partiql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Counts `?` placeholders, skipping anything inside string literals
/// (`'...'`), quoted identifiers (`"..."`), Ion literals (`` `...` ``) and
/// comments (`-- ...` to end of line, `/* ... */`). A doubled quote inside a
/// literal is an escaped quote.
pub fn placeholder_count(partiql: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;
    let mut chars = partiql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => {
                if chars.peek() == Some(&q) {
                    chars.next();
                } else {
                    quote = None;
                }
            }
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => count += 1,
                '-' if chars.peek() == Some(&'-') => {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    let mut star = false;
                    for c in chars.by_ref() {
                        if star && c == '/' {
                            break;
                        }
                        star = c == '*';
                    }
                }
                _ => {}
            },
        }
    }

    count
}

/// Builds a statement against an open transaction, one parameter at a time.
///
/// ```no_run
/// # use ledger_driver_core::{Transaction, TransactError};
/// # async fn example(tx: Transaction) -> Result<(), TransactError> {
/// let rows = tx
///     .statement("UPDATE Person SET Age = ? WHERE FirstName = ?")
///     .param(42)
///     .param("John")
///     .execute()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct StatementBuilder<'tx, E> {
    transaction: &'tx Transaction<E>,
    partiql: String,
    params: Vec<Value>,
    // The first parameter that failed to serialize. Reported on execute so
    // that `param` can stay chainable.
    error: Option<MappingError>,
}

impl<'tx, E> StatementBuilder<'tx, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn new(transaction: &'tx Transaction<E>, partiql: String) -> StatementBuilder<'tx, E> {
        StatementBuilder {
            transaction,
            partiql,
            params: vec![],
            error: None,
        }
    }

    pub fn param<P>(mut self, param: P) -> StatementBuilder<'tx, E>
    where
        P: Serialize,
    {
        if self.error.is_none() {
            match document::to_value(param) {
                Ok(value) => self.params.push(value),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    fn build(self) -> Result<(&'tx Transaction<E>, Statement), TransactError<E>> {
        let StatementBuilder {
            transaction,
            partiql,
            params,
            error,
        } = self;

        if let Some(e) = error {
            return Err(error::mapping_err(e));
        }

        let statement = Statement::bind(partiql, params).map_err(error::argument_mismatch)?;
        Ok((transaction, statement))
    }

    /// Executes the statement, yielding raw document trees.
    pub async fn execute(self) -> Result<ResultCursor<Value, E>, TransactError<E>> {
        let (transaction, statement) = self.build()?;
        transaction.execute(statement).await
    }

    /// Executes the statement, mapping each document onto `T`.
    pub async fn query<T>(self) -> Result<ResultCursor<T, E>, TransactError<E>>
    where
        T: DeserializeOwned,
    {
        let (transaction, statement) = self.build()?;
        transaction.query(statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_placeholders() {
        assert_eq!(0, placeholder_count("CREATE TABLE Person"));
        assert_eq!(1, placeholder_count("INSERT INTO Person ?"));
        assert_eq!(
            2,
            placeholder_count("UPDATE Person SET Age = ? WHERE FirstName = ?")
        );
    }

    #[test]
    fn ignores_quoted_question_marks() {
        assert_eq!(
            1,
            placeholder_count("SELECT * FROM Person WHERE Note = 'why?' AND Age = ?")
        );
        assert_eq!(0, placeholder_count(r#"SELECT "odd?name" FROM Person"#));
        assert_eq!(1, placeholder_count("SELECT * FROM t WHERE a = `?` OR b = ?"));
        // escaped quote keeps the literal open
        assert_eq!(1, placeholder_count("SELECT * FROM t WHERE a = 'it''s?' OR b = ?"));
    }

    #[test]
    fn ignores_comments() {
        assert_eq!(
            1,
            placeholder_count("SELECT * FROM Person -- where Age = ?\nWHERE FirstName = ?")
        );
        assert_eq!(
            1,
            placeholder_count("SELECT * FROM Person /* Age = ? */ WHERE FirstName = ?")
        );
        // the opening `*` does not close the comment
        assert_eq!(0, placeholder_count("SELECT 1 /*/ ? */"));
        // unterminated comments run to the end
        assert_eq!(0, placeholder_count("SELECT 1 -- ?"));
        assert_eq!(0, placeholder_count("SELECT 1 /* ?"));
        // a single dash or slash is an operator
        assert_eq!(2, placeholder_count("SELECT ? - 1 / ? FROM t"));
    }

    #[test]
    fn bind_checks_argument_count() {
        let err = Statement::bind(
            "UPDATE Person SET Age = ? WHERE FirstName = ?",
            vec![json!(42)],
        )
        .unwrap_err();
        assert_eq!(
            ArgumentMismatch {
                expected: 2,
                actual: 1
            },
            err
        );

        let statement =
            Statement::bind("SELECT * FROM Person WHERE FirstName = ?", vec![json!("John")])
                .unwrap();
        assert_eq!("SELECT * FROM Person WHERE FirstName = ?", statement.partiql());
        assert_eq!(&[json!("John")], statement.params());
    }
}
