use ledger_driver::memory::Command;
use ledger_driver::{InMemoryLedger, LedgerDriver, LedgerDriverBuilder, TransactError, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Person {
    first_name: String,
    last_name: String,
    age: u32,
}

fn john() -> Person {
    Person {
        first_name: "John".into(),
        last_name: "Doe".into(),
        age: 32,
    }
}

async fn person_table(ledger: &InMemoryLedger) -> anyhow::Result<LedgerDriver> {
    let _ = tracing_subscriber::fmt::try_init();

    let driver = LedgerDriverBuilder::new()
        .ledger_name("myTestLedger")
        .build_with_service(ledger.clone())
        .await?;
    driver
        .transact(|tx: Transaction| async move {
            tx.execute_statement("CREATE TABLE Person").await?;
            tx.execute_statement("CREATE INDEX ON Person(firstName)")
                .await?;
            Ok(())
        })
        .await?;
    Ok(driver)
}

async fn find_by_first_name(driver: &LedgerDriver, name: &str) -> anyhow::Result<Vec<Person>> {
    let people = driver
        .transact(|tx: Transaction| async move {
            tx.statement("SELECT * FROM Person WHERE FirstName = ?")
                .param(name)
                .query::<Person>()
                .await?
                .materialize()
                .await
        })
        .await?;
    Ok(people.into_vec())
}

#[tokio::test]
async fn insert_then_query() -> anyhow::Result<()> {
    let ledger = InMemoryLedger::new();
    let driver = person_table(&ledger).await?;
    assert!(ledger.has_table("Person"));
    assert_eq!(vec!["firstName".to_string()], ledger.indexes("Person"));

    let person = john();
    let person = &person;
    let inserted = driver
        .transact(|tx: Transaction| async move {
            tx.statement("INSERT INTO Person ?")
                .param(person)
                .execute()
                .await?
                .materialize()
                .await
        })
        .await?;
    assert_eq!(1, inserted.len());
    assert!(inserted.iter().all(|doc| doc.get("documentId").is_some()));

    assert_eq!(vec![john()], find_by_first_name(&driver, "John").await?);
    assert!(find_by_first_name(&driver, "Jane").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn update_then_query() -> anyhow::Result<()> {
    let ledger = InMemoryLedger::new();
    let driver = person_table(&ledger).await?;
    let person = john();
    let person = &person;
    driver
        .transact(|tx: Transaction| async move {
            tx.statement("INSERT INTO Person ?")
                .param(person)
                .execute()
                .await?;
            Ok(())
        })
        .await?;

    let updated = driver
        .transact(|tx: Transaction| async move {
            tx.statement("UPDATE Person SET Age = ? WHERE FirstName = ?")
                .param(42)
                .param("John")
                .execute()
                .await?
                .materialize()
                .await
        })
        .await?;
    assert_eq!(1, updated.len());

    let people = find_by_first_name(&driver, "John").await?;
    assert_eq!(
        vec![Person {
            age: 42,
            ..john()
        }],
        people
    );
    assert_eq!(
        vec![json!({"FirstName": "John", "LastName": "Doe", "Age": 42})],
        ledger.documents("Person")
    );
    Ok(())
}

#[tokio::test]
async fn mismatched_arguments_never_reach_the_ledger() -> anyhow::Result<()> {
    let ledger = InMemoryLedger::new();
    let driver = person_table(&ledger).await?;
    let sent = ledger.command_count(Command::ExecuteStatement);

    let err = driver
        .transact(|tx: Transaction| async move {
            tx.statement("UPDATE Person SET Age = ? WHERE FirstName = ?")
                .param(42)
                .execute()
                .await?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransactError::ArgumentMismatch {
            expected: 2,
            actual: 1
        }
    ));
    assert_eq!(sent, ledger.command_count(Command::ExecuteStatement));
    Ok(())
}

#[tokio::test]
async fn statements_accumulate_execution_stats() -> anyhow::Result<()> {
    let ledger = InMemoryLedger::new();
    let driver = person_table(&ledger).await?;

    let (statements, stats) = driver
        .transact(|tx: Transaction| async move {
            tx.statement("INSERT INTO Person ?")
                .param(john())
                .execute()
                .await?;
            tx.execute_statement("SELECT * FROM Person").await?;
            Ok((tx.statement_count().await, tx.execution_stats().await))
        })
        .await?;

    assert_eq!(2, statements);
    assert_eq!(1, stats.io_usage.write_ios);
    assert_eq!(1, stats.io_usage.read_ios);
    // start + two statements
    assert_eq!(3, stats.timing_information.processing_time_milliseconds);
    Ok(())
}
