use anyhow::Result;
use ledger_driver::{InMemoryLedger, LedgerDriverBuilder, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Person {
    first_name: String,
    last_name: String,
    age: u32,
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.first_name, self.last_name, self.age)
    }
}

/// Creates a table and an index, then inserts, queries and updates a person.
///
/// The ledger lives in memory, so every run starts from scratch.
#[tokio::main]
async fn main() -> Result<()> {
    // Run me with `export RUST_LOG=debug` for more output!
    tracing_subscriber::fmt::init();

    info!("Creating the driver");
    let driver = LedgerDriverBuilder::new()
        .ledger_name("myTestLedger")
        .build_with_service(InMemoryLedger::new())
        .await?;

    info!("Creating the table and index");
    driver
        .transact(|tx: Transaction| async move {
            tx.execute_statement("CREATE TABLE Person").await?;
            tx.execute_statement("CREATE INDEX ON Person(firstName)")
                .await?;
            Ok(())
        })
        .await?;

    info!("Inserting a document");
    let person = Person {
        first_name: "John".to_string(),
        last_name: "Doe".to_string(),
        age: 32,
    };
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

    // Results are copied into memory because a cursor can no longer be read
    // once its transaction has committed.
    info!("Querying the table");
    let people = driver
        .transact(|tx: Transaction| async move {
            tx.statement("SELECT * FROM Person WHERE FirstName = ?")
                .param("John")
                .query::<Person>()
                .await?
                .materialize()
                .await
        })
        .await?;
    for person in &people {
        println!("{}", person);
    }

    info!("Updating the document");
    driver
        .transact(|tx: Transaction| async move {
            tx.statement("UPDATE Person SET Age = ? WHERE FirstName = ?")
                .param(42)
                .param("John")
                .execute()
                .await?;
            Ok(())
        })
        .await?;

    info!("Querying the table for the updated document");
    let people = driver
        .transact(|tx: Transaction| async move {
            tx.statement("SELECT * FROM Person WHERE FirstName = ?")
                .param("John")
                .query::<Person>()
                .await?
                .materialize()
                .await
        })
        .await?;
    for person in &people {
        println!("{}", person);
    }
    info!(
        "Query executed in {}ms and used {} read IOs",
        people
            .execution_stats()
            .timing_information
            .processing_time_milliseconds,
        people.execution_stats().io_usage.read_ios
    );

    driver.shutdown().await;
    info!("Goodbye!");

    Ok(())
}
