use anyhow::Result;
use ledger_driver_core::memory::InMemoryLedger;
use ledger_driver_core::retry::ExponentialBackoffJitterTransactionRetryPolicy;
use ledger_driver_core::{LedgerDriver, LedgerDriverBuilder, Transaction};
use serde_json::json;
use tokio::spawn;

/// This example shows how you can implement a unique constraint on top of
/// optimistic concurrency control.
///
/// Without concurrency, all you need to do is:
///
/// 1. Check if the value already exists
/// 2. If not, insert it
///
/// Concurrency makes this no harder. Every transaction reads from a snapshot,
/// and the ledger rejects a commit if anything it read changed in the
/// meantime. The driver then runs the transaction again.
///
/// | # | transaction 1    | transaction 2    |
/// |---|:-----------------|:-----------------|
/// | 1 | start            | start            |
/// | 2 | exists? -> false | exists? -> false |
/// | 3 | insert           | insert           |
/// | 4 | commit -> ok     | commit -> OCC    |
///
/// Transaction 2 didn't know it lost until the commit (step 4) failed. On the
/// retry it sees the document and does not insert.
#[tokio::main]
async fn main() -> Result<()> {
    // Run me with `export RUST_LOG=debug` for more output!
    tracing_subscriber::fmt::init();

    // Lots of contention on one table, so allow plenty of retries.
    let driver = LedgerDriverBuilder::new()
        .ledger_name("unique-example")
        .transaction_retry_policy(ExponentialBackoffJitterTransactionRetryPolicy::new(
            10, 500, 20,
        ))
        .build_with_service(InMemoryLedger::new())
        .await?;

    driver
        .transact(|tx: Transaction| async move {
            tx.execute_statement("CREATE TABLE example").await?;
            tx.execute_statement("CREATE INDEX ON example (id)").await?;
            Ok(())
        })
        .await?;

    // The driver is clone-friendly: clones share the session pool.
    let handles: Vec<_> = (0..10)
        .map(|i| spawn(example_transaction(driver.clone(), i)))
        .collect();

    let mut race_won = false;
    let mut races_lost: usize = 0;

    for handle in handles {
        let (winner, task_id) = handle.await??;
        if winner {
            if race_won {
                panic!("only 1 transaction should ever win the race");
            }
            race_won = true;
            println!("task {} won the race!", task_id);
        } else {
            races_lost += 1;
        }
    }

    println!(
        "{} other transactions attempted but were beaten to the punch",
        races_lost
    );

    Ok(())
}

/// We win the race if we're the transaction that inserts the example document.
///
/// Note that the read-only path commits too. A `false` is only returned once
/// the commit succeeds, so it is guaranteed that the transaction was
/// serialized with the winner's.
async fn example_transaction(driver: LedgerDriver, task_id: u32) -> Result<(bool, u32)> {
    let winner = driver
        .transact(|tx: Transaction| async move {
            let check = tx
                .statement("SELECT * FROM example WHERE id = ?")
                .param(1)
                .execute()
                .await?
                .materialize()
                .await?;
            if check.is_empty() {
                tx.statement("INSERT INTO example ?")
                    .param(json!({ "id": 1 }))
                    .execute()
                    .await?;
                Ok(true)
            } else {
                Ok(false)
            }
        })
        .await?;

    Ok((winner, task_id))
}
