use anyhow::Result;
use ledger_driver_core::memory::InMemoryLedger;
use ledger_driver_core::{LedgerDriverBuilder, TransactError, Transaction, Value};
use serde_json::json;

/// This example shows how you can use normal Rust functions as `transact`
/// arguments.
///
/// Closures are really nice for short in-line transactions but sometimes a
/// function is a better fit.
#[tokio::main]
async fn main() -> Result<()> {
    // Run me with `export RUST_LOG=debug` for more output!
    tracing_subscriber::fmt::init();

    let driver = LedgerDriverBuilder::new()
        .ledger_name("sample-ledger")
        .build_with_service(InMemoryLedger::new())
        .await?;

    driver.transact(create_vehicles).await?;

    let vins = driver.transact(list_vins).await?;
    for vin in vins {
        println!("- {}", vin);
    }

    Ok(())
}

/// Your function receives a `Transaction` as an argument. You can use this
/// argument to execute statements within the transaction. Returning `Ok`
/// commits.
async fn create_vehicles(tx: Transaction) -> Result<(), TransactError> {
    tx.execute_statement("CREATE TABLE Vehicle").await?;
    for vin in &["1N4AL11D75C109151", "KM8SRDHF6EU074761"] {
        tx.statement("INSERT INTO Vehicle ?")
            .param(json!({ "VIN": vin }))
            .execute()
            .await?;
    }
    Ok(())
}

async fn list_vins(tx: Transaction) -> Result<Vec<String>, TransactError> {
    let vehicles = tx
        .execute_statement("SELECT * FROM Vehicle")
        .await?
        .materialize()
        .await?;

    let vins = vehicles
        .iter()
        .filter_map(|vehicle: &Value| vehicle["VIN"].as_str())
        .map(str::to_string)
        .collect();
    Ok(vins)
}
