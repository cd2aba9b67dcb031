//! Basic usage example for hrana-client.
//!
//! Expects an sqld (libSQL server) listening on `HRANA_URL`, or on
//! `http://127.0.0.1:8080` when the variable is unset.

use hrana_client::{Client, ClientConfig, Connection, ErrorKind, Statement};
use std::error::Error;

const DEFAULT_URL: &str = "http://127.0.0.1:8080";
const TABLE: &str = "hrana_demo";

/// Builds a client from the environment, falling back to a local server.
fn example_client() -> Result<Client, Box<dyn Error>> {
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(_) => ClientConfig::builder().url(DEFAULT_URL).timeout_ms(5_000).build()?,
    };
    Ok(Client::new(config)?)
}

/// Executes a simple arithmetic query and returns the result.
async fn example_simple_select(client: &Client) -> Result<i64, Box<dyn Error>> {
    let stmt = Statement::new("SELECT ? + ?").bind(1)?.bind(1)?;
    let rows = client.query(stmt).await?;
    Ok(rows.rows()[0].get::<i64>(0)?)
}

/// Creates a table, fills it inside a transaction and reads it back.
async fn example_transaction(conn: &Connection) -> Result<usize, Box<dyn Error>> {
    conn.execute(format!(
        "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, name TEXT)",
        TABLE
    ))
    .await?;

    let mut tx = conn.transaction().await?;
    for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Charlie")] {
        let stmt = Statement::new(format!("INSERT INTO {} VALUES (?, ?)", TABLE))
            .bind(id)?
            .bind(name)?;
        tx.execute(stmt).await?;
    }
    tx.commit().await?;

    let rows = conn
        .query(format!("SELECT id, name FROM {} ORDER BY id", TABLE))
        .await?;
    let batch = rows.to_record_batch()?;
    println!("{:?}", batch.schema());

    Ok(rows.len())
}

/// Runs a batch whose second statement fails and reports where it stopped.
async fn example_failed_batch(conn: &Connection) -> Result<(), Box<dyn Error>> {
    let result = conn
        .execute_batch(vec![
            format!("INSERT INTO {} VALUES (4, 'Dora')", TABLE),
            format!("INSERT INTO {} VALUES (1, 'Duplicate')", TABLE),
        ])
        .await;

    match result {
        Err(e) if e.kind() == ErrorKind::Batch => println!("Batch rolled back: {}", e),
        Err(e) => return Err(e.into()),
        Ok(_) => println!("Batch unexpectedly succeeded"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let client = example_client()?;
    println!("Connecting to {}", client.endpoint());

    let sum = example_simple_select(&client).await?;
    println!("Simple select: {}", sum);

    let conn = client.connect()?;
    let rows = example_transaction(&conn).await?;
    println!("Transaction: {} row(s)", rows);

    example_failed_batch(&conn).await?;

    conn.execute(format!("DROP TABLE {}", TABLE)).await?;
    conn.close().await?;
    client.close().await?;
    println!("Done");

    Ok(())
}
