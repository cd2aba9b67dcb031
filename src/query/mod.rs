//! Query execution and result handling.
//!
//! # Overview
//!
//! The query module is organized into:
//! - `statement` - SQL text and parameter binding
//! - `executor` - Sending statements through a session with deadline and retry policy
//! - `results` - Buffered result sets and execution outcomes
//! - `cursor` - Rows streamed from the cursor endpoint
//!
//! # Example
//!
//! ```no_run
//! use hrana_client::connection::{BatchMode, ClientConfig, Session};
//! use hrana_client::query::{Executor, Statement};
//! use hrana_client::transport::HttpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = ClientConfig::new("http://127.0.0.1:8080").endpoint()?;
//! let mut session = Session::new(endpoint, Box::new(HttpTransport::new()));
//! let executor = Executor::new(Duration::from_secs(30), BatchMode::Server);
//!
//! let stmt = Statement::new("SELECT * FROM users WHERE age > ?").bind(18)?;
//! let outcome = executor.execute(&mut session, &stmt).await?;
//!
//! if let Some(rows) = outcome.result_set() {
//!     for row in rows {
//!         println!("{:?}", row.values());
//!     }
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cursor;
pub mod executor;
pub mod results;
pub mod statement;

// Re-export commonly used types
pub use cursor::RowStream;
pub use executor::Executor;
pub use results::{AffectedRows, Column, Description, ExecutionOutcome, QueryStats, ResultSet, Row};
pub use statement::{Parameters, Statement, StatementType};
