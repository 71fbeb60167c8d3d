//! # clickhouse-stream
//!
//! Async streaming client for the ClickHouse HTTP interface that lets you
//! query millions of rows without running out of memory.
//!
//! ## Why?
//!
//! Loading an entire result set before touching the first row does not scale:
//!
//! ```ignore
//! // This will OOM with millions of rows!
//! let rows: Vec<Row> = client.query("SELECT * FROM hits").await?;
//! ```
//!
//! `clickhouse-stream` decodes the tab-separated response body one line at a
//! time:
//!
//! ```ignore
//! // Process millions of rows with constant memory usage
//! let mut rows = client.fetch("SELECT * FROM hits").await?;
//! while let Some(row) = rows.next().await? {
//!     process(row);
//! }
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use clickhouse_stream::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("localhost", 8123, "default", "");
//!
//!     client.execute("CREATE TABLE IF NOT EXISTS visits (day Date, amount UInt32) ENGINE = Memory").await?;
//!     client.execute("INSERT INTO visits VALUES ('2024-01-01', 3)").await?;
//!
//!     let mut rows = client.fetch("SELECT day, amount FROM visits").await?;
//!     while let Some(row) = rows.next().await? {
//!         println!("{}: {}", row.get_date("day")?, row.get_u32("amount")?);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Memory efficient**: Decodes results line by line without buffering the
//!   result set
//! - **Async native**: Built on tokio and futures
//! - **Typed access**: Integer widths 8-64 bits signed and unsigned, floats,
//!   Date and DateTime accessors by column name
//! - **Bounded retries**: Transport failures are retried with a configurable
//!   attempt count and wait; server errors fail fast with the message
//!   extracted from the response
//! - **Error handling**: All errors are returned as Results, no panics

pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod row;

// Re-export main types at crate root
pub use client::{Client, ResponseBody};
pub use config::{Config, GIGABYTE, MEGABYTE, TraceSink};
pub use error::{Error, Result};
pub use row::Row;

// Re-export the decoder for use over arbitrary byte sources
pub use decoder::RowDecoder;
