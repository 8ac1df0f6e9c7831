//! FluxDB Rust Client SDK
//!
//! A native TCP client for FluxDB, a line-oriented document store with
//! publish/subscribe.
//!
//! # Example
//!
//! ```no_run
//! use fluxdb::query::{field, filter};
//! use fluxdb::{ConnectOptions, Document, FluxDB};
//!
//! #[tokio::main]
//! async fn main() -> fluxdb::Result<()> {
//!     // Connect, authenticate and select a namespace
//!     let opts = ConnectOptions::new("127.0.0.1", 8080)
//!         .with_auth("flux_admin")
//!         .with_namespace("crm_db");
//!     let mut client = FluxDB::connect_with_options(opts).await?;
//!
//!     // Insert a document
//!     let lead = Document::new()
//!         .with("name", "Alice Corp")
//!         .with("status", "Lead")
//!         .with("value", 5000);
//!     let id = client.insert(&lead).await?;
//!     println!("Inserted: {}", id);
//!
//!     // Query documents
//!     let leads = client.find(&filter([field("value").gt(1000)])).await?;
//!     println!("Found {} high value leads", leads.len());
//!
//!     // Listen for events on a separate connection
//!     let mut events = client.subscribe("crm_events").await?;
//!     client.publish("crm_events", "Lead added").await?;
//!     println!("Events: {:?}", events.logs());
//!     events.stop().await;
//!
//!     Ok(())
//! }
//! ```

mod client;
pub mod connection;
mod document;
mod error;
pub mod parser;
pub mod protocol;
pub mod query;
pub mod serialize;
mod subscription;

pub use client::{ConnectOptions, FluxDB};
pub use connection::{Connection, ConnectionState, Framing, MAX_RESPONSE_SIZE};
pub use document::{Document, Id, Value, ID_FIELD};
pub use error::{Error, Result};
pub use parser::parse;
pub use protocol::{Command, PushMessage, DEFAULT_PORT};
pub use serialize::to_string;
pub use subscription::{LogBuffer, Subscription, SubscriptionState, LOG_CAPACITY};
