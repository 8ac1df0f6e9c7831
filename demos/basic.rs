//! Basic example demonstrating FluxDB Rust SDK usage.
//!
//! Reads `FLUXDB_HOST`, `FLUXDB_PORT`, `FLUXDB_PASSWORD` and
//! `FLUXDB_NAMESPACE`; set `RUST_LOG=fluxdb=debug` to see the wire traffic.

use std::time::Duration;

use fluxdb::query::{field, filter};
use fluxdb::{ConnectOptions, Document, FluxDB};
use tracing_subscriber::EnvFilter;

const CHANNEL: &str = "crm_events";

#[tokio::main]
async fn main() -> fluxdb::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  // Connect, authenticate and select the CRM namespace
  let mut opts = ConnectOptions::from_env()?;
  if opts.password.is_none() {
    opts = opts.with_auth("flux_admin");
  }
  if opts.namespace.is_none() {
    opts = opts.with_namespace("crm_db");
  }
  let mut client = FluxDB::connect_with_options(opts).await?;
  println!("Connected to {}", client.options().addr());

  // Listen for pipeline events on a second connection
  let mut events = client.subscribe(CHANNEL).await?;

  // Insert a lead
  let lead = Document::new()
    .with("type", "lead")
    .with("name", "Alice Corp")
    .with("status", "New")
    .with("value", 5000);
  let id = client.insert(&lead).await?;
  println!("Inserted lead: {}", id);
  client.publish(CHANNEL, "New lead: Alice Corp").await?;

  // Move it through the pipeline
  let won = lead.clone().with("status", "Won");
  client.update(id, &won).await?;
  let receivers = client.publish(CHANNEL, "Alice Corp moved to Won").await?;
  println!("Event delivered to {} subscriber(s)", receivers);

  // Query high value leads
  let leads = client
    .find(&filter([field("type").eq("lead"), field("value").gt(1000)]))
    .await?;
  for doc in &leads {
    println!("Lead {:?}: {}", doc.id(), doc);
  }

  // Give the listener a moment, then print what it received
  tokio::time::sleep(Duration::from_millis(200)).await;
  for line in events.logs() {
    println!("Event: {}", line);
  }
  events.stop().await;

  // Clean up
  client.remove(id).await?;
  client.close().await;

  Ok(())
}
