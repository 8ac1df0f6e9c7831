//! FluxDB client: connection options and the request/response command surface.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{Connection, Framing};
use crate::document::{Document, Id, ID_FIELD};
use crate::error::{Error, Result};
use crate::protocol::{self, Command, DEFAULT_PORT};
use crate::subscription::{Subscription, LOG_CAPACITY};

/// Options for [`FluxDB::connect_with_options`] and [`Subscription::start`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
  pub host: String,
  pub port: u16,
  /// Sent with `AUTH` right after connecting.
  pub password: Option<String>,
  /// Selected with `USE` after authentication.
  pub namespace: Option<String>,
  pub framing: Framing,
  /// Capacity of a subscription's message buffer.
  pub log_capacity: usize,
}

impl Default for ConnectOptions {
  fn default() -> Self {
    Self::new("127.0.0.1", DEFAULT_PORT)
  }
}

impl ConnectOptions {
  pub fn new(host: impl Into<String>, port: u16) -> Self {
    Self {
      host: host.into(),
      port,
      password: None,
      namespace: None,
      framing: Framing::default(),
      log_capacity: LOG_CAPACITY,
    }
  }

  /// Read `FLUXDB_HOST`, `FLUXDB_PORT`, `FLUXDB_PASSWORD` and
  /// `FLUXDB_NAMESPACE`, keeping defaults for anything unset.
  pub fn from_env() -> Result<Self> {
    let mut opts = Self::default();
    if let Ok(host) = std::env::var("FLUXDB_HOST") {
      opts.host = host;
    }
    if let Ok(port) = std::env::var("FLUXDB_PORT") {
      opts.port = port
        .parse()
        .map_err(|_| Error::InvalidAddress(format!("FLUXDB_PORT={}", port)))?;
    }
    opts.password = std::env::var("FLUXDB_PASSWORD").ok();
    opts.namespace = std::env::var("FLUXDB_NAMESPACE").ok();
    Ok(opts)
  }

  pub fn with_auth(mut self, password: impl Into<String>) -> Self {
    self.password = Some(password.into());
    self
  }

  pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
    self.namespace = Some(namespace.into());
    self
  }

  pub fn with_framing(mut self, framing: Framing) -> Self {
    self.framing = framing;
    self
  }

  pub fn with_log_capacity(mut self, capacity: usize) -> Self {
    self.log_capacity = capacity;
    self
  }

  pub fn addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  pub(crate) async fn open(&self) -> Result<Connection> {
    Connection::open(&self.host, self.port)
      .await
      .map(|conn| conn.with_framing(self.framing.clone()))
  }
}

/// FluxDB client over one persistent connection.
///
/// Every operation waits for its full reply before returning, and takes
/// `&mut self`, so requests are never pipelined. A reply that does not match
/// the command's success pattern is [`Error::ProtocolMismatch`]; transport
/// failures surface as their own variants (see [`Error::is_connection_error`]).
/// Callers that only need a yes/no answer can use `.is_ok()`, or
/// `.unwrap_or_default()` to get `0` ids, `0` receivers and empty results.
#[derive(Debug)]
pub struct FluxDB {
  conn: Connection,
  options: ConnectOptions,
}

impl FluxDB {
  /// Connect to `host:port` without authenticating.
  pub async fn connect(addr: &str) -> Result<Self> {
    let (host, port) = match addr.rsplit_once(':') {
      Some((host, port)) => {
        let port = port
          .parse()
          .map_err(|_| Error::InvalidAddress(addr.to_string()))?;
        (host, port)
      }
      None => (addr, DEFAULT_PORT),
    };
    Self::connect_with_options(ConnectOptions::new(host, port)).await
  }

  /// Connect, then authenticate and select a namespace when the options
  /// carry them. Fails on the first step that does not succeed.
  pub async fn connect_with_options(options: ConnectOptions) -> Result<Self> {
    let conn = options.open().await?;
    let mut client = Self { conn, options };

    if let Some(password) = client.options.password.clone() {
      client.authenticate(&password).await?;
    }
    if let Some(namespace) = client.options.namespace.clone() {
      client.select(&namespace).await?;
    }
    Ok(client)
  }

  pub fn options(&self) -> &ConnectOptions {
    &self.options
  }

  pub fn is_connected(&self) -> bool {
    self.conn.is_connected()
  }

  /// `AUTH <password>`
  pub async fn authenticate(&mut self, password: &str) -> Result<()> {
    let resp = self
      .execute(&Command::Auth {
        password: password.to_string(),
      })
      .await?;
    protocol::expect_exact(&resp, protocol::OK_AUTHENTICATED)
  }

  /// `USE <namespace>`
  pub async fn select(&mut self, namespace: &str) -> Result<()> {
    let resp = self
      .execute(&Command::Use {
        namespace: namespace.to_string(),
      })
      .await?;
    protocol::expect_prefix(&resp, protocol::OK_SWITCHED_TO).map(|_| ())
  }

  /// Insert a record and return its server-assigned id.
  ///
  /// A reserved `_id` field on `document` is not sent.
  pub async fn insert(&mut self, document: &Document) -> Result<Id> {
    let resp = self
      .execute(&Command::Insert {
        document: payload(document),
      })
      .await?;
    protocol::parse_insert_reply(&resp)
  }

  /// Replace the record `id` with `document`.
  pub async fn update(&mut self, id: Id, document: &Document) -> Result<()> {
    let resp = self
      .execute(&Command::Update {
        id,
        document: payload(document),
      })
      .await?;
    protocol::expect_exact(&resp, protocol::OK_UPDATED)
  }

  /// Delete the record `id`.
  pub async fn remove(&mut self, id: Id) -> Result<()> {
    let resp = self.execute(&Command::Delete { id }).await?;
    protocol::expect_exact(&resp, protocol::OK_DELETED)
  }

  /// Query with a filter document. Rows that fail to decode are skipped.
  pub async fn find(&mut self, filter: &Document) -> Result<Vec<Document>> {
    let resp = self
      .execute(&Command::Find {
        filter: filter.clone(),
      })
      .await?;
    protocol::parse_find_reply(&resp)
  }

  /// Publish a message and return the number of receivers.
  pub async fn publish(&mut self, channel: &str, message: &str) -> Result<i32> {
    if channel.is_empty() || channel.contains(' ') {
      return Err(Error::InvalidCommand(format!("invalid channel: {:?}", channel)));
    }
    let resp = self
      .execute(&Command::Publish {
        channel: channel.to_string(),
        message: message.to_string(),
      })
      .await?;
    protocol::parse_publish_reply(&resp)
  }

  /// Open a [`Subscription`] on `channel` over a new connection, using this
  /// client's host, port and password.
  pub async fn subscribe(&self, channel: &str) -> Result<Subscription> {
    let mut sub = Subscription::new(channel).with_capacity(self.options.log_capacity);
    sub.start(&self.options).await?;
    Ok(sub)
  }

  /// Send a command line verbatim and return the raw reply.
  pub async fn raw_command(&mut self, line: &str) -> Result<String> {
    self.conn.send_request(line).await
  }

  /// Close the connection. Later requests fail with `ConnectionClosed`.
  pub async fn close(&mut self) {
    self.conn.close().await;
  }

  async fn execute(&mut self, command: &Command) -> Result<String> {
    debug!(command = command.name(), "execute");
    self.conn.send_request(&command.encode()).await
  }
}

fn payload(document: &Document) -> Document {
  if document.contains_key(ID_FIELD) {
    debug!("dropping reserved {} field from payload", ID_FIELD);
    document.without_id()
  } else {
    document.clone()
  }
}
