//! Background listener for `SUBSCRIBE` pushes.
//!
//! A [`Subscription`] owns its own connection and a spawned task that decodes
//! `MESSAGE <channel> <content>` lines into a bounded [`LogBuffer`], which
//! foreground code polls with [`Subscription::logs`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::client::ConnectOptions;
use crate::connection::{Connection, MAX_RESPONSE_SIZE, READ_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::protocol::{self, Command, PushMessage};

/// Default number of messages kept by a [`LogBuffer`].
pub const LOG_CAPACITY: usize = 50;

/// Bounded FIFO of received messages, shared between the listener task and
/// any number of readers. The oldest entry is evicted on overflow.
///
/// The lock is only held for the in-memory operation itself.
#[derive(Debug, Clone)]
pub struct LogBuffer {
  entries: Arc<Mutex<VecDeque<String>>>,
  capacity: usize,
}

impl Default for LogBuffer {
  fn default() -> Self {
    Self::with_capacity(LOG_CAPACITY)
  }
}

impl LogBuffer {
  pub fn new() -> Self {
    Self::default()
  }

  /// A capacity of zero is treated as one.
  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
      capacity,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn push(&self, message: String) {
    let mut entries = self.lock();
    entries.push_back(message);
    while entries.len() > self.capacity {
      entries.pop_front();
    }
  }

  /// Point-in-time copy, oldest first.
  pub fn snapshot(&self) -> Vec<String> {
    self.lock().iter().cloned().collect()
  }

  pub fn clear(&self) {
    self.lock().clear();
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  // A panic while holding the lock cannot leave a half-written entry, so a
  // poisoned buffer is still consistent.
  fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
  Idle,
  Listening,
  Stopped,
}

/// Listener for one channel.
///
/// ```no_run
/// use fluxdb::{ConnectOptions, Subscription};
///
/// # async fn run() -> fluxdb::Result<()> {
/// let opts = ConnectOptions::new("127.0.0.1", 8080).with_auth("flux_admin");
/// let mut events = Subscription::new("crm_events");
/// events.start(&opts).await?;
///
/// for line in events.logs() {
///   println!("{}", line);
/// }
///
/// events.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Subscription {
  channel: String,
  logs: LogBuffer,
  state: SubscriptionState,
  shutdown: Option<oneshot::Sender<()>>,
  task: Option<JoinHandle<()>>,
}

impl Subscription {
  pub fn new(channel: impl Into<String>) -> Self {
    Self {
      channel: channel.into(),
      logs: LogBuffer::default(),
      state: SubscriptionState::Idle,
      shutdown: None,
      task: None,
    }
  }

  /// Replace the message buffer with an empty one of `capacity` entries.
  pub fn with_capacity(mut self, capacity: usize) -> Self {
    self.logs = LogBuffer::with_capacity(capacity);
    self
  }

  pub fn channel(&self) -> &str {
    &self.channel
  }

  /// `Stopped` is also reported once the listener has exited on its own,
  /// for instance because the server closed the connection.
  pub fn state(&self) -> SubscriptionState {
    match self.state {
      SubscriptionState::Listening
        if self.task.as_ref().map_or(true, JoinHandle::is_finished) =>
      {
        SubscriptionState::Stopped
      }
      state => state,
    }
  }

  /// Open a dedicated connection, authenticate when `options` carries a
  /// password, send `SUBSCRIBE` and start the listener task.
  ///
  /// Does nothing while already listening.
  pub async fn start(&mut self, options: &ConnectOptions) -> Result<()> {
    if self.state() == SubscriptionState::Listening {
      return Ok(());
    }
    if self.channel.is_empty() || self.channel.contains(' ') {
      return Err(Error::InvalidCommand(format!(
        "invalid channel: {:?}",
        self.channel
      )));
    }
    // Reap a listener that already exited on its own.
    self.stop().await;

    let mut conn = options.open().await?;
    if let Some(password) = options.password.as_deref().filter(|p| !p.is_empty()) {
      let resp = conn
        .send_request(
          &Command::Auth {
            password: password.to_string(),
          }
          .encode(),
        )
        .await?;
      protocol::expect_exact(&resp, protocol::OK_AUTHENTICATED)?;
    }
    conn
      .send_line(
        &Command::Subscribe {
          channel: self.channel.clone(),
        }
        .encode(),
      )
      .await?;

    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(listen(conn, self.channel.clone(), self.logs.clone(), rx));
    debug!(channel = %self.channel, addr = %options.addr(), "subscription listening");

    self.shutdown = Some(tx);
    self.task = Some(task);
    self.state = SubscriptionState::Listening;
    Ok(())
  }

  /// Signal the listener, wait for it to exit and close its socket.
  pub async fn stop(&mut self) {
    if let Some(shutdown) = self.shutdown.take() {
      let _ = shutdown.send(());
    }
    if let Some(task) = self.task.take() {
      if let Err(e) = task.await {
        warn!(channel = %self.channel, error = %e, "subscription task failed");
      }
    }
    if self.state == SubscriptionState::Listening {
      debug!(channel = %self.channel, "subscription stopped");
      self.state = SubscriptionState::Stopped;
    }
  }

  /// Received messages, oldest first.
  pub fn logs(&self) -> Vec<String> {
    self.logs.snapshot()
  }

  pub fn clear(&self) {
    self.logs.clear();
  }

  /// Handle on the shared buffer, for readers living elsewhere.
  pub fn log_buffer(&self) -> LogBuffer {
    self.logs.clone()
  }
}

async fn listen(
  mut conn: Connection,
  channel: String,
  logs: LogBuffer,
  mut shutdown: oneshot::Receiver<()>,
) {
  let mut pending = Vec::new();
  let mut scanned = 0;
  let mut chunk = vec![0u8; READ_CHUNK_SIZE];

  loop {
    tokio::select! {
      // Fires on `stop()` and when the `Subscription` is dropped.
      _ = &mut shutdown => break,
      read = conn.read_chunk(&mut chunk) => match read {
        Ok(0) => {
          debug!(channel = %channel, "server closed subscription");
          break;
        }
        Ok(n) => {
          pending.extend_from_slice(&chunk[..n]);
          deliver_lines(&mut pending, &mut scanned, &channel, &logs);
          if pending.len() > MAX_RESPONSE_SIZE {
            warn!(channel = %channel, "dropping oversized subscription line");
            pending.clear();
            scanned = 0;
          }
        }
        Err(e) => {
          debug!(channel = %channel, error = %e, "subscription read failed");
          break;
        }
      }
    }
  }
  conn.close().await;
}

/// Drain every complete line from `pending` into `logs`, leaving a trailing
/// partial line in place for the next read. Returns the number delivered.
///
/// `scanned` is how many leading bytes of `pending` are already known to hold
/// no `\n`; only the bytes after it are searched.
fn deliver_lines(
  pending: &mut Vec<u8>,
  scanned: &mut usize,
  channel: &str,
  logs: &LogBuffer,
) -> usize {
  let mut delivered = 0;
  let mut start = 0;
  let mut from = (*scanned).min(pending.len());

  while let Some(pos) = pending[from..].iter().position(|&b| b == b'\n') {
    let end = from + pos;
    let text = String::from_utf8_lossy(&pending[start..end]);
    let line = text.trim_end_matches('\r');

    match PushMessage::parse(line) {
      Some(msg) => {
        if msg.channel != channel {
          debug!(subscribed = channel, received = %msg.channel, "message for another channel");
        }
        logs.push(msg.content);
        delivered += 1;
      }
      None => trace!(line = line, "ignoring non-message line"),
    }
    start = end + 1;
    from = start;
  }

  pending.drain(..start);
  *scanned = pending.len();
  delivered
}
