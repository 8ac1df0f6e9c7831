//! A single TCP connection speaking the line-oriented FluxDB protocol.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Size of each socket read.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Largest response accepted before the exchange is aborted (16MB).
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Rule for deciding where a response ends in the byte stream.
///
/// The protocol carries no length prefix, so the default mirrors what
/// existing servers emit: a response is complete once everything read so far
/// ends in `\n`. A multi-line `FIND` reply that the server writes in several
/// bursts split on a line boundary is therefore seen as complete too early,
/// and its remaining rows arrive as the next response. Servers that emit an
/// explicit end marker should be used with [`Framing::TerminatorLine`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
  #[default]
  TrailingNewline,
  /// Response ends with a line exactly equal to the marker, which is dropped.
  TerminatorLine(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Unconnected,
  Connected,
  Closed,
}

/// Owns one socket. Requests are strictly sequential: every method that
/// touches the socket takes `&mut self`.
#[derive(Debug)]
pub struct Connection {
  addr: String,
  framing: Framing,
  stream: Option<BufReader<TcpStream>>,
  state: ConnectionState,
}

impl Connection {
  pub fn new(host: &str, port: u16) -> Self {
    Self {
      addr: format!("{}:{}", host, port),
      framing: Framing::default(),
      stream: None,
      state: ConnectionState::Unconnected,
    }
  }

  /// Connect immediately.
  pub async fn open(host: &str, port: u16) -> Result<Self> {
    let mut conn = Self::new(host, port);
    conn.connect().await?;
    Ok(conn)
  }

  pub fn with_framing(mut self, framing: Framing) -> Self {
    self.framing = framing;
    self
  }

  pub fn addr(&self) -> &str {
    &self.addr
  }

  pub fn framing(&self) -> &Framing {
    &self.framing
  }

  pub fn state(&self) -> ConnectionState {
    self.state
  }

  pub fn is_connected(&self) -> bool {
    self.state == ConnectionState::Connected
  }

  /// Establish the TCP connection, replacing any previous socket.
  pub async fn connect(&mut self) -> Result<()> {
    let stream = TcpStream::connect(&self.addr)
      .await
      .map_err(|source| Error::UnreachableHost {
        addr: self.addr.clone(),
        source,
      })?;
    // Commands are small single lines; don't let Nagle hold them back.
    stream.set_nodelay(true)?;
    debug!(addr = %self.addr, "connected");
    self.stream = Some(BufReader::new(stream));
    self.state = ConnectionState::Connected;
    Ok(())
  }

  /// Move the socket into a new `Connection`, leaving this one `Closed`.
  pub fn take(&mut self) -> Connection {
    let taken = Connection {
      addr: self.addr.clone(),
      framing: self.framing.clone(),
      stream: self.stream.take(),
      state: self.state,
    };
    self.state = ConnectionState::Closed;
    taken
  }

  /// Shut the socket down. Safe to call more than once.
  pub async fn close(&mut self) {
    if let Some(mut stream) = self.stream.take() {
      let _ = stream.get_mut().shutdown().await;
      debug!(addr = %self.addr, "connection closed");
    }
    self.state = ConnectionState::Closed;
  }

  /// Send a request line and wait for its complete response.
  pub async fn send_request(&mut self, line: &str) -> Result<String> {
    self.send_line(line).await?;
    self.read_response().await
  }

  /// Write one command line, terminated by exactly one `\n`.
  pub async fn send_line(&mut self, line: &str) -> Result<()> {
    if line.contains(['\n', '\r']) {
      return Err(Error::InvalidCommand(
        "command must be a single line".to_string(),
      ));
    }
    trace!(addr = %self.addr, command = line, "send");

    let mut payload = Vec::with_capacity(line.len() + 1);
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');

    let result = async {
      let stream = self.stream_mut()?;
      stream.get_mut().write_all(&payload).await?;
      stream.get_mut().flush().await?;
      Ok::<(), Error>(())
    }
    .await;
    self.on_error(result)
  }

  /// Read one framed response, without its terminator.
  pub async fn read_response(&mut self) -> Result<String> {
    let result = match self.framing.clone() {
      Framing::TrailingNewline => self.read_until_trailing_newline().await,
      Framing::TerminatorLine(marker) => self.read_until_marker(&marker).await,
    };
    let response = self.on_error(result)?;
    trace!(addr = %self.addr, response = %response, "recv");
    Ok(response)
  }

  /// Read whatever bytes are available. Returns `Ok(0)` on orderly close.
  pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
    let result = async {
      let n = self.stream_mut()?.read(buf).await?;
      Ok::<usize, Error>(n)
    }
    .await;
    let n = self.on_error(result)?;
    if n == 0 {
      self.state = ConnectionState::Closed;
    }
    Ok(n)
  }

  async fn read_until_trailing_newline(&mut self) -> Result<String> {
    let stream = self.stream_mut()?;
    let mut response = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
      let n = stream.read(&mut chunk).await?;
      if n == 0 {
        return Err(Error::ConnectionClosed);
      }
      response.extend_from_slice(&chunk[..n]);
      if response.len() > MAX_RESPONSE_SIZE {
        return Err(Error::ResponseTooLarge(MAX_RESPONSE_SIZE));
      }
      if response.last() == Some(&b'\n') {
        response.pop();
        return decode(response);
      }
    }
  }

  async fn read_until_marker(&mut self, marker: &str) -> Result<String> {
    let stream = self.stream_mut()?;
    let mut lines: Vec<String> = Vec::new();
    let mut line = Vec::new();
    let mut total = 0;

    loop {
      let buf = stream.fill_buf().await?;
      if buf.is_empty() {
        return Err(Error::ConnectionClosed);
      }
      let (taken, complete) = match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => (pos + 1, true),
        None => (buf.len(), false),
      };
      // Checked before buffering so a line without `\n` cannot grow unbounded.
      total += taken;
      if total > MAX_RESPONSE_SIZE {
        return Err(Error::ResponseTooLarge(MAX_RESPONSE_SIZE));
      }
      line.extend_from_slice(&buf[..taken]);
      stream.consume(taken);

      if complete {
        line.pop();
        let text = decode(std::mem::take(&mut line))?;
        if text.trim_end_matches('\r') == marker {
          return Ok(lines.join("\n"));
        }
        lines.push(text);
      }
    }
  }

  fn stream_mut(&mut self) -> Result<&mut BufReader<TcpStream>> {
    match self.state {
      ConnectionState::Unconnected => Err(Error::NotConnected),
      ConnectionState::Closed => Err(Error::ConnectionClosed),
      ConnectionState::Connected => self.stream.as_mut().ok_or(Error::ConnectionClosed),
    }
  }

  /// A transport failure leaves the socket unusable.
  fn on_error<T>(&mut self, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
      if e.is_connection_error() && self.state == ConnectionState::Connected {
        debug!(addr = %self.addr, error = %e, "connection lost");
        self.stream = None;
        self.state = ConnectionState::Closed;
      }
    }
    result
  }
}

fn decode(bytes: Vec<u8>) -> Result<String> {
  String::from_utf8(bytes).map_err(|e| {
    Error::mismatch(
      "UTF-8 text",
      String::from_utf8_lossy(e.as_bytes()).into_owned(),
    )
  })
}
