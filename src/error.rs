//! Error types for the FluxDB client SDK.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Unreachable host {addr}: {source}")]
  UnreachableHost {
    addr: String,
    #[source]
    source: std::io::Error,
  },

  #[error("Connection closed")]
  ConnectionClosed,

  #[error("Not connected")]
  NotConnected,

  #[error("Malformed document at offset {offset}: {reason}")]
  MalformedDocument { offset: usize, reason: String },

  #[error("Protocol mismatch: expected {expected}, got {response:?}")]
  ProtocolMismatch {
    expected: &'static str,
    response: String,
  },

  #[error("Invalid command: {0}")]
  InvalidCommand(String),

  #[error("Invalid address: {0}")]
  InvalidAddress(String),

  #[error("Response exceeds {0} bytes")]
  ResponseTooLarge(usize),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Serialization error: {0}")]
  Serialization(String),
}

impl Error {
  /// True for failures of the transport itself, as opposed to a server
  /// answer that did not match the expected reply.
  pub fn is_connection_error(&self) -> bool {
    matches!(
      self,
      Error::UnreachableHost { .. }
        | Error::ConnectionClosed
        | Error::NotConnected
        | Error::ResponseTooLarge(_)
        | Error::Io(_)
    )
  }

  pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
    Error::MalformedDocument {
      offset,
      reason: reason.into(),
    }
  }

  pub(crate) fn mismatch(expected: &'static str, response: impl Into<String>) -> Self {
    Error::ProtocolMismatch {
      expected,
      response: response.into(),
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
