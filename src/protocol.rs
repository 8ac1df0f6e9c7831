//! Wire vocabulary of the FluxDB protocol.
//!
//! Every command is a single text line; replies are matched by prefix.
//!
//! ```text
//! AUTH <password>                    -> OK AUTHENTICATED
//! USE <namespace>                    -> OK SWITCHED_TO <namespace>
//! INSERT <json>                      -> OK ID=<id>
//! UPDATE <id> <json>                 -> OK UPDATED
//! DELETE <id>                        -> OK DELETED
//! FIND <json>                        -> OK\n(ID <id> <json>\n)*
//! PUBLISH <channel> <message>        -> OK RECEIVERS=<n>
//! SUBSCRIBE <channel>                -> MESSAGE <channel> <message>\n ...
//! ```

use std::fmt;

use tracing::warn;

use crate::document::{Document, Id};
use crate::error::{Error, Result};
use crate::parser;

/// Default FluxDB server port
pub const DEFAULT_PORT: u16 = 8080;

pub const OK_AUTHENTICATED: &str = "OK AUTHENTICATED";
pub const OK_SWITCHED_TO: &str = "OK SWITCHED_TO";
pub const OK_ID: &str = "OK ID=";
pub const OK_UPDATED: &str = "OK UPDATED";
pub const OK_DELETED: &str = "OK DELETED";
pub const OK: &str = "OK";
pub const OK_RECEIVERS: &str = "OK RECEIVERS=";

const ROW_PREFIX: &str = "ID ";
const MESSAGE_PREFIX: &str = "MESSAGE ";

/// Client-to-server commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
  Auth { password: String },
  Use { namespace: String },
  Insert { document: Document },
  Update { id: Id, document: Document },
  Delete { id: Id },
  Find { filter: Document },
  Publish { channel: String, message: String },
  Subscribe { channel: String },
}

impl Command {
  /// Encode as a request line, without the terminator.
  pub fn encode(&self) -> String {
    self.to_string()
  }

  /// Command verb, as it appears on the wire.
  pub fn name(&self) -> &'static str {
    match self {
      Command::Auth { .. } => "AUTH",
      Command::Use { .. } => "USE",
      Command::Insert { .. } => "INSERT",
      Command::Update { .. } => "UPDATE",
      Command::Delete { .. } => "DELETE",
      Command::Find { .. } => "FIND",
      Command::Publish { .. } => "PUBLISH",
      Command::Subscribe { .. } => "SUBSCRIBE",
    }
  }
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Command::Auth { password } => write!(f, "AUTH {}", password),
      Command::Use { namespace } => write!(f, "USE {}", namespace),
      Command::Insert { document } => write!(f, "INSERT {}", document),
      Command::Update { id, document } => write!(f, "UPDATE {} {}", id, document),
      Command::Delete { id } => write!(f, "DELETE {}", id),
      Command::Find { filter } => write!(f, "FIND {}", filter),
      Command::Publish { channel, message } => write!(f, "PUBLISH {} {}", channel, message),
      Command::Subscribe { channel } => write!(f, "SUBSCRIBE {}", channel),
    }
  }
}

/// Require the reply to equal `expected` exactly.
pub fn expect_exact(response: &str, expected: &'static str) -> Result<()> {
  if response == expected {
    Ok(())
  } else {
    Err(Error::mismatch(expected, response))
  }
}

/// Require the reply to start with `prefix`, returning the remainder.
pub fn expect_prefix<'a>(response: &'a str, prefix: &'static str) -> Result<&'a str> {
  response
    .strip_prefix(prefix)
    .ok_or_else(|| Error::mismatch(prefix, response))
}

/// Decode `OK ID=<id>`.
pub fn parse_insert_reply(response: &str) -> Result<Id> {
  expect_prefix(response, OK_ID)?
    .trim()
    .parse()
    .map_err(|_| Error::mismatch(OK_ID, response))
}

/// Decode `OK RECEIVERS=<n>`. The count is passed through as sent, sign
/// included.
pub fn parse_publish_reply(response: &str) -> Result<i32> {
  expect_prefix(response, OK_RECEIVERS)?
    .trim()
    .parse()
    .map_err(|_| Error::mismatch(OK_RECEIVERS, response))
}

/// Decode a multi-line `FIND` reply.
///
/// A non-`OK` header fails the whole reply. Individual rows that cannot be
/// decoded are skipped with a warning, so one corrupt record only drops
/// itself. Each decoded document carries its id under `_id`.
pub fn parse_find_reply(response: &str) -> Result<Vec<Document>> {
  let mut lines = response.split('\n').map(|l| l.trim_end_matches('\r'));
  let header = lines.next().unwrap_or_default();
  if !header.starts_with(OK) {
    return Err(Error::mismatch(OK, header));
  }

  let mut results = Vec::new();
  for line in lines {
    if !line.starts_with(ROW_PREFIX) {
      continue;
    }
    match parse_row(line) {
      Ok(doc) => results.push(doc),
      Err(e) => warn!(row = line, error = %e, "skipping unparsable FIND row"),
    }
  }
  Ok(results)
}

/// Decode one `ID <id> <json>` row.
pub fn parse_row(line: &str) -> Result<Document> {
  let rest = expect_prefix(line, ROW_PREFIX)?;
  let json_start = rest
    .find('{')
    .ok_or_else(|| Error::malformed(ROW_PREFIX.len(), "row has no document"))?;
  let id: Id = rest[..json_start]
    .trim()
    .parse()
    .map_err(|_| Error::mismatch("ID <id> <json>", line))?;
  let doc = parser::parse(&rest[json_start..]).map_err(|e| match e {
    Error::MalformedDocument { offset, reason } => Error::MalformedDocument {
      offset: offset + ROW_PREFIX.len() + json_start,
      reason,
    },
    other => other,
  })?;
  Ok(doc.with_id(id))
}

/// Server push delivered on a subscribed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
  pub channel: String,
  pub content: String,
}

impl PushMessage {
  /// Decode `MESSAGE <channel> <content>`; the content is everything after
  /// the second space and may itself contain spaces.
  pub fn parse(line: &str) -> Option<Self> {
    let rest = line.strip_prefix(MESSAGE_PREFIX)?;
    let (channel, content) = rest.split_once(' ')?;
    Some(Self {
      channel: channel.to_string(),
      content: content.to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::document::Value;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_encode_commands() {
    let doc = Document::new().with("name", "Acme");
    assert_eq!(
      Command::Auth {
        password: "flux_admin".to_string()
      }
      .encode(),
      "AUTH flux_admin"
    );
    assert_eq!(
      Command::Use {
        namespace: "crm_db".to_string()
      }
      .encode(),
      "USE crm_db"
    );
    assert_eq!(
      Command::Insert {
        document: doc.clone()
      }
      .encode(),
      r#"INSERT {"name":"Acme"}"#
    );
    assert_eq!(
      Command::Update {
        id: 42,
        document: doc.clone()
      }
      .encode(),
      r#"UPDATE 42 {"name":"Acme"}"#
    );
    assert_eq!(Command::Delete { id: 42 }.encode(), "DELETE 42");
    assert_eq!(Command::Find { filter: doc }.encode(), r#"FIND {"name":"Acme"}"#);
    assert_eq!(
      Command::Publish {
        channel: "crm_events".to_string(),
        message: "Lead added".to_string()
      }
      .encode(),
      "PUBLISH crm_events Lead added"
    );
    assert_eq!(
      Command::Subscribe {
        channel: "crm_events".to_string()
      }
      .encode(),
      "SUBSCRIBE crm_events"
    );
  }

  #[test]
  fn test_expect_exact() {
    assert!(expect_exact("OK UPDATED", OK_UPDATED).is_ok());
    assert!(expect_exact("OK UPDATED ", OK_UPDATED).is_err());
    assert!(matches!(
      expect_exact("ERR NOT_FOUND", OK_DELETED),
      Err(Error::ProtocolMismatch { expected: OK_DELETED, .. })
    ));
  }

  #[test]
  fn test_insert_reply() {
    assert_eq!(parse_insert_reply("OK ID=17").unwrap(), 17);
    assert_eq!(parse_insert_reply("OK ID=18446744073709551615").unwrap(), u64::MAX);
    assert!(parse_insert_reply("OK ID=abc").is_err());
    assert!(parse_insert_reply("ERR AUTH_REQUIRED").is_err());
  }

  #[test]
  fn test_publish_reply() {
    assert_eq!(parse_publish_reply("OK RECEIVERS=3").unwrap(), 3);
    assert_eq!(parse_publish_reply("OK RECEIVERS=-1").unwrap(), -1);
    assert!(parse_publish_reply("OK RECEIVERS=").is_err());
    assert!(parse_publish_reply("ERR").is_err());
  }

  #[test]
  fn test_find_reply_skips_bad_rows() {
    let docs = parse_find_reply("OK\nID 7 {\"name\":\"Acme\"}\nID 8 {\"name\":\"Bad").unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id(), Some(7));
    assert_eq!(docs[0].get("name").and_then(Value::as_str), Some("Acme"));
  }

  #[test]
  fn test_find_reply_keeps_order_and_duplicates() {
    let docs = parse_find_reply("OK 2\r\nID 9 {}\r\nnoise\nID 3 {\"a\":1}\nID 9 {}").unwrap();
    let ids: Vec<_> = docs.iter().filter_map(Document::id).collect();
    assert_eq!(ids, vec![9, 3, 9]);
  }

  #[test]
  fn test_find_reply_skips_bad_ids() {
    let docs = parse_find_reply("OK\nID x {}\nID {}\nID 4 {}").unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id(), Some(4));
  }

  #[test]
  fn test_find_reply_requires_ok() {
    assert!(parse_find_reply("ERR NO_DB\nID 1 {}").is_err());
    assert!(parse_find_reply("").is_err());
    assert!(parse_find_reply("OK").unwrap().is_empty());
  }

  #[test]
  fn test_row_error_offset_points_into_line() {
    let err = parse_row("ID 8 {\"name\":}").unwrap_err();
    match err {
      Error::MalformedDocument { offset, .. } => assert_eq!(offset, 13),
      other => panic!("Expected MalformedDocument, got: {:?}", other),
    }
  }

  #[test]
  fn test_push_message() {
    let msg = PushMessage::parse("MESSAGE crm_events Lead moved to Won").unwrap();
    assert_eq!(msg.channel, "crm_events");
    assert_eq!(msg.content, "Lead moved to Won");
    assert!(PushMessage::parse("MESSAGE crm_events").is_none());
    assert!(PushMessage::parse("OK RECEIVERS=1").is_none());
  }
}
