//! In-process FluxDB server used by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fluxdb::{ConnectOptions, Document, Framing, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "flux_admin";

/// Test timeout to prevent hanging tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Store {
  next_id: u64,
  records: Vec<(u64, Document)>,
  subscribers: HashMap<String, usize>,
}

type Shared = Arc<Mutex<Store>>;

/// A small but behaving FluxDB: password check, records, FIND with
/// equality and `$gt`/`$lt`/`$ne`, PUBLISH/SUBSCRIBE.
pub struct MockServer {
  pub port: u16,
  marker: Option<String>,
  store: Shared,
}

impl MockServer {
  pub async fn start() -> Self {
    Self::start_with_marker(None).await
  }

  /// Terminate every reply with a line holding `marker`.
  pub async fn start_with_marker(marker: Option<&str>) -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let store: Shared = Arc::new(Mutex::new(Store {
      next_id: 1,
      ..Default::default()
    }));
    let (events, _) = broadcast::channel::<(String, String)>(256);
    let marker = marker.map(str::to_string);

    {
      let store = store.clone();
      let marker = marker.clone();
      tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
          tokio::spawn(handle(socket, store.clone(), events.clone(), marker.clone()));
        }
      });
    }

    Self {
      port,
      marker,
      store,
    }
  }

  pub fn options(&self) -> ConnectOptions {
    let opts = ConnectOptions::new("127.0.0.1", self.port).with_auth(PASSWORD);
    match &self.marker {
      Some(marker) => opts.with_framing(Framing::TerminatorLine(marker.clone())),
      None => opts,
    }
  }

  pub fn subscribers(&self, channel: &str) -> usize {
    let store = self.store.lock().unwrap();
    store.subscribers.get(channel).copied().unwrap_or(0)
  }

  pub fn record_count(&self) -> usize {
    self.store.lock().unwrap().records.len()
  }

  /// Wait until `channel` has `count` subscribers.
  pub async fn wait_for_subscribers(&self, channel: &str, count: usize) {
    wait_until(|| self.subscribers(channel) == count).await;
  }
}

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] expires.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
  let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
  while !condition() {
    assert!(tokio::time::Instant::now() < deadline, "Test timed out");
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}

async fn handle(
  socket: TcpStream,
  store: Shared,
  events: broadcast::Sender<(String, String)>,
  marker: Option<String>,
) {
  let (read, mut write) = socket.into_split();
  let mut lines = BufReader::new(read).lines();
  let mut authenticated = false;

  while let Ok(Some(line)) = lines.next_line().await {
    let (verb, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
    let reply = match verb {
      "AUTH" if rest == PASSWORD => {
        authenticated = true;
        "OK AUTHENTICATED".to_string()
      }
      "AUTH" => "ERR INVALID_PASSWORD".to_string(),
      _ if !authenticated => "ERR AUTH_REQUIRED".to_string(),
      "USE" => format!("OK SWITCHED_TO {}", rest),
      "INSERT" => match fluxdb::parse(rest) {
        Ok(doc) => {
          let mut store = store.lock().unwrap();
          let id = store.next_id;
          store.next_id += 1;
          store.records.push((id, doc));
          format!("OK ID={}", id)
        }
        Err(_) => "ERR INVALID_JSON".to_string(),
      },
      "UPDATE" => {
        let parsed = rest
          .split_once(' ')
          .and_then(|(id, json)| Some((id.parse::<u64>().ok()?, fluxdb::parse(json).ok()?)));
        match parsed {
          Some((id, doc)) => {
            let mut store = store.lock().unwrap();
            match store.records.iter_mut().find(|(rid, _)| *rid == id) {
              Some((_, slot)) => {
                *slot = doc;
                "OK UPDATED".to_string()
              }
              None => "ERR NOT_FOUND".to_string(),
            }
          }
          None => "ERR INVALID_ARGS".to_string(),
        }
      }
      "DELETE" => {
        let mut store = store.lock().unwrap();
        let before = store.records.len();
        let id = rest.parse::<u64>().unwrap_or(0);
        store.records.retain(|(rid, _)| *rid != id);
        if store.records.len() < before {
          "OK DELETED".to_string()
        } else {
          "ERR NOT_FOUND".to_string()
        }
      }
      "FIND" => match fluxdb::parse(rest) {
        Ok(filter) => {
          let store = store.lock().unwrap();
          let mut out = String::from("OK");
          for (id, doc) in store.records.iter().filter(|(_, d)| matches(d, &filter)) {
            out.push_str(&format!("\nID {} {}", id, doc.to_json()));
          }
          out
        }
        Err(_) => "ERR INVALID_JSON".to_string(),
      },
      "PUBLISH" => {
        let (channel, message) = rest.split_once(' ').unwrap_or((rest, ""));
        let receivers = {
          let store = store.lock().unwrap();
          store.subscribers.get(channel).copied().unwrap_or(0)
        };
        let _ = events.send((channel.to_string(), message.to_string()));
        format!("OK RECEIVERS={}", receivers)
      }
      "SUBSCRIBE" => {
        stream_messages(rest.to_string(), &mut lines, &mut write, &store, &events).await;
        return;
      }
      _ => "ERR UNKNOWN_COMMAND".to_string(),
    };

    let framed = match &marker {
      Some(marker) => format!("{}\n{}\n", reply, marker),
      None => format!("{}\n", reply),
    };
    if write.write_all(framed.as_bytes()).await.is_err() {
      return;
    }
  }
}

async fn stream_messages(
  channel: String,
  lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
  write: &mut tokio::net::tcp::OwnedWriteHalf,
  store: &Shared,
  events: &broadcast::Sender<(String, String)>,
) {
  let mut rx = events.subscribe();
  *store
    .lock()
    .unwrap()
    .subscribers
    .entry(channel.clone())
    .or_default() += 1;

  loop {
    tokio::select! {
      event = rx.recv() => match event {
        Ok((ch, message)) if ch == channel => {
          let line = format!("MESSAGE {} {}\n", ch, message);
          if write.write_all(line.as_bytes()).await.is_err() {
            break;
          }
        }
        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        Err(broadcast::error::RecvError::Closed) => break,
      },
      line = lines.next_line() => {
        if !matches!(line, Ok(Some(_))) {
          break;
        }
      }
    }
  }

  if let Some(count) = store.lock().unwrap().subscribers.get_mut(&channel) {
    *count -= 1;
  }
}

fn matches(doc: &Document, filter: &Document) -> bool {
  filter.iter().all(|(field, expected)| {
    let actual = doc.get(field);
    match expected.as_document() {
      Some(expr) if expr.len() == 1 => {
        let (op, operand) = expr.iter().next().unwrap();
        let (Some(a), Some(b)) = (actual.and_then(Value::as_i64), operand.as_i64()) else {
          return op == "$ne" && actual != Some(operand);
        };
        match op {
          "$gt" => a > b,
          "$lt" => a < b,
          "$ne" => a != b,
          _ => false,
        }
      }
      _ => actual == Some(expected),
    }
  })
}

/// Accept one connection; answer the n-th request line with `replies[n]`
/// written verbatim. Resolves to the request lines received.
pub async fn scripted(replies: Vec<&'static str>) -> (ConnectOptions, JoinHandle<Vec<String>>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  let handle = tokio::spawn(async move {
    let (socket, _) = listener.accept().await.unwrap();
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut received = Vec::new();
    for reply in replies {
      match lines.next_line().await {
        Ok(Some(line)) => received.push(line),
        _ => break,
      }
      write.write_all(reply.as_bytes()).await.unwrap();
    }
    received
  });
  (ConnectOptions::new("127.0.0.1", port), handle)
}
