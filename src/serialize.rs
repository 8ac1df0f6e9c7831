//! Rendering of values into the protocol's JSON-like text.

use std::fmt::Write;

use crate::document::{Document, Value};

/// Serialize a value.
///
/// Every value has a textual form, so this cannot fail.
pub fn to_string(value: &Value) -> String {
  let mut out = String::new();
  write_value(&mut out, value);
  out
}

/// Serialize a document; `{}` when empty.
pub fn document_to_string(doc: &Document) -> String {
  let mut out = String::new();
  write_document(&mut out, doc);
  out
}

fn write_value(out: &mut String, value: &Value) {
  match value {
    Value::Null => out.push_str("null"),
    Value::Bool(true) => out.push_str("true"),
    Value::Bool(false) => out.push_str("false"),
    Value::Int(i) => {
      let _ = write!(out, "{}", i);
    }
    Value::String(s) => write_string(out, s),
    Value::Document(doc) => write_document(out, doc),
  }
}

fn write_document(out: &mut String, doc: &Document) {
  out.push('{');
  for (i, (name, value)) in doc.iter().enumerate() {
    if i > 0 {
      out.push(',');
    }
    write_string(out, name);
    out.push(':');
    write_value(out, value);
  }
  out.push('}');
}

fn write_string(out: &mut String, s: &str) {
  out.push('"');
  for c in s.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      '\u{08}' => out.push_str("\\b"),
      '\u{0c}' => out.push_str("\\f"),
      c if c.is_ascii_control() => {
        let _ = write!(out, "\\u{:04x}", c as u32);
      }
      c => out.push(c),
    }
  }
  out.push('"');
}
