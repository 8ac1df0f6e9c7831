//! Tagged values and insertion-ordered documents.

use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{Error, Result};

/// Server-assigned record identifier.
pub type Id = u64;

/// Reserved field carrying the record identifier on documents returned by `find`.
pub const ID_FIELD: &str = "_id";

/// A value stored inside a [`Document`].
///
/// Nested documents are shared through an `Arc`, so cloning a value never
/// copies the subtree underneath it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Int(i64),
  String(String),
  Document(Arc<Document>),
}

impl Value {
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_document(&self) -> Option<&Document> {
    match self {
      Value::Document(d) => Some(d),
      _ => None,
    }
  }

  /// Name of the variant, used in diagnostics.
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "bool",
      Value::Int(_) => "int",
      Value::String(_) => "string",
      Value::Document(_) => "document",
    }
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Int(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Int(v.into())
  }
}

impl From<u32> for Value {
  fn from(v: u32) -> Self {
    Value::Int(v.into())
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::String(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::String(v)
  }
}

impl From<Document> for Value {
  fn from(v: Document) -> Self {
    Value::Document(Arc::new(v))
  }
}

impl From<Arc<Document>> for Value {
  fn from(v: Arc<Document>) -> Self {
    Value::Document(v)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    v.map(Into::into).unwrap_or(Value::Null)
  }
}

/// Insertion-ordered mapping from field name to [`Value`].
///
/// Field names are unique: inserting an existing name replaces its value but
/// keeps its position. Order only matters for serialization, so equality
/// ignores it.
#[derive(Debug, Clone, Default)]
pub struct Document {
  fields: Vec<(String, Value)>,
}

impl Document {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  ///
  /// ```
  /// use fluxdb::Document;
  ///
  /// let lead = Document::new().with("name", "Acme").with("value", 5000);
  /// assert_eq!(lead.to_json(), r#"{"name":"Acme","value":5000}"#);
  /// ```
  pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(field, value);
    self
  }

  /// Insert or replace a field, returning the previous value.
  pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
    let field = field.into();
    let value = value.into();
    match self.fields.iter_mut().find(|(name, _)| *name == field) {
      Some((_, slot)) => Some(std::mem::replace(slot, value)),
      None => {
        self.fields.push((field, value));
        None
      }
    }
  }

  pub fn get(&self, field: &str) -> Option<&Value> {
    self
      .fields
      .iter()
      .find(|(name, _)| name == field)
      .map(|(_, value)| value)
  }

  pub fn remove(&mut self, field: &str) -> Option<Value> {
    let pos = self.fields.iter().position(|(name, _)| name == field)?;
    Some(self.fields.remove(pos).1)
  }

  pub fn contains_key(&self, field: &str) -> bool {
    self.get(field).is_some()
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.fields.iter().map(|(name, value)| (name.as_str(), value))
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.fields.iter().map(|(name, _)| name.as_str())
  }

  /// The server identifier stored under [`ID_FIELD`], if any.
  pub fn id(&self) -> Option<Id> {
    self.get(ID_FIELD).and_then(Value::as_i64).map(|raw| raw as Id)
  }

  /// Attach a server identifier under [`ID_FIELD`].
  ///
  /// The id is stored as the bit pattern of an `i64`, which [`Document::id`]
  /// reverses, so ids above `i64::MAX` survive.
  pub fn with_id(mut self, id: Id) -> Self {
    self.insert(ID_FIELD, Value::Int(id as i64));
    self
  }

  /// Copy of this document without the reserved identifier field.
  pub(crate) fn without_id(&self) -> Document {
    Document {
      fields: self
        .fields
        .iter()
        .filter(|(name, _)| name != ID_FIELD)
        .cloned()
        .collect(),
    }
  }

  /// Serialize to the protocol's JSON-like text.
  pub fn to_json(&self) -> String {
    crate::serialize::document_to_string(self)
  }
}

impl PartialEq for Document {
  fn eq(&self, other: &Self) -> bool {
    self.len() == other.len()
      && self
        .iter()
        .all(|(name, value)| other.get(name) == Some(value))
  }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut doc = Document::new();
    for (field, value) in iter {
      doc.insert(field, value);
    }
    doc
  }
}

impl IntoIterator for Document {
  type Item = (String, Value);
  type IntoIter = std::vec::IntoIter<(String, Value)>;

  fn into_iter(self) -> Self::IntoIter {
    self.fields.into_iter()
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&crate::serialize::to_string(self))
  }
}

impl fmt::Display for Document {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_json())
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match self {
      Value::Null => serializer.serialize_unit(),
      Value::Bool(b) => serializer.serialize_bool(*b),
      Value::Int(i) => serializer.serialize_i64(*i),
      Value::String(s) => serializer.serialize_str(s),
      Value::Document(d) => d.serialize(serializer),
    }
  }
}

impl Serialize for Document {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.len()))?;
    for (name, value) in self.iter() {
      map.serialize_entry(name, value)?;
    }
    map.end()
  }
}

impl TryFrom<serde_json::Value> for Value {
  type Error = Error;

  /// Arrays, floats and integers outside `i64` have no wire representation
  /// and are rejected.
  fn try_from(json: serde_json::Value) -> Result<Self> {
    match json {
      serde_json::Value::Null => Ok(Value::Null),
      serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
      serde_json::Value::Number(n) => n
        .as_i64()
        .map(Value::Int)
        .ok_or_else(|| Error::Serialization(format!("unsupported number: {}", n))),
      serde_json::Value::String(s) => Ok(Value::String(s)),
      serde_json::Value::Array(_) => Err(Error::Serialization(
        "arrays are not supported".to_string(),
      )),
      obj @ serde_json::Value::Object(_) => Document::try_from(obj).map(Value::from),
    }
  }
}

impl TryFrom<serde_json::Value> for Document {
  type Error = Error;

  fn try_from(json: serde_json::Value) -> Result<Self> {
    match json {
      serde_json::Value::Object(map) => {
        let mut doc = Document::new();
        for (field, value) in map {
          doc.insert(field, Value::try_from(value)?);
        }
        Ok(doc)
      }
      other => Err(Error::Serialization(format!(
        "expected an object, got {}",
        other
      ))),
    }
  }
}
