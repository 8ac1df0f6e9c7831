//! Recursive-descent decoder for the server's document text.
//!
//! The grammar is deliberately narrow: objects whose values are strings,
//! signed integers, `true`, `false`, `null` or nested objects. Arrays and
//! floating point numbers are rejected.

use crate::document::{Document, Value};
use crate::error::{Error, Result};

/// Maximum object nesting accepted before the input is rejected.
pub const MAX_DEPTH: usize = 128;

/// Parse a document, ignoring anything after its closing brace.
pub fn parse(text: &str) -> Result<Document> {
  parse_prefix(text).map(|(doc, _)| doc)
}

/// Parse a document and report how many bytes of `text` it spanned.
pub fn parse_prefix(text: &str) -> Result<(Document, usize)> {
  let mut parser = Parser::new(text);
  parser.skip_whitespace();
  let doc = parser.object(0)?;
  Ok((doc, parser.pos))
}

struct Parser<'a> {
  src: &'a str,
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Parser<'a> {
  fn new(src: &'a str) -> Self {
    Self {
      src,
      bytes: src.as_bytes(),
      pos: 0,
    }
  }

  fn peek(&self) -> Option<u8> {
    self.bytes.get(self.pos).copied()
  }

  fn skip_whitespace(&mut self) {
    while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
      self.pos += 1;
    }
  }

  fn expect(&mut self, byte: u8) -> Result<()> {
    match self.peek() {
      Some(b) if b == byte => {
        self.pos += 1;
        Ok(())
      }
      Some(b) => Err(self.error(format!(
        "expected '{}', found '{}'",
        byte as char,
        b.escape_ascii()
      ))),
      None => Err(self.error(format!("expected '{}', found end of input", byte as char))),
    }
  }

  fn error(&self, reason: impl Into<String>) -> Error {
    Error::malformed(self.pos, reason)
  }

  fn object(&mut self, depth: usize) -> Result<Document> {
    if depth >= MAX_DEPTH {
      return Err(self.error("nesting too deep"));
    }
    self.expect(b'{')?;
    let mut doc = Document::new();

    self.skip_whitespace();
    if self.peek() == Some(b'}') {
      self.pos += 1;
      return Ok(doc);
    }

    loop {
      self.skip_whitespace();
      let field = self.string()?;
      self.skip_whitespace();
      self.expect(b':')?;
      self.skip_whitespace();
      let value = self.value(depth)?;
      doc.insert(field, value);

      self.skip_whitespace();
      match self.peek() {
        Some(b',') => self.pos += 1,
        Some(b'}') => {
          self.pos += 1;
          return Ok(doc);
        }
        Some(_) => return Err(self.error("expected ',' or '}'")),
        None => return Err(self.error("unterminated object")),
      }
    }
  }

  fn value(&mut self, depth: usize) -> Result<Value> {
    match self.peek() {
      Some(b'"') => self.string().map(Value::String),
      Some(b'{') => self.object(depth + 1).map(Value::from),
      Some(b'-' | b'0'..=b'9') => self.integer().map(Value::Int),
      Some(b't') => self.literal("true", Value::Bool(true)),
      Some(b'f') => self.literal("false", Value::Bool(false)),
      Some(b'n') => self.literal("null", Value::Null),
      Some(_) => Err(self.error("expected a value")),
      None => Err(self.error("expected a value, found end of input")),
    }
  }

  fn literal(&mut self, word: &str, value: Value) -> Result<Value> {
    if self.bytes[self.pos..].starts_with(word.as_bytes()) {
      self.pos += word.len();
      Ok(value)
    } else {
      Err(self.error("unknown literal"))
    }
  }

  fn integer(&mut self) -> Result<i64> {
    let start = self.pos;
    if self.peek() == Some(b'-') {
      self.pos += 1;
    }
    let digits = self.pos;
    while let Some(b'0'..=b'9') = self.peek() {
      self.pos += 1;
    }
    if self.pos == digits {
      return Err(self.error("expected digits"));
    }
    if let Some(b'.' | b'e' | b'E') = self.peek() {
      return Err(self.error("floating point numbers are not supported"));
    }
    self.src[start..self.pos]
      .parse()
      .map_err(|_| Error::malformed(start, "integer out of range"))
  }

  fn string(&mut self) -> Result<String> {
    self.expect(b'"')?;
    let mut out = String::new();
    let mut run = self.pos;

    loop {
      match self.peek() {
        None => return Err(self.error("unterminated string")),
        Some(b'"') => {
          out.push_str(&self.src[run..self.pos]);
          self.pos += 1;
          return Ok(out);
        }
        Some(b'\\') => {
          out.push_str(&self.src[run..self.pos]);
          self.pos += 1;
          out.push(self.escape()?);
          run = self.pos;
        }
        Some(b) if b < 0x20 => return Err(self.error("unescaped control character in string")),
        Some(_) => self.pos += 1,
      }
    }
  }

  fn escape(&mut self) -> Result<char> {
    let byte = self
      .peek()
      .ok_or_else(|| self.error("unterminated escape"))?;
    self.pos += 1;
    Ok(match byte {
      b'"' => '"',
      b'\\' => '\\',
      b'/' => '/',
      b'b' => '\u{08}',
      b'f' => '\u{0c}',
      b'n' => '\n',
      b'r' => '\r',
      b't' => '\t',
      b'u' => return self.unicode_escape(),
      _ => {
        self.pos -= 1;
        return Err(self.error("invalid escape"));
      }
    })
  }

  fn unicode_escape(&mut self) -> Result<char> {
    let high = self.hex4()?;
    let code = match high {
      0xD800..=0xDBFF => {
        if !self.bytes[self.pos..].starts_with(b"\\u") {
          return Err(self.error("unpaired surrogate"));
        }
        self.pos += 2;
        let low = self.hex4()?;
        if !(0xDC00..=0xDFFF).contains(&low) {
          return Err(self.error("invalid low surrogate"));
        }
        0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
      }
      0xDC00..=0xDFFF => return Err(self.error("unpaired surrogate")),
      code => code,
    };
    char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape"))
  }

  fn hex4(&mut self) -> Result<u32> {
    let digits = self
      .src
      .get(self.pos..self.pos + 4)
      .ok_or_else(|| self.error("truncated unicode escape"))?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
      return Err(self.error("invalid unicode escape"));
    }
    let code = u32::from_str_radix(digits, 16)
      .map_err(|_| self.error("invalid unicode escape"))?;
    self.pos += 4;
    Ok(code)
  }
}
