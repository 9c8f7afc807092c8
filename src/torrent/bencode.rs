//! Minimal bencode reader for `.torrent` metainfo

use std::collections::BTreeMap;
use thiserror::Error;

/// Nesting deeper than this is rejected
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(map) => map.get(key.as_bytes()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Lossy UTF-8 view of a byte string
    pub fn as_text(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at byte {0}")]
    Eof(usize),
    #[error("unexpected byte 0x{byte:02x} at {pos}")]
    Unexpected { byte: u8, pos: usize },
    #[error("malformed integer at byte {0}")]
    BadInt(usize),
    #[error("malformed string length at byte {0}")]
    BadLength(usize),
    #[error("dictionary key at byte {0} is not a string")]
    BadKey(usize),
    #[error("nesting too deep")]
    TooDeep,
    #[error("{0} trailing bytes")]
    Trailing(usize),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn peek(&self) -> Result<u8, DecodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::Eof(self.pos))
    }

    /// Bytes up to (not including) `delim`, consuming the delimiter
    fn until(&mut self, delim: u8) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        let offset = self.data[start..]
            .iter()
            .position(|&b| b == delim)
            .ok_or(DecodeError::Eof(self.data.len()))?;
        self.pos = start + offset + 1;
        Ok(&self.data[start..start + offset])
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep);
        }
        let at = self.pos;
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let digits = self.until(b'e')?;
                let text = std::str::from_utf8(digits).map_err(|_| DecodeError::BadInt(at))?;
                let canonical = !text.is_empty()
                    && text != "-0"
                    && !(text.len() > 1 && text.starts_with('0'))
                    && !text.starts_with("-0");
                if !canonical {
                    return Err(DecodeError::BadInt(at));
                }
                text.parse().map(Value::Int).map_err(|_| DecodeError::BadInt(at))
            }
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut map = BTreeMap::new();
                while self.peek()? != b'e' {
                    let key_at = self.pos;
                    let key = match self.value(depth + 1)? {
                        Value::Bytes(k) => k,
                        _ => return Err(DecodeError::BadKey(key_at)),
                    };
                    let value = self.value(depth + 1)?;
                    map.insert(key, value);
                }
                self.pos += 1;
                Ok(Value::Dict(map))
            }
            b'0'..=b'9' => {
                let digits = self.until(b':')?;
                let len: usize = std::str::from_utf8(digits)
                    .ok()
                    .filter(|d| !(d.len() > 1 && d.starts_with('0')))
                    .and_then(|d| d.parse().ok())
                    .ok_or(DecodeError::BadLength(at))?;
                let end = self
                    .pos
                    .checked_add(len)
                    .filter(|end| *end <= self.data.len())
                    .ok_or(DecodeError::Eof(self.data.len()))?;
                let bytes = self.data[self.pos..end].to_vec();
                self.pos = end;
                Ok(Value::Bytes(bytes))
            }
            byte => Err(DecodeError::Unexpected { byte, pos: at }),
        }
    }
}

/// Decode a complete bencoded document
pub fn decode(data: &[u8]) -> Result<Value, DecodeError> {
    let mut reader = Reader { data, pos: 0 };
    let value = reader.value(0)?;
    if reader.pos != data.len() {
        return Err(DecodeError::Trailing(data.len() - reader.pos));
    }
    Ok(value)
}
