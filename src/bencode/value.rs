//! Bencode value model

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Dictionary representation; `BTreeMap` keeps keys in byte order, which is
/// the canonical bencode order. Input key order is not kept. Callers that
/// need the exact input bytes (the info hash) slice them from the source
/// using the offsets `decode` reports.
pub type Dictionary = BTreeMap<Vec<u8>, BencodeValue>;

/// A decoded bencode value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    Integer(i64),
    ByteString(Vec<u8>),
    List(Vec<BencodeValue>),
    Dictionary(Dictionary),
}

impl BencodeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::ByteString(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string contents, only if they are valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            BencodeValue::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Look up `key` if this value is a dictionary
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// Short name of the value kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            BencodeValue::Integer(_) => "integer",
            BencodeValue::ByteString(_) => "byte string",
            BencodeValue::List(_) => "list",
            BencodeValue::Dictionary(_) => "dictionary",
        }
    }

    /// Canonical encoding of this value
    pub fn encode(&self) -> Vec<u8> {
        super::encode(self)
    }
}

impl From<i64> for BencodeValue {
    fn from(value: i64) -> Self {
        BencodeValue::Integer(value)
    }
}

impl From<&str> for BencodeValue {
    fn from(value: &str) -> Self {
        BencodeValue::ByteString(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for BencodeValue {
    fn from(value: Vec<u8>) -> Self {
        BencodeValue::ByteString(value)
    }
}

// Byte strings are rendered as (lossy) UTF-8 text so decoded values can be
// printed as JSON.
impl Serialize for BencodeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BencodeValue::Integer(i) => serializer.serialize_i64(*i),
            BencodeValue::ByteString(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            BencodeValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            BencodeValue::Dictionary(dict) => {
                let mut map = serializer.serialize_map(Some(dict.len()))?;
                for (key, value) in dict {
                    map.serialize_entry(&String::from_utf8_lossy(key), value)?;
                }
                map.end()
            }
        }
    }
}

/// Bencode decoding errors; `offset` is the position of the offending value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeError {
    /// `i...e` without a terminating `e`, a non-numeric body, a leading
    /// zero or `-0`
    MalformedInteger { offset: usize },
    /// Length prefix without `:`, with a leading zero, or declaring more
    /// bytes than remain
    MalformedString { offset: usize },
    /// Leading byte is none of digit, `i`, `l`, `d`
    UnsupportedType { offset: usize, byte: u8 },
    /// Dictionary key that is not a byte string
    InvalidKeyType { offset: usize },
    /// Input ended inside a value or container
    UnexpectedEof { offset: usize },
    /// Containers nested deeper than the decoder allows
    NestingTooDeep { offset: usize, limit: usize },
}

impl fmt::Display for BencodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BencodeError::MalformedInteger { offset } => {
                write!(f, "malformed integer at offset {}", offset)
            }
            BencodeError::MalformedString { offset } => {
                write!(f, "malformed byte string at offset {}", offset)
            }
            BencodeError::UnsupportedType { offset, byte } => {
                write!(f, "unsupported type byte 0x{:02x} at offset {}", byte, offset)
            }
            BencodeError::InvalidKeyType { offset } => {
                write!(f, "dictionary key at offset {} is not a byte string", offset)
            }
            BencodeError::UnexpectedEof { offset } => {
                write!(f, "unexpected end of input at offset {}", offset)
            }
            BencodeError::NestingTooDeep { offset, limit } => {
                write!(f, "container at offset {} nests deeper than {} levels", offset, limit)
            }
        }
    }
}

impl std::error::Error for BencodeError {}
