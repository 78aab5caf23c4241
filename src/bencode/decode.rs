//! Bencode decoder
//!
//! Recursive descent over a byte slice. Each call reports the offset just
//! past the value it consumed so container decoding can resume there.
//! Container nesting is capped at [`MAX_DEPTH`] so hostile input cannot
//! exhaust the stack. Numbers must be canonical: no leading zeros, no `-0`.

use tracing::{trace, warn};

use super::value::{BencodeError, BencodeValue, Dictionary};

/// Deepest list/dictionary nesting accepted
pub const MAX_DEPTH: usize = 512;

/// Decode one value starting at `offset`.
///
/// Returns the value and the offset immediately after it.
pub fn decode(data: &[u8], offset: usize) -> Result<(BencodeValue, usize), BencodeError> {
    let mut idx = offset;
    let value = decode_value(data, &mut idx, 0)?;
    trace!("Decoded {} spanning bytes {}..{}", value.kind(), offset, idx);
    Ok((value, idx))
}

/// Decode the value at the start of `data`, ignoring trailing bytes
pub fn from_bytes(data: &[u8]) -> Result<BencodeValue, BencodeError> {
    let (value, end) = decode(data, 0)?;
    if end != data.len() {
        warn!("Parsed {}/{} bytes, ignoring trailing data", end, data.len());
    }
    Ok(value)
}

fn decode_value(data: &[u8], idx: &mut usize, depth: usize) -> Result<BencodeValue, BencodeError> {
    let byte = *data
        .get(*idx)
        .ok_or(BencodeError::UnexpectedEof { offset: *idx })?;

    if matches!(byte, b'l' | b'd') && depth >= MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep {
            offset: *idx,
            limit: MAX_DEPTH,
        });
    }

    match byte {
        b'0'..=b'9' => decode_string(data, idx).map(BencodeValue::ByteString),
        b'i' => decode_integer(data, idx).map(BencodeValue::Integer),
        b'l' => decode_list(data, idx, depth + 1),
        b'd' => decode_dictionary(data, idx, depth + 1),
        other => Err(BencodeError::UnsupportedType {
            offset: *idx,
            byte: other,
        }),
    }
}

// i<digits>e, optional leading '-'; `i0e` is the only form starting with 0
fn decode_integer(data: &[u8], idx: &mut usize) -> Result<i64, BencodeError> {
    let start = *idx;
    let body_start = start + 1;
    let malformed = BencodeError::MalformedInteger { offset: start };

    let mut cursor = body_start;
    if data.get(cursor) == Some(&b'-') {
        cursor += 1;
    }
    let digits_start = cursor;
    while data.get(cursor).is_some_and(u8::is_ascii_digit) {
        cursor += 1;
    }
    if cursor == digits_start || data.get(cursor) != Some(&b'e') {
        return Err(malformed);
    }
    let negative = digits_start > body_start;
    if data[digits_start] == b'0' && (cursor - digits_start > 1 || negative) {
        return Err(malformed);
    }

    let value = std::str::from_utf8(&data[body_start..cursor])
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(malformed)?;

    *idx = cursor + 1;
    Ok(value)
}

// <len>:<bytes>
fn decode_string(data: &[u8], idx: &mut usize) -> Result<Vec<u8>, BencodeError> {
    let start = *idx;
    let malformed = BencodeError::MalformedString { offset: start };

    let mut colon = start;
    while data.get(colon).is_some_and(u8::is_ascii_digit) {
        colon += 1;
    }
    if data.get(colon) != Some(&b':') {
        return Err(malformed);
    }
    if colon - start > 1 && data[start] == b'0' {
        return Err(malformed);
    }

    let length = std::str::from_utf8(&data[start..colon])
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or(malformed.clone())?;

    let body_start = colon + 1;
    let body_end = body_start
        .checked_add(length)
        .filter(|&end| end <= data.len())
        .ok_or(malformed)?;

    *idx = body_end;
    Ok(data[body_start..body_end].to_vec())
}

fn decode_list(data: &[u8], idx: &mut usize, depth: usize) -> Result<BencodeValue, BencodeError> {
    *idx += 1; // skip 'l'
    let mut list = Vec::new();
    loop {
        match data.get(*idx) {
            None => return Err(BencodeError::UnexpectedEof { offset: *idx }),
            Some(b'e') => {
                *idx += 1;
                return Ok(BencodeValue::List(list));
            }
            Some(_) => list.push(decode_value(data, idx, depth)?),
        }
    }
}

fn decode_dictionary(
    data: &[u8],
    idx: &mut usize,
    depth: usize,
) -> Result<BencodeValue, BencodeError> {
    *idx += 1; // skip 'd'
    let mut dict = Dictionary::new();
    loop {
        match data.get(*idx) {
            None => return Err(BencodeError::UnexpectedEof { offset: *idx }),
            Some(b'e') => {
                *idx += 1;
                return Ok(BencodeValue::Dictionary(dict));
            }
            Some(_) => {
                let key_offset = *idx;
                let key = match decode_value(data, idx, depth)? {
                    BencodeValue::ByteString(key) => key,
                    _ => return Err(BencodeError::InvalidKeyType { offset: key_offset }),
                };
                let value = decode_value(data, idx, depth)?;
                dict.insert(key, value);
            }
        }
    }
}
