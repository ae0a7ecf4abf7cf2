//! Key and row codecs.
//!
//! Keys are encoded so byte-wise comparison agrees with SQL ordering of the
//! component values: each component starts with a null tag (nulls sort
//! lowest), integers are sign-biased big-endian, floats use the IEEE
//! total-order transform, and variable-length data is zero-escaped and
//! zero-terminated so shorter prefixes sort first.
//!
//! Row payloads (non-key columns) do not need ordering and use bitcode.

use kvsql_result::{Error, Result};

use crate::value::{SqlType, Value};

/// Upper bound on one encoded key, matching the storage engine's limit.
pub const MAX_KEY_BYTES: usize = 1024;

const TAG_NULL: u8 = 0x00;
const TAG_VALUE: u8 = 0x01;

/// Whether a column of this type may participate in an index key.
pub fn is_key_encodable(ty: &SqlType) -> bool {
    !matches!(ty, SqlType::Decimal { .. })
}

/// Encode a composite key. Fails with `ValueTooLong` when the encoded form
/// exceeds [`MAX_KEY_BYTES`], and with `InvalidArgument` for non-encodable
/// component types.
pub fn encode_key(components: &[Option<Value>]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(components.len() * 9);
    for component in components {
        match component {
            None => out.push(TAG_NULL),
            Some(value) => {
                out.push(TAG_VALUE);
                encode_component(value, &mut out)?;
            }
        }
        if out.len() > MAX_KEY_BYTES {
            return Err(Error::ValueTooLong(format!(
                "encoded key exceeds {MAX_KEY_BYTES} bytes"
            )));
        }
    }
    Ok(out)
}

fn encode_component(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Boolean(v) => out.push(u8::from(*v)),
        Value::Int4(v) => out.extend_from_slice(&((*v as u32) ^ 0x8000_0000).to_be_bytes()),
        Value::Int8(v) => {
            out.extend_from_slice(&((*v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes())
        }
        Value::Float4(v) => out.extend_from_slice(&order_f32(*v).to_be_bytes()),
        Value::Float8(v) => out.extend_from_slice(&order_f64(*v).to_be_bytes()),
        Value::Text(v) => encode_escaped(v.as_bytes(), out),
        Value::Bytes(v) => encode_escaped(v, out),
        Value::Decimal { .. } => {
            return Err(Error::InvalidArgument(
                "decimal columns are not supported as index keys".into(),
            ))
        }
    }
    Ok(())
}

/// IEEE total-order transform: flips the sign bit of non-negatives and all
/// bits of negatives so unsigned comparison matches numeric order.
fn order_f32(v: f32) -> u32 {
    let bits = v.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

fn order_f64(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    }
}

/// Escape 0x00 as 0x00 0xFF and terminate with 0x00 0x00: the terminator
/// sorts below every escaped byte, so prefixes order first.
fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xFF);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

/// Decode a composite key previously produced by [`encode_key`].
pub fn decode_key(types: &[SqlType], bytes: &[u8]) -> Result<Vec<Option<Value>>> {
    let mut cursor = 0usize;
    let mut out = Vec::with_capacity(types.len());
    for ty in types {
        let tag = *bytes
            .get(cursor)
            .ok_or_else(|| Error::Internal("truncated key: missing component tag".into()))?;
        cursor += 1;
        if tag == TAG_NULL {
            out.push(None);
            continue;
        }
        let (value, consumed) = decode_component(ty, &bytes[cursor..])?;
        cursor += consumed;
        out.push(Some(value));
    }
    Ok(out)
}

fn decode_component(ty: &SqlType, bytes: &[u8]) -> Result<(Value, usize)> {
    let fixed = |n: usize| -> Result<&[u8]> {
        bytes
            .get(..n)
            .ok_or_else(|| Error::Internal("truncated key component".into()))
    };
    match ty {
        SqlType::Boolean => Ok((Value::Boolean(fixed(1)?[0] != 0), 1)),
        SqlType::Int4 => {
            let raw = u32::from_be_bytes(fixed(4)?.try_into().expect("length checked"));
            Ok((Value::Int4((raw ^ 0x8000_0000) as i32), 4))
        }
        SqlType::Int8 => {
            let raw = u64::from_be_bytes(fixed(8)?.try_into().expect("length checked"));
            Ok((Value::Int8((raw ^ 0x8000_0000_0000_0000) as i64), 8))
        }
        SqlType::Float4 => {
            let raw = u32::from_be_bytes(fixed(4)?.try_into().expect("length checked"));
            let bits = if raw & 0x8000_0000 != 0 {
                raw & 0x7FFF_FFFF
            } else {
                !raw
            };
            Ok((Value::Float4(f32::from_bits(bits)), 4))
        }
        SqlType::Float8 => {
            let raw = u64::from_be_bytes(fixed(8)?.try_into().expect("length checked"));
            let bits = if raw & 0x8000_0000_0000_0000 != 0 {
                raw & 0x7FFF_FFFF_FFFF_FFFF
            } else {
                !raw
            };
            Ok((Value::Float8(f64::from_bits(bits)), 8))
        }
        SqlType::Text { .. } => {
            let (raw, consumed) = decode_escaped(bytes)?;
            let text = String::from_utf8(raw)
                .map_err(|_| Error::Internal("key component is not valid UTF-8".into()))?;
            Ok((Value::Text(text), consumed))
        }
        SqlType::Bytes => {
            let (raw, consumed) = decode_escaped(bytes)?;
            Ok((Value::Bytes(raw), consumed))
        }
        SqlType::Decimal { .. } => Err(Error::InvalidArgument(
            "decimal columns are not supported as index keys".into(),
        )),
    }
}

fn decode_escaped(bytes: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = 0usize;
    loop {
        let b = *bytes
            .get(i)
            .ok_or_else(|| Error::Internal("unterminated key component".into()))?;
        if b != 0x00 {
            out.push(b);
            i += 1;
            continue;
        }
        let next = *bytes
            .get(i + 1)
            .ok_or_else(|| Error::Internal("unterminated key escape".into()))?;
        i += 2;
        match next {
            0x00 => return Ok((out, i)),
            0xFF => out.push(0x00),
            other => {
                return Err(Error::Internal(format!(
                    "invalid key escape byte {other:#04x}"
                )))
            }
        }
    }
}

/// Encode a row payload (the non-key columns, in table column order).
pub fn encode_row(values: &[Option<Value>]) -> Vec<u8> {
    bitcode::encode(&values.to_vec())
}

/// Decode a row payload.
pub fn decode_row(bytes: &[u8]) -> Result<Vec<Option<Value>>> {
    bitcode::decode(bytes)
        .map_err(|err| Error::Internal(format!("failed to decode row payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(values: &[Option<Value>]) -> Vec<u8> {
        encode_key(values).unwrap()
    }

    #[test]
    fn test_int_key_order() {
        let keys = [
            key(&[Some(Value::Int8(i64::MIN))]),
            key(&[Some(Value::Int8(-1))]),
            key(&[Some(Value::Int8(0))]),
            key(&[Some(Value::Int8(1))]),
            key(&[Some(Value::Int8(i64::MAX))]),
        ];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_float_key_order() {
        let keys = [
            key(&[Some(Value::Float8(f64::NEG_INFINITY))]),
            key(&[Some(Value::Float8(-2.5))]),
            key(&[Some(Value::Float8(0.0))]),
            key(&[Some(Value::Float8(3.25))]),
            key(&[Some(Value::Float8(f64::INFINITY))]),
        ];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_null_sorts_lowest_and_text_prefix_first() {
        assert!(key(&[None]) < key(&[Some(Value::Int4(i32::MIN))]));
        assert!(key(&[Some(Value::Text("ab".into()))]) < key(&[Some(Value::Text("abc".into()))]));
        assert!(
            key(&[Some(Value::Text("a\0b".into()))]) < key(&[Some(Value::Text("a\0c".into()))])
        );
    }

    #[test]
    fn test_key_round_trip() {
        let components = vec![
            Some(Value::Int4(42)),
            None,
            Some(Value::Text("hello\0world".into())),
            Some(Value::Boolean(true)),
        ];
        let types = vec![SqlType::Int4, SqlType::Int8, SqlType::text(), SqlType::Boolean];
        let encoded = encode_key(&components).unwrap();
        assert_eq!(decode_key(&types, &encoded).unwrap(), components);
    }

    #[test]
    fn test_key_length_limit() {
        let oversized = "x".repeat(MAX_KEY_BYTES + 1);
        let err = encode_key(&[Some(Value::Text(oversized))]).unwrap_err();
        assert!(matches!(err, Error::ValueTooLong(_)));
    }

    #[test]
    fn test_row_round_trip() {
        let row = vec![
            Some(Value::Float8(1.5)),
            None,
            Some(Value::Decimal {
                unscaled: 12345,
                scale: 2,
            }),
        ];
        assert_eq!(decode_row(&encode_row(&row)).unwrap(), row);
    }
}
