//! # Value Types and Record Encoding
//!
//! This module defines `Value`, the dynamically typed cell value used by the
//! executor, and the on-page record format rows are serialized into.
//!
//! ## Record Format
//!
//! A record is a column count followed by one tagged field per column:
//!
//! ```text
//! +----------------+------------------------------------------+
//! | col_count: u16 | fields...                                |
//! +----------------+------------------------------------------+
//!
//! field := tag: u8, payload
//!   0x00 NULL     (no payload)
//!   0x01 INTEGER  (i64, little-endian)
//!   0x02 REAL     (f64, little-endian)
//!   0x03 TEXT     (u32 length, UTF-8 bytes)
//!   0x04 BLOB     (u32 length, bytes)
//! ```
//!
//! All multi-byte values are little-endian. Decoding validates lengths
//! against the record slice, so a truncated or corrupted record surfaces as
//! an error rather than a panic.

use eyre::{bail, ensure, Result};

const TAG_NULL: u8 = 0x00;
const TAG_INTEGER: u8 = 0x01;
const TAG_REAL: u8 = 0x02;
const TAG_TEXT: u8 = 0x03;
const TAG_BLOB: u8 = 0x04;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }

    /// Comparison used by WHERE predicates. NULL compares equal to nothing,
    /// including NULL; mixed numeric comparisons promote integers to reals.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Real(a), Real(b)) => a.partial_cmp(b),
            (Integer(a), Real(b)) => (*a as f64).partial_cmp(b),
            (Real(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Blob(a), Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => {
                write!(f, "x'")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
        }
    }
}

/// Serializes a row of values into `out`.
pub fn encode_record(values: &[Value], out: &mut Vec<u8>) -> Result<()> {
    ensure!(
        values.len() <= u16::MAX as usize,
        "row has too many columns: {}",
        values.len()
    );

    out.extend_from_slice(&(values.len() as u16).to_le_bytes());

    for value in values {
        match value {
            Value::Null => out.push(TAG_NULL),
            Value::Integer(i) => {
                out.push(TAG_INTEGER);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Real(r) => {
                out.push(TAG_REAL);
                out.extend_from_slice(&r.to_le_bytes());
            }
            Value::Text(s) => {
                ensure!(s.len() <= u32::MAX as usize, "text value too large");
                out.push(TAG_TEXT);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                ensure!(b.len() <= u32::MAX as usize, "blob value too large");
                out.push(TAG_BLOB);
                out.extend_from_slice(&(b.len() as u32).to_le_bytes());
                out.extend_from_slice(b);
            }
        }
    }

    Ok(())
}

/// Deserializes a record previously written by [`encode_record`].
pub fn decode_record(data: &[u8]) -> Result<Vec<Value>> {
    ensure!(data.len() >= 2, "record truncated: {} bytes", data.len());

    let col_count = u16::from_le_bytes([data[0], data[1]]) as usize;
    let mut values = Vec::with_capacity(col_count);
    let mut pos = 2;

    for col in 0..col_count {
        ensure!(pos < data.len(), "record truncated at column {}", col);
        let tag = data[pos];
        pos += 1;

        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_INTEGER => {
                ensure!(pos + 8 <= data.len(), "record truncated at column {}", col);
                let v = i64::from_le_bytes(data[pos..pos + 8].try_into()?);
                pos += 8;
                Value::Integer(v)
            }
            TAG_REAL => {
                ensure!(pos + 8 <= data.len(), "record truncated at column {}", col);
                let v = f64::from_le_bytes(data[pos..pos + 8].try_into()?);
                pos += 8;
                Value::Real(v)
            }
            TAG_TEXT | TAG_BLOB => {
                ensure!(pos + 4 <= data.len(), "record truncated at column {}", col);
                let len = u32::from_le_bytes(data[pos..pos + 4].try_into()?) as usize;
                pos += 4;
                ensure!(
                    pos + len <= data.len(),
                    "record field overruns buffer at column {}",
                    col
                );
                let bytes = &data[pos..pos + len];
                pos += len;
                if tag == TAG_TEXT {
                    Value::Text(String::from_utf8(bytes.to_vec())?)
                } else {
                    Value::Blob(bytes.to_vec())
                }
            }
            other => bail!("unknown record field tag {:#04x} at column {}", other, col),
        };

        values.push(value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip_all_types() {
        let values = vec![
            Value::Null,
            Value::Integer(-42),
            Value::Real(3.25),
            Value::Text("hello".to_string()),
            Value::Blob(vec![0xDE, 0xAD]),
        ];

        let mut buf = Vec::new();
        encode_record(&values, &mut buf).unwrap();

        let decoded = decode_record(&buf).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn empty_row_roundtrip() {
        let mut buf = Vec::new();
        encode_record(&[], &mut buf).unwrap();
        assert_eq!(decode_record(&buf).unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let values = vec![Value::Text("payload".to_string())];
        let mut buf = Vec::new();
        encode_record(&values, &mut buf).unwrap();

        let result = decode_record(&buf[..buf.len() - 3]);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let buf = vec![1, 0, 0xFF];
        let result = decode_record(&buf);
        assert!(result.unwrap_err().to_string().contains("unknown record"));
    }

    #[test]
    fn null_compares_to_nothing() {
        assert!(Value::Null.compare(&Value::Null).is_none());
        assert!(Value::Integer(1).compare(&Value::Null).is_none());
    }

    #[test]
    fn mixed_numeric_comparison_promotes() {
        use std::cmp::Ordering;
        assert_eq!(
            Value::Integer(2).compare(&Value::Real(1.5)),
            Some(Ordering::Greater)
        );
    }
}
