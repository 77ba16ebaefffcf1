//! Deterministic CBOR for content hashing.
//!
//! A `Serialize` value is first lowered into `ciborium::Value`, then written
//! following RFC 8949 §4.2.1 (core deterministic encoding):
//! - every length and integer uses the shortest head
//! - no indefinite-length items
//! - map entries ordered by the bytes of their encoded keys
//!
//! Floats are always written as 8-byte doubles, with `-0.0` folded into
//! `0.0` and all NaNs into the canonical NaN. As a result struct field
//! order, map insertion order, and JSON whitespace in the source never
//! change the output.

use ciborium::value::Value;
use serde::Serialize;

use crate::error::HashError;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;
const FLOAT64: u8 = 0xfb;

/// Canonical CBOR bytes of `value`.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    let value = Value::serialized(value).map_err(|e| HashError::Serialization(e.to_string()))?;
    let mut out = Writer::default();
    out.value(&value)?;
    Ok(out.0)
}

#[derive(Default)]
struct Writer(Vec<u8>);

impl Writer {
    /// Initial byte plus the shortest argument encoding for `arg`.
    fn head(&mut self, major: u8, arg: u64) {
        let major = major << 5;
        if arg < 24 {
            self.0.push(major | arg as u8);
        } else if let Ok(a) = u8::try_from(arg) {
            self.0.extend_from_slice(&[major | 24, a]);
        } else if let Ok(a) = u16::try_from(arg) {
            self.0.push(major | 25);
            self.0.extend_from_slice(&a.to_be_bytes());
        } else if let Ok(a) = u32::try_from(arg) {
            self.0.push(major | 26);
            self.0.extend_from_slice(&a.to_be_bytes());
        } else {
            self.0.push(major | 27);
            self.0.extend_from_slice(&arg.to_be_bytes());
        }
    }

    fn value(&mut self, value: &Value) -> Result<(), HashError> {
        match value {
            Value::Integer(i) => {
                let n = i128::from(*i);
                // Negative n is stored as -1 - n.
                match u64::try_from(n) {
                    Ok(u) => self.head(MAJOR_UNSIGNED, u),
                    Err(_) => self.head(MAJOR_NEGATIVE, (-1 - n) as u64),
                }
            }
            Value::Bytes(b) => {
                self.head(MAJOR_BYTES, b.len() as u64);
                self.0.extend_from_slice(b);
            }
            Value::Text(s) => {
                self.head(MAJOR_TEXT, s.len() as u64);
                self.0.extend_from_slice(s.as_bytes());
            }
            Value::Array(items) => {
                self.head(MAJOR_ARRAY, items.len() as u64);
                for item in items {
                    self.value(item)?;
                }
            }
            Value::Map(entries) => self.map(entries)?,
            Value::Bool(b) => self.0.push(if *b { TRUE } else { FALSE }),
            Value::Null => self.0.push(NULL),
            Value::Float(f) => {
                let f = if *f == 0.0 {
                    0.0
                } else if f.is_nan() {
                    f64::NAN
                } else {
                    *f
                };
                self.0.push(FLOAT64);
                self.0.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Value::Tag(..) => return Err(HashError::Unsupported("tagged value")),
            _ => return Err(HashError::Unsupported("unknown CBOR value")),
        }
        Ok(())
    }

    fn map(&mut self, entries: &[(Value, Value)]) -> Result<(), HashError> {
        let mut sorted = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let mut encoded = Writer::default();
            encoded.value(key)?;
            sorted.push((encoded.0, value));
        }
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        self.head(MAJOR_MAP, sorted.len() as u64);
        for (key, value) in sorted {
            self.0.extend_from_slice(&key);
            self.value(value)?;
        }
        Ok(())
    }
}
