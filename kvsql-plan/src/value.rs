//! SQL scalar values and types.

use std::cmp::Ordering;

use arrow::datatypes::DataType;
use bitcode::{Decode, Encode};

/// SQL scalar types supported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub enum SqlType {
    Boolean,
    Int4,
    Int8,
    Float4,
    Float8,
    /// Character data; `length` bounds the character count when present.
    Text { length: Option<u32> },
    /// Raw octets.
    Bytes,
    /// Fixed-point decimal. Values are carried and stored but cannot be used
    /// as index key columns (the key coder has no order-preserving encoding
    /// for them).
    Decimal { precision: u8, scale: u8 },
}

impl SqlType {
    pub fn text() -> Self {
        SqlType::Text { length: None }
    }

    /// The Arrow type used for this SQL type in result-set record shapes.
    pub fn arrow_type(&self) -> DataType {
        match self {
            SqlType::Boolean => DataType::Boolean,
            SqlType::Int4 => DataType::Int32,
            SqlType::Int8 => DataType::Int64,
            SqlType::Float4 => DataType::Float32,
            SqlType::Float8 => DataType::Float64,
            SqlType::Text { .. } => DataType::Utf8,
            SqlType::Bytes => DataType::Binary,
            SqlType::Decimal { precision, scale } => {
                DataType::Decimal128(*precision, *scale as i8)
            }
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlType::Boolean => f.write_str("BOOLEAN"),
            SqlType::Int4 => f.write_str("INT"),
            SqlType::Int8 => f.write_str("BIGINT"),
            SqlType::Float4 => f.write_str("REAL"),
            SqlType::Float8 => f.write_str("DOUBLE"),
            SqlType::Text { length: None } => f.write_str("VARCHAR"),
            SqlType::Text { length: Some(n) } => write!(f, "VARCHAR({n})"),
            SqlType::Bytes => f.write_str("VARBINARY"),
            SqlType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
        }
    }
}

/// One SQL scalar value.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Value {
    Boolean(bool),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytes(Vec<u8>),
    Decimal { unscaled: i64, scale: u8 },
}

impl Value {
    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Boolean(_) => SqlType::Boolean,
            Value::Int4(_) => SqlType::Int4,
            Value::Int8(_) => SqlType::Int8,
            Value::Float4(_) => SqlType::Float4,
            Value::Float8(_) => SqlType::Float8,
            Value::Text(_) => SqlType::text(),
            Value::Bytes(_) => SqlType::Bytes,
            Value::Decimal { scale, .. } => SqlType::Decimal {
                precision: 18,
                scale: *scale,
            },
        }
    }

    /// SQL comparison. Numeric values compare across widths; other types
    /// compare only within their own family. `None` means the operands are
    /// incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int4(v) => Some(*v as f64),
            Value::Int8(v) => Some(*v as f64),
            Value::Float4(v) => Some(*v as f64),
            Value::Float8(v) => Some(*v),
            Value::Decimal { unscaled, scale } => {
                Some(*unscaled as f64 / 10f64.powi(*scale as i32))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_width_numeric_compare() {
        assert_eq!(
            Value::Int4(1).compare(&Value::Int8(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Float8(1.5).compare(&Value::Int4(1)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Text("a".into()).compare(&Value::Int4(1)), None);
    }
}
