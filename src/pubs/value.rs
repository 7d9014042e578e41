//! Tagged metric values

use super::meta::ValType;
use crate::wire::codec::{WireError, WireReader, WireWriter, F64_LEN, I32_LEN, I64_LEN};

/// A metric value. The variant is the type, so the two can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn val_type(&self) -> ValType {
        match self {
            Value::Int(_) => ValType::Int,
            Value::Long(_) => ValType::Long,
            Value::Double(_) => ValType::Double,
            Value::Str(_) => ValType::String,
            Value::Bytes(_) => ValType::Bytes,
        }
    }

    /// Encoded byte length; strings count their terminator.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::Int(_) => I32_LEN,
            Value::Long(_) => I64_LEN,
            Value::Double(_) => F64_LEN,
            Value::Str(s) => s.len() + 1,
            Value::Bytes(b) => b.len(),
        }
    }

    /// Byte-for-byte equality of the encoded forms.
    pub fn same_encoding(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    /// Write `int32 val_len` followed by the encoded value.
    pub fn encode(&self, w: &mut WireWriter) -> Result<(), WireError> {
        match self {
            Value::Int(v) => {
                w.put_i32(I32_LEN as i32);
                w.put_i32(*v);
            }
            Value::Long(v) => {
                w.put_i32(I64_LEN as i32);
                w.put_i64(*v);
            }
            Value::Double(v) => {
                w.put_i32(F64_LEN as i32);
                w.put_f64(*v);
            }
            Value::Str(s) => w.put_str(s)?,
            Value::Bytes(b) => w.put_blob(b)?,
        }
        Ok(())
    }

    /// Read a value written by [`Value::encode`] for an element of type `ty`.
    pub fn decode(r: &mut WireReader<'_>, ty: ValType) -> Result<Value, WireError> {
        match ty {
            ValType::Int => {
                expect_len(r.get_i32()?, I32_LEN)?;
                Ok(Value::Int(r.get_i32()?))
            }
            ValType::Long => {
                expect_len(r.get_i32()?, I64_LEN)?;
                Ok(Value::Long(r.get_i64()?))
            }
            ValType::Double => {
                expect_len(r.get_i32()?, F64_LEN)?;
                Ok(Value::Double(r.get_f64()?))
            }
            ValType::String => Ok(Value::Str(r.get_str()?)),
            ValType::Bytes => Ok(Value::Bytes(r.get_blob()?)),
        }
    }
}

fn expect_len(len: i32, expected: usize) -> Result<(), WireError> {
    if len as usize != expected || len < 0 {
        return Err(WireError::InvalidLength(len));
    }
    Ok(())
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
