use std::fmt;

use serde::{Deserialize, Serialize};

use crate::convert;

/// A single typed entry as held by a store.
///
/// Every entry carries exactly one primitive tag. Reading it back as a
/// different tag is a type mismatch, not a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    // TOML integers are signed 64-bit
    U64(#[serde(with = "u64_text")] u64),
    Str(String),
}

impl Value {
    /// Number of bytes a store reports for writing this entry. Text counts
    /// its terminator, so a successful write is never zero.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::I8(_) | Value::U8(_) => 1,
            Value::I16(_) | Value::U16(_) => 2,
            Value::I32(_) | Value::U32(_) => 4,
            Value::I64(_) | Value::U64(_) => 8,
            Value::Str(s) => s.len() + 1,
        }
    }
}

mod u64_text {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// A type that can back a [`Pref`](crate::Pref).
///
/// Implemented for `bool`, the fixed-width integers from 8 to 64 bits and
/// `String`. `bool` shares the `i8` store tag.
pub trait PrefValue: Clone + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn to_value(&self) -> Value;

    /// Returns `None` when the stored tag does not belong to `Self`.
    fn from_value(value: Value) -> Option<Self>;

    /// Parses text with the fallback rules of [`convert`].
    fn parse_text(text: &str) -> Self;
}

impl PrefValue for bool {
    fn to_value(&self) -> Value {
        Value::I8(i8::from(*self))
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::I8(v) => Some(v != 0),
            _ => None,
        }
    }

    fn parse_text(text: &str) -> Self {
        convert::parse_bool(text)
    }
}

impl PrefValue for String {
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    fn parse_text(text: &str) -> Self {
        text.to_string()
    }
}

macro_rules! integer_pref_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl PrefValue for $ty {
                fn to_value(&self) -> Value {
                    Value::$variant(*self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                fn parse_text(text: &str) -> Self {
                    convert::parse_int(text) as $ty
                }
            }
        )*
    };
}

integer_pref_value! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
}
