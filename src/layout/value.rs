//! Dynamic values flowing through the layout interpreter.
//!
//! A decoded packet is a [`Record`]: named fields in the order decode built
//! them. Typed packets and structs convert to and from records through
//! [`WireStruct`].

use crate::error::CodecError;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    /// Array of `u8`, fixed or dynamic.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Record(Record),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U8(_) => "u8",
            Self::I8(_) => "i8",
            Self::U16(_) => "u16",
            Self::I16(_) => "i16",
            Self::U32(_) => "u32",
            Self::I32(_) => "i32",
            Self::U64(_) => "u64",
            Self::I64(_) => "i64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Record(_) => "record",
        }
    }

    /// Build an array value from anything convertible.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }

    /// Build an array of nested structs.
    pub fn structs<'a, T: WireStruct + 'a>(items: impl IntoIterator<Item = &'a T>) -> Self {
        Self::Array(items.into_iter().map(|s| Self::Record(s.to_record())).collect())
    }

    /// Integer content widened for length arithmetic.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Self::U8(v) => Some(v.into()),
            Self::I8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::U64(v) => Some(v.into()),
            Self::I64(v) => Some(v.into()),
            _ => None,
        }
    }
}

/// Named field values, kept in insertion order.
///
/// Equality ignores order: two records are equal when they hold the same
/// names with equal values.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert a field, replacing any previous value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn take(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(index).1)
    }

    pub fn require(&self, name: &str) -> Result<&Value, CodecError> {
        self.get(name)
            .ok_or_else(|| CodecError::MissingField(name.to_string()))
    }

    pub fn take_as<T: FromValue>(&mut self, name: &str) -> Result<T, CodecError> {
        let value = self
            .take(name)
            .ok_or_else(|| CodecError::MissingField(name.to_string()))?;
        T::from_value(name, value)
    }

    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, CodecError> {
        T::from_value(name, self.require(name)?.clone())
    }

    /// Take an array field, converting every element.
    pub fn take_list<T: FromValue>(&mut self, name: &str) -> Result<Vec<T>, CodecError> {
        match self.take(name) {
            Some(Value::Array(items)) => items.into_iter().map(|v| T::from_value(name, v)).collect(),
            Some(Value::Bytes(bytes)) => bytes
                .into_iter()
                .map(|b| T::from_value(name, Value::U8(b)))
                .collect(),
            Some(other) => Err(mismatch(name, "array", &other)),
            None => Err(CodecError::MissingField(name.to_string())),
        }
    }

    pub fn take_struct<T: WireStruct>(&mut self, name: &str) -> Result<T, CodecError> {
        let record: Record = self.take_as(name)?;
        T::from_record(record)
    }

    pub fn take_structs<T: WireStruct>(&mut self, name: &str) -> Result<Vec<T>, CodecError> {
        let records: Vec<Record> = self.take_list(name)?;
        records.into_iter().map(T::from_record).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

/// Conversion between a typed struct and its record form.
pub trait WireStruct: Sized {
    fn to_record(&self) -> Record;
    fn from_record(record: Record) -> Result<Self, CodecError>;
}

/// Extraction of a typed value from a [`Value`].
pub trait FromValue: Sized {
    fn from_value(field: &str, value: Value) -> Result<Self, CodecError>;
}

pub(crate) fn mismatch(field: &str, expected: &'static str, found: &Value) -> CodecError {
    CodecError::TypeMismatch {
        field: field.to_string(),
        expected,
        found: found.kind_name(),
    }
}

macro_rules! scalar_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl FromValue for $ty {
                fn from_value(field: &str, value: Value) -> Result<Self, CodecError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(mismatch(field, stringify!($ty), &other)),
                    }
                }
            }
        )*
    };
}

scalar_value! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => Str,
    Record => Record,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<const N: usize> From<[u8; N]> for Value {
    fn from(v: [u8; N]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl FromValue for Vec<u8> {
    fn from_value(field: &str, value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Bytes(bytes) => Ok(bytes),
            Value::Array(items) => items
                .into_iter()
                .map(|v| u8::from_value(field, v))
                .collect(),
            other => Err(mismatch(field, "bytes", &other)),
        }
    }
}

impl<const N: usize> FromValue for [u8; N] {
    fn from_value(field: &str, value: Value) -> Result<Self, CodecError> {
        let bytes = Vec::<u8>::from_value(field, value)?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| CodecError::ArrayLength {
            field: field.to_string(),
            len,
            expected: N,
        })
    }
}

impl FromValue for Value {
    fn from_value(_field: &str, value: Value) -> Result<Self, CodecError> {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_equality_ignores_order() {
        let a = Record::new().with("x", 1u32).with("y", "name");
        let b = Record::new().with("y", "name").with("x", 1u32);
        assert_eq!(a, b);
        assert_ne!(a, Record::new().with("x", 1u32));
    }

    #[test]
    fn set_replaces_existing_values() {
        let mut record = Record::new().with("x", 1u8);
        record.set("x", 2u8);
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("x"), Some(&Value::U8(2)));
    }

    #[test]
    fn typed_extraction_reports_mismatches() {
        let mut record = Record::new().with("id", 7u32).with("raw", vec![1u8, 2]);
        assert_eq!(record.get_as::<u32>("id").unwrap(), 7);
        assert!(matches!(
            record.get_as::<u16>("id"),
            Err(CodecError::TypeMismatch { expected: "u16", found: "u32", .. })
        ));
        let raw: [u8; 2] = record.take_as("raw").unwrap();
        assert_eq!(raw, [1, 2]);
        assert!(matches!(record.take_as::<u8>("raw"), Err(CodecError::MissingField(_))));
    }

    #[test]
    fn lists_convert_element_wise() {
        let mut record = Record::new().with("ids", Value::list([1u16, 2, 3]));
        let ids: Vec<u16> = record.take_list("ids").unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
