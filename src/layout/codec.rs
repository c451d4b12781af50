//! Layout interpreter: encode, decode and measure.
//!
//! Encoding first builds a [`Plan`] from the record (the runtime span of every
//! variable-length field and the derived value of every size field), then
//! writes each field at `base + offset.eval(spans)`. Decoding fills the same
//! spans as it reads size fields, so both directions evaluate identical
//! offset expressions.

use crate::error::CodecError;
use crate::layout::compiler::{ElementCodec, FieldCodec, Layout, StringWidth};
use crate::layout::offset::{OffsetExpr, Span};
use crate::layout::value::{mismatch, Record, Value};
use crate::schema::Primitive;

/// Runtime sizing of one record against one layout.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    spans: Vec<usize>,
    /// Derived value of each size field.
    counts: Vec<Option<usize>>,
    /// Plans of dynamic nested structs, by field index.
    nested: Vec<Option<Plan>>,
    /// Total length, including the layout's `start`.
    pub len: usize,
}

impl Layout {
    /// Size the record without writing it.
    pub fn plan(&self, record: &Record) -> Result<Plan, CodecError> {
        let n = self.fields.len();
        let mut plan = Plan {
            spans: vec![0; n],
            counts: vec![None; n],
            nested: vec![None; n],
            len: 0,
        };

        for (i, field) in self.fields.iter().enumerate() {
            match (field.span, &field.codec) {
                (Some(Span::Counted { source, scale }), codec) => {
                    let value = record.require(&field.name)?;
                    let count = collection_len(&field.name, codec, value)?;
                    match plan.counts[source] {
                        Some(first) if first != count => {
                            return Err(CodecError::LengthConflict {
                                size_field: self.fields[source].name.clone(),
                                first,
                                second: count,
                            })
                        }
                        _ => plan.counts[source] = Some(count),
                    }
                    plan.spans[i] = scaled(&field.name, count, scale)?;
                }
                (Some(Span::Nested), FieldCodec::Custom(nested)) => {
                    let inner = nested.plan(as_record(&field.name, record.require(&field.name)?)?)?;
                    plan.spans[i] = inner.len - nested.static_size;
                    plan.nested[i] = Some(inner);
                }
                _ => {}
            }
        }

        plan.len = locate(&self.name, 0, &self.end, &plan.spans)?;
        Ok(plan)
    }

    /// Bytes this record occupies, `start` included.
    pub fn encoded_len(&self, record: &Record) -> Result<usize, CodecError> {
        Ok(self.plan(record)?.len)
    }

    /// Write `record` with the layout starting at `buf[base]`.
    ///
    /// Returns the number of bytes the layout spans from `base`.
    pub fn encode_into(&self, record: &Record, buf: &mut [u8], base: usize) -> Result<usize, CodecError> {
        let plan = self.plan(record)?;
        self.write(record, &plan, buf, base)?;
        Ok(plan.len)
    }

    pub(crate) fn write(&self, record: &Record, plan: &Plan, buf: &mut [u8], base: usize) -> Result<(), CodecError> {
        ensure(buf, base.saturating_add(plan.len))?;

        for (i, field) in self.fields.iter().enumerate() {
            let at = locate(&field.name, base, &field.offset, &plan.spans)?;
            match &field.codec {
                FieldCodec::Primitive(p) => match plan.counts[i] {
                    Some(count) => write_count(*p, count, buf, at).map_err(|_| CodecError::LengthOverflow {
                        field: dependent_name(self, i),
                        size_field: field.name.clone(),
                        len: count,
                    })?,
                    None => write_primitive(&field.name, *p, record.require(&field.name)?, buf, at)?,
                },
                FieldCodec::String(width) => {
                    let value = record.require(&field.name)?;
                    let text = match value {
                        Value::Str(s) => s,
                        other => return Err(mismatch(&field.name, "string", other)),
                    };
                    if !text.is_ascii() {
                        return Err(CodecError::NonAscii(field.name.clone()));
                    }
                    // Decode stops at the first NUL
                    if text.contains('\0') {
                        return Err(CodecError::EmbeddedNul(field.name.clone()));
                    }
                    let capacity = match width {
                        StringWidth::Fixed(length) => *length,
                        StringWidth::Counted { .. } => text.len() + 1,
                    };
                    if text.len() > capacity {
                        return Err(CodecError::StringTooLong {
                            field: field.name.clone(),
                            len: text.len(),
                            capacity,
                        });
                    }
                    buf[at..at + capacity].fill(0);
                    buf[at..at + text.len()].copy_from_slice(text.as_bytes());
                }
                FieldCodec::FixedArray { element, length } => {
                    let value = record.require(&field.name)?;
                    let len = collection_len(&field.name, &field.codec, value)?;
                    if len != *length {
                        return Err(CodecError::ArrayLength {
                            field: field.name.clone(),
                            len,
                            expected: *length,
                        });
                    }
                    write_elements(&field.name, element, value, buf, at)?;
                }
                FieldCodec::DynamicArray { element, .. } => {
                    write_elements(&field.name, element, record.require(&field.name)?, buf, at)?;
                }
                FieldCodec::Custom(nested) => {
                    let inner = as_record(&field.name, record.require(&field.name)?)?;
                    match &plan.nested[i] {
                        Some(inner_plan) => nested.write(inner, inner_plan, buf, at)?,
                        None => {
                            let inner_plan = nested.plan(inner)?;
                            nested.write(inner, &inner_plan, buf, at)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Read a record with the layout starting at `buf[base]`.
    ///
    /// Returns the record and the number of bytes the layout spans from `base`.
    pub fn decode_from(&self, buf: &[u8], base: usize) -> Result<(Record, usize), CodecError> {
        let n = self.fields.len();
        let mut spans = vec![0usize; n];
        let mut counts = vec![0usize; n];
        let mut slots: Vec<Option<Value>> = vec![None; n];

        for (i, field) in self.fields.iter().enumerate() {
            let at = locate(&field.name, base, &field.offset, &spans)?;
            let value = match &field.codec {
                FieldCodec::Primitive(p) => {
                    let value = read_primitive(*p, buf, at)?;
                    if field.is_size_field() {
                        counts[i] = count_of(&field.name, &value)?;
                    }
                    value
                }
                FieldCodec::String(StringWidth::Fixed(length)) => read_string(buf, at, *length, *length)?,
                FieldCodec::String(StringWidth::Counted { source }) => {
                    let count = counts[*source];
                    spans[i] = count;
                    read_string(buf, at, count.saturating_add(1), count)?
                }
                FieldCodec::FixedArray { element, length } => read_elements(element, *length, buf, at)?,
                FieldCodec::DynamicArray { element, source } => {
                    let count = counts[*source];
                    spans[i] = scaled(&field.name, count, element.size())?;
                    read_elements(element, count, buf, at)?
                }
                FieldCodec::Custom(nested) => {
                    let (inner, consumed) = nested.decode_from(buf, at)?;
                    spans[i] = consumed - nested.static_size;
                    Value::Record(inner)
                }
            };
            slots[i] = Some(value);
        }

        let mut record = Record::with_capacity(n);
        for &i in &self.build_order {
            if let Some(value) = slots[i].take() {
                record.set(self.fields[i].name.clone(), value);
            }
        }

        Ok((record, locate(&self.name, 0, &self.end, &spans)?))
    }

    /// Length of the layout found at `buf[base]`, reading only size fields.
    ///
    /// Returns `Ok(None)` while `buf` is too short to tell.
    pub fn measure(&self, buf: &[u8], base: usize) -> Result<Option<usize>, CodecError> {
        let n = self.fields.len();
        let mut spans = vec![0usize; n];
        let mut counts = vec![0usize; n];

        for (i, field) in self.fields.iter().enumerate() {
            let at = locate(&field.name, base, &field.offset, &spans)?;
            match (&field.codec, field.span) {
                (FieldCodec::Primitive(p), _) if field.is_size_field() => {
                    if at.saturating_add(p.width()) > buf.len() {
                        return Ok(None);
                    }
                    counts[i] = count_of(&field.name, &read_primitive(*p, buf, at)?)?;
                }
                (_, Some(Span::Counted { source, scale })) => spans[i] = scaled(&field.name, counts[source], scale)?,
                (FieldCodec::Custom(nested), Some(Span::Nested)) => match nested.measure(buf, at)? {
                    Some(len) => spans[i] = len - nested.static_size,
                    None => return Ok(None),
                },
                _ => {}
            }
        }

        locate(&self.name, 0, &self.end, &spans).map(Some)
    }
}

fn dependent_name(layout: &Layout, size_field: usize) -> String {
    layout.fields[size_field]
        .dependents
        .first()
        .map(|&d| layout.fields[d].name.clone())
        .unwrap_or_default()
}

/// `base + offset`, or `SizeOverflow` naming `field`.
fn locate(field: &str, base: usize, offset: &OffsetExpr, spans: &[usize]) -> Result<usize, CodecError> {
    offset
        .eval(spans)
        .and_then(|offset| base.checked_add(offset))
        .ok_or_else(|| CodecError::SizeOverflow(field.to_string()))
}

fn scaled(field: &str, count: usize, scale: usize) -> Result<usize, CodecError> {
    count
        .checked_mul(scale)
        .ok_or_else(|| CodecError::SizeOverflow(field.to_string()))
}

fn ensure(buf: &[u8], required: usize) -> Result<(), CodecError> {
    if buf.len() < required {
        return Err(CodecError::BufferTooShort {
            required,
            available: buf.len(),
        });
    }
    Ok(())
}

fn as_record<'v>(field: &str, value: &'v Value) -> Result<&'v Record, CodecError> {
    match value {
        Value::Record(record) => Ok(record),
        other => Err(mismatch(field, "record", other)),
    }
}

fn collection_len(field: &str, codec: &FieldCodec, value: &Value) -> Result<usize, CodecError> {
    match (codec, value) {
        (FieldCodec::String(_), Value::Str(s)) => Ok(s.len()),
        (FieldCodec::String(_), other) => Err(mismatch(field, "string", other)),
        (_, Value::Bytes(bytes)) => Ok(bytes.len()),
        (_, Value::Array(items)) => Ok(items.len()),
        (_, other) => Err(mismatch(field, "array", other)),
    }
}

fn count_of(field: &str, value: &Value) -> Result<usize, CodecError> {
    let raw = value.as_i128().ok_or_else(|| mismatch(field, "integer", value))?;
    usize::try_from(raw).map_err(|_| CodecError::NegativeSize(field.to_string()))
}

fn write_elements(field: &str, element: &ElementCodec, value: &Value, buf: &mut [u8], at: usize) -> Result<(), CodecError> {
    let stride = element.size();
    match (element, value) {
        (ElementCodec::Primitive(Primitive::U8), Value::Bytes(bytes)) => {
            buf[at..at + bytes.len()].copy_from_slice(bytes);
        }
        (ElementCodec::Primitive(p), Value::Array(items)) => {
            for (k, item) in items.iter().enumerate() {
                write_primitive(field, *p, item, buf, at + k * stride)?;
            }
        }
        (ElementCodec::Custom(nested), Value::Array(items)) => {
            for (k, item) in items.iter().enumerate() {
                nested.encode_into(as_record(field, item)?, buf, at + k * stride)?;
            }
        }
        (_, other) => return Err(mismatch(field, "array", other)),
    }
    Ok(())
}

fn read_elements(element: &ElementCodec, count: usize, buf: &[u8], at: usize) -> Result<Value, CodecError> {
    let stride = element.size();
    let end = count.checked_mul(stride).and_then(|span| at.checked_add(span));
    ensure(buf, end.unwrap_or(usize::MAX))?;
    match element {
        ElementCodec::Primitive(Primitive::U8) => Ok(Value::Bytes(buf[at..at + count].to_vec())),
        ElementCodec::Primitive(p) => (0..count)
            .map(|k| read_primitive(*p, buf, at + k * stride))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ElementCodec::Custom(nested) => (0..count)
            .map(|k| nested.decode_from(buf, at + k * stride).map(|(r, _)| Value::Record(r)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

/// Read `width` bytes, keeping the text before the first NUL among the first
/// `limit` bytes.
fn read_string(buf: &[u8], at: usize, width: usize, limit: usize) -> Result<Value, CodecError> {
    ensure(buf, at.saturating_add(width))?;
    let raw = &buf[at..at + limit.min(width)];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(Value::Str(String::from_utf8_lossy(&raw[..end]).into_owned()))
}

fn write_count(p: Primitive, count: usize, buf: &mut [u8], at: usize) -> Result<(), ()> {
    let value = match p {
        Primitive::U8 => Value::U8(u8::try_from(count).map_err(drop)?),
        Primitive::I8 => Value::I8(i8::try_from(count).map_err(drop)?),
        Primitive::U16 => Value::U16(u16::try_from(count).map_err(drop)?),
        Primitive::I16 => Value::I16(i16::try_from(count).map_err(drop)?),
        Primitive::U32 => Value::U32(u32::try_from(count).map_err(drop)?),
        Primitive::I32 => Value::I32(i32::try_from(count).map_err(drop)?),
        Primitive::U64 => Value::U64(u64::try_from(count).map_err(drop)?),
        Primitive::I64 => Value::I64(i64::try_from(count).map_err(drop)?),
        Primitive::Bool | Primitive::F32 | Primitive::F64 => return Err(()),
    };
    write_primitive("", p, &value, buf, at).map_err(drop)
}

fn write_primitive(field: &str, p: Primitive, value: &Value, buf: &mut [u8], at: usize) -> Result<(), CodecError> {
    let width = p.width();
    let out = &mut buf[at..at + width];
    match (p, value) {
        (Primitive::Bool, Value::Bool(v)) => out[0] = u8::from(*v),
        (Primitive::U8, Value::U8(v)) => out[0] = *v,
        (Primitive::I8, Value::I8(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (Primitive::U16, Value::U16(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (Primitive::I16, Value::I16(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (Primitive::U32, Value::U32(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (Primitive::I32, Value::I32(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (Primitive::U64, Value::U64(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (Primitive::I64, Value::I64(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (Primitive::F32, Value::F32(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (Primitive::F64, Value::F64(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (p, other) => return Err(mismatch(field, p.name(), other)),
    }
    Ok(())
}

fn read_primitive(p: Primitive, buf: &[u8], at: usize) -> Result<Value, CodecError> {
    let width = p.width();
    ensure(buf, at.saturating_add(width))?;
    let raw = &buf[at..at + width];
    let mut wide = [0u8; 8];
    wide[..width].copy_from_slice(raw);
    let value = match p {
        Primitive::Bool => Value::Bool(raw[0] != 0),
        Primitive::U8 => Value::U8(raw[0]),
        Primitive::I8 => Value::I8(i8::from_le_bytes([raw[0]])),
        Primitive::U16 => Value::U16(u16::from_le_bytes([raw[0], raw[1]])),
        Primitive::I16 => Value::I16(i16::from_le_bytes([raw[0], raw[1]])),
        Primitive::U32 => Value::U32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        Primitive::I32 => Value::I32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        Primitive::F32 => Value::F32(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        Primitive::U64 => Value::U64(u64::from_le_bytes(wide)),
        Primitive::I64 => Value::I64(i64::from_le_bytes(wide)),
        Primitive::F64 => Value::F64(f64::from_le_bytes(wide)),
    };
    Ok(value)
}
