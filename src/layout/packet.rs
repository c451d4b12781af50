//! Compiled packets: header bytes around a field layout.

use std::sync::Arc;

use crate::error::CodecError;
use crate::layout::compiler::Layout;
use crate::layout::offset::OffsetExpr;
use crate::layout::value::Record;
use crate::schema::{Direction, PacketSchema};

/// Value of the trailing sequence byte.
///
/// The legacy protocol reserves the byte but never checks it, so it carries
/// no ordering or anti-replay meaning here.
pub const SEQUENCE_PLACEHOLDER: u8 = 0x00;

/// Dispatch key: a header, optionally refined by a sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketKey {
    pub header: u8,
    pub sub_header: Option<u8>,
}

impl PacketKey {
    pub const fn new(header: u8) -> Self {
        Self {
            header,
            sub_header: None,
        }
    }

    pub const fn with_sub(header: u8, sub_header: u8) -> Self {
        Self {
            header,
            sub_header: Some(sub_header),
        }
    }

    /// `header`, or `header << 8 | sub_header`.
    pub fn code(self) -> u16 {
        match self.sub_header {
            Some(sub) => u16::from(self.header) << 8 | u16::from(sub),
            None => u16::from(self.header),
        }
    }
}

impl std::fmt::Display for PacketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sub_header {
            Some(sub) => write!(f, "0x{:02X}/0x{sub:02X}", self.header),
            None => write!(f, "0x{:02X}", self.header),
        }
    }
}

/// A packet ready to encode and decode.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDescriptor {
    pub name: String,
    pub header: u8,
    pub sub_header: Option<u8>,
    pub direction: Direction,
    pub has_sequence: bool,
    /// Header bytes, fixed fields and the sequence byte.
    pub static_size: usize,
    pub is_dynamic: bool,
    /// Synthesized header-only entry recognizing a sub-header family.
    pub is_family: bool,
    pub layout: Arc<Layout>,
}

impl PacketDescriptor {
    pub(crate) fn new(schema: &PacketSchema, layout: Arc<Layout>) -> Self {
        let sequence = usize::from(schema.has_sequence);
        Self {
            name: schema.name.clone(),
            header: schema.header,
            sub_header: schema.sub_header,
            direction: schema.direction,
            has_sequence: schema.has_sequence,
            static_size: layout.static_size + sequence,
            is_dynamic: layout.is_dynamic(),
            is_family: false,
            layout,
        }
    }

    /// Header-only descriptor standing in for every sub-type of `header`.
    pub(crate) fn family(header: u8, direction: Direction) -> Self {
        let layout = Layout {
            name: format!("family 0x{header:02X}"),
            fields: Vec::new(),
            start: 2,
            end: OffsetExpr::fixed(2),
            static_size: 2,
            build_order: Vec::new(),
        };
        Self {
            name: layout.name.clone(),
            header,
            sub_header: None,
            direction,
            has_sequence: false,
            static_size: 2,
            is_dynamic: false,
            is_family: true,
            layout: Arc::new(layout),
        }
    }

    pub fn key(&self) -> PacketKey {
        PacketKey {
            header: self.header,
            sub_header: self.sub_header,
        }
    }

    pub fn header_len(&self) -> usize {
        1 + usize::from(self.sub_header.is_some())
    }

    /// Total encoded length of `record`.
    pub fn encoded_len(&self, record: &Record) -> Result<usize, CodecError> {
        Ok(self.layout.encoded_len(record)? + usize::from(self.has_sequence))
    }

    /// Write the packet at `buf[offset]`, returning the bytes written.
    pub fn encode_into(&self, record: &Record, buf: &mut [u8], offset: usize) -> Result<usize, CodecError> {
        let plan = self.layout.plan(record)?;
        let len = plan.len + usize::from(self.has_sequence);
        if buf.len() < offset + len {
            return Err(CodecError::BufferTooShort {
                required: offset + len,
                available: buf.len(),
            });
        }

        buf[offset] = self.header;
        if let Some(sub) = self.sub_header {
            buf[offset + 1] = sub;
        }
        self.layout.write(record, &plan, buf, offset)?;
        if self.has_sequence {
            buf[offset + len - 1] = SEQUENCE_PLACEHOLDER;
        }
        Ok(len)
    }

    pub fn encode(&self, record: &Record) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; self.encoded_len(record)?];
        self.encode_into(record, &mut buf, 0)?;
        Ok(buf)
    }

    /// Read the packet at `buf[offset]`, returning the record and the bytes
    /// consumed.
    pub fn decode(&self, buf: &[u8], offset: usize) -> Result<(Record, usize), CodecError> {
        if buf.len() < offset + self.static_size {
            return Err(CodecError::BufferTooShort {
                required: offset + self.static_size,
                available: buf.len(),
            });
        }
        let (record, len) = self.layout.decode_from(buf, offset)?;
        let len = len.saturating_add(usize::from(self.has_sequence));
        if buf.len() < offset.saturating_add(len) {
            return Err(CodecError::BufferTooShort {
                required: offset.saturating_add(len),
                available: buf.len(),
            });
        }
        Ok((record, len))
    }

    /// Full frame length once `buf` (starting at the header) holds enough to
    /// tell; `None` means read more.
    pub fn frame_len(&self, buf: &[u8]) -> Result<Option<usize>, CodecError> {
        if buf.len() < self.static_size {
            return Ok(None);
        }
        if !self.is_dynamic {
            return Ok(Some(self.static_size));
        }
        Ok(self
            .layout
            .measure(buf, 0)?
            .map(|len| len.saturating_add(usize::from(self.has_sequence))))
    }
}
