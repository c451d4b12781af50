//! Typed packets and the packets the connection layer itself speaks.

use crate::error::CodecError;
use crate::layout::{PacketKey, Record, WireStruct};
use crate::schema::{Direction, FieldDescriptor, PacketSchema, Primitive};

/// A typed packet with a statically known schema.
pub trait Packet: WireStruct {
    const HEADER: u8;
    const SUB_HEADER: Option<u8> = None;

    fn schema() -> PacketSchema;

    fn key() -> PacketKey {
        PacketKey {
            header: Self::HEADER,
            sub_header: Self::SUB_HEADER,
        }
    }
}

/// Clock-synchronizing handshake, sent by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub nonce: u32,
    pub time: u32,
    pub delta: u32,
}

impl WireStruct for Handshake {
    fn to_record(&self) -> Record {
        Record::new()
            .with("nonce", self.nonce)
            .with("time", self.time)
            .with("delta", self.delta)
    }

    fn from_record(mut record: Record) -> Result<Self, CodecError> {
        Ok(Self {
            nonce: record.take_as("nonce")?,
            time: record.take_as("time")?,
            delta: record.take_as("delta")?,
        })
    }
}

impl Packet for Handshake {
    const HEADER: u8 = 0xFF;

    fn schema() -> PacketSchema {
        PacketSchema::new("Handshake", Self::HEADER, Direction::Both)
            .field(FieldDescriptor::primitive("nonce", Primitive::U32))
            .field(FieldDescriptor::primitive("time", Primitive::U32))
            .field(FieldDescriptor::primitive("delta", Primitive::U32))
    }
}

/// Tells the client which phase the session entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPhase {
    pub phase: u8,
}

impl WireStruct for SetPhase {
    fn to_record(&self) -> Record {
        Record::new().with("phase", self.phase)
    }

    fn from_record(mut record: Record) -> Result<Self, CodecError> {
        Ok(Self {
            phase: record.take_as("phase")?,
        })
    }
}

impl Packet for SetPhase {
    const HEADER: u8 = 0xFD;

    fn schema() -> PacketSchema {
        PacketSchema::outgoing("SetPhase", Self::HEADER)
            .field(FieldDescriptor::primitive("phase", Primitive::U8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutCompiler;
    use crate::schema::TypeTable;

    #[test]
    fn handshake_body_is_twelve_bytes() {
        let desc = LayoutCompiler::new(&TypeTable::new())
            .compile_packet(&Handshake::schema())
            .unwrap();
        assert_eq!(desc.static_size, 13);

        let packet = Handshake {
            nonce: 0x0102_0304,
            time: 10,
            delta: 0,
        };
        let bytes = desc.encode(&packet.to_record()).unwrap();
        assert_eq!(&bytes[..5], &[0xFF, 0x04, 0x03, 0x02, 0x01]);

        let (record, _) = desc.decode(&bytes, 0).unwrap();
        assert_eq!(Handshake::from_record(record).unwrap(), packet);
    }
}
