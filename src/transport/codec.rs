//! Frame codec over the packet registry.
//!
//! Frames carry no length prefix. The header byte selects a descriptor, the
//! descriptor's static size says how much to wait for, and for dynamic
//! packets the size fields inside that fixed region give the rest.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::config::MAX_FRAME_SIZE;
use crate::error::{constants, ProtocolError, Result};
use crate::layout::{PacketDescriptor, Record};
use crate::protocol::PacketRegistry;
use crate::schema::Direction;

/// One decoded packet.
#[derive(Debug, Clone)]
pub struct Frame {
    pub descriptor: Arc<PacketDescriptor>,
    pub record: Record,
    /// Bytes the frame occupied on the wire.
    pub len: usize,
}

/// Decodes packets travelling in one direction and writes pre-encoded
/// packets verbatim.
#[derive(Debug, Clone)]
pub struct WireCodec {
    registry: Arc<PacketRegistry>,
    direction: Direction,
    max_frame_size: usize,
}

impl WireCodec {
    pub fn new(registry: Arc<PacketRegistry>, direction: Direction) -> Self {
        Self {
            registry,
            direction,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Reads client-to-server packets.
    pub fn server(registry: Arc<PacketRegistry>) -> Self {
        Self::new(registry, Direction::Incoming)
    }

    /// Reads server-to-client packets.
    pub fn client(registry: Arc<PacketRegistry>) -> Self {
        Self::new(registry, Direction::Outgoing)
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn resolve(&self, src: &[u8]) -> Result<Option<Arc<PacketDescriptor>>> {
        let header = src[0];
        let Some(descriptor) = self.registry.lookup(self.direction, header) else {
            warn!(header, direction = %self.direction, "Unknown packet header");
            return Err(ProtocolError::UnknownHeader(header));
        };
        if !descriptor.is_family {
            return Ok(Some(descriptor.clone()));
        }

        let Some(&sub_header) = src.get(1) else {
            return Ok(None);
        };
        match self.registry.lookup_sub(self.direction, header, sub_header) {
            Some(descriptor) => Ok(Some(descriptor.clone())),
            None => {
                warn!(header, sub_header, direction = %self.direction, "Unknown packet sub-header");
                Err(ProtocolError::UnknownSubHeader { header, sub_header })
            }
        }
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len > self.max_frame_size {
            warn!(len, max = self.max_frame_size, "Frame exceeds maximum size");
            return Err(ProtocolError::OversizedFrame(len));
        }
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }
        let Some(descriptor) = self.resolve(&src[..])? else {
            return Ok(None);
        };

        let len = match descriptor.frame_len(&src[..])? {
            Some(len) => len,
            None => {
                // Still inside the fixed region or waiting on a size field
                self.check_size(src.len())?;
                src.reserve(descriptor.static_size.saturating_sub(src.len()));
                return Ok(None);
            }
        };
        self.check_size(len)?;

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let (record, consumed) = descriptor.decode(&src[..len], 0)?;
        src.advance(consumed);
        trace!(packet = %descriptor.name, len, "Decoded frame");

        Ok(Some(Frame {
            descriptor,
            record,
            len,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated(constants::ERR_SHORT_READ)),
        }
    }
}

impl Encoder<Vec<u8>> for WireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
