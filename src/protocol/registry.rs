//! Immutable table of compiled packets, keyed by direction and dispatch key.
//!
//! Built once at startup from every declared [`PacketSchema`] and shared
//! read-only afterwards, so lookups take no lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ProtocolError, Result, SchemaError};
use crate::layout::{LayoutCompiler, PacketDescriptor, PacketKey, Record};
use crate::protocol::packets::{Handshake, Packet, SetPhase};
use crate::schema::{Direction, PacketSchema, TypeTable};

type Table = HashMap<PacketKey, Arc<PacketDescriptor>>;

/// Compiled packets for both directions.
#[derive(Debug, Default)]
pub struct PacketRegistry {
    incoming: Table,
    outgoing: Table,
}

impl PacketRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    fn table(&self, direction: Direction) -> &Table {
        match direction {
            Direction::Outgoing => &self.outgoing,
            // `Both` entries live in both tables
            Direction::Incoming | Direction::Both => &self.incoming,
        }
    }

    /// Resolve a header byte. For sub-header families this is the
    /// synthesized family entry.
    pub fn lookup(&self, direction: Direction, header: u8) -> Option<&Arc<PacketDescriptor>> {
        self.table(direction).get(&PacketKey::new(header))
    }

    /// Resolve a `(header, sub_header)` pair.
    pub fn lookup_sub(&self, direction: Direction, header: u8, sub_header: u8) -> Option<&Arc<PacketDescriptor>> {
        self.table(direction).get(&PacketKey::with_sub(header, sub_header))
    }

    pub fn get(&self, direction: Direction, key: PacketKey) -> Option<&Arc<PacketDescriptor>> {
        self.table(direction).get(&key)
    }

    pub fn len(&self, direction: Direction) -> usize {
        self.table(direction).len()
    }

    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }

    /// Every descriptor registered for `direction`, family entries included.
    pub fn descriptors(&self, direction: Direction) -> impl Iterator<Item = &Arc<PacketDescriptor>> {
        self.table(direction).values()
    }

    fn require(&self, direction: Direction, key: PacketKey) -> Result<&Arc<PacketDescriptor>> {
        self.get(direction, key).ok_or(match key.sub_header {
            Some(sub_header) => ProtocolError::UnknownSubHeader {
                header: key.header,
                sub_header,
            },
            None => ProtocolError::UnknownHeader(key.header),
        })
    }

    /// Encode a server-to-client packet.
    pub fn encode<P: Packet>(&self, packet: &P) -> Result<Vec<u8>> {
        self.encode_as(Direction::Outgoing, packet)
    }

    pub fn encode_as<P: Packet>(&self, direction: Direction, packet: &P) -> Result<Vec<u8>> {
        self.encode_record(direction, P::key(), &packet.to_record())
    }

    pub fn encode_record(&self, direction: Direction, key: PacketKey, record: &Record) -> Result<Vec<u8>> {
        Ok(self.require(direction, key)?.encode(record)?)
    }

    /// Decode a client-to-server packet from the start of `bytes`.
    pub fn decode<P: Packet>(&self, bytes: &[u8]) -> Result<P> {
        self.decode_as(Direction::Incoming, bytes)
    }

    pub fn decode_as<P: Packet>(&self, direction: Direction, bytes: &[u8]) -> Result<P> {
        let (record, _) = self.require(direction, P::key())?.decode(bytes, 0)?;
        Ok(P::from_record(record)?)
    }
}

/// Collects schemas and compiles them into a [`PacketRegistry`].
///
/// The handshake and phase-change packets are always present.
#[derive(Debug)]
pub struct RegistryBuilder {
    types: TypeTable,
    schemas: Vec<PacketSchema>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            types: TypeTable::new(),
            schemas: vec![Handshake::schema(), SetPhase::schema()],
        }
    }

    /// Nested struct types the packets refer to.
    pub fn types(mut self, types: TypeTable) -> Self {
        self.types = types;
        self
    }

    pub fn register(mut self, schema: PacketSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn register_packet<P: Packet>(self) -> Self {
        self.register(P::schema())
    }

    /// Compile every schema.
    ///
    /// # Errors
    /// The first schema that fails to compile aborts the build. Duplicate
    /// dispatch keys are not errors: the first registration wins and the
    /// collision is logged.
    pub fn build(self) -> std::result::Result<PacketRegistry, SchemaError> {
        let mut registry = PacketRegistry::default();
        let mut compiler = LayoutCompiler::new(&self.types);

        for schema in &self.schemas {
            let descriptor = Arc::new(compiler.compile_packet(schema)?);
            for &direction in expand(schema.direction) {
                let table = match direction {
                    Direction::Outgoing => &mut registry.outgoing,
                    _ => &mut registry.incoming,
                };
                insert(table, direction, descriptor.clone());
            }
        }

        debug!(
            incoming = registry.incoming.len(),
            outgoing = registry.outgoing.len(),
            "Packet registry built"
        );
        Ok(registry)
    }
}

fn expand(direction: Direction) -> &'static [Direction] {
    match direction {
        Direction::Incoming => &[Direction::Incoming],
        Direction::Outgoing => &[Direction::Outgoing],
        Direction::Both => &[Direction::Incoming, Direction::Outgoing],
    }
}

fn insert(table: &mut Table, direction: Direction, descriptor: Arc<PacketDescriptor>) {
    if descriptor.sub_header.is_some() {
        match table.entry(PacketKey::new(descriptor.header)) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(PacketDescriptor::family(descriptor.header, direction)));
            }
            Entry::Occupied(slot) if !slot.get().is_family => {
                warn!(
                    header = descriptor.header,
                    packet = %descriptor.name,
                    shadowed_by = %slot.get().name,
                    %direction,
                    "Header already bound to a plain packet; sub-header packet is unreachable"
                );
            }
            Entry::Occupied(_) => {}
        }
    }

    match table.entry(descriptor.key()) {
        Entry::Vacant(slot) => {
            slot.insert(descriptor);
        }
        Entry::Occupied(slot) => {
            warn!(
                key = %descriptor.key(),
                kept = %slot.get().name,
                ignored = %descriptor.name,
                %direction,
                "Duplicate packet registration; first registration wins"
            );
        }
    }
}
