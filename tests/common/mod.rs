//! Shared fixtures: a small packet set and a scripted client.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gamewire::error::CodecError;
use gamewire::layout::{Record, WireStruct};
use gamewire::protocol::{Handshake, Packet, PacketRegistry, Phase, SetPhase};
use gamewire::schema::{Direction, FieldDescriptor, PacketSchema, Primitive};
use gamewire::transport::{Frame, WireCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

pub const PING: u8 = 0x20;
pub const PONG: u8 = 0x21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub seq: u32,
}

impl WireStruct for Ping {
    fn to_record(&self) -> Record {
        Record::new().with("seq", self.seq)
    }

    fn from_record(mut record: Record) -> Result<Self, CodecError> {
        Ok(Self {
            seq: record.take_as("seq")?,
        })
    }
}

impl Packet for Ping {
    const HEADER: u8 = PING;

    fn schema() -> PacketSchema {
        PacketSchema::incoming("Ping", PING).field(FieldDescriptor::primitive("seq", Primitive::U32))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub seq: u32,
}

impl WireStruct for Pong {
    fn to_record(&self) -> Record {
        Record::new().with("seq", self.seq)
    }

    fn from_record(mut record: Record) -> Result<Self, CodecError> {
        Ok(Self {
            seq: record.take_as("seq")?,
        })
    }
}

impl Packet for Pong {
    const HEADER: u8 = PONG;

    fn schema() -> PacketSchema {
        PacketSchema::outgoing("Pong", PONG).field(FieldDescriptor::primitive("seq", Primitive::U32))
    }
}

pub fn ping_registry() -> Arc<PacketRegistry> {
    Arc::new(
        PacketRegistry::builder()
            .register_packet::<Ping>()
            .register_packet::<Pong>()
            .build()
            .expect("ping schemas compile"),
    )
}

pub type Client<S> = Framed<S, WireCodec>;

pub fn client<S: AsyncRead + AsyncWrite + Unpin>(io: S, registry: Arc<PacketRegistry>) -> Client<S> {
    Framed::new(io, WireCodec::client(registry))
}

/// Fail the test instead of hanging on a stuck exchange.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("exchange timed out")
}

pub async fn recv<S: AsyncRead + AsyncWrite + Unpin>(client: &mut Client<S>) -> Frame {
    within(client.next())
        .await
        .expect("stream ended")
        .expect("frame decodes")
}

pub async fn send<S, P>(client: &mut Client<S>, registry: &PacketRegistry, packet: &P)
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: Packet,
{
    let bytes = registry.encode_as(Direction::Incoming, packet).unwrap();
    within(client.send(bytes)).await.unwrap();
}

/// Echo handshake packets the way the legacy client does until the server
/// announces the next phase. Returns that phase and the rounds taken.
pub async fn complete_handshake<S>(client: &mut Client<S>, registry: &PacketRegistry) -> (Phase, u32)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut rounds = 0;
    loop {
        let frame = recv(client).await;
        if frame.descriptor.key() == SetPhase::key() {
            let phase = SetPhase::from_record(frame.record).unwrap().phase;
            return (Phase::from_code(phase).expect("known phase"), rounds);
        }
        let packet = Handshake::from_record(frame.record).unwrap();
        rounds += 1;
        send(
            client,
            registry,
            &Handshake {
                nonce: packet.nonce,
                time: packet.time.wrapping_add(packet.delta),
                delta: packet.delta,
            },
        )
        .await;
    }
}
