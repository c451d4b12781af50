//! One client connection: handshake, frame loop, dispatch and writes.
//!
//! Frames from one connection are decoded and handled strictly in order.
//! Every fault ends this connection and nothing else.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::{HandshakeConfig, NetworkConfig, MAX_FRAME_SIZE};
use crate::error::{ProtocolError, Result};
use crate::layout::WireStruct;
use crate::protocol::{
    Dispatcher, Handshake, HandshakeOutcome, Packet, PacketContext, PacketRegistry, Phase, ServerMode, Session,
    SessionId,
};
use crate::transport::codec::{Frame, WireCodec};
use crate::utils::metrics::Metrics;
use crate::utils::time::{Clock, ServerClock};

/// Everything a connection shares with its siblings. Read-only once built.
#[derive(Debug, Clone)]
pub struct Services {
    pub registry: Arc<PacketRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    pub handshake: HandshakeConfig,
    pub mode: ServerMode,
    pub max_frame_size: usize,
}

impl Services {
    pub fn new(registry: Arc<PacketRegistry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
            clock: Arc::new(ServerClock::new()),
            metrics: Arc::new(Metrics::new()),
            handshake: HandshakeConfig::default(),
            mode: ServerMode::default(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Take handshake tuning, mode and frame limit from `config`.
    pub fn with_config(mut self, config: &NetworkConfig) -> Self {
        self.handshake = config.handshake.clone();
        self.mode = config.server.mode;
        self.max_frame_size = config.server.max_frame_size;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_mode(mut self, mode: ServerMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A session bound to a byte stream.
pub struct Connection<S> {
    framed: Framed<S, WireCodec>,
    session: Session,
    services: Arc<Services>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, id: SessionId, peer: Option<SocketAddr>, services: Arc<Services>) -> Self {
        let codec = WireCodec::server(services.registry.clone()).with_max_frame_size(services.max_frame_size);
        Self {
            framed: Framed::new(stream, codec),
            session: Session::new(id, peer, services.registry.clone()),
            services,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }

    /// Run the connection until the peer leaves, a handler closes the
    /// session, `shutdown` fires, or a protocol fault occurs.
    ///
    /// The write side is shut down before returning in every case.
    ///
    /// # Errors
    /// Framing faults, handshake failures, handler failures and I/O errors.
    #[instrument(skip_all, fields(session = %self.session.id(), peer = ?self.session.peer()))]
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let result = self.serve(&shutdown).await;
        if let Err(e) = &result {
            self.services.metrics.protocol_error();
            warn!(error = %e, phase = %self.session.phase(), "Closing connection");
        }
        if let Err(e) = self.framed.get_mut().shutdown().await {
            debug!(error = %e, "Failed to shut down the write side");
        }
        result
    }

    async fn serve(&mut self, shutdown: &CancellationToken) -> Result<()> {
        self.begin_handshake()?;
        self.flush().await?;

        let handshake_deadline = tokio::time::sleep_until(Instant::now() + self.services.handshake.timeout);
        tokio::pin!(handshake_deadline);

        while !self.session.is_closing() {
            let in_handshake = self.session.phase() == Phase::Handshake;
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Shutdown requested");
                    return Ok(());
                }
                _ = &mut handshake_deadline, if in_handshake => {
                    self.services.metrics.handshake_failed();
                    return Err(ProtocolError::Timeout);
                }
                next = self.framed.next() => next,
            };

            match next {
                None => {
                    debug!("Peer disconnected");
                    return Ok(());
                }
                Some(Err(e)) => {
                    if matches!(e, ProtocolError::UnknownHeader(_) | ProtocolError::UnknownSubHeader { .. }) {
                        self.services.metrics.unknown_header();
                    }
                    return Err(e);
                }
                Some(Ok(frame)) => {
                    self.services.metrics.packet_received(frame.len as u64);
                    self.handle(frame)?;
                    self.flush().await?;
                }
            }
        }

        debug!("Session closed by handler");
        Ok(())
    }

    fn begin_handshake(&mut self) -> Result<()> {
        let nonce: u32 = rand::random();
        let opening = self.session.handshake_mut().start(nonce, self.services.clock.now_ms())?;
        self.services.metrics.handshake_attempt();
        self.session.send(&opening)
    }

    fn handle(&mut self, frame: Frame) -> Result<()> {
        let Frame {
            descriptor, record, ..
        } = frame;
        let is_handshake = descriptor.key() == Handshake::key();

        let phase = self.session.phase();
        match (phase, is_handshake) {
            (Phase::Handshake, true) => {
                let reply = Handshake::from_record(record)?;
                self.on_handshake(&reply)
            }
            (Phase::Handshake, false) | (_, true) => Err(ProtocolError::UnexpectedPacket {
                packet: descriptor.name.clone(),
                phase: phase.to_string(),
            }),
            _ => {
                let mut ctx = PacketContext::new(record, descriptor, &mut self.session);
                self.services.dispatcher.dispatch(&mut ctx).map_err(|e| {
                    self.services.metrics.handler_failure();
                    e
                })
            }
        }
    }

    fn on_handshake(&mut self, reply: &Handshake) -> Result<()> {
        let now = self.services.clock.now_ms();
        match self
            .session
            .handshake_mut()
            .verify(reply, now, &self.services.handshake)
        {
            Ok(HandshakeOutcome::Complete) => {
                self.services.metrics.handshake_success();
                self.session.set_phase(self.services.mode.phase_after_handshake())
            }
            Ok(HandshakeOutcome::Retry(next)) => self.session.send(&next),
            Err(e) => {
                self.services.metrics.handshake_failed();
                Err(e)
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let pending = self.session.drain_outbox();
        if pending.is_empty() {
            return Ok(());
        }
        for bytes in pending {
            let len = bytes.len() as u64;
            self.framed.feed(bytes).await.map_err(peer_gone)?;
            self.services.metrics.packet_sent(len);
        }
        self.framed.flush().await.map_err(peer_gone)
    }
}

/// A write into a socket the peer already tore down.
fn peer_gone(e: ProtocolError) -> ProtocolError {
    match e {
        ProtocolError::Io(io)
            if matches!(io.kind(), ErrorKind::BrokenPipe | ErrorKind::ConnectionReset) =>
        {
            ProtocolError::ConnectionClosed
        }
        other => other,
    }
}
