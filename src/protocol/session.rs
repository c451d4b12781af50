//! Per-connection protocol state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ProtocolError, Result};
use crate::layout::{PacketKey, Record};
use crate::protocol::handshake::HandshakeState;
use crate::protocol::packets::{Packet, SetPhase};
use crate::protocol::phase::Phase;
use crate::protocol::registry::PacketRegistry;
use crate::schema::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State owned by one connection: phase, handshake progress and the packets
/// waiting to be written.
///
/// Handlers never touch the socket. Everything they send is queued here and
/// flushed by the connection after the handler returns, which keeps writes
/// in handler order.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    phase: Phase,
    handshake: HandshakeState,
    closing: bool,
    outbox: Vec<Vec<u8>>,
    registry: Arc<PacketRegistry>,
}

impl Session {
    pub fn new(id: SessionId, peer: Option<SocketAddr>, registry: Arc<PacketRegistry>) -> Self {
        Self {
            id,
            peer,
            phase: Phase::Handshake,
            handshake: HandshakeState::new(),
            closing: false,
            outbox: Vec::new(),
            registry,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    pub fn handshake(&self) -> &HandshakeState {
        &self.handshake
    }

    pub fn handshake_mut(&mut self) -> &mut HandshakeState {
        &mut self.handshake
    }

    /// Queue a typed packet.
    pub fn send<P: Packet>(&mut self, packet: &P) -> Result<()> {
        let bytes = self.registry.encode(packet)?;
        self.outbox.push(bytes);
        Ok(())
    }

    /// Queue a packet given as a record.
    pub fn send_record(&mut self, key: PacketKey, record: &Record) -> Result<()> {
        let bytes = self.registry.encode_record(Direction::Outgoing, key, record)?;
        self.outbox.push(bytes);
        Ok(())
    }

    /// Move the session forward and tell the client.
    ///
    /// Setting the current phase again does nothing.
    ///
    /// # Errors
    /// Returns `ProtocolError::PhaseRegression` for any backward move, and
    /// for any move into or out of the auth phase other than from the
    /// handshake.
    pub fn set_phase(&mut self, next: Phase) -> Result<()> {
        if next == self.phase {
            return Ok(());
        }
        if !self.phase.can_advance_to(next) {
            return Err(ProtocolError::PhaseRegression {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }

        info!(session = %self.id, from = %self.phase, to = %next, "Phase change");
        self.phase = next;
        self.send(&SetPhase { phase: next.code() })
    }

    /// Ask the connection to close once queued packets are written.
    pub fn close(&mut self) {
        if !self.closing {
            debug!(session = %self.id, "Session close requested");
        }
        self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Take every queued packet, oldest first.
    pub fn drain_outbox(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let registry = Arc::new(PacketRegistry::builder().build().unwrap());
        Session::new(SessionId(1), None, registry)
    }

    #[test]
    fn set_phase_queues_the_phase_packet() {
        let mut session = session();
        session.set_phase(Phase::Login).unwrap();
        assert_eq!(session.phase(), Phase::Login);
        assert_eq!(session.drain_outbox(), vec![vec![0xFD, 0x02]]);
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn same_phase_is_a_no_op() {
        let mut session = session();
        session.set_phase(Phase::Handshake).unwrap();
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn regressions_are_rejected() {
        let mut session = session();
        session.set_phase(Phase::Game).unwrap();
        let err = session.set_phase(Phase::Login).unwrap_err();
        assert!(matches!(err, ProtocolError::PhaseRegression { .. }));
        assert_eq!(session.phase(), Phase::Game);
    }

    #[test]
    fn close_is_sticky() {
        let mut session = session();
        assert!(!session.is_closing());
        session.close();
        session.close();
        assert!(session.is_closing());
    }
}
