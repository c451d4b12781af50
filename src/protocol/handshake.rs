//! Clock-synchronizing handshake.
//!
//! The server opens with `{nonce, server_time, delta = 0}`. The client echoes
//! the nonce with its view of the clock and the delta it applied. The server
//! accepts when `now - (time + delta)` falls inside the tolerance window;
//! otherwise it halves the observed round trip into a new delta and asks
//! again. The exchange is bounded by `max_attempts`.
//!
//! State is kept per session in [`HandshakeState`]; nothing is global.

use tracing::{debug, instrument, warn};

use crate::config::HandshakeConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::packets::Handshake;

/// Result of checking one client reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Clocks agree; the session may leave the handshake phase.
    Complete,
    /// Send this packet and wait for another reply.
    Retry(Handshake),
}

/// Per-session handshake state.
#[derive(Debug, Clone, Default)]
pub struct HandshakeState {
    nonce: Option<u32>,
    server_time: Option<u32>,
    handshaking: bool,
    attempts: u32,
}

impl HandshakeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_handshaking(&self) -> bool {
        self.handshaking
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn nonce(&self) -> Option<u32> {
        self.nonce
    }

    pub fn server_time(&self) -> Option<u32> {
        self.server_time
    }

    /// Record the nonce and the server tick and build the opening packet.
    ///
    /// # Errors
    /// Returns `ProtocolError::HandshakeError` if a handshake is already running
    pub fn start(&mut self, nonce: u32, now: u32) -> Result<Handshake> {
        if self.handshaking {
            return Err(ProtocolError::HandshakeError(constants::ERR_ALREADY_STARTED.into()));
        }
        self.nonce = Some(nonce);
        self.server_time = Some(now);
        self.handshaking = true;
        self.attempts = 0;

        debug!(nonce, time = now, "Starting handshake");
        Ok(Handshake {
            nonce,
            time: now,
            delta: 0,
        })
    }

    /// Check a client reply received at server tick `now`.
    ///
    /// # Errors
    /// Returns `ProtocolError::HandshakeError` on a nonce mismatch, a negative
    /// recomputed delta, or when `max_attempts` replies failed to converge
    #[instrument(skip(self, config), fields(attempt = self.attempts + 1))]
    pub fn verify(&mut self, reply: &Handshake, now: u32, config: &HandshakeConfig) -> Result<HandshakeOutcome> {
        let nonce = match (self.handshaking, self.nonce) {
            (true, Some(nonce)) => nonce,
            _ => return Err(ProtocolError::HandshakeError(constants::ERR_NOT_STARTED.into())),
        };

        if reply.nonce != nonce {
            warn!(expected = nonce, got = reply.nonce, "Handshake nonce mismatch");
            return Err(ProtocolError::HandshakeError(constants::ERR_NONCE_MISMATCH.into()));
        }

        // Ticks wrap at u32, so differences are taken modulo 2^32 and read as signed
        let diff = now.wrapping_sub(reply.time.wrapping_add(reply.delta)) as i32;

        if (0..=i64::from(config.tolerance_ms)).contains(&i64::from(diff)) {
            debug!(diff, "Handshake complete");
            self.nonce = None;
            self.server_time = None;
            self.handshaking = false;
            return Ok(HandshakeOutcome::Complete);
        }

        let delta = (now.wrapping_sub(reply.time) as i32) / 2;
        if delta < 0 {
            warn!(diff, delta, "Client clock ahead of server");
            return Err(ProtocolError::HandshakeError(constants::ERR_NEGATIVE_DELTA.into()));
        }

        self.attempts += 1;
        if self.attempts >= config.max_attempts {
            warn!(attempts = self.attempts, diff, "Handshake did not converge");
            return Err(ProtocolError::HandshakeError(constants::ERR_NOT_CONVERGED.into()));
        }

        let delta = delta.unsigned_abs();
        self.server_time = Some(now);
        debug!(diff, delta, "Handshake retry");
        Ok(HandshakeOutcome::Retry(Handshake {
            nonce,
            time: now,
            delta,
        }))
    }
}
