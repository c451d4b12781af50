//! Connection phases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coarse protocol state of a connection.
///
/// Discriminants are the values the legacy client expects in the
/// phase-change packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    Handshake = 1,
    Login = 2,
    Select = 3,
    Loading = 4,
    Game = 5,
    /// Terminal phase of the authentication server.
    Auth = 10,
}

impl Phase {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Handshake),
            2 => Some(Self::Login),
            3 => Some(Self::Select),
            4 => Some(Self::Loading),
            5 => Some(Self::Game),
            10 => Some(Self::Auth),
            _ => None,
        }
    }

    /// Whether the server may move a session from `self` to `next`.
    ///
    /// Game servers walk Login → Select → Loading → Game and may skip ahead;
    /// the auth server goes straight from Handshake to Auth and stays there.
    pub fn can_advance_to(self, next: Phase) -> bool {
        match (self, next) {
            (Self::Handshake, Self::Auth) => true,
            (Self::Auth, _) | (_, Self::Auth) => false,
            (current, next) => next.code() > current.code(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handshake => "handshake",
            Self::Login => "login",
            Self::Select => "select",
            Self::Loading => "loading",
            Self::Game => "game",
            Self::Auth => "auth",
        };
        f.write_str(name)
    }
}

/// Which server a listener runs as; decides the phase after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Game,
    Auth,
}

impl ServerMode {
    pub const fn phase_after_handshake(self) -> Phase {
        match self {
            Self::Game => Phase::Login,
            Self::Auth => Phase::Auth,
        }
    }
}

impl FromStr for ServerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "game" => Ok(Self::Game),
            "auth" => Ok(Self::Auth),
            other => Err(format!("expected 'game' or 'auth', got '{other}'")),
        }
    }
}
