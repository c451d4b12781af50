//! # Connection Protocol
//!
//! Everything between a decoded frame and a handler.
//!
//! ## Components
//! - **Phases** ([`phase`]): forward-only connection states
//! - **Packets** ([`packets`]): the `Packet` trait and built-in packets
//! - **Registry** ([`registry`]): compiled packets by direction and key
//! - **Handshake** ([`handshake`]): clock synchronization before login
//! - **Session** ([`session`]): per-connection state and outbound queue
//! - **Dispatcher** ([`dispatcher`]): dispatch key to handler routing
//!
//! ## Handshake
//! ```text
//! server -> {nonce, T_s, 0}
//! client -> {nonce, clientTime, delta}
//! diff = T_now - (clientTime + delta)
//! 0 <= diff <= tolerance   => done, SetPhase sent
//! otherwise                => resend {nonce, T_now, (T_now - clientTime) / 2}
//! ```

pub mod dispatcher;
pub mod handshake;
pub mod packets;
pub mod phase;
pub mod registry;
pub mod session;

pub use dispatcher::{Dispatcher, DispatcherBuilder, PacketContext, PacketHandler};
pub use handshake::{HandshakeOutcome, HandshakeState};
pub use packets::{Handshake, Packet, SetPhase};
pub use phase::{Phase, ServerMode};
pub use registry::{PacketRegistry, RegistryBuilder};
pub use session::{Session, SessionId};
