//! # Transport Layer
//!
//! Byte streams in, handled packets out.
//!
//! ## Components
//! - **Codec** ([`codec`]): `tokio_util` framing driven by the packet registry
//! - **Connection** ([`connection`]): one session over any async stream
//! - **Server** ([`server`]): TCP accept loop, connection limit and shutdown
//!
//! ## Concurrency
//! One task per connection, one accept task. Packets of a connection are
//! handled in arrival order; nothing orders packets across connections.

pub mod codec;
pub mod connection;
pub mod server;

pub use codec::{Frame, WireCodec};
pub use connection::{Connection, Services};
pub use server::{Server, SessionObserver};
