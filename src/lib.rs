//! # gamewire
//!
//! Schema-driven packet codecs and the connection layer for a legacy binary
//! game protocol.
//!
//! Packets are declared as tables of fields. The layout compiler turns each
//! declaration into an offset plan shared by sizing, encoding, decoding and
//! framing, so the byte count the server waits for is always the byte count
//! the codec reads.
//!
//! ## Modules
//! - [`schema`]: field, struct and packet declarations
//! - [`layout`]: offset engine, layout compiler and codec
//! - [`protocol`]: registry, phases, handshake, sessions and dispatch
//! - [`transport`]: framing codec, connections and the TCP server
//! - [`config`]: TOML/env configuration
//! - [`utils`]: logging, clocks and metrics
//!
//! ## Example
//! ```rust
//! use gamewire::layout::Record;
//! use gamewire::protocol::PacketRegistry;
//! use gamewire::schema::{Direction, Element, FieldDescriptor, PacketSchema, Primitive};
//!
//! let registry = PacketRegistry::builder()
//!     .register(
//!         PacketSchema::incoming("Blob", 0x05)
//!             .field(FieldDescriptor::primitive("id", Primitive::U32))
//!             .field(FieldDescriptor::primitive("count", Primitive::U16))
//!             .field(FieldDescriptor::dynamic_array("payload", Element::Primitive(Primitive::U8)).sized_by("count")),
//!     )
//!     .build()
//!     .expect("valid schema");
//!
//! let blob = registry.lookup(Direction::Incoming, 0x05).expect("registered");
//! let bytes = blob
//!     .encode(&Record::new().with("id", 7u32).with("payload", vec![1u8, 2, 3]))
//!     .expect("encodes");
//! assert_eq!(bytes, [0x05, 0x07, 0x00, 0x00, 0x00, 0x03, 0x00, 0x01, 0x02, 0x03]);
//! ```

pub mod config;
pub mod error;
pub mod layout;
pub mod protocol;
pub mod schema;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
