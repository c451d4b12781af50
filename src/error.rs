//! # Error Types
//!
//! Error handling for schema compilation, the packet codec and the
//! connection layer.
//!
//! ## Error Categories
//! - **Schema errors** ([`SchemaError`]): raised while compiling packet
//!   schemas, always before the server accepts a connection
//! - **Codec errors** ([`CodecError`]): a value does not fit its layout, or a
//!   buffer does not hold what the layout expects
//! - **Protocol errors** ([`ProtocolError`]): framing faults, handshake
//!   failures, handler failures; all of them are fatal to one connection only
//!
//! ## Example Usage
//! ```rust
//! use gamewire::error::{ProtocolError, Result};
//! use tracing::error;
//!
//! fn lookup(header: u8) -> Result<()> {
//!     Err(ProtocolError::UnknownHeader(header))
//! }
//!
//! if let Err(e) = lookup(0x42) {
//!     error!(error = %e, "Dropping connection");
//! }
//! ```

use std::io;
use thiserror::Error;

/// Static error messages, borrowed on the error path instead of allocated.
pub mod constants {
    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_SHORT_READ: &str = "Peer closed the stream in the middle of a frame";

    /// Handshake-specific errors
    pub const ERR_NONCE_MISMATCH: &str = "Handshake nonce mismatch";
    pub const ERR_NEGATIVE_DELTA: &str = "Handshake clock delta went negative";
    pub const ERR_NOT_CONVERGED: &str = "Handshake did not converge within the attempt limit";
    pub const ERR_NOT_STARTED: &str = "Handshake reply received before the handshake started";
    pub const ERR_ALREADY_STARTED: &str = "Handshake already in progress";

    /// Dispatch errors
    pub const ERR_HANDLER_PANICKED: &str = "Packet handler panicked";
    pub const ERR_NO_HANDLER: &str = "No handler bound for packet";
}

/// Failure to compile a schema into a layout.
///
/// Every variant is raised at registry build time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("field '{field}' declared twice in '{owner}'")]
    DuplicateField { owner: String, field: String },

    #[error("type '{0}' declared twice")]
    DuplicateType(String),

    #[error("field '{field}' of '{owner}' refers to unknown type '{type_name}'")]
    UnknownType {
        owner: String,
        field: String,
        type_name: String,
    },

    #[error("type '{0}' contains itself")]
    RecursiveType(String),

    #[error("field '{field}' of '{owner}' is sized by unknown field '{size_field}'")]
    UnknownSizeField {
        owner: String,
        field: String,
        size_field: String,
    },

    #[error("field '{field}' of '{owner}' is sized by '{size_field}', which comes after it")]
    SizeFieldAfterDependent {
        owner: String,
        field: String,
        size_field: String,
    },

    #[error("size field '{size_field}' of '{owner}' must be an unsigned or signed integer")]
    InvalidSizeField { owner: String, size_field: String },

    #[error("dynamic field '{field}' of '{owner}' has neither a size field nor a fixed length")]
    MissingLengthSource { owner: String, field: String },

    #[error("field '{field}' of '{owner}' has an unsupported kind: {reason}")]
    UnsupportedKind {
        owner: String,
        field: String,
        reason: String,
    },

    #[error("array '{field}' of '{owner}' has elements of dynamic size")]
    DynamicElement { owner: String, field: String },

    #[error("field '{field}' of '{owner}' requests position {order}, but only {len} fields exist")]
    OrderOutOfRange {
        owner: String,
        field: String,
        order: usize,
        len: usize,
    },

    #[error("field '{field}' of '{owner}' has a zero length")]
    ZeroLength { owner: String, field: String },
}

/// Failure to encode a value into, or decode a value out of, a layout.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("field '{field}' expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("string '{field}' is {len} bytes, capacity is {capacity}")]
    StringTooLong {
        field: String,
        len: usize,
        capacity: usize,
    },

    #[error("string '{0}' contains non-ASCII characters")]
    NonAscii(String),

    #[error("string '{0}' contains a NUL byte")]
    EmbeddedNul(String),

    #[error("array '{field}' has {len} elements, layout requires {expected}")]
    ArrayLength {
        field: String,
        len: usize,
        expected: usize,
    },

    #[error("length {len} of '{field}' does not fit size field '{size_field}'")]
    LengthOverflow {
        field: String,
        size_field: String,
        len: usize,
    },

    #[error("fields sized by '{size_field}' disagree on their length ({first} vs {second})")]
    LengthConflict {
        size_field: String,
        first: usize,
        second: usize,
    },

    #[error("size field '{0}' holds a negative value")]
    NegativeSize(String),

    #[error("span of '{0}' overflows the address space")]
    SizeOverflow(String),

    #[error("buffer holds {available} bytes, {required} required")]
    BufferTooShort { required: usize, available: usize },
}

// ProtocolError is the primary error type for all runtime operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Unknown packet header 0x{0:02X}")]
    UnknownHeader(u8),

    #[error("Unknown sub-header 0x{sub_header:02X} for header 0x{header:02X}")]
    UnknownSubHeader { header: u8, sub_header: u8 },

    #[error("Frame of {0} bytes exceeds the configured maximum")]
    OversizedFrame(usize),

    #[error("{}", constants::ERR_CONNECTION_CLOSED)]
    ConnectionClosed,

    #[error("Truncated frame: {0}")]
    Truncated(&'static str),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unexpected packet '{packet}' in phase {phase}")]
    UnexpectedPacket { packet: String, phase: String },

    #[error("Phase cannot move from {from} back to {to}")]
    PhaseRegression { from: String, to: String },

    #[error("Handler for '{packet}' failed: {reason}")]
    HandlerFailed { packet: String, reason: String },

    #[error("Session task aborted: {0}")]
    SessionAborted(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
