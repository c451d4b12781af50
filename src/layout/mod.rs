//! # Layout Compiler
//!
//! Turns [`schema`](crate::schema) declarations into byte-exact codecs.
//!
//! ## Components
//! - **Offset engine** ([`offset`]): `constant + Σ dynamic terms` per field
//! - **Compiler** ([`compiler`]): resolves order, nesting and size fields,
//!   rejects malformed schemas
//! - **Codec** ([`codec`]): interprets a layout to encode, decode and measure
//! - **Packets** ([`packet`]): header, sub-header and sequence byte framing
//! - **Values** ([`value`]): the record form packets travel in
//!
//! ## Wire Format
//! ```text
//! [Header(1)] [SubHeader(0|1)] [Fields...] [Sequence(0|1)]
//! ```
//! Multi-byte integers are little-endian. Strings are fixed-width ASCII,
//! either of a literal width or `size field + 1` bytes.

pub mod codec;
pub mod compiler;
pub mod offset;
pub mod packet;
pub mod value;

pub use codec::Plan;
pub use compiler::{ElementCodec, FieldCodec, FieldLayout, Layout, LayoutCompiler, StringWidth};
pub use offset::{Cursor, DynamicTerm, OffsetExpr, Span};
pub use packet::{PacketDescriptor, PacketKey, SEQUENCE_PLACEHOLDER};
pub use value::{FromValue, Record, Value, WireStruct};
