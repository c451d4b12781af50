//! # Packet Schemas
//!
//! Declarative descriptions of packets and the structs nested inside them.
//!
//! Schemas are built once at startup with the builders in this module and are
//! immutable afterwards. The [`layout`](crate::layout) compiler turns them into
//! byte-exact encode/decode plans.
//!
//! ## Example
//! ```rust
//! use gamewire::schema::{Element, FieldDescriptor, PacketSchema, Primitive};
//!
//! let schema = PacketSchema::incoming("Blob", 0x05)
//!     .field(FieldDescriptor::primitive("id", Primitive::U32))
//!     .field(FieldDescriptor::primitive("count", Primitive::U16))
//!     .field(FieldDescriptor::dynamic_array("payload", Element::Primitive(Primitive::U8)).sized_by("count"));
//! assert_eq!(schema.fields.len(), 3);
//! ```

pub mod field;
pub mod packet;

pub use field::{Binding, Element, FieldDescriptor, FieldKind, Primitive};
pub use packet::{final_order, Direction, PacketSchema, StructSchema, TypeTable, TypeTableBuilder};
