//! Packet and struct declarations, and the table of nested types.

use std::collections::HashMap;
use std::fmt;

use crate::error::SchemaError;
use crate::schema::field::FieldDescriptor;

/// Which side of the connection sends a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Incoming,
    /// Server to client.
    Outgoing,
    Both,
}

impl Direction {
    /// Whether packets declared with `self` travel in `wanted`.
    pub fn covers(self, wanted: Direction) -> bool {
        self == Direction::Both || self == wanted
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Both => "both",
        };
        f.write_str(name)
    }
}

/// A nested struct, usable as a custom field or array element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructSchema {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl StructSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }
}

/// Declaration of a top-level wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketSchema {
    pub name: String,
    pub header: u8,
    pub sub_header: Option<u8>,
    pub direction: Direction,
    pub has_sequence: bool,
    pub fields: Vec<FieldDescriptor>,
}

impl PacketSchema {
    pub fn new(name: impl Into<String>, header: u8, direction: Direction) -> Self {
        Self {
            name: name.into(),
            header,
            sub_header: None,
            direction,
            has_sequence: false,
            fields: Vec::new(),
        }
    }

    pub fn incoming(name: impl Into<String>, header: u8) -> Self {
        Self::new(name, header, Direction::Incoming)
    }

    pub fn outgoing(name: impl Into<String>, header: u8) -> Self {
        Self::new(name, header, Direction::Outgoing)
    }

    #[must_use]
    pub fn sub_header(mut self, sub_header: u8) -> Self {
        self.sub_header = Some(sub_header);
        self
    }

    #[must_use]
    pub fn with_sequence(mut self) -> Self {
        self.has_sequence = true;
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Bytes taken by the header and, if present, the sub-header.
    pub fn header_len(&self) -> usize {
        1 + usize::from(self.sub_header.is_some())
    }
}

/// Nested struct declarations, looked up by name during compilation.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: HashMap<String, StructSchema>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> TypeTableBuilder {
        TypeTableBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&StructSchema> {
        self.types.get(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Builder for [`TypeTable`].
#[derive(Debug, Default)]
pub struct TypeTableBuilder {
    types: Vec<StructSchema>,
}

impl TypeTableBuilder {
    #[must_use]
    pub fn declare(mut self, schema: StructSchema) -> Self {
        self.types.push(schema);
        self
    }

    pub fn build(self) -> Result<TypeTable, SchemaError> {
        let mut types = HashMap::with_capacity(self.types.len());
        for schema in self.types {
            if types.contains_key(&schema.name) {
                return Err(SchemaError::DuplicateType(schema.name));
            }
            types.insert(schema.name.clone(), schema);
        }
        Ok(TypeTable { types })
    }
}

/// Resolve order overrides into the final wire sequence.
///
/// Fields without an override keep their declaration order. Fields with
/// `order = n` are then inserted at index `n`, lowest `n` first.
pub fn final_order(owner: &str, fields: &[FieldDescriptor]) -> Result<Vec<FieldDescriptor>, SchemaError> {
    let mut ordered: Vec<FieldDescriptor> =
        fields.iter().filter(|f| f.order.is_none()).cloned().collect();

    let mut overrides: Vec<&FieldDescriptor> = fields.iter().filter(|f| f.order.is_some()).collect();
    overrides.sort_by_key(|f| f.order);

    for field in overrides {
        let order = field.order.unwrap_or_default();
        if order > ordered.len() {
            return Err(SchemaError::OrderOutOfRange {
                owner: owner.to_string(),
                field: field.name.clone(),
                order,
                len: ordered.len(),
            });
        }
        ordered.insert(order, field.clone());
    }

    Ok(ordered)
}
