//! Field descriptors: one field of a packet or nested struct.

use std::fmt;

/// Fixed-width scalar types understood by the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl Primitive {
    /// Width in bytes on the wire.
    pub const fn width(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Whether the type can back an enum or a size field.
    pub const fn is_integer(self) -> bool {
        !matches!(self, Self::Bool | Self::F32 | Self::F64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::U64 => "u64",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type of a fixed or dynamic array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Primitive(Primitive),
    /// A struct declared in the [`TypeTable`](super::TypeTable).
    Custom(String),
}

/// What a field holds, and therefore how it is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Primitive(Primitive),
    /// A named enum serialized as its underlying integer.
    Enum { name: String, repr: Primitive },
    /// Fixed-width ASCII buffer.
    String,
    FixedArray(Element),
    DynamicArray(Element),
    /// A nested struct declared in the [`TypeTable`](super::TypeTable).
    Custom(String),
}

impl FieldKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Primitive(p) => p.to_string(),
            Self::Enum { name, repr } => format!("enum {name}: {repr}"),
            Self::String => "string".to_string(),
            Self::FixedArray(e) => format!("[{}; N]", element_name(e)),
            Self::DynamicArray(e) => format!("[{}]", element_name(e)),
            Self::Custom(name) => name.clone(),
        }
    }
}

fn element_name(element: &Element) -> String {
    match element {
        Element::Primitive(p) => p.to_string(),
        Element::Custom(name) => name.clone(),
    }
}

/// How decode hands a field to the value it builds.
///
/// Constructor-bound fields (`Readonly`, `RecordParameter`) are supplied in
/// declaration order before any `Property` is assigned. The wire layout is
/// the same for all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binding {
    #[default]
    Property,
    Readonly,
    RecordParameter,
}

impl Binding {
    pub const fn is_constructor(self) -> bool {
        matches!(self, Self::Readonly | Self::RecordParameter)
    }
}

/// One field of a packet or nested struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Element count of a fixed array, or byte width of a literal-length string.
    pub array_length: Option<usize>,
    /// Sibling field holding the element count of a dynamic array or string.
    pub size_field: Option<String>,
    /// Final position override; `None` keeps declaration order.
    pub order: Option<usize>,
    pub binding: Binding,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            array_length: None,
            size_field: None,
            order: None,
            binding: Binding::Property,
        }
    }

    pub fn primitive(name: impl Into<String>, primitive: Primitive) -> Self {
        Self::new(name, FieldKind::Primitive(primitive))
    }

    pub fn enumeration(name: impl Into<String>, enum_name: impl Into<String>, repr: Primitive) -> Self {
        Self::new(
            name,
            FieldKind::Enum {
                name: enum_name.into(),
                repr,
            },
        )
    }

    /// A string occupying exactly `length` bytes.
    pub fn string(name: impl Into<String>, length: usize) -> Self {
        let mut field = Self::new(name, FieldKind::String);
        field.array_length = Some(length);
        field
    }

    /// A string whose length is carried by another field; chain
    /// [`sized_by`](Self::sized_by).
    pub fn dynamic_string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn array(name: impl Into<String>, element: Element, length: usize) -> Self {
        let mut field = Self::new(name, FieldKind::FixedArray(element));
        field.array_length = Some(length);
        field
    }

    /// A runtime-length array; chain [`sized_by`](Self::sized_by).
    pub fn dynamic_array(name: impl Into<String>, element: Element) -> Self {
        Self::new(name, FieldKind::DynamicArray(element))
    }

    pub fn custom(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Custom(type_name.into()))
    }

    pub fn sized_by(mut self, size_field: impl Into<String>) -> Self {
        self.size_field = Some(size_field.into());
        self
    }

    pub fn at(mut self, order: usize) -> Self {
        self.order = Some(order);
        self
    }

    pub fn readonly(mut self) -> Self {
        self.binding = Binding::Readonly;
        self
    }

    pub fn record_parameter(mut self) -> Self {
        self.binding = Binding::RecordParameter;
        self
    }

    /// Static width of one element, when it is known without a type table.
    pub fn element_size(&self) -> Option<usize> {
        match &self.kind {
            FieldKind::Primitive(p) | FieldKind::Enum { repr: p, .. } => Some(p.width()),
            FieldKind::FixedArray(Element::Primitive(p))
            | FieldKind::DynamicArray(Element::Primitive(p)) => Some(p.width()),
            FieldKind::String => Some(1),
            FieldKind::FixedArray(Element::Custom(_))
            | FieldKind::DynamicArray(Element::Custom(_))
            | FieldKind::Custom(_) => None,
        }
    }

    /// Whether the encoded width depends on a runtime value.
    pub fn is_dynamic(&self) -> bool {
        match self.kind {
            FieldKind::DynamicArray(_) => true,
            FieldKind::String => self.array_length.is_none(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_follow_the_wire_format() {
        assert_eq!(Primitive::Bool.width(), 1);
        assert_eq!(Primitive::I16.width(), 2);
        assert_eq!(Primitive::F32.width(), 4);
        assert_eq!(Primitive::U64.width(), 8);
        assert!(Primitive::U16.is_integer());
        assert!(!Primitive::F64.is_integer());
    }

    #[test]
    fn builders_set_length_sources() {
        let fixed = FieldDescriptor::string("name", 25);
        assert_eq!(fixed.array_length, Some(25));
        assert!(!fixed.is_dynamic());

        let dynamic = FieldDescriptor::dynamic_string("message").sized_by("length");
        assert_eq!(dynamic.size_field.as_deref(), Some("length"));
        assert!(dynamic.is_dynamic());

        let items = FieldDescriptor::dynamic_array("items", Element::Custom("Item".into()));
        assert!(items.is_dynamic());
        assert_eq!(items.element_size(), None);
    }

    #[test]
    fn bindings_mark_constructor_fields() {
        let field = FieldDescriptor::primitive("vid", Primitive::U32).record_parameter();
        assert!(field.binding.is_constructor());
        assert!(FieldDescriptor::primitive("x", Primitive::I32)
            .readonly()
            .binding
            .is_constructor());
        assert!(!FieldDescriptor::primitive("y", Primitive::I32)
            .binding
            .is_constructor());
    }
}
