//! Schema to layout compilation.
//!
//! The compiler resolves order overrides, nested types and size-field
//! references, rejects every malformed schema, and assigns each field an
//! [`OffsetExpr`]. The resulting [`Layout`] is what the codec interprets.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::SchemaError;
use crate::layout::offset::{Cursor, DynamicTerm, OffsetExpr, Span};
use crate::layout::packet::PacketDescriptor;
use crate::schema::{
    final_order, Binding, Element, FieldDescriptor, FieldKind, PacketSchema, Primitive, TypeTable,
};

/// Width of a string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringWidth {
    /// Exactly this many bytes.
    Fixed(usize),
    /// `count(source) + 1` bytes; the extra byte is the terminator.
    Counted { source: usize },
}

/// Compiled element type of an array.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementCodec {
    Primitive(Primitive),
    Custom(Arc<Layout>),
}

impl ElementCodec {
    pub fn size(&self) -> usize {
        match self {
            Self::Primitive(p) => p.width(),
            Self::Custom(layout) => layout.static_size,
        }
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self, Self::Primitive(Primitive::U8))
    }
}

/// Compiled wire representation of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCodec {
    /// Primitives and enums alike.
    Primitive(Primitive),
    String(StringWidth),
    FixedArray { element: ElementCodec, length: usize },
    DynamicArray { element: ElementCodec, source: usize },
    Custom(Arc<Layout>),
}

/// One field with its resolved position.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub offset: OffsetExpr,
    /// Width of one element (the whole field for scalars).
    pub element_size: usize,
    /// Bytes occupied regardless of runtime values.
    pub static_width: usize,
    pub codec: FieldCodec,
    pub binding: Binding,
    /// Runtime span on top of `static_width`, for variable-length fields.
    pub span: Option<Span>,
    /// Later fields whose length this field carries.
    pub dependents: Vec<usize>,
    /// Position in source declaration order.
    pub declared: usize,
}

impl FieldLayout {
    pub fn is_size_field(&self) -> bool {
        !self.dependents.is_empty()
    }
}

/// Compiled field list of a packet body or nested struct.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub name: String,
    pub fields: Vec<FieldLayout>,
    /// Offset of the first field (the header length for packets).
    pub start: usize,
    /// Total length expression, including `start`.
    pub end: OffsetExpr,
    pub static_size: usize,
    /// Field indices in the order decode constructs them: constructor-bound
    /// fields by declaration, then properties by declaration.
    pub build_order: Vec<usize>,
}

impl Layout {
    pub fn is_dynamic(&self) -> bool {
        !self.end.is_static()
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Every leaf with its offset expression, fixed arrays unrolled and nested
    /// structs inlined. Dynamic arrays appear once, as `name[i]`.
    pub fn leaf_offsets(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_leaves("", &OffsetExpr::fixed(0), &mut out);
        out
    }

    fn collect_leaves(&self, prefix: &str, base: &OffsetExpr, out: &mut Vec<(String, String)>) {
        for field in &self.fields {
            let path = format!("{prefix}{}", field.name);
            let offset = rebase(base, &field.offset, prefix);
            match &field.codec {
                FieldCodec::Custom(nested) => {
                    nested.collect_leaves(&format!("{path}."), &offset, out);
                }
                FieldCodec::FixedArray {
                    element: ElementCodec::Custom(nested),
                    length,
                } => {
                    for i in 0..*length {
                        let mut element = offset.clone();
                        element.constant += i * nested.static_size;
                        nested.collect_leaves(&format!("{path}[{i}]."), &element, out);
                    }
                }
                FieldCodec::DynamicArray { element, .. } => {
                    out.push((format!("{path}[i]"), format!("{offset} + i*{}", element.size())));
                }
                _ => out.push((path, offset.to_string())),
            }
        }
    }
}

fn rebase(base: &OffsetExpr, local: &OffsetExpr, prefix: &str) -> OffsetExpr {
    let mut expr = base.clone();
    expr.constant += local.constant;
    expr.terms.extend(local.terms.iter().map(|t| DynamicTerm {
        field: t.field,
        label: format!("{prefix}{}", t.label),
    }));
    expr
}

/// Compiles schemas against one [`TypeTable`], caching nested layouts.
#[derive(Debug)]
pub struct LayoutCompiler<'a> {
    types: &'a TypeTable,
    cache: HashMap<String, Arc<Layout>>,
    in_progress: Vec<String>,
}

impl<'a> LayoutCompiler<'a> {
    pub fn new(types: &'a TypeTable) -> Self {
        Self {
            types,
            cache: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Compile a top-level packet.
    pub fn compile_packet(&mut self, schema: &PacketSchema) -> Result<PacketDescriptor, SchemaError> {
        let layout = self.compile_fields(&schema.name, &schema.fields, schema.header_len())?;
        trace!(packet = %schema.name, size = %layout.end, "Compiled packet layout");
        Ok(PacketDescriptor::new(schema, Arc::new(layout)))
    }

    /// Compile (or fetch) a nested struct declared in the type table.
    pub fn compile_struct(
        &mut self,
        owner: &str,
        field: &str,
        type_name: &str,
    ) -> Result<Arc<Layout>, SchemaError> {
        if let Some(layout) = self.cache.get(type_name) {
            return Ok(layout.clone());
        }
        if self.in_progress.iter().any(|n| n == type_name) {
            return Err(SchemaError::RecursiveType(type_name.to_string()));
        }

        let types = self.types;
        let schema = types.get(type_name).ok_or_else(|| SchemaError::UnknownType {
            owner: owner.to_string(),
            field: field.to_string(),
            type_name: type_name.to_string(),
        })?;

        self.in_progress.push(type_name.to_string());
        let compiled = self.compile_fields(&schema.name, &schema.fields, 0);
        self.in_progress.pop();

        let layout = Arc::new(compiled?);
        self.cache.insert(type_name.to_string(), layout.clone());
        Ok(layout)
    }

    fn compile_fields(
        &mut self,
        owner: &str,
        declared: &[FieldDescriptor],
        start: usize,
    ) -> Result<Layout, SchemaError> {
        let ordered = final_order(owner, declared)?;

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(ordered.len());
        for (i, field) in ordered.iter().enumerate() {
            if index.insert(field.name.as_str(), i).is_some() {
                return Err(SchemaError::DuplicateField {
                    owner: owner.to_string(),
                    field: field.name.clone(),
                });
            }
        }

        let mut cursor = Cursor::new(start);
        let mut fields: Vec<FieldLayout> = Vec::with_capacity(ordered.len());

        for (i, field) in ordered.iter().enumerate() {
            let source = match &field.size_field {
                Some(size_field) => Some(resolve_size_field(owner, field, size_field, i, &index, &ordered)?),
                None => None,
            };

            let (codec, element_size, static_width, span) = self.compile_kind(owner, field, source)?;

            let term = span.map(|span| DynamicTerm {
                field: i,
                label: term_label(&ordered, field, span),
            });
            let offset = cursor.place(static_width, term);

            if let (Some(source), Some(Span::Counted { .. })) = (source, span) {
                fields[source].dependents.push(i);
            }

            let declared_at = declared
                .iter()
                .position(|d| d.name == field.name)
                .unwrap_or(i);

            fields.push(FieldLayout {
                name: field.name.clone(),
                offset,
                element_size,
                static_width,
                codec,
                binding: field.binding,
                span,
                dependents: Vec::new(),
                declared: declared_at,
            });
        }

        let end = cursor.finish();
        let static_size = end.constant;

        let mut build_order: Vec<usize> = (0..fields.len()).collect();
        build_order.sort_by_key(|&i| (!fields[i].binding.is_constructor(), fields[i].declared));

        Ok(Layout {
            name: owner.to_string(),
            fields,
            start,
            end,
            static_size,
            build_order,
        })
    }

    fn compile_kind(
        &mut self,
        owner: &str,
        field: &FieldDescriptor,
        source: Option<usize>,
    ) -> Result<(FieldCodec, usize, usize, Option<Span>), SchemaError> {
        let missing = || SchemaError::MissingLengthSource {
            owner: owner.to_string(),
            field: field.name.clone(),
        };
        let zero = || SchemaError::ZeroLength {
            owner: owner.to_string(),
            field: field.name.clone(),
        };

        match &field.kind {
            FieldKind::Primitive(p) => Ok((FieldCodec::Primitive(*p), p.width(), p.width(), None)),
            FieldKind::Enum { name, repr } => {
                if !repr.is_integer() {
                    return Err(SchemaError::UnsupportedKind {
                        owner: owner.to_string(),
                        field: field.name.clone(),
                        reason: format!("enum {name} must be backed by an integer, not {repr}"),
                    });
                }
                Ok((FieldCodec::Primitive(*repr), repr.width(), repr.width(), None))
            }
            FieldKind::String => match (field.array_length, source) {
                (Some(0), _) => Err(zero()),
                (Some(length), _) => Ok((FieldCodec::String(StringWidth::Fixed(length)), 1, length, None)),
                (None, Some(source)) => Ok((
                    FieldCodec::String(StringWidth::Counted { source }),
                    1,
                    1,
                    Some(Span::Counted { source, scale: 1 }),
                )),
                (None, None) => Err(missing()),
            },
            FieldKind::FixedArray(element) | FieldKind::DynamicArray(element) => {
                let element = self.compile_element(owner, field, element)?;
                let size = element.size();
                let fixed_length = match field.kind {
                    FieldKind::FixedArray(_) => field.array_length,
                    _ => None,
                };
                match (fixed_length, source) {
                    (Some(0), _) => Err(zero()),
                    (Some(length), _) => Ok((
                        FieldCodec::FixedArray { element, length },
                        size,
                        size * length,
                        None,
                    )),
                    (None, Some(source)) => Ok((
                        FieldCodec::DynamicArray { element, source },
                        size,
                        0,
                        Some(Span::Counted { source, scale: size }),
                    )),
                    (None, None) => Err(missing()),
                }
            }
            FieldKind::Custom(type_name) => {
                let layout = self.compile_struct(owner, &field.name, type_name)?;
                let span = layout.is_dynamic().then_some(Span::Nested);
                let size = layout.static_size;
                Ok((FieldCodec::Custom(layout), size, size, span))
            }
        }
    }

    fn compile_element(
        &mut self,
        owner: &str,
        field: &FieldDescriptor,
        element: &Element,
    ) -> Result<ElementCodec, SchemaError> {
        match element {
            Element::Primitive(p) => Ok(ElementCodec::Primitive(*p)),
            Element::Custom(type_name) => {
                let layout = self.compile_struct(owner, &field.name, type_name)?;
                if layout.is_dynamic() {
                    return Err(SchemaError::DynamicElement {
                        owner: owner.to_string(),
                        field: field.name.clone(),
                    });
                }
                if layout.static_size == 0 {
                    return Err(SchemaError::ZeroLength {
                        owner: owner.to_string(),
                        field: field.name.clone(),
                    });
                }
                Ok(ElementCodec::Custom(layout))
            }
        }
    }
}

fn resolve_size_field(
    owner: &str,
    field: &FieldDescriptor,
    size_field: &str,
    position: usize,
    index: &HashMap<&str, usize>,
    ordered: &[FieldDescriptor],
) -> Result<usize, SchemaError> {
    let source = *index
        .get(size_field)
        .ok_or_else(|| SchemaError::UnknownSizeField {
            owner: owner.to_string(),
            field: field.name.clone(),
            size_field: size_field.to_string(),
        })?;

    if source >= position {
        return Err(SchemaError::SizeFieldAfterDependent {
            owner: owner.to_string(),
            field: field.name.clone(),
            size_field: size_field.to_string(),
        });
    }

    match ordered[source].kind {
        FieldKind::Primitive(p) | FieldKind::Enum { repr: p, .. } if p.is_integer() => Ok(source),
        _ => Err(SchemaError::InvalidSizeField {
            owner: owner.to_string(),
            size_field: size_field.to_string(),
        }),
    }
}

fn term_label(ordered: &[FieldDescriptor], field: &FieldDescriptor, span: Span) -> String {
    match span {
        Span::Counted { source, scale: 1 } => ordered[source].name.clone(),
        Span::Counted { source, scale } => format!("{}*{scale}", ordered[source].name),
        Span::Nested => format!("len({})", field.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StructSchema;

    fn types() -> TypeTable {
        TypeTable::builder()
            .declare(
                StructSchema::new("Position")
                    .field(FieldDescriptor::primitive("x", Primitive::I32))
                    .field(FieldDescriptor::primitive("y", Primitive::I32)),
            )
            .declare(
                StructSchema::new("Note")
                    .field(FieldDescriptor::primitive("len", Primitive::U8))
                    .field(FieldDescriptor::dynamic_string("text").sized_by("len")),
            )
            .build()
            .unwrap()
    }

    fn compile(schema: PacketSchema) -> Result<PacketDescriptor, SchemaError> {
        let types = types();
        LayoutCompiler::new(&types).compile_packet(&schema)
    }

    #[test]
    fn static_packet_has_constant_offsets() {
        let desc = compile(
            PacketSchema::incoming("Move", 0x07)
                .field(FieldDescriptor::primitive("kind", Primitive::U8))
                .field(FieldDescriptor::custom("to", "Position"))
                .field(FieldDescriptor::primitive("time", Primitive::U32)),
        )
        .unwrap();

        assert_eq!(desc.static_size, 1 + 1 + 8 + 4);
        assert!(!desc.is_dynamic);
        let offsets: Vec<_> = desc.layout.fields.iter().map(|f| f.offset.static_value()).collect();
        assert_eq!(offsets, vec![Some(1), Some(2), Some(10)]);
    }

    #[test]
    fn fixed_custom_arrays_unroll_with_element_stride() {
        let desc = compile(
            PacketSchema::outgoing("Path", 0x10)
                .field(FieldDescriptor::array("points", Element::Custom("Position".into()), 3)),
        )
        .unwrap();

        let leaves = desc.layout.leaf_offsets();
        let names: Vec<_> = leaves.iter().map(|(n, o)| format!("{n}@{o}")).collect();
        assert_eq!(
            names,
            [
                "points[0].x@1",
                "points[0].y@5",
                "points[1].x@9",
                "points[1].y@13",
                "points[2].x@17",
                "points[2].y@21",
            ]
        );
        assert_eq!(desc.static_size, 25);
    }

    #[test]
    fn dynamic_terms_thread_through_later_fields() {
        let desc = compile(
            PacketSchema::incoming("Chat", 0x03)
                .field(FieldDescriptor::primitive("size", Primitive::U16))
                .field(FieldDescriptor::dynamic_string("message").sized_by("size"))
                .field(FieldDescriptor::primitive("count", Primitive::U8))
                .field(FieldDescriptor::dynamic_array("ids", Element::Primitive(Primitive::U32)).sized_by("count"))
                .field(FieldDescriptor::primitive("flag", Primitive::Bool)),
        )
        .unwrap();

        let flag = desc.layout.field("flag").unwrap();
        assert_eq!(flag.offset.to_string(), "5 + size + count*4");
        assert_eq!(desc.layout.end.to_string(), "6 + size + count*4");
        assert!(desc.is_dynamic);
        assert_eq!(desc.layout.fields[0].dependents, vec![1]);
    }

    #[test]
    fn nested_dynamic_struct_contributes_a_term() {
        let desc = compile(
            PacketSchema::incoming("Post", 0x20)
                .field(FieldDescriptor::custom("note", "Note"))
                .field(FieldDescriptor::primitive("tail", Primitive::U8)),
        )
        .unwrap();

        let tail = desc.layout.field("tail").unwrap();
        assert_eq!(tail.offset.to_string(), "3 + len(note)");
        let leaves = desc.layout.leaf_offsets();
        assert_eq!(leaves[1], ("note.text".to_string(), "2".to_string()));
        assert_eq!(leaves[2], ("tail".to_string(), "3 + len(note)".to_string()));
    }

    #[test]
    fn size_field_after_dependent_is_rejected() {
        let err = compile(
            PacketSchema::incoming("Bad", 0x01)
                .field(FieldDescriptor::dynamic_array("data", Element::Primitive(Primitive::U8)).sized_by("count"))
                .field(FieldDescriptor::primitive("count", Primitive::U8)),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::SizeFieldAfterDependent { .. }));
    }

    #[test]
    fn order_override_can_fix_a_dependency() {
        let desc = compile(
            PacketSchema::incoming("Fixed", 0x01)
                .field(FieldDescriptor::dynamic_array("data", Element::Primitive(Primitive::U8)).sized_by("count"))
                .field(FieldDescriptor::primitive("count", Primitive::U8).at(0)),
        )
        .unwrap();
        assert_eq!(desc.layout.fields[0].name, "count");
        assert_eq!(desc.layout.fields[1].offset.static_value(), Some(2));
    }

    #[test]
    fn malformed_schemas_are_rejected() {
        let cases = vec![
            (
                PacketSchema::incoming("NoLength", 0x01).field(FieldDescriptor::dynamic_string("s")),
                "missing",
            ),
            (
                PacketSchema::incoming("UnknownSize", 0x01)
                    .field(FieldDescriptor::dynamic_string("s").sized_by("nope")),
                "unknown-size",
            ),
            (
                PacketSchema::incoming("FloatSize", 0x01)
                    .field(FieldDescriptor::primitive("n", Primitive::F32))
                    .field(FieldDescriptor::dynamic_string("s").sized_by("n")),
                "invalid-size",
            ),
            (
                PacketSchema::incoming("FloatEnum", 0x01)
                    .field(FieldDescriptor::enumeration("e", "Kind", Primitive::F32)),
                "unsupported",
            ),
            (
                PacketSchema::incoming("Ghost", 0x01).field(FieldDescriptor::custom("g", "Ghost")),
                "unknown-type",
            ),
            (
                PacketSchema::incoming("Notes", 0x01)
                    .field(FieldDescriptor::array("notes", Element::Custom("Note".into()), 2)),
                "dynamic-element",
            ),
            (
                PacketSchema::incoming("Dup", 0x01)
                    .field(FieldDescriptor::primitive("a", Primitive::U8))
                    .field(FieldDescriptor::primitive("a", Primitive::U8)),
                "duplicate",
            ),
        ];

        for (schema, label) in cases {
            let err = compile(schema).unwrap_err();
            let ok = match label {
                "missing" => matches!(err, SchemaError::MissingLengthSource { .. }),
                "unknown-size" => matches!(err, SchemaError::UnknownSizeField { .. }),
                "invalid-size" => matches!(err, SchemaError::InvalidSizeField { .. }),
                "unsupported" => matches!(err, SchemaError::UnsupportedKind { .. }),
                "unknown-type" => matches!(err, SchemaError::UnknownType { .. }),
                "dynamic-element" => matches!(err, SchemaError::DynamicElement { .. }),
                "duplicate" => matches!(err, SchemaError::DuplicateField { .. }),
                _ => false,
            };
            assert!(ok, "{label}: unexpected {err:?}");
        }
    }

    #[test]
    fn recursive_types_are_rejected() {
        let types = TypeTable::builder()
            .declare(StructSchema::new("A").field(FieldDescriptor::custom("b", "B")))
            .declare(StructSchema::new("B").field(FieldDescriptor::custom("a", "A")))
            .build()
            .unwrap();
        let err = LayoutCompiler::new(&types)
            .compile_packet(&PacketSchema::incoming("Loop", 0x01).field(FieldDescriptor::custom("a", "A")))
            .unwrap_err();
        assert_eq!(err, SchemaError::RecursiveType("A".into()));
    }

    #[test]
    fn constructor_fields_are_built_first() {
        let desc = compile(
            PacketSchema::outgoing("Spawn", 0x01)
                .field(FieldDescriptor::primitive("angle", Primitive::F32))
                .field(FieldDescriptor::primitive("vid", Primitive::U32).record_parameter())
                .field(FieldDescriptor::primitive("race", Primitive::U16).readonly()),
        )
        .unwrap();
        let names: Vec<_> = desc
            .layout
            .build_order
            .iter()
            .map(|&i| desc.layout.fields[i].name.as_str())
            .collect();
        assert_eq!(names, ["vid", "race", "angle"]);
    }
}
