//! Property-based tests using proptest
//!
//! Round trips through nested structs, fixed and dynamic arrays and both
//! string widths; size computation agreeing with what encode writes; and
//! size fields that follow their dependent being rejected in every order.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use gamewire::error::{CodecError, ProtocolError, SchemaError};
use gamewire::layout::{LayoutCompiler, PacketDescriptor, Record, Value, WireStruct};
use gamewire::protocol::{Packet, PacketRegistry};
use gamewire::schema::{Direction, Element, FieldDescriptor, PacketSchema, Primitive, StructSchema, TypeTable};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i16,
    y: i16,
}

impl WireStruct for Point {
    fn to_record(&self) -> Record {
        Record::new().with("x", self.x).with("y", self.y)
    }

    fn from_record(mut record: Record) -> Result<Self, CodecError> {
        Ok(Self {
            x: record.take_as("x")?,
            y: record.take_as("y")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Item {
    id: u32,
    name: String,
}

impl WireStruct for Item {
    fn to_record(&self) -> Record {
        Record::new().with("id", self.id).with("name", self.name.as_str())
    }

    fn from_record(mut record: Record) -> Result<Self, CodecError> {
        Ok(Self {
            id: record.take_as("id")?,
            name: record.take_as("name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Inventory {
    owner: String,
    flags: [u8; 4],
    corners: Vec<Point>,
    items: Vec<Item>,
    scores: Vec<u32>,
    origin: Point,
    ratio: f32,
    alive: bool,
}

impl WireStruct for Inventory {
    fn to_record(&self) -> Record {
        Record::new()
            .with("owner", self.owner.as_str())
            .with("flags", self.flags)
            .with("corners", Value::structs(&self.corners))
            .with("items", Value::structs(&self.items))
            .with("scores", Value::list(self.scores.iter().copied()))
            .with("origin", self.origin.to_record())
            .with("ratio", self.ratio)
            .with("alive", self.alive)
    }

    fn from_record(mut record: Record) -> Result<Self, CodecError> {
        Ok(Self {
            owner: record.take_as("owner")?,
            flags: record.take_as("flags")?,
            corners: record.take_structs("corners")?,
            items: record.take_structs("items")?,
            scores: record.take_list("scores")?,
            origin: record.take_struct("origin")?,
            ratio: record.take_as("ratio")?,
            alive: record.take_as("alive")?,
        })
    }
}

impl Packet for Inventory {
    const HEADER: u8 = 0x40;

    fn schema() -> PacketSchema {
        PacketSchema::incoming("Inventory", Self::HEADER)
            .with_sequence()
            .field(FieldDescriptor::primitive("owner_len", Primitive::U8))
            .field(FieldDescriptor::primitive("item_count", Primitive::U16))
            .field(FieldDescriptor::primitive("score_count", Primitive::U8))
            .field(FieldDescriptor::dynamic_string("owner").sized_by("owner_len"))
            .field(FieldDescriptor::array("flags", Element::Primitive(Primitive::U8), 4))
            .field(FieldDescriptor::array("corners", Element::Custom("Point".into()), 2))
            .field(FieldDescriptor::dynamic_array("items", Element::Custom("Item".into())).sized_by("item_count"))
            .field(FieldDescriptor::dynamic_array("scores", Element::Primitive(Primitive::U32)).sized_by("score_count"))
            .field(FieldDescriptor::custom("origin", "Point"))
            .field(FieldDescriptor::primitive("ratio", Primitive::F32))
            .field(FieldDescriptor::primitive("alive", Primitive::Bool))
    }
}

fn types() -> TypeTable {
    TypeTable::builder()
        .declare(
            StructSchema::new("Point")
                .field(FieldDescriptor::primitive("x", Primitive::I16))
                .field(FieldDescriptor::primitive("y", Primitive::I16)),
        )
        .declare(
            StructSchema::new("Item")
                .field(FieldDescriptor::primitive("id", Primitive::U32))
                .field(FieldDescriptor::string("name", 8)),
        )
        .build()
        .expect("struct table is valid")
}

fn registry() -> PacketRegistry {
    PacketRegistry::builder()
        .types(types())
        .register_packet::<Inventory>()
        .build()
        .expect("inventory compiles")
}

fn descriptor(registry: &PacketRegistry) -> &PacketDescriptor {
    registry.lookup(Direction::Incoming, Inventory::HEADER).expect("registered")
}

fn point() -> impl Strategy<Value = Point> {
    (any::<i16>(), any::<i16>()).prop_map(|(x, y)| Point { x, y })
}

fn item() -> impl Strategy<Value = Item> {
    (any::<u32>(), "[a-zA-Z0-9]{0,8}").prop_map(|(id, name)| Item { id, name })
}

fn inventory() -> impl Strategy<Value = Inventory> {
    (
        "[ -~]{0,255}",
        any::<[u8; 4]>(),
        prop::collection::vec(point(), 2),
        prop::collection::vec(item(), 0..24),
        prop::collection::vec(any::<u32>(), 0..=255),
        point(),
        -1.0e6f32..1.0e6f32,
        any::<bool>(),
    )
        .prop_map(|(owner, flags, corners, items, scores, origin, ratio, alive)| Inventory {
            owner,
            flags,
            corners,
            items,
            scores,
            origin,
            ratio,
            alive,
        })
}

fn expected_len(inv: &Inventory) -> usize {
    // header + 3 size fields + owner + flags + corners + items + scores + origin + ratio + alive + sequence
    1 + (1 + 2 + 1) + (inv.owner.len() + 1) + 4 + 2 * 4 + inv.items.len() * 12 + inv.scores.len() * 4 + 4 + 4 + 1 + 1
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_inventory_roundtrip(inv in inventory()) {
        let registry = registry();
        let bytes = registry.encode_as(Direction::Incoming, &inv).expect("encodes");
        let decoded: Inventory = registry.decode(&bytes).expect("decodes");
        prop_assert_eq!(decoded, inv);
    }

    #[test]
    fn prop_encode_refuses_what_decode_would_truncate(mut inv in inventory(), owner in "[a\\x00]{1,16}") {
        let registry = registry();
        inv.owner = owner;
        match registry.encode_as(Direction::Incoming, &inv) {
            Ok(bytes) => {
                prop_assert!(!inv.owner.contains('\0'));
                let decoded: Inventory = registry.decode(&bytes).expect("decodes");
                prop_assert_eq!(decoded, inv);
            }
            Err(e) => {
                prop_assert!(inv.owner.contains('\0'));
                prop_assert!(matches!(e, ProtocolError::Codec(CodecError::EmbeddedNul(_))), "unexpected error: {}", e);
            }
        }
    }

    #[test]
    fn prop_size_matches_bytes_written(inv in inventory()) {
        let registry = registry();
        let desc = descriptor(&registry);
        let record = inv.to_record();

        let predicted = desc.encoded_len(&record).expect("sizes");
        let bytes = desc.encode(&record).expect("encodes");
        prop_assert_eq!(predicted, bytes.len());
        prop_assert_eq!(predicted, expected_len(&inv));
        prop_assert_eq!(desc.frame_len(&bytes).expect("measures"), Some(bytes.len()));

        let (_, consumed) = desc.decode(&bytes, 0).expect("decodes");
        prop_assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn prop_encode_into_matches_encode(inv in inventory(), offset in 0usize..16) {
        let registry = registry();
        let desc = descriptor(&registry);
        let record = inv.to_record();
        let standalone = desc.encode(&record).expect("encodes");

        let mut buf = vec![0xA5u8; offset + standalone.len()];
        let written = desc.encode_into(&record, &mut buf, offset).expect("fits");
        prop_assert_eq!(written, standalone.len());
        prop_assert_eq!(&buf[offset..], &standalone[..]);
        prop_assert!(buf[..offset].iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn prop_size_field_must_precede_its_dependent(
        fillers in 0usize..5,
        size_at in 0usize..7,
        dependent_at in 0usize..7,
    ) {
        let n = fillers + 2;
        let size_at = size_at % n;
        let dependent_at = dependent_at % n;
        prop_assume!(size_at != dependent_at);

        let mut fields: Vec<FieldDescriptor> = (0..fillers)
            .map(|i| FieldDescriptor::primitive(format!("pad{i}"), Primitive::U16))
            .collect();
        let (first, second) = if size_at < dependent_at {
            (
                (size_at, FieldDescriptor::primitive("count", Primitive::U8)),
                (dependent_at, FieldDescriptor::dynamic_array("data", Element::Primitive(Primitive::U8)).sized_by("count")),
            )
        } else {
            (
                (dependent_at, FieldDescriptor::dynamic_array("data", Element::Primitive(Primitive::U8)).sized_by("count")),
                (size_at, FieldDescriptor::primitive("count", Primitive::U8)),
            )
        };
        fields.insert(first.0, first.1);
        fields.insert(second.0, second.1);

        let mut schema = PacketSchema::incoming("Probe", 0x70);
        for field in fields {
            schema = schema.field(field);
        }
        let result = LayoutCompiler::new(&TypeTable::new()).compile_packet(&schema);

        if size_at < dependent_at {
            prop_assert!(result.is_ok());
        } else {
            let is_ordering_error = matches!(result, Err(SchemaError::SizeFieldAfterDependent { .. }));
            prop_assert!(is_ordering_error);
        }
    }
}

#[test]
fn boundary_lengths_round_trip() {
    let registry = registry();
    let base = Inventory {
        owner: String::new(),
        flags: [0; 4],
        corners: vec![Point { x: 0, y: 0 }, Point { x: -1, y: 1 }],
        items: Vec::new(),
        scores: Vec::new(),
        origin: Point { x: i16::MIN, y: i16::MAX },
        ratio: 0.0,
        alive: false,
    };

    for len in [0usize, 1, 255] {
        let inv = Inventory {
            owner: "o".repeat(len),
            scores: vec![u32::MAX; len],
            items: vec![
                Item {
                    id: 1,
                    name: "x".repeat(8)
                };
                len.min(1)
            ],
            ..base.clone()
        };
        let bytes = registry.encode_as(Direction::Incoming, &inv).unwrap();
        assert_eq!(bytes.len(), expected_len(&inv));
        assert_eq!(registry.decode::<Inventory>(&bytes).unwrap(), inv);
    }
}

#[test]
fn lengths_beyond_the_size_field_are_rejected() {
    let registry = registry();
    let inv = Inventory {
        owner: "o".repeat(256),
        flags: [0; 4],
        corners: vec![Point { x: 0, y: 0 }; 2],
        items: Vec::new(),
        scores: Vec::new(),
        origin: Point { x: 0, y: 0 },
        ratio: 1.5,
        alive: true,
    };
    let err = registry.encode_as(Direction::Incoming, &inv).unwrap_err();
    assert!(err.to_string().contains("owner_len"), "unexpected error: {err}");
}

#[test]
fn every_order_of_three_fields_is_checked() {
    let count = || FieldDescriptor::primitive("count", Primitive::U16);
    let data = || FieldDescriptor::dynamic_array("data", Element::Primitive(Primitive::U32)).sized_by("count");
    let tag = || FieldDescriptor::primitive("tag", Primitive::U8);

    let orders: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    for order in orders {
        let mut schema = PacketSchema::incoming("Probe", 0x71);
        for &i in &order {
            schema = schema.field(match i {
                0 => count(),
                1 => data(),
                _ => tag(),
            });
        }
        let size_first = order.iter().position(|&i| i == 0) < order.iter().position(|&i| i == 1);
        let result = LayoutCompiler::new(&TypeTable::new()).compile_packet(&schema);
        assert_eq!(result.is_ok(), size_first, "order {order:?}");
    }
}

#[test]
fn order_override_can_break_the_dependency() {
    // Declared first, but moved behind the array
    let schema = PacketSchema::incoming("Probe", 0x72)
        .field(FieldDescriptor::primitive("count", Primitive::U8).at(1))
        .field(FieldDescriptor::dynamic_array("data", Element::Primitive(Primitive::U8)).sized_by("count"));
    let result = LayoutCompiler::new(&TypeTable::new()).compile_packet(&schema);
    assert!(matches!(result, Err(SchemaError::SizeFieldAfterDependent { .. })));
}
