//! Schema model
//!
//! Immutable, fully resolved view of one schema corpus revision. Snapshots are
//! built once (by the loader or a [`SnapshotBuilder`]) and only read afterwards,
//! so they can be shared across worker threads without synchronization.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::checksum::Checksum;
use crate::error::Result;
use crate::validate;
use crate::version::SchemaVersion;

/// Largest tag number the wire format can carry (2^29 - 1)
pub const MAX_TAG: u32 = 536_870_911;

/// Tag numbers reserved for the protobuf implementation itself
pub const IMPLEMENTATION_RESERVED: std::ops::RangeInclusive<u32> = 19_000..=19_999;

/// Syntax mode of a message or enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    /// Explicit optional/required, explicit defaults
    #[default]
    Proto2,
    /// Implicit presence, no required, no explicit defaults
    Proto3,
}

impl Syntax {
    pub fn allows_required(&self) -> bool {
        matches!(self, Syntax::Proto2)
    }

    pub fn allows_explicit_defaults(&self) -> bool {
        matches!(self, Syntax::Proto2)
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Syntax::Proto2 => write!(f, "proto2"),
            Syntax::Proto3 => write!(f, "proto3"),
        }
    }
}

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Singular,
    Repeated,
    /// proto2 only
    Required,
}

impl Cardinality {
    pub fn is_repeated(&self) -> bool {
        matches!(self, Cardinality::Repeated)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Singular => write!(f, "singular"),
            Cardinality::Repeated => write!(f, "repeated"),
            Cardinality::Required => write!(f, "required"),
        }
    }
}

/// Encoding family on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Group,
    Fixed32,
}

/// Declared type of a field.
///
/// Message and enum references are fully qualified names that the snapshot
/// guarantees to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Float,
    Double,
    Bool,
    String,
    Bytes,
    Message(String),
    Enum(String),
    /// Legacy proto2 group
    Group(String),
}

impl FieldType {
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldType::Int32
            | FieldType::Int64
            | FieldType::Uint32
            | FieldType::Uint64
            | FieldType::Sint32
            | FieldType::Sint64
            | FieldType::Bool
            | FieldType::Enum(_) => WireType::Varint,
            FieldType::Fixed64 | FieldType::Sfixed64 | FieldType::Double => WireType::Fixed64,
            FieldType::Fixed32 | FieldType::Sfixed32 | FieldType::Float => WireType::Fixed32,
            FieldType::String | FieldType::Bytes | FieldType::Message(_) => WireType::LengthDelimited,
            FieldType::Group(_) => WireType::Group,
        }
    }

    /// Scalar numeric types (including bool and enums) may use packed encoding
    pub fn is_packable(&self) -> bool {
        matches!(
            self.wire_type(),
            WireType::Varint | WireType::Fixed32 | WireType::Fixed64
        )
    }

    /// Fully qualified name of the referenced message/enum/group type
    pub fn referenced_type(&self) -> Option<&str> {
        match self {
            FieldType::Message(name) | FieldType::Enum(name) | FieldType::Group(name) => Some(name),
            _ => None,
        }
    }

    /// Same type family, ignoring the referenced type name
    pub fn same_family(&self, other: &FieldType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Uint32 => "uint32",
            FieldType::Uint64 => "uint64",
            FieldType::Sint32 => "sint32",
            FieldType::Sint64 => "sint64",
            FieldType::Fixed32 => "fixed32",
            FieldType::Fixed64 => "fixed64",
            FieldType::Sfixed32 => "sfixed32",
            FieldType::Sfixed64 => "sfixed64",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::String => "string",
            FieldType::Bytes => "bytes",
            FieldType::Message(name) => return write!(f, "message {}", name),
            FieldType::Enum(name) => return write!(f, "enum {}", name),
            FieldType::Group(name) => return write!(f, "group {}", name),
        };
        write!(f, "{}", name)
    }
}

/// Inclusive reserved number range.
///
/// Descriptor documents may write a single reserved number as a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RangeRepr")]
pub struct ReservedRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RangeRepr {
    Single(i64),
    Span { start: i64, end: i64 },
}

impl From<RangeRepr> for ReservedRange {
    fn from(repr: RangeRepr) -> Self {
        match repr {
            RangeRepr::Single(n) => Self::single(n),
            RangeRepr::Span { start, end } => Self { start, end },
        }
    }
}

impl ReservedRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn single(number: i64) -> Self {
        Self { start: number, end: number }
    }

    pub fn contains(&self, number: i64) -> bool {
        self.start <= number && number <= self.end
    }
}

impl fmt::Display for ReservedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

/// Reserved numbers and names of one message or enum
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reservations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<ReservedRange>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub names: BTreeSet<String>,
}

impl Reservations {
    pub fn covers_number(&self, number: i64) -> bool {
        self.ranges.iter().any(|r| r.contains(number))
    }

    pub fn covers_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// True when every number of `range` is covered by some range here
    pub fn covers_range(&self, range: &ReservedRange) -> bool {
        let mut sorted = self.ranges.clone();
        sorted.sort();
        let mut next = range.start;
        for r in sorted {
            if r.start > next {
                break;
            }
            if r.end >= next {
                if r.end >= range.end {
                    return true;
                }
                next = r.end + 1;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.names.is_empty()
    }
}

/// A message field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    /// Tag number: the field's identity on the wire
    pub number: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub packed: bool,
    /// Explicit default (proto2 only), in its textual form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl FieldDef {
    pub fn new(number: u32, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            number,
            name: name.into(),
            field_type,
            cardinality: Cardinality::Singular,
            packed: false,
            default: None,
        }
    }

    pub fn repeated(mut self) -> Self {
        self.cardinality = Cardinality::Repeated;
        self
    }

    pub fn required(mut self) -> Self {
        self.cardinality = Cardinality::Required;
        self
    }

    pub fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageType {
    /// Fully qualified name (e.g., "acme.v1.User")
    pub name: String,
    #[serde(default)]
    pub syntax: Syntax,
    /// Declaration order; not semantically significant
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Reservations::is_empty")]
    pub reserved: Reservations,
}

impl MessageType {
    pub fn new(name: impl Into<String>, syntax: Syntax) -> Self {
        Self {
            name: name.into(),
            syntax,
            fields: Vec::new(),
            reserved: Reservations::default(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn reserve_numbers(mut self, start: u32, end: u32) -> Self {
        self.reserved
            .ranges
            .push(ReservedRange::new(i64::from(start), i64::from(end)));
        self
    }

    pub fn reserve_name(mut self, name: impl Into<String>) -> Self {
        self.reserved.names.insert(name.into());
        self
    }

    pub fn field(&self, number: u32) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.number == number)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn live_field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn is_tag_reserved(&self, number: u32) -> bool {
        self.reserved.covers_number(i64::from(number))
    }
}

/// A named enum constant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumValueDef {
    pub number: i32,
    pub name: String,
}

/// An enum type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    #[serde(default)]
    pub syntax: Syntax,
    #[serde(default)]
    pub values: Vec<EnumValueDef>,
    #[serde(default, skip_serializing_if = "Reservations::is_empty")]
    pub reserved: Reservations,
}

impl EnumType {
    pub fn new(name: impl Into<String>, syntax: Syntax) -> Self {
        Self {
            name: name.into(),
            syntax,
            values: Vec::new(),
            reserved: Reservations::default(),
        }
    }

    pub fn with_value(mut self, number: i32, name: impl Into<String>) -> Self {
        self.values.push(EnumValueDef {
            number,
            name: name.into(),
        });
        self
    }

    pub fn reserve_numbers(mut self, start: i32, end: i32) -> Self {
        self.reserved
            .ranges
            .push(ReservedRange::new(i64::from(start), i64::from(end)));
        self
    }

    pub fn reserve_name(mut self, name: impl Into<String>) -> Self {
        self.reserved.names.insert(name.into());
        self
    }

    pub fn value(&self, number: i32) -> Option<&EnumValueDef> {
        self.values.iter().find(|v| v.number == number)
    }

    pub fn has_zero_value(&self) -> bool {
        self.value(0).is_some()
    }

    pub fn is_number_reserved(&self, number: i32) -> bool {
        self.reserved.covers_number(i64::from(number))
    }
}

/// Kind of a named type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Message,
    Enum,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Message => write!(f, "message"),
            TypeKind::Enum => write!(f, "enum"),
        }
    }
}

/// A named type in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeDef {
    Message(MessageType),
    Enum(EnumType),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Message(m) => &m.name,
            TypeDef::Enum(e) => &e.name,
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            TypeDef::Message(_) => TypeKind::Message,
            TypeDef::Enum(_) => TypeKind::Enum,
        }
    }

    pub fn as_message(&self) -> Option<&MessageType> {
        match self {
            TypeDef::Message(m) => Some(m),
            TypeDef::Enum(_) => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match self {
            TypeDef::Enum(e) => Some(e),
            TypeDef::Message(_) => None,
        }
    }

    pub fn reserved(&self) -> &Reservations {
        match self {
            TypeDef::Message(m) => &m.reserved,
            TypeDef::Enum(e) => &e.reserved,
        }
    }
}

/// One resolved revision of a schema corpus
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaSnapshot {
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<SchemaVersion>,
    types: BTreeMap<String, TypeDef>,
}

impl SchemaSnapshot {
    /// Label used in error messages (e.g., "base", a path, a revision)
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn version(&self) -> Option<&SchemaVersion> {
        self.version.as_ref()
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn message(&self, name: &str) -> Option<&MessageType> {
        self.get(name).and_then(TypeDef::as_message)
    }

    pub fn enum_type(&self, name: &str) -> Option<&EnumType> {
        self.get(name).and_then(TypeDef::as_enum)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Content fingerprint; independent of the label
    pub fn checksum(&self) -> Checksum {
        let value = serde_json::to_value(&self.types).unwrap_or_default();
        Checksum::from_json(&value)
    }
}

/// Collects types and validates every structural invariant on `build`
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    label: String,
    version: Option<SchemaVersion>,
    types: Vec<TypeDef>,
}

impl SnapshotBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn version(mut self, version: SchemaVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn message(mut self, message: MessageType) -> Self {
        self.types.push(TypeDef::Message(message));
        self
    }

    pub fn enum_type(mut self, enum_type: EnumType) -> Self {
        self.types.push(TypeDef::Enum(enum_type));
        self
    }

    pub fn push(&mut self, def: TypeDef) {
        self.types.push(def);
    }

    pub fn set_version(&mut self, version: SchemaVersion) {
        self.version = Some(version);
    }

    pub fn build(self) -> Result<SchemaSnapshot> {
        let mut types = BTreeMap::new();
        for def in self.types {
            let name = def.name().to_string();
            if types.contains_key(&name) {
                return Err(crate::error::CompatError::DuplicateType {
                    snapshot: self.label,
                    name,
                });
            }
            types.insert(name, def);
        }

        let snapshot = SchemaSnapshot {
            label: self.label,
            version: self.version,
            types,
        };
        validate::validate_snapshot(&snapshot)?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompatError;

    fn user() -> MessageType {
        MessageType::new("acme.User", Syntax::Proto3)
            .with_field(FieldDef::new(1, "id", FieldType::Int32))
            .with_field(FieldDef::new(2, "name", FieldType::String))
    }

    #[test]
    fn test_wire_types() {
        assert_eq!(FieldType::Sint64.wire_type(), WireType::Varint);
        assert_eq!(FieldType::Enum("acme.Status".into()).wire_type(), WireType::Varint);
        assert_eq!(FieldType::Float.wire_type(), WireType::Fixed32);
        assert_eq!(FieldType::Message("acme.User".into()).wire_type(), WireType::LengthDelimited);
        assert!(!FieldType::String.is_packable());
        assert!(FieldType::Bool.is_packable());
    }

    #[test]
    fn test_reserved_range_coverage() {
        let reserved = Reservations {
            ranges: vec![ReservedRange::new(5, 9), ReservedRange::new(2, 4)],
            names: BTreeSet::new(),
        };
        assert!(reserved.covers_range(&ReservedRange::new(2, 9)));
        assert!(reserved.covers_range(&ReservedRange::single(7)));
        assert!(!reserved.covers_range(&ReservedRange::new(2, 10)));
        assert!(!reserved.covers_number(1));
    }

    #[test]
    fn test_builder_rejects_duplicate_types() {
        let err = SnapshotBuilder::new("base")
            .message(user())
            .message(user())
            .build()
            .unwrap_err();
        assert!(matches!(err, CompatError::DuplicateType { .. }));
    }

    #[test]
    fn test_field_type_json_shape() {
        let field: FieldDef = serde_json::from_str(
            r#"{"number": 3, "name": "owner", "type": {"message": "acme.User"}, "cardinality": "repeated"}"#,
        )
        .unwrap();
        assert_eq!(field.field_type, FieldType::Message("acme.User".into()));
        assert!(field.cardinality.is_repeated());

        let range: ReservedRange = serde_json::from_str("7").unwrap();
        assert_eq!(range, ReservedRange::single(7));
    }

    #[test]
    fn test_checksum_ignores_label() {
        let a = SnapshotBuilder::new("base").message(user()).build().unwrap();
        let b = SnapshotBuilder::new("candidate").message(user()).build().unwrap();
        assert_eq!(a.checksum(), b.checksum());
    }
}
