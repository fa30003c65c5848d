//! Wire compatibility of field types
//!
//! The scalar matrix is a static table rather than anything computed from
//! the types at runtime, so [`matrix`] lists every permitted conversion.
//! Message and enum references are compared structurally against the two
//! snapshots.

use std::collections::HashSet;

use crate::error::RuleError;
use crate::schema::{FieldType, SchemaSnapshot};

/// Payload-free classification of a field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
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
    Message,
    Enum,
}

impl TypeClass {
    /// `None` for groups, which the checker does not classify
    pub fn of(field_type: &FieldType) -> Option<Self> {
        Some(match field_type {
            FieldType::Int32 => TypeClass::Int32,
            FieldType::Int64 => TypeClass::Int64,
            FieldType::Uint32 => TypeClass::Uint32,
            FieldType::Uint64 => TypeClass::Uint64,
            FieldType::Sint32 => TypeClass::Sint32,
            FieldType::Sint64 => TypeClass::Sint64,
            FieldType::Fixed32 => TypeClass::Fixed32,
            FieldType::Fixed64 => TypeClass::Fixed64,
            FieldType::Sfixed32 => TypeClass::Sfixed32,
            FieldType::Sfixed64 => TypeClass::Sfixed64,
            FieldType::Float => TypeClass::Float,
            FieldType::Double => TypeClass::Double,
            FieldType::Bool => TypeClass::Bool,
            FieldType::String => TypeClass::String,
            FieldType::Bytes => TypeClass::Bytes,
            FieldType::Message(_) => TypeClass::Message,
            FieldType::Enum(_) => TypeClass::Enum,
            FieldType::Group(_) => return None,
        })
    }
}

/// How values survive a permitted scalar conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// Every old value decodes unchanged
    Widening,
    /// Same width, different signedness; bit patterns are preserved
    Reinterpreting,
    /// Large values are truncated by the new reader
    Narrowing,
}

use Conversion::{Narrowing, Reinterpreting, Widening};
use TypeClass::{Bool, Int32, Int64, Sint32, Sint64, Uint32, Uint64};

/// Varint conversions that decode without a parse error
const MATRIX: &[(TypeClass, TypeClass, Conversion)] = &[
    (Int32, Uint32, Reinterpreting),
    (Int32, Int64, Widening),
    (Int32, Uint64, Widening),
    (Int32, Bool, Narrowing),
    (Uint32, Int32, Reinterpreting),
    (Uint32, Int64, Widening),
    (Uint32, Uint64, Widening),
    (Uint32, Bool, Narrowing),
    (Int64, Int32, Narrowing),
    (Int64, Uint32, Narrowing),
    (Int64, Uint64, Reinterpreting),
    (Int64, Bool, Narrowing),
    (Uint64, Int32, Narrowing),
    (Uint64, Uint32, Narrowing),
    (Uint64, Int64, Reinterpreting),
    (Uint64, Bool, Narrowing),
    (Bool, Int32, Widening),
    (Bool, Uint32, Widening),
    (Bool, Int64, Widening),
    (Bool, Uint64, Widening),
    (Sint32, Sint64, Widening),
    (Sint64, Sint32, Narrowing),
];

/// Every permitted scalar conversion
pub fn matrix() -> &'static [(TypeClass, TypeClass, Conversion)] {
    MATRIX
}

pub fn lookup(old: TypeClass, new: TypeClass) -> Option<Conversion> {
    MATRIX
        .iter()
        .find(|(from, to, _)| *from == old && *to == new)
        .map(|&(_, _, conversion)| conversion)
}

/// Verdict of comparing two field types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCompat {
    Same,
    Convertible(Conversion),
    /// Both reference messages, or both reference enums, under different
    /// names; decided by [`SupersetCheck`]
    Structural,
    Incompatible,
}

pub fn classify(old: &FieldType, new: &FieldType) -> Result<TypeCompat, RuleError> {
    if old == new {
        return Ok(TypeCompat::Same);
    }
    let (Some(from), Some(to)) = (TypeClass::of(old), TypeClass::of(new)) else {
        return Err(RuleError::Unclassifiable {
            old: old.to_string(),
            new: new.to_string(),
        });
    };
    if from == to {
        // only reference types share a class without being equal
        return Ok(TypeCompat::Structural);
    }
    Ok(lookup(from, to).map_or(TypeCompat::Incompatible, TypeCompat::Convertible))
}

/// Whether two types could plausibly carry the same field on the wire.
///
/// A renamed field whose type fails this test is a different field reusing
/// the tag.
pub fn wire_related(old: &FieldType, new: &FieldType) -> bool {
    old.same_family(new)
        || matches!(
            (TypeClass::of(old), TypeClass::of(new)),
            (Some(from), Some(to)) if lookup(from, to).is_some()
        )
}

/// Structural superset test across the two snapshots.
///
/// A message B is a superset of A when every field of A exists in B with
/// the same tag, cardinality and a compatible type. Recursive references are
/// cut by remembering each (old, new) pair on first visit and treating a
/// revisit as satisfied.
pub struct SupersetCheck<'a> {
    base: &'a SchemaSnapshot,
    candidate: &'a SchemaSnapshot,
    allow_narrowing: bool,
    visited: HashSet<(String, String)>,
}

impl<'a> SupersetCheck<'a> {
    pub fn new(base: &'a SchemaSnapshot, candidate: &'a SchemaSnapshot, allow_narrowing: bool) -> Self {
        Self {
            base,
            candidate,
            allow_narrowing,
            visited: HashSet::new(),
        }
    }

    /// Compare two reference types of the same class
    pub fn references(&mut self, old: &FieldType, new: &FieldType) -> Result<bool, RuleError> {
        match (old, new) {
            (FieldType::Message(a), FieldType::Message(b)) => self.messages(a, b),
            (FieldType::Enum(a), FieldType::Enum(b)) => self.enums(a, b),
            _ => Ok(false),
        }
    }

    pub fn messages(&mut self, old: &str, new: &str) -> Result<bool, RuleError> {
        if !self.visited.insert((old.to_string(), new.to_string())) {
            return Ok(true);
        }
        let old_message = self
            .base
            .message(old)
            .ok_or_else(|| RuleError::MissingType(old.to_string()))?;
        let new_message = self
            .candidate
            .message(new)
            .ok_or_else(|| RuleError::MissingType(new.to_string()))?;

        for field in &old_message.fields {
            let Some(counterpart) = new_message.field(field.number) else {
                return Ok(false);
            };
            if field.cardinality.is_repeated() != counterpart.cardinality.is_repeated() {
                return Ok(false);
            }
            if !self.field_types(&field.field_type, &counterpart.field_type)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Every numeric value of the old enum survives in the new one
    pub fn enums(&mut self, old: &str, new: &str) -> Result<bool, RuleError> {
        let old_enum = self
            .base
            .enum_type(old)
            .ok_or_else(|| RuleError::MissingType(old.to_string()))?;
        let new_enum = self
            .candidate
            .enum_type(new)
            .ok_or_else(|| RuleError::MissingType(new.to_string()))?;
        Ok(old_enum.values.iter().all(|v| new_enum.value(v.number).is_some()))
    }

    fn field_types(&mut self, old: &FieldType, new: &FieldType) -> Result<bool, RuleError> {
        match old {
            // same-named references may still have drifted between snapshots
            FieldType::Message(_) | FieldType::Enum(_) if old.same_family(new) => self.references(old, new),
            _ => Ok(match classify(old, new)? {
                TypeCompat::Same => true,
                TypeCompat::Convertible(Narrowing) => self.allow_narrowing,
                TypeCompat::Convertible(_) => true,
                TypeCompat::Structural => self.references(old, new)?,
                TypeCompat::Incompatible => false,
            }),
        }
    }
}
