//! Structural invariants of a snapshot
//!
//! Anything that fails here is an input error: the run stops before any
//! finding is produced.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::error::{CompatError, Result};
use crate::schema::{
    Cardinality, EnumType, FieldType, MessageType, SchemaSnapshot, TypeDef, TypeKind,
    IMPLEMENTATION_RESERVED, MAX_TAG,
};

fn identifier() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"))
}

fn qualified_name() -> &'static Regex {
    static QUALIFIED: OnceLock<Regex> = OnceLock::new();
    QUALIFIED.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("static pattern")
    })
}

pub(crate) fn is_identifier(name: &str) -> bool {
    identifier().is_match(name)
}

pub(crate) fn is_qualified_name(name: &str) -> bool {
    qualified_name().is_match(name)
}

/// Check every invariant of the schema model
pub fn validate_snapshot(snapshot: &SchemaSnapshot) -> Result<()> {
    for def in snapshot.types() {
        if !is_qualified_name(def.name()) {
            return Err(CompatError::invalid(
                snapshot.label(),
                format!("'{}' is not a valid qualified type name", def.name()),
            ));
        }
        match def {
            TypeDef::Message(message) => validate_message(snapshot, message)?,
            TypeDef::Enum(enum_type) => validate_enum(snapshot, enum_type)?,
        }
    }
    Ok(())
}

fn validate_message(snapshot: &SchemaSnapshot, message: &MessageType) -> Result<()> {
    let label = snapshot.label();
    let mut tags = HashSet::new();
    let mut names = HashSet::new();

    for range in &message.reserved.ranges {
        if range.start > range.end || range.start < 1 || range.end > i64::from(MAX_TAG) {
            return Err(CompatError::invalid(
                label,
                format!("{} reserves invalid tag range {}", message.name, range),
            ));
        }
    }

    for field in &message.fields {
        let path = format!("{}.{}", message.name, field.name);

        if !is_identifier(&field.name) {
            return Err(CompatError::invalid(
                label,
                format!("'{}' is not a valid field name", path),
            ));
        }
        if !names.insert(field.name.as_str()) {
            return Err(CompatError::invalid(
                label,
                format!("{} declares field name '{}' twice", message.name, field.name),
            ));
        }
        if field.number == 0 || field.number > MAX_TAG {
            return Err(CompatError::invalid(
                label,
                format!("{} uses tag {} outside 1..={}", path, field.number, MAX_TAG),
            ));
        }
        if IMPLEMENTATION_RESERVED.contains(&field.number) {
            return Err(CompatError::invalid(
                label,
                format!("{} uses tag {} from the implementation-reserved range", path, field.number),
            ));
        }
        if !tags.insert(field.number) {
            return Err(CompatError::DuplicateTag {
                snapshot: label.to_string(),
                message: message.name.clone(),
                tag: field.number,
            });
        }
        if message.is_tag_reserved(field.number) {
            return Err(CompatError::invalid(
                label,
                format!("{} uses tag {} which its message reserves", path, field.number),
            ));
        }
        if message.reserved.covers_name(&field.name) {
            return Err(CompatError::invalid(
                label,
                format!("{} uses a name its message reserves", path),
            ));
        }
        if field.cardinality == Cardinality::Required && !message.syntax.allows_required() {
            return Err(CompatError::invalid(
                label,
                format!("{} is required, which {} does not allow", path, message.syntax),
            ));
        }
        if field.default.is_some() && !message.syntax.allows_explicit_defaults() {
            return Err(CompatError::invalid(
                label,
                format!("{} has an explicit default, which {} does not allow", path, message.syntax),
            ));
        }
        if field.default.is_some() && field.cardinality.is_repeated() {
            return Err(CompatError::invalid(
                label,
                format!("{} is repeated and cannot carry a default", path),
            ));
        }
        if field.packed && !(field.cardinality.is_repeated() && field.field_type.is_packable()) {
            return Err(CompatError::invalid(
                label,
                format!("{} is packed but is not a repeated scalar numeric field", path),
            ));
        }
        check_reference(snapshot, &path, &field.field_type)?;
    }
    Ok(())
}

fn check_reference(snapshot: &SchemaSnapshot, path: &str, field_type: &FieldType) -> Result<()> {
    let (target, expected) = match field_type {
        FieldType::Message(name) | FieldType::Group(name) => (name, TypeKind::Message),
        FieldType::Enum(name) => (name, TypeKind::Enum),
        _ => return Ok(()),
    };
    match snapshot.get(target) {
        Some(def) if def.kind() == expected => Ok(()),
        Some(def) => Err(CompatError::invalid(
            snapshot.label(),
            format!("{} expects {} {} but found {}", path, expected, target, def.kind()),
        )),
        None => Err(CompatError::UnresolvedReference {
            snapshot: snapshot.label().to_string(),
            from: path.to_string(),
            target: target.clone(),
        }),
    }
}

fn validate_enum(snapshot: &SchemaSnapshot, enum_type: &EnumType) -> Result<()> {
    let label = snapshot.label();
    let mut numbers = HashSet::new();
    let mut names = HashSet::new();

    for range in &enum_type.reserved.ranges {
        if range.start > range.end || range.start < i64::from(i32::MIN) || range.end > i64::from(i32::MAX) {
            return Err(CompatError::invalid(
                label,
                format!("{} reserves invalid value range {}", enum_type.name, range),
            ));
        }
    }

    for value in &enum_type.values {
        let path = format!("{}.{}", enum_type.name, value.name);
        if !is_identifier(&value.name) {
            return Err(CompatError::invalid(
                label,
                format!("'{}' is not a valid enum value name", path),
            ));
        }
        if !names.insert(value.name.as_str()) {
            return Err(CompatError::invalid(
                label,
                format!("{} declares value name '{}' twice", enum_type.name, value.name),
            ));
        }
        if !numbers.insert(value.number) {
            return Err(CompatError::invalid(
                label,
                format!("{} binds number {} more than once", enum_type.name, value.number),
            ));
        }
        if enum_type.is_number_reserved(value.number) || enum_type.reserved.covers_name(&value.name) {
            return Err(CompatError::invalid(
                label,
                format!("{} uses a number or name its enum reserves", path),
            ));
        }
    }
    Ok(())
}
