//! Structural diff
//!
//! Turns matched pairs into change events. No judgement happens here: whether
//! a change is acceptable is decided entirely by the rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::matcher::{match_fields, match_values, MatchStatus, NumberPair, Numbered, TypePair};
use crate::schema::{
    Cardinality, EnumType, EnumValueDef, FieldDef, FieldType, MessageType, ReservedRange,
    Reservations, Syntax, TypeDef,
};

/// Anything a change event can be about
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Message(&'a MessageType),
    Enum(&'a EnumType),
    Field {
        message: &'a MessageType,
        field: &'a FieldDef,
    },
    EnumValue {
        enum_type: &'a EnumType,
        value: &'a EnumValueDef,
    },
}

impl<'a> Entity<'a> {
    fn of_type(def: &'a TypeDef) -> Self {
        match def {
            TypeDef::Message(m) => Entity::Message(m),
            TypeDef::Enum(e) => Entity::Enum(e),
        }
    }

    /// Dotted path: `package.Message.field` or `package.Enum.VALUE`
    pub fn path(&self) -> String {
        match self {
            Entity::Message(m) => m.name.clone(),
            Entity::Enum(e) => e.name.clone(),
            Entity::Field { message, field } => format!("{}.{}", message.name, field.name),
            Entity::EnumValue { enum_type, value } => format!("{}.{}", enum_type.name, value.name),
        }
    }

    /// Tag number or enum value, for members
    pub fn number(&self) -> Option<i64> {
        match self {
            Entity::Field { field, .. } => Some(field.number()),
            Entity::EnumValue { value, .. } => Some(value.number()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'a str {
        match self {
            Entity::Message(m) => &m.name,
            Entity::Enum(e) => &e.name,
            Entity::Field { field, .. } => &field.name,
            Entity::EnumValue { value, .. } => &value.name,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(self, Entity::Message(_) | Entity::Enum(_))
    }
}

/// Whether a number and a name are covered by a reservation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationStatus {
    pub number: bool,
    pub name: bool,
}

impl ReservationStatus {
    fn of(reserved: &Reservations, number: i64, name: &str) -> Self {
        Self {
            number: reserved.covers_number(number),
            name: reserved.covers_name(name),
        }
    }
}

/// Which attribute of an entity changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Name,
    Type,
    Cardinality,
    Packed,
    Default,
    Syntax,
    ReservedNumbers,
    ReservedNames,
    EnumZeroValue,
}

/// One differing attribute with its old and new values
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeChange {
    Name {
        old: String,
        new: String,
        /// The new name was reserved in base
        previously_reserved: bool,
    },
    Type { old: FieldType, new: FieldType },
    Cardinality { old: Cardinality, new: Cardinality },
    Packed { old: bool, new: bool },
    Default { old: Option<String>, new: Option<String> },
    Syntax { old: Syntax, new: Syntax },
    ReservedNumbers {
        added: Vec<ReservedRange>,
        removed: Vec<ReservedRange>,
    },
    ReservedNames {
        added: Vec<String>,
        removed: Vec<String>,
    },
    EnumZeroValue { old: bool, new: bool },
}

impl AttributeChange {
    pub fn attribute(&self) -> Attribute {
        match self {
            AttributeChange::Name { .. } => Attribute::Name,
            AttributeChange::Type { .. } => Attribute::Type,
            AttributeChange::Cardinality { .. } => Attribute::Cardinality,
            AttributeChange::Packed { .. } => Attribute::Packed,
            AttributeChange::Default { .. } => Attribute::Default,
            AttributeChange::Syntax { .. } => Attribute::Syntax,
            AttributeChange::ReservedNumbers { .. } => Attribute::ReservedNumbers,
            AttributeChange::ReservedNames { .. } => Attribute::ReservedNames,
            AttributeChange::EnumZeroValue { .. } => Attribute::EnumZeroValue,
        }
    }
}

/// Every attribute that differs between two versions of an entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<AttributeChange>,
}

impl ChangeSet {
    pub fn push(&mut self, change: AttributeChange) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeChange> {
        self.changes.iter()
    }

    pub fn has(&self, attribute: Attribute) -> bool {
        self.changes.iter().any(|c| c.attribute() == attribute)
    }

    pub fn attributes(&self) -> BTreeSet<Attribute> {
        self.changes.iter().map(AttributeChange::attribute).collect()
    }

    pub fn get(&self, attribute: Attribute) -> Option<&AttributeChange> {
        self.changes.iter().find(|c| c.attribute() == attribute)
    }
}

/// A structural change to one entity
#[derive(Debug, Clone)]
pub enum ChangeEvent<'a> {
    /// Present only in candidate. `reserved_in_base` is always clear for types.
    Added {
        entity: Entity<'a>,
        reserved_in_base: ReservationStatus,
    },
    /// Present only in base. `reserved_in_candidate` is always clear for types.
    Removed {
        entity: Entity<'a>,
        reserved_in_candidate: ReservationStatus,
    },
    /// Present on both sides. A type-level event may carry an empty change
    /// set when only its members changed.
    Modified {
        old: Entity<'a>,
        new: Entity<'a>,
        changes: ChangeSet,
    },
}

impl<'a> ChangeEvent<'a> {
    /// The entity as it exists after the change, or before it for removals
    pub fn entity(&self) -> &Entity<'a> {
        match self {
            ChangeEvent::Added { entity, .. } | ChangeEvent::Removed { entity, .. } => entity,
            ChangeEvent::Modified { new, .. } => new,
        }
    }

    pub fn path(&self) -> String {
        self.entity().path()
    }
}

impl fmt::Display for ChangeEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::Added { entity, .. } => write!(f, "+ {}", entity.path()),
            ChangeEvent::Removed { entity, .. } => write!(f, "- {}", entity.path()),
            ChangeEvent::Modified { new, changes, .. } => {
                let attrs: Vec<String> = changes
                    .attributes()
                    .iter()
                    .map(|a| format!("{:?}", a).to_lowercase())
                    .collect();
                write!(f, "~ {} [{}]", new.path(), attrs.join(", "))
            }
        }
    }
}

/// Counts of structural changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl DiffStats {
    pub fn merge(&mut self, other: DiffStats) {
        self.added += other.added;
        self.removed += other.removed;
        self.modified += other.modified;
    }

    pub fn has_changes(&self) -> bool {
        self.added + self.removed + self.modified > 0
    }
}

/// All change events for one qualified type name.
///
/// The type-level event, when present, comes first; member events follow
/// in number order.
#[derive(Debug, Clone)]
pub struct TypeDiff<'a> {
    pub name: &'a str,
    pub old: Option<&'a TypeDef>,
    pub new: Option<&'a TypeDef>,
    pub events: Vec<ChangeEvent<'a>>,
}

impl<'a> TypeDiff<'a> {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stats(&self) -> DiffStats {
        let mut stats = DiffStats::default();
        for event in &self.events {
            match event {
                ChangeEvent::Added { .. } => stats.added += 1,
                ChangeEvent::Removed { .. } => stats.removed += 1,
                ChangeEvent::Modified { changes, .. } if !changes.is_empty() => stats.modified += 1,
                ChangeEvent::Modified { .. } => {}
            }
        }
        stats
    }
}

/// Diff one matched pair
pub fn diff_pair<'a>(pair: &TypePair<'a>) -> TypeDiff<'a> {
    let mut events = Vec::new();

    match (pair.old, pair.new) {
        (None, Some(new)) => events.push(ChangeEvent::Added {
            entity: Entity::of_type(new),
            reserved_in_base: ReservationStatus::default(),
        }),
        (Some(old), None) => events.push(ChangeEvent::Removed {
            entity: Entity::of_type(old),
            reserved_in_candidate: ReservationStatus::default(),
        }),
        (Some(TypeDef::Message(old)), Some(TypeDef::Message(new))) => {
            diff_messages(old, new, &mut events);
        }
        (Some(TypeDef::Enum(old)), Some(TypeDef::Enum(new))) => {
            diff_enums(old, new, &mut events);
        }
        (Some(old), Some(new)) => {
            // message <-> enum under one name: two unrelated entities
            events.push(ChangeEvent::Removed {
                entity: Entity::of_type(old),
                reserved_in_candidate: ReservationStatus::default(),
            });
            events.push(ChangeEvent::Added {
                entity: Entity::of_type(new),
                reserved_in_base: ReservationStatus::default(),
            });
        }
        (None, None) => {}
    }

    TypeDiff {
        name: pair.name,
        old: pair.old,
        new: pair.new,
        events,
    }
}

fn diff_reservations(old: &Reservations, new: &Reservations, changes: &mut ChangeSet) {
    let old_ranges: BTreeSet<_> = old.ranges.iter().copied().collect();
    let new_ranges: BTreeSet<_> = new.ranges.iter().copied().collect();
    if old_ranges != new_ranges {
        changes.push(AttributeChange::ReservedNumbers {
            added: new_ranges.difference(&old_ranges).copied().collect(),
            removed: old_ranges.difference(&new_ranges).copied().collect(),
        });
    }
    if old.names != new.names {
        changes.push(AttributeChange::ReservedNames {
            added: new.names.difference(&old.names).cloned().collect(),
            removed: old.names.difference(&new.names).cloned().collect(),
        });
    }
}

/// Emit member events for paired numbers; returns them in number order
fn member_events<'a, T: Numbered>(
    pairs: Vec<NumberPair<'a, T>>,
    old_reserved: &Reservations,
    new_reserved: &Reservations,
    entity: impl Fn(&'a T, bool) -> Entity<'a>,
    attributes: impl Fn(&T, &T, &Reservations) -> ChangeSet,
) -> Vec<ChangeEvent<'a>> {
    let mut events = Vec::new();
    for pair in pairs {
        match (pair.status, pair.old, pair.new) {
            (MatchStatus::Matched, Some(old), Some(new)) => {
                let changes = attributes(old, new, old_reserved);
                if !changes.is_empty() {
                    events.push(ChangeEvent::Modified {
                        old: entity(old, false),
                        new: entity(new, true),
                        changes,
                    });
                }
            }
            (MatchStatus::Added { .. }, None, Some(new)) => events.push(ChangeEvent::Added {
                entity: entity(new, true),
                reserved_in_base: ReservationStatus::of(old_reserved, pair.number, new.name()),
            }),
            (_, Some(old), None) => events.push(ChangeEvent::Removed {
                entity: entity(old, false),
                reserved_in_candidate: ReservationStatus::of(new_reserved, pair.number, old.name()),
            }),
            _ => {}
        }
    }
    events
}

fn diff_messages<'a>(old: &'a MessageType, new: &'a MessageType, events: &mut Vec<ChangeEvent<'a>>) {
    let mut changes = ChangeSet::default();
    if old.syntax != new.syntax {
        changes.push(AttributeChange::Syntax {
            old: old.syntax,
            new: new.syntax,
        });
    }
    diff_reservations(&old.reserved, &new.reserved, &mut changes);

    let members = member_events(
        match_fields(old, new),
        &old.reserved,
        &new.reserved,
        |field, is_new| Entity::Field {
            message: if is_new { new } else { old },
            field,
        },
        field_changes,
    );

    if !changes.is_empty() || !members.is_empty() {
        events.push(ChangeEvent::Modified {
            old: Entity::Message(old),
            new: Entity::Message(new),
            changes,
        });
        events.extend(members);
    }
}

fn field_changes(old: &FieldDef, new: &FieldDef, old_reserved: &Reservations) -> ChangeSet {
    let mut changes = ChangeSet::default();
    if old.name != new.name {
        changes.push(AttributeChange::Name {
            old: old.name.clone(),
            new: new.name.clone(),
            previously_reserved: old_reserved.covers_name(&new.name),
        });
    }
    if old.field_type != new.field_type {
        changes.push(AttributeChange::Type {
            old: old.field_type.clone(),
            new: new.field_type.clone(),
        });
    }
    if old.cardinality != new.cardinality {
        changes.push(AttributeChange::Cardinality {
            old: old.cardinality,
            new: new.cardinality,
        });
    }
    if old.packed != new.packed {
        changes.push(AttributeChange::Packed {
            old: old.packed,
            new: new.packed,
        });
    }
    if old.default != new.default {
        changes.push(AttributeChange::Default {
            old: old.default.clone(),
            new: new.default.clone(),
        });
    }
    changes
}

fn diff_enums<'a>(old: &'a EnumType, new: &'a EnumType, events: &mut Vec<ChangeEvent<'a>>) {
    let mut changes = ChangeSet::default();
    if old.syntax != new.syntax {
        changes.push(AttributeChange::Syntax {
            old: old.syntax,
            new: new.syntax,
        });
    }
    if old.has_zero_value() != new.has_zero_value() {
        changes.push(AttributeChange::EnumZeroValue {
            old: old.has_zero_value(),
            new: new.has_zero_value(),
        });
    }
    diff_reservations(&old.reserved, &new.reserved, &mut changes);

    let members = member_events(
        match_values(old, new),
        &old.reserved,
        &new.reserved,
        |value, is_new| Entity::EnumValue {
            enum_type: if is_new { new } else { old },
            value,
        },
        |old_value, new_value, old_reserved| {
            let mut changes = ChangeSet::default();
            if old_value.name != new_value.name {
                changes.push(AttributeChange::Name {
                    old: old_value.name.clone(),
                    new: new_value.name.clone(),
                    previously_reserved: old_reserved.covers_name(&new_value.name),
                });
            }
            changes
        },
    );

    if !changes.is_empty() || !members.is_empty() {
        events.push(ChangeEvent::Modified {
            old: Entity::Enum(old),
            new: Entity::Enum(new),
            changes,
        });
        events.extend(members);
    }
}
