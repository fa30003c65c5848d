//! Identity matching
//!
//! Pairs entities of the base and candidate snapshots by their stable identity:
//! qualified name for types, tag number for fields, numeric value for enum
//! constants. Declaration order and field names play no part.

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::{
    EnumType, EnumValueDef, FieldDef, MessageType, Reservations, SchemaSnapshot, TypeDef,
};

/// Base and candidate definitions sharing one qualified name
#[derive(Debug, Clone, Copy)]
pub struct TypePair<'a> {
    pub name: &'a str,
    pub old: Option<&'a TypeDef>,
    pub new: Option<&'a TypeDef>,
}

/// Pair every qualified name present in either snapshot, ordered by name
pub fn match_types<'a>(base: &'a SchemaSnapshot, candidate: &'a SchemaSnapshot) -> Vec<TypePair<'a>> {
    let names: BTreeSet<&'a str> = base.type_names().chain(candidate.type_names()).collect();
    names
        .into_iter()
        .map(|name| TypePair {
            name,
            old: base.get(name),
            new: candidate.get(name),
        })
        .collect()
}

/// Something identified by a number within its parent type
pub trait Numbered {
    fn number(&self) -> i64;
    fn name(&self) -> &str;
}

impl Numbered for FieldDef {
    fn number(&self) -> i64 {
        i64::from(self.number)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Numbered for EnumValueDef {
    fn number(&self) -> i64 {
        i64::from(self.number)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// How a number fares between base and candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// Live on both sides
    Matched,
    /// Live only in candidate; `previously_reserved` when base reserved it
    Added { previously_reserved: bool },
    /// Live only in base and reserved in candidate
    RemovedReserved,
    /// Live only in base and free for reuse in candidate
    RemovedUnreserved,
}

/// Base and candidate occupants of one number
#[derive(Debug, Clone, Copy)]
pub struct NumberPair<'a, T> {
    pub number: i64,
    pub old: Option<&'a T>,
    pub new: Option<&'a T>,
    pub status: MatchStatus,
}

pub type FieldPair<'a> = NumberPair<'a, FieldDef>;
pub type ValuePair<'a> = NumberPair<'a, EnumValueDef>;

fn pair_by_number<'a, T: Numbered>(
    old_items: &'a [T],
    old_reserved: &Reservations,
    new_items: &'a [T],
    new_reserved: &Reservations,
) -> Vec<NumberPair<'a, T>> {
    let mut slots: BTreeMap<i64, (Option<&'a T>, Option<&'a T>)> = BTreeMap::new();
    for item in old_items {
        slots.entry(item.number()).or_default().0 = Some(item);
    }
    for item in new_items {
        slots.entry(item.number()).or_default().1 = Some(item);
    }

    slots
        .into_iter()
        .filter_map(|(number, (old, new))| {
            let status = match (old, new) {
                (Some(_), Some(_)) => MatchStatus::Matched,
                (None, Some(_)) => MatchStatus::Added {
                    previously_reserved: old_reserved.covers_number(number),
                },
                (Some(_), None) if new_reserved.covers_number(number) => MatchStatus::RemovedReserved,
                (Some(_), None) => MatchStatus::RemovedUnreserved,
                (None, None) => return None,
            };
            Some(NumberPair { number, old, new, status })
        })
        .collect()
}

/// Pair the fields of two versions of a message by tag number
pub fn match_fields<'a>(old: &'a MessageType, new: &'a MessageType) -> Vec<FieldPair<'a>> {
    pair_by_number(&old.fields, &old.reserved, &new.fields, &new.reserved)
}

/// Pair the values of two versions of an enum by numeric value
pub fn match_values<'a>(old: &'a EnumType, new: &'a EnumType) -> Vec<ValuePair<'a>> {
    pair_by_number(&old.values, &old.reserved, &new.values, &new.reserved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, SnapshotBuilder, Syntax};

    #[test]
    fn test_fields_pair_by_tag_not_name() {
        let old = MessageType::new("acme.User", Syntax::Proto3)
            .with_field(FieldDef::new(1, "id", FieldType::Int32))
            .with_field(FieldDef::new(2, "name", FieldType::String));
        let new = MessageType::new("acme.User", Syntax::Proto3)
            .with_field(FieldDef::new(2, "display_name", FieldType::String))
            .with_field(FieldDef::new(1, "id", FieldType::Int32));

        let pairs = match_fields(&old, &new);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.status == MatchStatus::Matched));
        assert_eq!(pairs[1].old.unwrap().name, "name");
        assert_eq!(pairs[1].new.unwrap().name, "display_name");
    }

    #[test]
    fn test_removed_reserved_versus_unreserved() {
        let old = MessageType::new("acme.User", Syntax::Proto3)
            .with_field(FieldDef::new(1, "id", FieldType::Int32))
            .with_field(FieldDef::new(2, "name", FieldType::String))
            .with_field(FieldDef::new(3, "email", FieldType::String));
        let new = MessageType::new("acme.User", Syntax::Proto3)
            .with_field(FieldDef::new(1, "id", FieldType::Int32))
            .reserve_numbers(2, 2);

        let pairs = match_fields(&old, &new);
        assert_eq!(pairs[1].status, MatchStatus::RemovedReserved);
        assert_eq!(pairs[2].status, MatchStatus::RemovedUnreserved);
    }

    #[test]
    fn test_added_inside_old_reservation() {
        let old = MessageType::new("acme.User", Syntax::Proto3).reserve_numbers(4, 8);
        let new = MessageType::new("acme.User", Syntax::Proto3)
            .with_field(FieldDef::new(5, "nickname", FieldType::String))
            .with_field(FieldDef::new(9, "avatar", FieldType::Bytes));

        let pairs = match_fields(&old, &new);
        assert_eq!(pairs[0].status, MatchStatus::Added { previously_reserved: true });
        assert_eq!(pairs[1].status, MatchStatus::Added { previously_reserved: false });
    }

    #[test]
    fn test_types_pair_by_qualified_name() {
        let base = SnapshotBuilder::new("base")
            .message(MessageType::new("acme.A", Syntax::Proto3))
            .message(MessageType::new("acme.B", Syntax::Proto3))
            .build()
            .unwrap();
        let candidate = SnapshotBuilder::new("candidate")
            .message(MessageType::new("acme.B", Syntax::Proto3))
            .message(MessageType::new("acme.C", Syntax::Proto3))
            .build()
            .unwrap();

        let pairs = match_types(&base, &candidate);
        let shape: Vec<_> = pairs
            .iter()
            .map(|p| (p.name, p.old.is_some(), p.new.is_some()))
            .collect();
        assert_eq!(
            shape,
            vec![("acme.A", true, false), ("acme.B", true, true), ("acme.C", false, true)]
        );
    }
}
