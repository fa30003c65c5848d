//! Rules about reserved numbers and names

use crate::diff::{Attribute, AttributeChange, ChangeEvent, Entity};
use crate::error::RuleError;
use crate::report::Finding;
use crate::schema::Reservations;

use super::{Outcome, Rule, RuleContext, RuleId};

fn member_kind(entity: &Entity<'_>) -> &'static str {
    match entity {
        Entity::Field { .. } => "field",
        Entity::EnumValue { .. } => "enum value",
        Entity::Message(_) => "message",
        Entity::Enum(_) => "enum",
    }
}

fn type_reservations<'a>(entity: &Entity<'a>) -> Option<&'a Reservations> {
    match entity {
        Entity::Message(m) => Some(&m.reserved),
        Entity::Enum(e) => Some(&e.reserved),
        _ => None,
    }
}

pub struct UnreservedRemoval;

impl Rule for UnreservedRemoval {
    fn id(&self) -> RuleId {
        RuleId::UnreservedRemoval
    }

    fn description(&self) -> &'static str {
        "a field or enum value was removed without reserving its number"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let ChangeEvent::Removed {
            entity,
            reserved_in_candidate,
        } = event
        else {
            return Ok(Vec::new());
        };
        let Some(number) = entity.number() else {
            return Ok(Vec::new());
        };
        if reserved_in_candidate.number {
            return Ok(Vec::new());
        }

        Ok(vec![ctx
            .finding(
                self.id(),
                Outcome::Violation,
                entity.path(),
                format!(
                    "{} '{}' removed without reserving {}; a later change may reuse it",
                    member_kind(entity),
                    entity.name(),
                    number
                ),
            )
            .with_old(number.to_string())])
    }
}

pub struct NameNotReserved;

impl Rule for NameNotReserved {
    fn id(&self) -> RuleId {
        RuleId::NameNotReserved
    }

    fn description(&self) -> &'static str {
        "a removed member's number was reserved but its name was not"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        match event {
            ChangeEvent::Removed {
                entity,
                reserved_in_candidate,
            } if !entity.is_type() && reserved_in_candidate.number && !reserved_in_candidate.name => Ok(vec![ctx
                .finding(
                    self.id(),
                    Outcome::Violation,
                    entity.path(),
                    format!(
                        "{} '{}' has its number reserved but not its name; text formats may still bind it",
                        member_kind(entity),
                        entity.name()
                    ),
                )]),
            _ => Ok(Vec::new()),
        }
    }
}

pub struct ReservedNameReuse;

impl Rule for ReservedNameReuse {
    fn id(&self) -> RuleId {
        RuleId::ReservedNameReuse
    }

    fn description(&self) -> &'static str {
        "a reserved name was given to a live member"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let name = match event {
            ChangeEvent::Added {
                entity,
                reserved_in_base,
            } if !entity.is_type() && reserved_in_base.name => entity.name(),
            ChangeEvent::Modified { new, changes, .. } if !new.is_type() => match changes.get(Attribute::Name) {
                Some(AttributeChange::Name {
                    previously_reserved: true,
                    ..
                }) => new.name(),
                _ => return Ok(Vec::new()),
            },
            _ => return Ok(Vec::new()),
        };

        Ok(vec![ctx.finding(
            self.id(),
            Outcome::Violation,
            event.path(),
            format!("name '{}' was reserved and is in use again", name),
        )])
    }
}

pub struct ReservationDropped;

impl Rule for ReservationDropped {
    fn id(&self) -> RuleId {
        RuleId::ReservationDropped
    }

    fn description(&self) -> &'static str {
        "a reserved number or name was removed from a type"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let ChangeEvent::Modified { new, changes, .. } = event else {
            return Ok(Vec::new());
        };
        let Some(now) = type_reservations(new) else {
            return Ok(Vec::new());
        };

        let mut dropped = Vec::new();
        if let Some(AttributeChange::ReservedNumbers { removed, .. }) = changes.get(Attribute::ReservedNumbers) {
            // merged or widened ranges still cover what they replaced
            dropped.extend(removed.iter().filter(|r| !now.covers_range(r)).map(|r| r.to_string()));
        }
        if let Some(AttributeChange::ReservedNames { removed, .. }) = changes.get(Attribute::ReservedNames) {
            dropped.extend(removed.iter().map(|n| format!("\"{}\"", n)));
        }
        if dropped.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![ctx
            .finding(
                self.id(),
                Outcome::Violation,
                new.path(),
                format!("reservations dropped from {}: {}", new.name(), dropped.join(", ")),
            )
            .with_old(dropped.join(", "))])
    }
}
