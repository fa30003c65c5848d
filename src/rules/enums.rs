//! Enum rules

use crate::diff::{Attribute, AttributeChange, ChangeEvent, Entity};
use crate::error::RuleError;
use crate::report::Finding;

use super::{Outcome, Rule, RuleContext, RuleId};

/// Proto3 readers fall back to the zero value for unknown and unset enums;
/// without one the fallback is implementation-defined.
pub struct EnumDefault;

impl Rule for EnumDefault {
    fn id(&self) -> RuleId {
        RuleId::EnumDefault
    }

    fn description(&self) -> &'static str {
        "an enum has no zero value to fall back on"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let message = match event {
            ChangeEvent::Added {
                entity: Entity::Enum(e),
                ..
            } if !e.has_zero_value() => format!("new enum {} has no value numbered 0", e.name),
            // an unreserved removal of the zero value is already reported
            // against the value itself
            ChangeEvent::Modified {
                new: Entity::Enum(e),
                changes,
                ..
            } if matches!(
                changes.get(Attribute::EnumZeroValue),
                Some(AttributeChange::EnumZeroValue { old: true, new: false })
            ) && e.is_number_reserved(0) =>
            {
                format!("enum {} no longer has a value numbered 0", e.name)
            }
            _ => return Ok(Vec::new()),
        };
        Ok(vec![ctx.finding(self.id(), Outcome::Violation, event.path(), message)])
    }
}

pub struct EnumValueReuse;

impl Rule for EnumValueReuse {
    fn id(&self) -> RuleId {
        RuleId::EnumValueReuse
    }

    fn description(&self) -> &'static str {
        "an enum number now means something else"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let finding = match event {
            ChangeEvent::Added {
                entity: Entity::EnumValue { value, .. },
                reserved_in_base,
            } if reserved_in_base.number => ctx
                .finding(
                    self.id(),
                    Outcome::Violation,
                    event.path(),
                    format!("value {} was reserved and is now bound to {}", value.number, value.name),
                )
                .with_values("reserved", value.name.clone()),
            ChangeEvent::Modified {
                old: Entity::EnumValue { value: old, .. },
                new: Entity::EnumValue { value: new, .. },
                ..
            } if old.name != new.name => ctx
                .finding(
                    self.id(),
                    Outcome::Violation,
                    event.path(),
                    format!("value {} renamed from {} to {}", new.number, old.name, new.name),
                )
                .with_values(old.name.clone(), new.name.clone()),
            _ => return Ok(Vec::new()),
        };
        Ok(vec![finding])
    }
}
