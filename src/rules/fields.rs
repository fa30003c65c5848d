//! Rules about individual message fields

use crate::diff::{Attribute, AttributeChange, ChangeEvent, ChangeSet, Entity};
use crate::error::RuleError;
use crate::report::Finding;
use crate::schema::{Cardinality, FieldDef, FieldType, SchemaSnapshot};

use super::compat::{classify, wire_related, Conversion, SupersetCheck, TypeCompat};
use super::{Outcome, Rule, RuleContext, RuleId};

fn describe(field: &FieldDef) -> String {
    format!("{} ({})", field.name, field.field_type)
}

/// Old and new field of a modified-field event
fn modified_fields<'e, 'a>(event: &'e ChangeEvent<'a>) -> Option<(&'a FieldDef, &'a FieldDef, &'e ChangeSet)> {
    match event {
        ChangeEvent::Modified {
            old: Entity::Field { field: old, .. },
            new: Entity::Field { field: new, .. },
            changes,
        } => Some((*old, *new, changes)),
        _ => None,
    }
}

/// The value a reader assumes for an unset field: the explicit default if
/// there is one, otherwise the type's zero (first declared value for enums)
fn effective_default(field: &FieldDef, snapshot: &SchemaSnapshot) -> Option<String> {
    if let Some(explicit) = &field.default {
        return Some(explicit.clone());
    }
    let zero = match &field.field_type {
        FieldType::Bool => "false",
        FieldType::String | FieldType::Bytes => "",
        FieldType::Enum(name) => {
            return snapshot
                .enum_type(name)
                .and_then(|e| e.values.first())
                .map(|v| v.name.clone())
        }
        FieldType::Message(_) | FieldType::Group(_) => return None,
        _ => "0",
    };
    Some(zero.to_string())
}

/// Textual defaults compared by value, so `0`, `0.0` and `-0` agree
fn same_default(field_type: &FieldType, a: &str, b: &str) -> bool {
    match field_type {
        FieldType::Float | FieldType::Double => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => x == y,
            _ => a == b,
        },
        FieldType::Bool
        | FieldType::String
        | FieldType::Bytes
        | FieldType::Enum(_)
        | FieldType::Message(_)
        | FieldType::Group(_) => a == b,
        _ => match (a.parse::<i128>(), b.parse::<i128>()) {
            (Ok(x), Ok(y)) => x == y,
            _ => a == b,
        },
    }
}

/// A tag whose old and new occupants share nothing but the number.
///
/// Rebinding a tag to a differently named field of a wire-related type
/// (`string email` to `string phone`) reads as a rename and is not
/// reported: the bytes give no way to tell the two apart.
pub(crate) fn is_tag_reuse(old: &FieldDef, new: &FieldDef) -> bool {
    old.name != new.name && !wire_related(&old.field_type, &new.field_type)
}

/// Flags a tag handed to an unrelated field, or a reserved tag brought back.
///
/// Only type-visible rebinding is caught. Moving tag 2 from `string email` to
/// `string phone` looks exactly like a rename and passes silently.
pub struct TagReuse;

impl Rule for TagReuse {
    fn id(&self) -> RuleId {
        RuleId::TagReuse
    }

    fn description(&self) -> &'static str {
        "a field tag is bound to an unrelated field"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let mut out = Vec::new();
        match event {
            ChangeEvent::Added {
                entity: Entity::Field { field, .. },
                reserved_in_base,
            } if reserved_in_base.number => {
                out.push(
                    ctx.finding(
                        self.id(),
                        Outcome::Violation,
                        event.path(),
                        format!("tag {} was reserved and is now used by field '{}'", field.number, field.name),
                    )
                    .with_values("reserved", describe(field)),
                );
            }
            _ => {
                if let Some((old, new, _)) = modified_fields(event) {
                    if is_tag_reuse(old, new) {
                        out.push(
                            ctx.finding(
                                self.id(),
                                Outcome::Violation,
                                event.path(),
                                format!(
                                    "tag {} moved from field '{}' to unrelated field '{}'",
                                    new.number, old.name, new.name
                                ),
                            )
                            .with_values(describe(old), describe(new)),
                        );
                    }
                }
            }
        }
        Ok(out)
    }
}

pub struct TypeChange;

impl Rule for TypeChange {
    fn id(&self) -> RuleId {
        RuleId::TypeChange
    }

    fn description(&self) -> &'static str {
        "a field's type changed to one that cannot decode the old bytes"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let Some((old, new, changes)) = modified_fields(event) else {
            return Ok(Vec::new());
        };
        let Some(AttributeChange::Type { old: from, new: to }) = changes.get(Attribute::Type) else {
            return Ok(Vec::new());
        };
        if is_tag_reuse(old, new) {
            return Ok(Vec::new());
        }

        let cardinality_changed = changes.has(Attribute::Cardinality);
        let outcome = match classify(from, to)? {
            TypeCompat::Same => None,
            TypeCompat::Convertible(_) if cardinality_changed => Some((
                Outcome::Violation,
                format!("type and cardinality changed together: {} -> {}", from, to),
            )),
            TypeCompat::Convertible(Conversion::Narrowing) => Some((
                if ctx.allow_narrowing() {
                    Outcome::Relaxed
                } else {
                    Outcome::Violation
                },
                format!("narrowing {} -> {} truncates large values", from, to),
            )),
            TypeCompat::Convertible(_) => None,
            TypeCompat::Structural => {
                let mut superset = SupersetCheck::new(ctx.base, ctx.candidate, ctx.allow_narrowing());
                if superset.references(from, to)? && !cardinality_changed {
                    None
                } else {
                    Some((
                        Outcome::Violation,
                        format!("{} is not a compatible replacement for {}", to, from),
                    ))
                }
            }
            TypeCompat::Incompatible => Some((
                Outcome::Violation,
                format!("type changed from {} to {}", from, to),
            )),
        };

        Ok(outcome
            .map(|(outcome, message)| {
                ctx.finding(self.id(), outcome, event.path(), message)
                    .with_values(from.to_string(), to.to_string())
            })
            .into_iter()
            .collect())
    }
}

pub struct RequiredAdded;

impl Rule for RequiredAdded {
    fn id(&self) -> RuleId {
        RuleId::RequiredAdded
    }

    fn description(&self) -> &'static str {
        "a required field appeared in an existing message"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let mut out = Vec::new();
        match event {
            ChangeEvent::Added {
                entity: Entity::Field { field, .. },
                ..
            } if field.cardinality == Cardinality::Required => {
                out.push(ctx.finding(
                    self.id(),
                    Outcome::Violation,
                    event.path(),
                    format!("required field '{}' added; old writers never send it", field.name),
                ));
            }
            _ => {
                if let Some((old, new, _)) = modified_fields(event) {
                    if new.cardinality == Cardinality::Required && old.cardinality != Cardinality::Required {
                        out.push(
                            ctx.finding(
                                self.id(),
                                Outcome::Violation,
                                event.path(),
                                format!("field '{}' became required", new.name),
                            )
                            .with_values(format!("{:?}", old.cardinality).to_lowercase(), "required"),
                        );
                    }
                }
            }
        }
        Ok(out)
    }
}

pub struct RepeatedToScalar;

impl Rule for RepeatedToScalar {
    fn id(&self) -> RuleId {
        RuleId::RepeatedToScalar
    }

    fn description(&self) -> &'static str {
        "a repeated field became singular (or the reverse)"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let Some((old, new, _)) = modified_fields(event) else {
            return Ok(Vec::new());
        };
        if is_tag_reuse(old, new) || old.cardinality.is_repeated() == new.cardinality.is_repeated() {
            return Ok(Vec::new());
        }

        let finding = if old.cardinality.is_repeated() {
            ctx.finding(
                self.id(),
                Outcome::Violation,
                event.path(),
                format!("repeated field '{}' became singular; all but the last element are dropped", new.name),
            )
            .with_values("repeated", "singular")
        } else {
            ctx.finding(
                self.id(),
                Outcome::Relaxed,
                event.path(),
                format!("singular field '{}' became repeated; old readers keep only the last element", new.name),
            )
            .with_values("singular", "repeated")
        };
        Ok(vec![finding])
    }
}

pub struct DefaultValueChanged;

impl Rule for DefaultValueChanged {
    fn id(&self) -> RuleId {
        RuleId::DefaultValueChanged
    }

    fn description(&self) -> &'static str {
        "the effective default value of a field changed"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let Some((old, new, changes)) = modified_fields(event) else {
            return Ok(Vec::new());
        };
        let Some(AttributeChange::Default { old: before, new: after }) = changes.get(Attribute::Default) else {
            return Ok(Vec::new());
        };
        if is_tag_reuse(old, new) {
            return Ok(Vec::new());
        }
        if old.field_type == new.field_type {
            let unchanged = match (effective_default(old, ctx.base), effective_default(new, ctx.candidate)) {
                (Some(a), Some(b)) => same_default(&new.field_type, &a, &b),
                _ => false,
            };
            if unchanged {
                return Ok(Vec::new());
            }
        }

        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "<implicit>".to_string());
        Ok(vec![ctx
            .finding(
                self.id(),
                Outcome::Violation,
                event.path(),
                format!("default of '{}' changed; readers disagree on unset values", new.name),
            )
            .with_values(show(before), show(after))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckConfig, IntegerNarrowing};
    use crate::diff::diff_pair;
    use crate::matcher::match_types;
    use crate::report::Severity;
    use crate::rules::SeverityTable;
    use crate::schema::{FieldType, MessageType, SchemaSnapshot, SnapshotBuilder, Syntax};

    fn user(syntax: Syntax, fields: Vec<FieldDef>) -> SchemaSnapshot {
        let message = fields
            .into_iter()
            .fold(MessageType::new("acme.User", syntax), MessageType::with_field);
        SnapshotBuilder::new("s")
            .message(message)
            .message(MessageType::new("acme.Address", Syntax::Proto3).with_field(FieldDef::new(1, "line", FieldType::String)))
            .message(MessageType::new("acme.Other", Syntax::Proto3).with_field(FieldDef::new(1, "x", FieldType::Bool)))
            .build()
            .unwrap()
    }

    fn run(rule: &dyn Rule, config: &CheckConfig, base: &SchemaSnapshot, candidate: &SchemaSnapshot) -> Vec<Finding> {
        let severities = SeverityTable::default();
        let mut out = Vec::new();
        for pair in match_types(base, candidate) {
            let diff = diff_pair(&pair);
            let ctx = RuleContext {
                base,
                candidate,
                config,
                severities: &severities,
                type_name: pair.name,
            };
            for event in &diff.events {
                out.extend(rule.check(&ctx, event).unwrap());
            }
        }
        out
    }

    #[test]
    fn test_rename_with_related_type_is_not_reuse() {
        let base = user(Syntax::Proto3, vec![FieldDef::new(1, "name", FieldType::String)]);
        let candidate = user(Syntax::Proto3, vec![FieldDef::new(1, "display_name", FieldType::String)]);
        assert!(run(&TagReuse, &CheckConfig::default(), &base, &candidate).is_empty());
    }

    #[test]
    fn test_unrelated_field_on_same_tag() {
        let base = user(Syntax::Proto3, vec![FieldDef::new(1, "name", FieldType::String)]);
        let candidate = user(Syntax::Proto3, vec![FieldDef::new(1, "age", FieldType::Int32)]);
        let config = CheckConfig::default();
        let found = run(&TagReuse, &config, &base, &candidate);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Breaking);
        assert!(run(&TypeChange, &config, &base, &candidate).is_empty());
    }

    #[test]
    fn test_tag_out_of_reservation() {
        let base = SnapshotBuilder::new("base")
            .message(MessageType::new("acme.User", Syntax::Proto3).reserve_numbers(2, 2))
            .build()
            .unwrap();
        let candidate = SnapshotBuilder::new("candidate")
            .message(MessageType::new("acme.User", Syntax::Proto3).with_field(FieldDef::new(2, "nickname", FieldType::String)))
            .build()
            .unwrap();
        let found = run(&TagReuse, &CheckConfig::default(), &base, &candidate);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "acme.User.nickname");
    }

    #[test]
    fn test_integer_widening_and_narrowing() {
        let narrow = user(Syntax::Proto3, vec![FieldDef::new(1, "count", FieldType::Int32)]);
        let wide = user(Syntax::Proto3, vec![FieldDef::new(1, "count", FieldType::Int64)]);
        let mut config = CheckConfig::default();

        assert!(run(&TypeChange, &config, &narrow, &wide).is_empty());

        let found = run(&TypeChange, &config, &wide, &narrow);
        assert_eq!(found[0].severity, Severity::Breaking);

        config.integer_narrowing = IntegerNarrowing::Advisory;
        let found = run(&TypeChange, &config, &wide, &narrow);
        assert_eq!(found[0].severity, Severity::Advisory);
    }

    #[test]
    fn test_message_reference_swaps() {
        let base = user(Syntax::Proto3, vec![FieldDef::new(1, "home", FieldType::Message("acme.Address".into()))]);
        let incompatible = user(Syntax::Proto3, vec![FieldDef::new(1, "home", FieldType::Message("acme.Other".into()))]);
        let config = CheckConfig::default();
        assert_eq!(run(&TypeChange, &config, &base, &incompatible).len(), 1);

        let to_string = user(Syntax::Proto3, vec![FieldDef::new(1, "home", FieldType::String)]);
        assert_eq!(run(&TypeChange, &config, &base, &to_string).len(), 1);
    }

    #[test]
    fn test_group_change_is_unclassifiable() {
        let severities = SeverityTable::default();
        let config = CheckConfig::default();
        let old = MessageType::new("acme.User", Syntax::Proto2)
            .with_field(FieldDef::new(1, "legacy", FieldType::Group("acme.Address".into())));
        let new = MessageType::new("acme.User", Syntax::Proto2)
            .with_field(FieldDef::new(1, "legacy", FieldType::Message("acme.Address".into())));
        let address = MessageType::new("acme.Address", Syntax::Proto2).with_field(FieldDef::new(1, "line", FieldType::String));
        let base = SnapshotBuilder::new("base").message(old).message(address.clone()).build().unwrap();
        let candidate = SnapshotBuilder::new("candidate").message(new).message(address).build().unwrap();
        let pairs = match_types(&base, &candidate);
        // pairs are name-ordered: acme.Address, acme.User
        let diff = diff_pair(&pairs[1]);
        let ctx = RuleContext {
            base: &base,
            candidate: &candidate,
            config: &config,
            severities: &severities,
            type_name: "acme.User",
        };
        assert!(matches!(
            TypeChange.check(&ctx, &diff.events[1]),
            Err(RuleError::Unclassifiable { .. })
        ));
    }

    #[test]
    fn test_cardinality_direction() {
        let repeated = user(Syntax::Proto3, vec![FieldDef::new(1, "tags", FieldType::String).repeated()]);
        let single = user(Syntax::Proto3, vec![FieldDef::new(1, "tags", FieldType::String)]);
        let config = CheckConfig::default();

        let found = run(&RepeatedToScalar, &config, &repeated, &single);
        assert_eq!(found[0].severity, Severity::Breaking);
        let found = run(&RepeatedToScalar, &config, &single, &repeated);
        assert_eq!(found[0].severity, Severity::Advisory);
    }

    #[test]
    fn test_required_and_default_in_proto2() {
        let base = user(Syntax::Proto2, vec![FieldDef::new(1, "id", FieldType::Int32).with_default("1")]);
        let candidate = user(
            Syntax::Proto2,
            vec![
                FieldDef::new(1, "id", FieldType::Int32).with_default("2"),
                FieldDef::new(2, "token", FieldType::String).required(),
            ],
        );
        let config = CheckConfig::default();

        let found = run(&RequiredAdded, &config, &base, &candidate);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "acme.User.token");

        let found = run(&DefaultValueChanged, &config, &base, &candidate);
        assert_eq!(found[0].old_value.as_deref(), Some("1"));
        assert_eq!(found[0].new_value.as_deref(), Some("2"));
    }

    #[test]
    fn test_default_compared_by_effective_value() {
        let config = CheckConfig::default();
        let implicit = user(Syntax::Proto2, vec![FieldDef::new(1, "count", FieldType::Int32)]);
        let explicit_zero = user(Syntax::Proto2, vec![FieldDef::new(1, "count", FieldType::Int32).with_default("0")]);
        let explicit_one = user(Syntax::Proto2, vec![FieldDef::new(1, "count", FieldType::Int32).with_default("1")]);
        assert!(run(&DefaultValueChanged, &config, &implicit, &explicit_zero).is_empty());
        assert!(run(&DefaultValueChanged, &config, &explicit_zero, &implicit).is_empty());
        assert_eq!(run(&DefaultValueChanged, &config, &implicit, &explicit_one).len(), 1);

        let ratio = |d: &str| user(Syntax::Proto2, vec![FieldDef::new(1, "ratio", FieldType::Double).with_default(d)]);
        assert!(run(&DefaultValueChanged, &config, &ratio("1"), &ratio("1.0")).is_empty());
        assert_eq!(run(&DefaultValueChanged, &config, &ratio("1"), &ratio("1.5")).len(), 1);
    }

    #[test]
    fn test_same_type_rebinding_reads_as_rename() {
        let base = user(Syntax::Proto3, vec![FieldDef::new(2, "email", FieldType::String)]);
        let candidate = user(Syntax::Proto3, vec![FieldDef::new(2, "phone", FieldType::String)]);
        let config = CheckConfig::default();
        assert!(run(&TagReuse, &config, &base, &candidate).is_empty());
        assert!(run(&TypeChange, &config, &base, &candidate).is_empty());
    }
}
