//! Type-level rules

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::diff::{ChangeEvent, Entity};
use crate::error::RuleError;
use crate::report::Finding;
use crate::schema::{SchemaSnapshot, TypeKind};

use super::{Outcome, Rule, RuleContext, RuleId};

pub struct FieldCount;

impl Rule for FieldCount {
    fn id(&self) -> RuleId {
        RuleId::FieldCount
    }

    fn description(&self) -> &'static str {
        "a message grew past the configured field count"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let threshold = ctx.config.field_count_threshold;
        let (before, message) = match event {
            ChangeEvent::Added {
                entity: Entity::Message(m),
                ..
            } => (0, m),
            ChangeEvent::Modified {
                old: Entity::Message(old),
                new: Entity::Message(new),
                ..
            } => (old.live_field_count(), new),
            _ => return Ok(Vec::new()),
        };

        let count = message.live_field_count();
        if count <= threshold || count <= before {
            return Ok(Vec::new());
        }
        Ok(vec![ctx
            .finding(
                self.id(),
                Outcome::Violation,
                event.path(),
                format!("{} has {} fields (threshold {})", message.name, count, threshold),
            )
            .with_values(before.to_string(), count.to_string())])
    }
}

pub struct TypeRemoved;

fn simple_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// Best-scoring candidate type of the same kind that base did not have
fn rename_suggestion<'a>(name: &str, kind: TypeKind, base: &SchemaSnapshot, candidate: &'a SchemaSnapshot) -> Option<&'a str> {
    let matcher = SkimMatcherV2::default();
    let wanted = simple_name(name);
    let mut best: Option<(i64, &'a str)> = None;

    for def in candidate.types() {
        if def.kind() != kind || base.get(def.name()).is_some() {
            continue;
        }
        let other = simple_name(def.name());
        let score = matcher
            .fuzzy_match(other, wanted)
            .max(matcher.fuzzy_match(wanted, other));
        if let Some(score) = score {
            // iteration is name-ordered, so ties keep the first name
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, def.name()));
            }
        }
    }
    best.map(|(_, name)| name)
}

impl Rule for TypeRemoved {
    fn id(&self) -> RuleId {
        RuleId::TypeRemoved
    }

    fn description(&self) -> &'static str {
        "a message or enum was deleted"
    }

    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError> {
        let ChangeEvent::Removed { entity, .. } = event else {
            return Ok(Vec::new());
        };
        let kind = match entity {
            Entity::Message(_) => TypeKind::Message,
            Entity::Enum(_) => TypeKind::Enum,
            _ => return Ok(Vec::new()),
        };
        let name = entity.name();

        let finding = match ctx.candidate.get(name) {
            Some(replacement) => ctx.finding(
                self.id(),
                Outcome::Violation,
                entity.path(),
                format!("{} {} became {} {}", kind, name, replacement.kind(), name),
            ),
            None => match rename_suggestion(name, kind, ctx.base, ctx.candidate) {
                Some(suggestion) => ctx
                    .finding(
                        self.id(),
                        Outcome::Violation,
                        entity.path(),
                        format!("{} {} was removed (renamed to {}?)", kind, name, suggestion),
                    )
                    .with_new(suggestion),
                None => ctx.finding(
                    self.id(),
                    Outcome::Violation,
                    entity.path(),
                    format!("{} {} was removed; peers still using it will fail to resolve", kind, name),
                ),
            },
        };
        Ok(vec![finding.with_old(name)])
    }
}
