//! Compatibility rules
//!
//! Each rule is a pure function over one change event. Rules never see each
//! other's output and never read global state: everything they need arrives
//! through [`RuleContext`]. Severity is data, looked up in a [`SeverityTable`]
//! keyed by rule id and outcome, so it can be remapped without touching any
//! rule body.
//!
//! | Rule                     | Fires on                                            | Default   |
//! |--------------------------|-----------------------------------------------------|-----------|
//! | `R-TAG-REUSE`            | a tag rebound to an unrelated field                 | breaking  |
//! | `R-TYPE-CHANGE`          | a wire-incompatible field type change               | breaking  |
//! | `R-REQUIRED-ADDED`       | a required field added to an existing message       | breaking  |
//! | `R-FIELD-COUNT`          | a message growing past the field threshold          | advisory  |
//! | `R-ENUM-DEFAULT`         | an enum with no zero value                          | advisory  |
//! | `R-ENUM-VALUE-REUSE`     | an enum number rebound to a different name          | breaking  |
//! | `R-DEFAULT-VALUE-CHANGED`| the effective default value changed                 | breaking  |
//! | `R-REPEATED-TO-SCALAR`   | repeated to singular (breaking), or back (advisory) | breaking  |
//! | `R-UNRESERVED-REMOVAL`   | a member removed without reserving its number       | advisory  |
//! | `R-NAME-NOT-RESERVED`    | a member removed with its number but not its name   | advisory  |
//! | `R-RESERVED-NAME-REUSE`  | a reserved name brought back                        | advisory  |
//! | `R-RESERVATION-DROPPED`  | a reservation removed from a type                   | advisory  |
//! | `R-TYPE-REMOVED`         | a message or enum deleted                           | advisory  |

pub mod compat;
mod enums;
mod fields;
mod reservations;
mod types;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::config::{CheckConfig, IntegerNarrowing};
use crate::diff::{ChangeEvent, TypeDiff};
use crate::error::{CompatError, RuleError};
use crate::report::{Finding, Severity};
use crate::schema::SchemaSnapshot;

pub use enums::{EnumDefault, EnumValueReuse};
pub use fields::{DefaultValueChanged, RepeatedToScalar, RequiredAdded, TagReuse, TypeChange};
pub use reservations::{NameNotReserved, ReservationDropped, ReservedNameReuse, UnreservedRemoval};
pub use types::{FieldCount, TypeRemoved};

/// Stable rule identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleId {
    #[serde(rename = "R-TAG-REUSE")]
    TagReuse,
    #[serde(rename = "R-TYPE-CHANGE")]
    TypeChange,
    #[serde(rename = "R-REQUIRED-ADDED")]
    RequiredAdded,
    #[serde(rename = "R-FIELD-COUNT")]
    FieldCount,
    #[serde(rename = "R-ENUM-DEFAULT")]
    EnumDefault,
    #[serde(rename = "R-ENUM-VALUE-REUSE")]
    EnumValueReuse,
    #[serde(rename = "R-DEFAULT-VALUE-CHANGED")]
    DefaultValueChanged,
    #[serde(rename = "R-REPEATED-TO-SCALAR")]
    RepeatedToScalar,
    #[serde(rename = "R-UNRESERVED-REMOVAL")]
    UnreservedRemoval,
    #[serde(rename = "R-NAME-NOT-RESERVED")]
    NameNotReserved,
    #[serde(rename = "R-RESERVED-NAME-REUSE")]
    ReservedNameReuse,
    #[serde(rename = "R-RESERVATION-DROPPED")]
    ReservationDropped,
    #[serde(rename = "R-TYPE-REMOVED")]
    TypeRemoved,
}

impl RuleId {
    pub const ALL: [RuleId; 13] = [
        RuleId::TagReuse,
        RuleId::TypeChange,
        RuleId::RequiredAdded,
        RuleId::FieldCount,
        RuleId::EnumDefault,
        RuleId::EnumValueReuse,
        RuleId::DefaultValueChanged,
        RuleId::RepeatedToScalar,
        RuleId::UnreservedRemoval,
        RuleId::NameNotReserved,
        RuleId::ReservedNameReuse,
        RuleId::ReservationDropped,
        RuleId::TypeRemoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::TagReuse => "R-TAG-REUSE",
            RuleId::TypeChange => "R-TYPE-CHANGE",
            RuleId::RequiredAdded => "R-REQUIRED-ADDED",
            RuleId::FieldCount => "R-FIELD-COUNT",
            RuleId::EnumDefault => "R-ENUM-DEFAULT",
            RuleId::EnumValueReuse => "R-ENUM-VALUE-REUSE",
            RuleId::DefaultValueChanged => "R-DEFAULT-VALUE-CHANGED",
            RuleId::RepeatedToScalar => "R-REPEATED-TO-SCALAR",
            RuleId::UnreservedRemoval => "R-UNRESERVED-REMOVAL",
            RuleId::NameNotReserved => "R-NAME-NOT-RESERVED",
            RuleId::ReservedNameReuse => "R-RESERVED-NAME-REUSE",
            RuleId::ReservationDropped => "R-RESERVATION-DROPPED",
            RuleId::TypeRemoved => "R-TYPE-REMOVED",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleId {
    type Err = CompatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CompatError::UnknownRule(s.to_string()))
    }
}

/// Which way a rule fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    /// The change the rule exists to catch
    Violation,
    /// The tolerated direction of a directional rule (scalar to repeated,
    /// integer narrowing under the advisory policy)
    Relaxed,
    /// The rule could not classify its input
    Unevaluated,
}

const DEFAULT_SEVERITIES: &[(RuleId, Outcome, Severity)] = &[
    (RuleId::TagReuse, Outcome::Violation, Severity::Breaking),
    (RuleId::TypeChange, Outcome::Violation, Severity::Breaking),
    (RuleId::TypeChange, Outcome::Relaxed, Severity::Advisory),
    (RuleId::RequiredAdded, Outcome::Violation, Severity::Breaking),
    (RuleId::FieldCount, Outcome::Violation, Severity::Advisory),
    (RuleId::EnumDefault, Outcome::Violation, Severity::Advisory),
    (RuleId::EnumValueReuse, Outcome::Violation, Severity::Breaking),
    (RuleId::DefaultValueChanged, Outcome::Violation, Severity::Breaking),
    (RuleId::RepeatedToScalar, Outcome::Violation, Severity::Breaking),
    (RuleId::RepeatedToScalar, Outcome::Relaxed, Severity::Advisory),
    (RuleId::UnreservedRemoval, Outcome::Violation, Severity::Advisory),
    (RuleId::NameNotReserved, Outcome::Violation, Severity::Advisory),
    (RuleId::ReservedNameReuse, Outcome::Violation, Severity::Advisory),
    (RuleId::ReservationDropped, Outcome::Violation, Severity::Advisory),
    (RuleId::TypeRemoved, Outcome::Violation, Severity::Advisory),
];

/// Severity for every (rule, outcome) pair.
///
/// `Unevaluated` is always advisory and cannot be remapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityTable {
    entries: BTreeMap<(RuleId, Outcome), Severity>,
}

impl Default for SeverityTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_SEVERITIES
                .iter()
                .map(|&(rule, outcome, severity)| ((rule, outcome), severity))
                .collect(),
        }
    }
}

impl SeverityTable {
    /// Defaults with the configured overrides applied to every outcome but
    /// `Unevaluated`
    pub fn from_config(config: &CheckConfig) -> crate::error::Result<Self> {
        let mut table = Self::default();
        for (raw, severity) in &config.severity_overrides {
            table.set(raw.parse()?, *severity);
        }
        Ok(table)
    }

    pub fn set(&mut self, rule: RuleId, severity: Severity) {
        for ((id, _), entry) in self.entries.iter_mut() {
            if *id == rule {
                *entry = severity;
            }
        }
    }

    pub fn get(&self, rule: RuleId, outcome: Outcome) -> Severity {
        match outcome {
            Outcome::Unevaluated => Severity::Advisory,
            _ => self
                .entries
                .get(&(rule, outcome))
                .or_else(|| self.entries.get(&(rule, Outcome::Violation)))
                .copied()
                .unwrap_or(Severity::Advisory),
        }
    }
}

/// Everything a rule may consult
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub base: &'a SchemaSnapshot,
    pub candidate: &'a SchemaSnapshot,
    pub config: &'a CheckConfig,
    pub severities: &'a SeverityTable,
    /// Qualified name of the type being evaluated
    pub type_name: &'a str,
}

impl<'a> RuleContext<'a> {
    pub fn finding(&self, rule: RuleId, outcome: Outcome, path: impl Into<String>, message: impl Into<String>) -> Finding {
        Finding::new(rule, self.severities.get(rule, outcome), self.type_name, path, message)
    }

    pub fn allow_narrowing(&self) -> bool {
        self.config.integer_narrowing == IntegerNarrowing::Advisory
    }
}

/// A compatibility rule
pub trait Rule: Send + Sync {
    fn id(&self) -> RuleId;

    /// One-line summary for `proto-compat rules`
    fn description(&self) -> &'static str;

    /// Findings for one change event; most events yield none
    fn check(&self, ctx: &RuleContext<'_>, event: &ChangeEvent<'_>) -> Result<Vec<Finding>, RuleError>;
}

/// Rules to run, keyed by id.
///
/// Built once per run and handed to every worker by reference.
pub struct RuleRegistry {
    rules: BTreeMap<RuleId, Box<dyn Rule>>,
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.rules.keys()).finish()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self { rules: BTreeMap::new() }
    }

    /// Every built-in rule
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(TagReuse);
        registry.register(TypeChange);
        registry.register(RequiredAdded);
        registry.register(FieldCount);
        registry.register(EnumDefault);
        registry.register(EnumValueReuse);
        registry.register(DefaultValueChanged);
        registry.register(RepeatedToScalar);
        registry.register(UnreservedRemoval);
        registry.register(NameNotReserved);
        registry.register(ReservedNameReuse);
        registry.register(ReservationDropped);
        registry.register(TypeRemoved);
        registry
    }

    /// Built-in rules narrowed by the configured allow and deny lists
    pub fn from_config(config: &CheckConfig) -> crate::error::Result<Self> {
        let allow = parse_ids(&config.rule_allowlist)?;
        let deny = parse_ids(&config.rule_denylist)?;
        let mut registry = Self::standard();
        registry
            .rules
            .retain(|id, _| (allow.is_empty() || allow.contains(id)) && !deny.contains(id));
        Ok(registry)
    }

    pub fn register(&mut self, rule: impl Rule + 'static) {
        self.rules.insert(rule.id(), Box::new(rule));
    }

    pub fn ids(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.rules.keys().copied()
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.values().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule over every event of one type.
    ///
    /// A rule error becomes an advisory finding under that rule's id at the
    /// event's path; evaluation of the remaining rules continues.
    pub fn evaluate(&self, ctx: &RuleContext<'_>, diff: &TypeDiff<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for event in &diff.events {
            for rule in self.rules.values() {
                match rule.check(ctx, event) {
                    Ok(mut found) => findings.append(&mut found),
                    Err(err) => {
                        warn!(rule = %rule.id(), path = %event.path(), error = %err, "rule could not evaluate");
                        findings.push(ctx.finding(
                            rule.id(),
                            Outcome::Unevaluated,
                            event.path(),
                            format!("unable to evaluate: {}", err),
                        ));
                    }
                }
            }
        }
        findings
    }
}

fn parse_ids(raw: &[String]) -> crate::error::Result<BTreeSet<RuleId>> {
    raw.iter().map(|s| s.parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_ids_round_trip_through_strings() {
        for id in RuleId::ALL {
            assert_eq!(id.as_str().parse::<RuleId>().unwrap(), id);
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
        assert!(matches!("R-NOPE".parse::<RuleId>(), Err(CompatError::UnknownRule(_))));
    }

    #[test]
    fn test_standard_registry_covers_every_id() {
        let registry = RuleRegistry::standard();
        assert_eq!(registry.ids().collect::<Vec<_>>(), RuleId::ALL.to_vec());
        for rule in registry.rules() {
            assert!(!rule.description().is_empty());
        }
    }

    #[test]
    fn test_allow_and_deny_lists() {
        let config = CheckConfig {
            rule_allowlist: vec!["R-TAG-REUSE".into(), "R-TYPE-CHANGE".into()],
            rule_denylist: vec!["R-TYPE-CHANGE".into()],
            ..CheckConfig::default()
        };
        let registry = RuleRegistry::from_config(&config).unwrap();
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![RuleId::TagReuse]);

        let bad = CheckConfig {
            rule_denylist: vec!["R-MADE-UP".into()],
            ..CheckConfig::default()
        };
        assert!(RuleRegistry::from_config(&bad).is_err());
    }

    #[test]
    fn test_severity_defaults_and_overrides() {
        let table = SeverityTable::default();
        assert_eq!(table.get(RuleId::RepeatedToScalar, Outcome::Violation), Severity::Breaking);
        assert_eq!(table.get(RuleId::RepeatedToScalar, Outcome::Relaxed), Severity::Advisory);
        assert_eq!(table.get(RuleId::TagReuse, Outcome::Unevaluated), Severity::Advisory);

        let mut config = CheckConfig::default();
        config
            .severity_overrides
            .insert("R-UNRESERVED-REMOVAL".into(), Severity::Breaking);
        let table = SeverityTable::from_config(&config).unwrap();
        assert_eq!(table.get(RuleId::UnreservedRemoval, Outcome::Violation), Severity::Breaking);
    }
}
