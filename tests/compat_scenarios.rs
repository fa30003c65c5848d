//! End-to-end compatibility scenarios
//!
//! Loads descriptor fixtures from disk and runs the full checker over them.

use std::path::{Path, PathBuf};

use proto_compat::report::{render_jsonl, render_text};
use proto_compat::{
    check, load_snapshot, CheckConfig, CompatError, FieldDef, FieldType, MessageType, RuleId, SchemaSnapshot,
    Severity, SnapshotBuilder, Syntax, Verdict, VersionBump,
};
use rstest::rstest;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn load(name: &str) -> SchemaSnapshot {
    load_snapshot(&fixture(name)).unwrap_or_else(|e| panic!("fixture {} should load: {}", name, e))
}

fn user(fields: Vec<FieldDef>) -> SchemaSnapshot {
    let message = fields
        .into_iter()
        .fold(MessageType::new("acme.User", Syntax::Proto3), MessageType::with_field);
    SnapshotBuilder::new("inline").message(message).build().unwrap()
}

// =============================================================================
// Worked scenarios
// =============================================================================

#[test]
fn test_reserved_removal_passes_with_one_advisory() {
    let report = check(&load("user_v1.json"), &load("user_v2.json"), CheckConfig::default()).unwrap();

    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.breaking_count(), 0);
    assert_eq!(report.advisory_count(), 1);
    assert_eq!(report.findings_for(RuleId::UnreservedRemoval).count(), 0);
    assert_eq!(report.findings[0].rule, RuleId::NameNotReserved);
    assert_eq!(report.findings[0].path, "acme.User.name");
}

#[test]
fn test_unreserved_enum_zero_removal_is_advisory() {
    let base = load("status_v1.json");
    let candidate = load("status_v2.json");

    let report = check(&base, &candidate, CheckConfig::default()).unwrap();
    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].rule, RuleId::UnreservedRemoval);
    assert_eq!(report.findings[0].severity, Severity::Advisory);
    assert_eq!(report.findings[0].path, "acme.Status.UNKNOWN");
}

#[test]
fn test_escalation_turns_advisory_into_failure() {
    let config = CheckConfig {
        treat_advisory_as_error: true,
        ..CheckConfig::default()
    };
    let report = check(&load("status_v1.json"), &load("status_v2.json"), config).unwrap();

    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.findings.len(), 1);
    assert!(report.findings[0].escalated);
    assert_eq!(report.findings[0].severity, Severity::Breaking);
}

#[test]
fn test_catalog_release() {
    let report = check(
        &load("catalog/base"),
        &load("catalog/candidate"),
        CheckConfig::default(),
    )
    .unwrap();

    let shape: Vec<_> = report
        .findings
        .iter()
        .map(|f| (f.severity, f.rule, f.path.as_str()))
        .collect();
    assert_eq!(
        shape,
        vec![
            (Severity::Breaking, RuleId::TypeChange, "shop.v1.Money.units"),
            (Severity::Breaking, RuleId::TagReuse, "shop.v1.Product.sku"),
            (Severity::Breaking, RuleId::RepeatedToScalar, "shop.v1.Product.tags"),
            (Severity::Advisory, RuleId::TypeRemoved, "shop.v1.Category"),
            (Severity::Advisory, RuleId::ReservationDropped, "shop.v1.Product"),
        ]
    );
    assert_eq!(report.verdict, Verdict::Fail);

    // narrowing Money reaches every message that embeds it
    assert_eq!(report.findings[0].affected, vec!["shop.v1.Catalog", "shop.v1.Product"]);
    assert_eq!(report.findings[3].new_value.as_deref(), Some("shop.v1.ProductCategory"));

    assert_eq!(report.stats.added, 3);
    assert_eq!(report.stats.removed, 1);
    assert_eq!(report.stats.modified, 5);

    assert_eq!(report.required_bump, VersionBump::Major);
    let version = report.version_check.as_ref().unwrap();
    assert_eq!(version.declared, VersionBump::Minor);
    assert!(!version.satisfied);
}

#[test]
fn test_catalog_with_rules_disabled() {
    let config = CheckConfig {
        rule_denylist: vec!["R-TYPE-CHANGE".into(), "R-TAG-REUSE".into(), "R-REPEATED-TO-SCALAR".into()],
        ..CheckConfig::default()
    };
    let report = check(&load("catalog/base"), &load("catalog/candidate"), config).unwrap();
    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.advisory_count(), 2);
}

#[test]
fn test_unresolved_reference_aborts() {
    let err = load_snapshot(&fixture("dangling.json")).unwrap_err();
    assert!(matches!(err, CompatError::UnresolvedReference { ref target, .. } if target == "acme.Customer"));
}

// =============================================================================
// Field-level properties
// =============================================================================

#[rstest]
#[case(FieldType::Int32, FieldType::Int64, None)]
#[case(FieldType::Uint32, FieldType::Uint64, None)]
#[case(FieldType::Bool, FieldType::Int32, None)]
#[case(FieldType::Sint32, FieldType::Sint64, None)]
#[case(FieldType::Int32, FieldType::Uint32, None)]
#[case(FieldType::Int64, FieldType::Int32, Some(Severity::Breaking))]
#[case(FieldType::Int32, FieldType::String, Some(Severity::Breaking))]
#[case(FieldType::Sint32, FieldType::Int32, Some(Severity::Breaking))]
#[case(FieldType::Fixed32, FieldType::Int32, Some(Severity::Breaking))]
#[case(FieldType::Float, FieldType::Double, Some(Severity::Breaking))]
#[case(FieldType::String, FieldType::Bytes, Some(Severity::Breaking))]
fn test_type_change_matrix(#[case] old: FieldType, #[case] new: FieldType, #[case] expected: Option<Severity>) {
    let base = user(vec![FieldDef::new(1, "value", old)]);
    let candidate = user(vec![FieldDef::new(1, "value", new)]);
    let report = check(&base, &candidate, CheckConfig::default()).unwrap();

    let found: Vec<_> = report.findings_for(RuleId::TypeChange).map(|f| f.severity).collect();
    assert_eq!(found, expected.into_iter().collect::<Vec<_>>());
}

#[rstest]
#[case(true, Severity::Breaking)]
#[case(false, Severity::Advisory)]
fn test_cardinality_asymmetry(#[case] was_repeated: bool, #[case] expected: Severity) {
    let repeated = user(vec![FieldDef::new(1, "values", FieldType::Int32).repeated()]);
    let single = user(vec![FieldDef::new(1, "values", FieldType::Int32)]);
    let (base, candidate) = if was_repeated { (&repeated, &single) } else { (&single, &repeated) };

    let report = check(base, candidate, CheckConfig::default()).unwrap();
    let found: Vec<_> = report.findings_for(RuleId::RepeatedToScalar).collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].severity, expected);
}

#[test]
fn test_rename_is_invisible_to_wire_rules() {
    let base = user(vec![FieldDef::new(1, "name", FieldType::String)]);
    let candidate = user(vec![FieldDef::new(1, "full_name", FieldType::String)]);
    let report = check(&base, &candidate, CheckConfig::default()).unwrap();
    assert!(report.findings.is_empty());
    assert_eq!(report.verdict, Verdict::Pass);
}

#[test]
fn test_unclassifiable_field_does_not_stop_the_run() {
    let snapshot = |legacy: FieldType, x: FieldType| {
        SnapshotBuilder::new("inline")
            .message(
                MessageType::new("acme.User", Syntax::Proto2)
                    .with_field(FieldDef::new(1, "legacy", legacy))
                    .with_field(FieldDef::new(2, "x", x)),
            )
            .message(
                MessageType::new("acme.Address", Syntax::Proto2).with_field(FieldDef::new(1, "line", FieldType::String)),
            )
            .build()
            .unwrap()
    };
    let base = snapshot(FieldType::Group("acme.Address".into()), FieldType::Int32);
    let candidate = snapshot(FieldType::Message("acme.Address".into()), FieldType::String);

    let report = check(&base, &candidate, CheckConfig::default()).unwrap();
    let type_changes: Vec<_> = report.findings_for(RuleId::TypeChange).collect();
    assert_eq!(type_changes.len(), 2);

    let broken = type_changes.iter().find(|f| f.path == "acme.User.x").unwrap();
    assert_eq!(broken.severity, Severity::Breaking);

    let unevaluated = type_changes.iter().find(|f| f.path == "acme.User.legacy").unwrap();
    assert_eq!(unevaluated.severity, Severity::Advisory);
    assert!(unevaluated.message.starts_with("unable to evaluate"));

    assert_eq!(report.verdict, Verdict::Fail);
    assert!(report.complete);
}

#[test]
fn test_reservation_suppresses_removal_advisory() {
    let base = user(vec![
        FieldDef::new(1, "id", FieldType::Int32),
        FieldDef::new(2, "name", FieldType::String),
    ]);
    let candidate = SnapshotBuilder::new("inline")
        .message(
            MessageType::new("acme.User", Syntax::Proto3)
                .with_field(FieldDef::new(1, "id", FieldType::Int32))
                .reserve_numbers(2, 2)
                .reserve_name("name"),
        )
        .build()
        .unwrap();
    let report = check(&base, &candidate, CheckConfig::default()).unwrap();
    assert!(report.findings.is_empty());
}

#[test]
fn test_field_count_threshold_is_configurable() {
    let base = user(vec![FieldDef::new(1, "a", FieldType::Int32)]);
    let candidate = user(vec![
        FieldDef::new(1, "a", FieldType::Int32),
        FieldDef::new(2, "b", FieldType::Int32),
        FieldDef::new(3, "c", FieldType::Int32),
    ]);
    assert!(check(&base, &candidate, CheckConfig::default()).unwrap().findings.is_empty());

    let config = CheckConfig {
        field_count_threshold: 2,
        ..CheckConfig::default()
    };
    let report = check(&base, &candidate, config).unwrap();
    assert_eq!(report.findings_for(RuleId::FieldCount).count(), 1);
}

#[test]
fn test_severity_override() {
    let mut config = CheckConfig::default();
    config
        .severity_overrides
        .insert("R-UNRESERVED-REMOVAL".into(), Severity::Breaking);
    let report = check(&load("status_v1.json"), &load("status_v2.json"), config).unwrap();
    assert_eq!(report.verdict, Verdict::Fail);
    assert!(!report.findings[0].escalated);
}

// =============================================================================
// Rendering
// =============================================================================

#[test]
fn test_renderings_share_one_finding_list() {
    let report = check(&load("catalog/base"), &load("catalog/candidate"), CheckConfig::default()).unwrap();

    let jsonl = render_jsonl(&report).unwrap();
    let records: Vec<serde_json::Value> = jsonl.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(records.len(), report.findings.len() + 1);
    assert_eq!(records[0]["record"], "finding");
    assert_eq!(records[0]["rule"], "R-TYPE-CHANGE");
    assert_eq!(records[0]["severity"], "breaking");
    let summary = records.last().unwrap();
    assert_eq!(summary["record"], "summary");
    assert_eq!(summary["verdict"], "fail");
    assert_eq!(summary["breaking"], 3);

    let text = render_text(&report);
    for finding in &report.findings {
        assert!(text.contains(&finding.path));
    }
    assert!(text.contains("Verdict:   FAIL"));
}
