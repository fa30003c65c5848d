//! Findings, aggregation and rendering
//!
//! The aggregator is the single place findings are deduplicated, ordered and
//! turned into a verdict. Text, JSON and JSON-lines output are all views over
//! the same [`Report`]; none of them decides anything on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;

use crate::checksum::Checksum;
use crate::diff::DiffStats;
use crate::graph::TypeGraph;
use crate::rules::RuleId;
use crate::schema::SchemaSnapshot;
use crate::version::{SchemaVersion, VersionBump, VersionCheck};

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A risk that does not corrupt data today
    Advisory,
    /// Expected to corrupt or lose data for some deployed reader or writer
    Breaking,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advisory => write!(f, "advisory"),
            Self::Breaking => write!(f, "breaking"),
        }
    }
}

/// One compatibility violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: RuleId,
    pub severity: Severity,
    /// `package.Message.field`, `package.Enum.VALUE` or a type name
    pub path: String,
    /// Qualified name of the type that owns `path`
    pub type_name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    /// Advisory raised to breaking by `treat_advisory_as_error`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub escalated: bool,
    /// Candidate messages that transitively embed `type_name`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected: Vec<String>,
}

impl Finding {
    pub fn new(
        rule: RuleId,
        severity: Severity,
        type_name: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule,
            severity,
            path: path.into(),
            type_name: type_name.into(),
            message: message.into(),
            old_value: None,
            new_value: None,
            escalated: false,
            affected: Vec::new(),
        }
    }

    pub fn with_values(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.old_value = Some(old.into());
        self.new_value = Some(new.into());
        self
    }

    pub fn with_old(mut self, old: impl Into<String>) -> Self {
        self.old_value = Some(old.into());
        self
    }

    pub fn with_new(mut self, new: impl Into<String>) -> Self {
        self.new_value = Some(new.into());
        self
    }

    pub fn is_breaking(&self) -> bool {
        self.severity == Severity::Breaking
    }

    /// Severity descending, then path, then rule id; the rest only breaks ties
    fn sort_key(&self) -> impl Ord + '_ {
        (
            std::cmp::Reverse(self.severity),
            &self.path,
            self.rule.as_str(),
            &self.message,
            &self.old_value,
            &self.new_value,
        )
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {} ({})", self.rule, self.severity, self.message, self.path)?;
        match (&self.old_value, &self.new_value) {
            (Some(old), Some(new)) => write!(f, "\n  - {} -> {}", old, new)?,
            (Some(old), None) => write!(f, "\n  - was {}", old)?,
            (None, Some(new)) => write!(f, "\n  - now {}", new)?,
            (None, None) => {}
        }
        if !self.affected.is_empty() {
            write!(f, "\n  - affects {}", self.affected.join(", "))?;
        }
        Ok(())
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    /// The run was cancelled before every type was analysed
    Unknown,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
            Verdict::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identity of one input snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub label: String,
    pub checksum: Checksum,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<SchemaVersion>,
    pub types: usize,
}

impl SnapshotInfo {
    pub fn of(snapshot: &SchemaSnapshot) -> Self {
        Self {
            label: snapshot.label().to_string(),
            checksum: snapshot.checksum(),
            version: snapshot.version().cloned(),
            types: snapshot.len(),
        }
    }
}

/// Verdict plus every finding, in deterministic order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub verdict: Verdict,
    /// False when the run was cancelled part-way
    pub complete: bool,
    pub findings: Vec<Finding>,
    pub stats: DiffStats,
    pub base: SnapshotInfo,
    pub candidate: SnapshotInfo,
    /// Smallest semantic version bump the change set requires
    pub required_bump: VersionBump,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_check: Option<VersionCheck>,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    pub fn breaking_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_breaking()).count()
    }

    pub fn advisory_count(&self) -> usize {
        self.findings.len() - self.breaking_count()
    }

    pub fn findings_for(&self, rule: RuleId) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.rule == rule)
    }
}

/// Collects findings from every worker and renders the verdict
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    treat_advisory_as_error: bool,
}

impl Aggregator {
    pub fn new(treat_advisory_as_error: bool) -> Self {
        Self {
            treat_advisory_as_error,
        }
    }

    /// Escalate, order, and drop repeated (rule id, path) pairs.
    ///
    /// Sorting first means the surviving duplicate is the most severe one.
    pub fn consolidate(&self, mut findings: Vec<Finding>) -> Vec<Finding> {
        if self.treat_advisory_as_error {
            for finding in findings.iter_mut().filter(|f| f.severity == Severity::Advisory) {
                finding.severity = Severity::Breaking;
                finding.escalated = true;
            }
        }

        findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut seen = BTreeSet::new();
        findings.retain(|f| seen.insert((f.rule, f.path.clone())));
        findings
    }

    pub fn verdict(&self, findings: &[Finding], complete: bool) -> Verdict {
        if !complete {
            Verdict::Unknown
        } else if findings.iter().any(Finding::is_breaking) {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }

    /// Annotate breaking findings with the messages that embed their type
    pub fn annotate(findings: &mut [Finding], base: &TypeGraph, candidate: &TypeGraph, in_candidate: impl Fn(&str) -> bool) {
        for finding in findings.iter_mut().filter(|f| f.is_breaking()) {
            let graph = if in_candidate(&finding.type_name) { candidate } else { base };
            finding.affected = graph.embedders(&finding.type_name).into_iter().collect();
        }
    }

    pub fn finish(
        &self,
        findings: Vec<Finding>,
        stats: DiffStats,
        complete: bool,
        base: &SchemaSnapshot,
        candidate: &SchemaSnapshot,
    ) -> Report {
        let mut findings = self.consolidate(findings);
        Self::annotate(
            &mut findings,
            &TypeGraph::build(base),
            &TypeGraph::build(candidate),
            |name| candidate.get(name).is_some(),
        );
        let verdict = self.verdict(&findings, complete);

        let has_breaking = findings.iter().any(|f| f.is_breaking() && !f.escalated);
        let required_bump = VersionBump::required(has_breaking, stats.added > 0, stats.has_changes());
        let version_check = match (base.version(), candidate.version()) {
            (Some(b), Some(c)) => Some(VersionCheck::new(b, c, required_bump)),
            _ => None,
        };

        Report {
            verdict,
            complete,
            findings,
            stats,
            base: SnapshotInfo::of(base),
            candidate: SnapshotInfo::of(candidate),
            required_bump,
            version_check,
            generated_at: Utc::now(),
        }
    }
}

/// Output format for a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    /// One JSON record per line: findings, then a summary record
    Jsonl,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" => Ok(Self::Jsonl),
            other => Err(format!("unknown output format '{}' (text, json, jsonl)", other)),
        }
    }
}

pub fn render(report: &Report, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => serde_json::to_string_pretty(report),
        OutputFormat::Jsonl => render_jsonl(report),
    }
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "lowercase")]
enum Record<'a> {
    Finding(&'a Finding),
    Summary {
        verdict: Verdict,
        complete: bool,
        breaking: usize,
        advisory: usize,
        stats: DiffStats,
        base: &'a Checksum,
        candidate: &'a Checksum,
        required_bump: VersionBump,
        #[serde(skip_serializing_if = "Option::is_none")]
        version_check: Option<&'a VersionCheck>,
        generated_at: DateTime<Utc>,
    },
}

pub fn render_jsonl(report: &Report) -> serde_json::Result<String> {
    let mut out = String::new();
    for finding in &report.findings {
        out.push_str(&serde_json::to_string(&Record::Finding(finding))?);
        out.push('\n');
    }
    let summary = Record::Summary {
        verdict: report.verdict,
        complete: report.complete,
        breaking: report.breaking_count(),
        advisory: report.advisory_count(),
        stats: report.stats,
        base: &report.base.checksum,
        candidate: &report.candidate.checksum,
        required_bump: report.required_bump,
        version_check: report.version_check.as_ref(),
        generated_at: report.generated_at,
    };
    out.push_str(&serde_json::to_string(&summary)?);
    out.push('\n');
    Ok(out)
}

pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════════════");
    let _ = writeln!(out, "                   SCHEMA COMPATIBILITY REPORT                     ");
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════════════");
    let _ = writeln!(out, "base:      {} ({})", report.base.label, report.base.checksum.short());
    let _ = writeln!(out, "candidate: {} ({})", report.candidate.label, report.candidate.checksum.short());
    let _ = writeln!(out);

    let (breaking, advisory): (Vec<_>, Vec<_>) = report.findings.iter().partition(|f| f.is_breaking());
    if !breaking.is_empty() {
        let _ = writeln!(out, "BREAKING ({}):", breaking.len());
        for finding in breaking {
            let _ = writeln!(out, "  {}", finding.to_string().replace('\n', "\n  "));
        }
        let _ = writeln!(out);
    }
    if !advisory.is_empty() {
        let _ = writeln!(out, "ADVISORY ({}):", advisory.len());
        for finding in advisory {
            let _ = writeln!(out, "  {}", finding.to_string().replace('\n', "\n  "));
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "SUMMARY:");
    let _ = writeln!(out, "  Added:     {}", report.stats.added);
    let _ = writeln!(out, "  Removed:   {}", report.stats.removed);
    let _ = writeln!(out, "  Modified:  {}", report.stats.modified);
    let _ = writeln!(out, "  Required bump: {}", report.required_bump);
    if let Some(check) = &report.version_check {
        let _ = writeln!(
            out,
            "  Declared bump: {} ({} -> {}){}",
            check.declared,
            check.base,
            check.candidate,
            if check.satisfied { "" } else { " [INSUFFICIENT]" }
        );
    }
    if !report.complete {
        let _ = writeln!(out, "  Run cancelled before every type was analysed");
    }
    let _ = writeln!(out, "  Verdict:   {}", report.verdict.to_string().to_uppercase());
    out
}
