//! Protocol Buffers Compatibility Checker
//!
//! Compares two resolved schema snapshots (a *base* that is already deployed
//! and a *candidate* about to ship) and reports every change that would
//! corrupt, lose or misinterpret data exchanged between peers running
//! different versions.
//!
//! ## Features
//!
//! - **Identity Matching**: Fields pair by tag number, enum values by number, types by qualified name
//! - **Rule Engine**: Independent, pure rules with severity kept as data
//! - **Deterministic Reports**: Same inputs give byte-identical findings, whatever the worker count
//! - **Version Advice**: The smallest semver bump the change set honestly requires
//!
//! ## Pipeline
//!
//! ```text
//! base ──┐                                          ┌─▶ text
//!        ├─▶ matcher ─▶ diff ─▶ rules ─▶ aggregator ┼─▶ json
//! cand ──┘     (once)   (parallel, per type)        └─▶ jsonl
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use proto_compat::{load_snapshot, CheckConfig, Checker, Verdict};
//! use std::path::Path;
//!
//! let base = load_snapshot(Path::new("schemas/v1"))?;
//! let candidate = load_snapshot(Path::new("schemas/v2"))?;
//! let report = Checker::new(CheckConfig::load()?)?.check(&base, &candidate);
//! assert_ne!(report.verdict, Verdict::Fail);
//! # Ok::<(), proto_compat::CompatError>(())
//! ```

pub mod checker;
pub mod checksum;
pub mod config;
pub mod diff;
pub mod error;
pub mod graph;
pub mod loader;
pub mod matcher;
pub mod report;
pub mod rules;
pub mod schema;
mod validate;
pub mod version;

pub use checker::{check, CancellationToken, Checker};
pub use checksum::Checksum;
pub use config::{CheckConfig, IntegerNarrowing};
pub use diff::{diff_pair, ChangeEvent, DiffStats, TypeDiff};
pub use error::{CompatError, Result, RuleError};
pub use loader::load_snapshot;
pub use matcher::match_types;
pub use report::{render, Finding, OutputFormat, Report, Severity, Verdict};
pub use rules::{Rule, RuleId, RuleRegistry};
pub use schema::{
    Cardinality, EnumType, FieldDef, FieldType, MessageType, SchemaSnapshot, SnapshotBuilder, Syntax, TypeDef,
};
pub use version::{SchemaVersion, VersionBump};
