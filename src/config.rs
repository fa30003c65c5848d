//! Checker configuration
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (proto-compat.toml)
//! - Environment variables (PROTO_COMPAT__*)
//!
//! ## Example config file (proto-compat.toml):
//! ```toml
//! field_count_threshold = 150
//! treat_advisory_as_error = false
//! rule_denylist = ["R-FIELD-COUNT"]
//! integer_narrowing = "advisory"
//! workers = 4
//!
//! [severity_overrides]
//! "R-UNRESERVED-REMOVAL" = "breaking"
//! ```
//!
//! Option names are also accepted in camelCase. Unknown options are a
//! configuration error, never silently ignored.

use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::Path;

use crate::error::{CompatError, Result};
use crate::report::Severity;
use crate::rules::RuleId;

/// Options for one compatibility run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    /// Messages growing past this many live fields get an advisory
    #[serde(default = "default_field_count_threshold", alias = "fieldCountThreshold")]
    pub field_count_threshold: usize,

    /// Raise every advisory finding to breaking
    #[serde(default, alias = "treatAdvisoryAsError")]
    pub treat_advisory_as_error: bool,

    /// Run only these rules (empty means all)
    #[serde(default, alias = "ruleAllowlist")]
    pub rule_allowlist: Vec<String>,

    /// Never run these rules
    #[serde(default, alias = "ruleDenylist")]
    pub rule_denylist: Vec<String>,

    /// How integer narrowing such as int64 to int32 is graded
    #[serde(default, alias = "integerNarrowing")]
    pub integer_narrowing: IntegerNarrowing,

    /// Worker threads (defaults to available parallelism)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Per-rule severity remapping
    #[serde(default, alias = "severityOverrides")]
    pub severity_overrides: BTreeMap<String, Severity>,
}

/// Grading of integer narrowing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegerNarrowing {
    #[default]
    Breaking,
    Advisory,
}

/// Canonical option names
const OPTIONS: &[&str] = &[
    "field_count_threshold",
    "treat_advisory_as_error",
    "rule_allowlist",
    "rule_denylist",
    "integer_narrowing",
    "severity_overrides",
    "workers",
];

fn default_field_count_threshold() -> usize {
    200
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            field_count_threshold: default_field_count_threshold(),
            treat_advisory_as_error: false,
            rule_allowlist: Vec::new(),
            rule_denylist: Vec::new(),
            integer_narrowing: IntegerNarrowing::default(),
            workers: None,
            severity_overrides: BTreeMap::new(),
        }
    }
}

/// Map `fieldCountThreshold`, `FIELD_COUNT_THRESHOLD` and friends onto the
/// canonical snake_case name
fn canonical_option(key: &str) -> Option<&'static str> {
    let squash = |s: &str| s.replace('_', "").to_ascii_lowercase();
    let wanted = squash(key);
    OPTIONS.iter().copied().find(|option| squash(option) == wanted)
}

impl CheckConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, adding a specific file on top of the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_locations = [
            "proto-compat.toml",
            ".proto-compat.toml",
            "config/proto-compat.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "proto-compat", "proto-compat") {
            let xdg_config = config_dir.config_dir().join("proto-compat.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("PROTO_COMPAT")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("rule_allowlist")
                .with_list_parse_key("rule_denylist"),
        );

        Self::from_layers(builder.build()?)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;
        Self::from_layers(config)
    }

    /// Canonicalise option names, reject unknown ones, then validate
    fn from_layers(config: Config) -> Result<Self> {
        let mut raw: Vec<_> = config
            .try_deserialize::<HashMap<String, config_crate::Value>>()?
            .into_iter()
            .collect();
        raw.sort_by(|a, b| a.0.cmp(&b.0));

        let mut canonical = Config::builder();
        for (key, value) in raw {
            let option = canonical_option(&key).ok_or_else(|| CompatError::UnknownOption(key.clone()))?;
            canonical = canonical.set_override(option, value)?;
        }

        let parsed: Self = canonical.build()?.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject out-of-range values and unknown rule ids
    pub fn validate(&self) -> Result<()> {
        if self.field_count_threshold == 0 {
            return Err(CompatError::invalid_option("field_count_threshold", "must be at least 1"));
        }
        if self.workers == Some(0) {
            return Err(CompatError::invalid_option("workers", "must be at least 1"));
        }
        for id in self
            .rule_allowlist
            .iter()
            .chain(&self.rule_denylist)
            .chain(self.severity_overrides.keys())
        {
            id.parse::<RuleId>()?;
        }
        Ok(())
    }

    /// Worker count to actually use
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CompatError::invalid_option("config", e.to_string()))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CheckConfig::default();
        assert_eq!(config.field_count_threshold, 200);
        assert!(!config.treat_advisory_as_error);
        assert_eq!(config.integer_narrowing, IntegerNarrowing::Breaking);
        assert!(config.validate().is_ok());
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_toml_with_camel_case_names() {
        let config = CheckConfig::from_toml_str(
            r#"
            fieldCountThreshold = 50
            treat_advisory_as_error = true
            ruleDenylist = ["R-FIELD-COUNT"]
            integer_narrowing = "advisory"
            "#,
        )
        .unwrap();
        assert_eq!(config.field_count_threshold, 50);
        assert!(config.treat_advisory_as_error);
        assert_eq!(config.rule_denylist, vec!["R-FIELD-COUNT".to_string()]);
        assert_eq!(config.integer_narrowing, IntegerNarrowing::Advisory);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = CheckConfig::from_toml_str("max_fields = 10").unwrap_err();
        assert!(matches!(err, CompatError::UnknownOption(ref k) if k == "max_fields"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let err = CheckConfig::from_toml_str("field_count_threshold = 0").unwrap_err();
        assert!(matches!(err, CompatError::InvalidOption { .. }));

        let err = CheckConfig::from_toml_str("rule_allowlist = [\"R-NOT-A-RULE\"]").unwrap_err();
        assert!(matches!(err, CompatError::UnknownRule(_)));
    }

    #[test]
    fn test_explicit_file_layer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("extra.toml");
        std::fs::write(
            &path,
            "workers = 2\nruleAllowlist = [\"R-TAG-REUSE\"]\n\n[severity_overrides]\n\"R-FIELD-COUNT\" = \"breaking\"\n",
        )
        .unwrap();

        let config = CheckConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.rule_allowlist, vec!["R-TAG-REUSE".to_string()]);
        let (rule, severity) = config.severity_overrides.iter().next().unwrap();
        assert_eq!(rule.parse::<RuleId>().unwrap(), RuleId::FieldCount);
        assert_eq!(*severity, Severity::Breaking);

        std::fs::write(&path, "max_fields = 3\n").unwrap();
        let err = CheckConfig::load_from(Some(&path)).unwrap_err();
        assert!(matches!(err, CompatError::UnknownOption(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proto-compat.toml");
        let mut config = CheckConfig::default();
        config.workers = Some(3);
        config
            .severity_overrides
            .insert("R-UNRESERVED-REMOVAL".to_string(), Severity::Breaking);
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("workers = 3"));
        let reloaded = CheckConfig::from_toml_str(&content).unwrap();
        assert_eq!(reloaded.workers, Some(3));
        assert_eq!(reloaded.severity_overrides.len(), 1);
    }
}
