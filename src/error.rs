//! Error types for the compatibility checker

use thiserror::Error;

/// Result type for checker operations
pub type Result<T> = std::result::Result<T, CompatError>;

/// Fatal checker errors.
///
/// Input errors abort a run before any finding is produced; configuration
/// errors abort it before any snapshot is read. Nothing partial is reported
/// for either.
#[derive(Error, Debug)]
pub enum CompatError {
    #[error("Invalid snapshot {snapshot}: {message}")]
    InvalidSnapshot { snapshot: String, message: String },

    #[error("Unresolved type reference in snapshot {snapshot}: {from} refers to unknown type {target}")]
    UnresolvedReference {
        snapshot: String,
        from: String,
        target: String,
    },

    #[error("Duplicate type in snapshot {snapshot}: {name}")]
    DuplicateType { snapshot: String, name: String },

    #[error("Duplicate tag in snapshot {snapshot}: {message} declares tag {tag} more than once")]
    DuplicateTag {
        snapshot: String,
        message: String,
        tag: u32,
    },

    #[error("Unknown configuration option: {0}")]
    UnknownOption(String),

    #[error("Invalid value for configuration option {option}: {message}")]
    InvalidOption { option: String, message: String },

    #[error("Unknown rule id: {0}")]
    UnknownRule(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl CompatError {
    pub(crate) fn invalid(snapshot: &str, message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            snapshot: snapshot.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_option(option: &str, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.to_string(),
            message: message.into(),
        }
    }

    /// True for errors raised by the configuration surface.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownOption(_) | Self::InvalidOption { .. } | Self::UnknownRule(_) | Self::Config(_)
        )
    }
}

/// A rule could not classify the entity it was handed.
///
/// Never fatal: the rule engine turns it into an advisory finding for the
/// offending path and keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("no compatibility entry for {old} -> {new}")]
    Unclassifiable { old: String, new: String },

    #[error("type {0} is not present in the snapshot")]
    MissingType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(CompatError::UnknownRule("R-NOPE".into()).is_configuration_error());
        assert!(CompatError::invalid_option("workers", "must be at least 1").is_configuration_error());
        assert!(!CompatError::invalid("base", "bad").is_configuration_error());
    }

    #[test]
    fn test_messages_name_the_entity() {
        let err = CompatError::UnresolvedReference {
            snapshot: "candidate".into(),
            from: "acme.User.profile".into(),
            target: "acme.Profile".into(),
        };
        let text = err.to_string();
        assert!(text.contains("acme.User.profile"));
        assert!(text.contains("acme.Profile"));
    }
}
