//! Configuration error types.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration field a validation error is attached to.
///
/// Displayed with the camel-case names operators see in documentation and
/// error messages (`directoryUrl`, `renewBeforeSeconds`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    DirectoryUrl,
    AllowIdentifiers,
    Name,
    RenewBeforeSeconds,
    RenewBeforeFraction,
    CheckEverySeconds,
    TosAcceptors,
    WorkDir,
    CacheDir,
}

impl ConfigField {
    /// Name of the field as it appears in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigField::DirectoryUrl => "directoryUrl",
            ConfigField::AllowIdentifiers => "allowIdentifiers",
            ConfigField::Name => "name",
            ConfigField::RenewBeforeSeconds => "renewBeforeSeconds",
            ConfigField::RenewBeforeFraction => "renewBeforeFraction",
            ConfigField::CheckEverySeconds => "checkEverySeconds",
            ConfigField::TosAcceptors => "tosAcceptors",
            ConfigField::WorkDir => "workDir",
            ConfigField::CacheDir => "cacheDir",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration value failed validation.
#[derive(Debug, Clone, Error)]
#[error("misconfigured '{field}': {reason}")]
pub struct ConfigurationError {
    /// The offending field
    pub field: ConfigField,
    /// Human readable explanation
    pub reason: String,
}

impl ConfigurationError {
    pub fn new(field: ConfigField, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading configuration sources.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid ACME_* environment: {0}")]
    Environment(#[from] envy::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names_the_field() {
        let err = ConfigurationError::new(ConfigField::RenewBeforeFraction, "must be positive");
        assert_eq!(
            err.to_string(),
            "misconfigured 'renewBeforeFraction': must be positive"
        );
    }
}
