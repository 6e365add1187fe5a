//! Controller configuration.
//!
//! Loaded from a JSON file (every field optional) and overridden by the
//! binary's command-line flags.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::BackoffConfig;
use crate::runtime::ObjectMeta;

/// Per-object override of [`AdoptionPolicy`].
pub const ADOPTION_POLICY_ANNOTATION: &str = "ack.runtime/adoption-policy";
/// Per-object override of [`DeletionPolicy`].
pub const DELETION_POLICY_ANNOTATION: &str = "ack.runtime/deletion-policy";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What to do with a pre-existing remote resource that is not tagged as ours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdoptionPolicy {
    /// Report an ownership conflict and leave it alone.
    #[default]
    Never,
    /// Tag it and manage it from now on.
    Adopt,
}

/// What deleting the control-plane object does to the remote resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    #[default]
    Delete,
    /// Untag the remote resource and keep it.
    Retain,
}

/// What to do when a resource this controller created disappears remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    #[default]
    Recreate,
    /// Mark the object Terminal.
    Fail,
}

impl FromStr for AdoptionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "adopt" => Ok(Self::Adopt),
            other => Err(ConfigError::Invalid(format!("unknown adoption policy: {}", other))),
        }
    }
}

impl FromStr for DeletionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "retain" => Ok(Self::Retain),
            other => Err(ConfigError::Invalid(format!("unknown deletion policy: {}", other))),
        }
    }
}

impl FromStr for MissingPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "recreate" => Ok(Self::Recreate),
            "fail" => Ok(Self::Fail),
            other => Err(ConfigError::Invalid(format!("unknown missing policy: {}", other))),
        }
    }
}

impl AdoptionPolicy {
    /// The annotation wins over the configured default; unparsable values
    /// are ignored.
    pub fn for_object(self, meta: &ObjectMeta) -> Self {
        meta.annotation(ADOPTION_POLICY_ANNOTATION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(self)
    }
}

impl DeletionPolicy {
    pub fn for_object(self, meta: &ObjectMeta) -> Self {
        meta.annotation(DELETION_POLICY_ANNOTATION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Written into ownership tags; must differ between controller instances.
    pub controller_id: String,
    /// Concurrent workers per resource kind.
    pub workers: usize,
    /// Mutations per reconciliation before giving up until the next attempt.
    pub max_sync_passes: u32,
    /// Failed attempts per key before escalating to Terminal (0 = unlimited).
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
    /// Requeue interval for converged resources (drift detection).
    pub resync_period_secs: u64,
    /// Requeue interval for resources in ownership conflict.
    pub conflict_recheck_secs: u64,
    pub adoption: AdoptionPolicy,
    pub deletion_policy: DeletionPolicy,
    pub remote_missing: MissingPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_id: "ack-runtime".to_string(),
            workers: 4,
            max_sync_passes: 3,
            max_attempts: 10,
            backoff: BackoffConfig::default(),
            resync_period_secs: 36_000,
            conflict_recheck_secs: 60,
            adoption: AdoptionPolicy::default(),
            deletion_policy: DeletionPolicy::default(),
            remote_missing: MissingPolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller_id.is_empty() {
            return Err(ConfigError::Invalid("controller_id must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.max_sync_passes == 0 {
            return Err(ConfigError::Invalid("max_sync_passes must be at least 1".into()));
        }
        self.backoff.validate().map_err(ConfigError::Invalid)
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    pub fn conflict_recheck(&self) -> Duration {
        Duration::from_secs(self.conflict_recheck_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 4);
        assert_eq!(config.remote_missing, MissingPolicy::Recreate);
    }

    #[test]
    fn test_from_file_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"controller_id": "ctl-a", "workers": 8, "adoption": "adopt",
                "backoff": {{"initial_delay_ms": 100}}}}"#
        )
        .unwrap();

        let config = ControllerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.controller_id, "ctl-a");
        assert_eq!(config.workers, 8);
        assert_eq!(config.adoption, AdoptionPolicy::Adopt);
        assert_eq!(config.backoff.initial_delay_ms, 100);
        assert_eq!(config.max_sync_passes, 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = ControllerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"deletion_policy": "shred"}}"#).unwrap();
        assert!(matches!(
            ControllerConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_annotation_overrides_policy() {
        let mut meta = ObjectMeta::new("default", "b1");
        assert_eq!(AdoptionPolicy::Never.for_object(&meta), AdoptionPolicy::Never);

        meta.annotations
            .insert(ADOPTION_POLICY_ANNOTATION.into(), "Adopt".into());
        meta.annotations
            .insert(DELETION_POLICY_ANNOTATION.into(), "retain".into());
        assert_eq!(AdoptionPolicy::Never.for_object(&meta), AdoptionPolicy::Adopt);
        assert_eq!(DeletionPolicy::Delete.for_object(&meta), DeletionPolicy::Retain);

        meta.annotations
            .insert(DELETION_POLICY_ANNOTATION.into(), "bogus".into());
        assert_eq!(DeletionPolicy::Delete.for_object(&meta), DeletionPolicy::Delete);
    }
}
