//! Runtime Configuration (pledge.toml, ~/.pledge/config.toml)
//!
//! Both files share one schema. The global file holds user defaults, the
//! project file overrides them field by field.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Microtasks a single checkpoint may run before the scheduler gives up.
pub const DEFAULT_MICROTASK_BUDGET: usize = 100_000;

/// Log filter used when neither the config nor `PLEDGE_LOG` sets one.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging settings
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Upper bound on microtasks run by one checkpoint (default: 100000)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub microtask_budget: Option<usize>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// `tracing` filter directives, e.g. "pledge_runtime=trace" (default: "warn")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,

    /// Include event targets in log lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_target: Option<bool>,
}

impl SchedulerConfig {
    /// Effective microtask budget
    pub fn microtask_budget(&self) -> usize {
        self.microtask_budget.unwrap_or(DEFAULT_MICROTASK_BUDGET)
    }
}

impl DiagnosticsConfig {
    /// Effective log filter
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    pub fn with_target(&self) -> bool {
        self.with_target.unwrap_or(false)
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.microtask_budget == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.microtask_budget".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if let Some(filter) = &self.diagnostics.log_filter {
            if filter.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "diagnostics.log_filter".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Merge another config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &RuntimeConfig) {
        if other.scheduler.microtask_budget.is_some() {
            self.scheduler.microtask_budget = other.scheduler.microtask_budget;
        }
        if other.diagnostics.log_filter.is_some() {
            self.diagnostics.log_filter = other.diagnostics.log_filter.clone();
        }
        if other.diagnostics.with_target.is_some() {
            self.diagnostics.with_target = other.diagnostics.with_target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.scheduler.microtask_budget(), DEFAULT_MICROTASK_BUDGET);
        assert_eq!(config.diagnostics.log_filter(), "warn");
        assert!(!config.diagnostics.with_target());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[scheduler]
microtask_budget = 64

[diagnostics]
log_filter = "pledge_runtime=trace"
with_target = true
"#;

        let config: RuntimeConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.microtask_budget(), 64);
        assert_eq!(config.diagnostics.log_filter(), "pledge_runtime=trace");
        assert!(config.diagnostics.with_target());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let config = RuntimeConfig {
            scheduler: SchedulerConfig {
                microtask_budget: Some(0),
            },
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_blank_filter_rejected() {
        let config = RuntimeConfig {
            diagnostics: DiagnosticsConfig {
                log_filter: Some("  ".to_string()),
                with_target: None,
            },
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result: Result<RuntimeConfig, _> = toml::from_str("[reactor]\nthreads = 4\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = RuntimeConfig {
            scheduler: SchedulerConfig {
                microtask_budget: Some(10),
            },
            diagnostics: DiagnosticsConfig {
                log_filter: Some("info".to_string()),
                with_target: Some(true),
            },
        };
        let override_config = RuntimeConfig {
            diagnostics: DiagnosticsConfig {
                log_filter: Some("debug".to_string()),
                with_target: None,
            },
            ..Default::default()
        };

        base.merge(&override_config);
        assert_eq!(base.scheduler.microtask_budget(), 10);
        assert_eq!(base.diagnostics.log_filter(), "debug");
        assert!(base.diagnostics.with_target());
    }
}
