//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::runtime::{DiagnosticsConfig, RuntimeConfig, SchedulerConfig};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = "pledge.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.pledge/config.toml) - lowest priority
/// 2. Project config (./pledge.toml) - overrides global
/// 3. Environment variables (PLEDGE_*) - highest priority
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Effective runtime configuration
    pub runtime: RuntimeConfig,

    /// Project root directory (where pledge.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use an explicit global config file instead of ~/.pledge/config.toml
    pub fn with_global_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find pledge.toml, merges it over the
    /// global config, then applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        self.assemble(project_root, project_config)
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = RuntimeConfig::load_from_file(config_path)?;
        let project_root = config_path.parent().map(|p| p.to_path_buf());
        self.assemble(project_root, project_config)
    }

    fn assemble(
        &mut self,
        project_root: Option<PathBuf>,
        project_config: RuntimeConfig,
    ) -> ConfigResult<Config> {
        let mut runtime = self.load_global_config()?;
        runtime.merge(&project_config);
        apply_env_overrides(&mut runtime)?;
        runtime.validate()?;

        Ok(Config {
            runtime,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, RuntimeConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                let project_config = RuntimeConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, RuntimeConfig::default())),
            }
        }
    }

    /// Load global configuration, defaulting when the file is absent
    fn load_global_config(&mut self) -> ConfigResult<RuntimeConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match Self::global_config_path() {
                Ok(path) => {
                    self.global_config_path = Some(path.clone());
                    path
                }
                // No home directory means no global layer
                Err(ConfigError::HomeNotFound) => return Ok(RuntimeConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(RuntimeConfig::default());
        }

        RuntimeConfig::load_from_file(&path)
    }

    /// Get the global config file path (~/.pledge/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        Ok(Self::global_config_dir()?.join("config.toml"))
    }

    /// Get the global configuration directory (~/.pledge)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".pledge"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply environment variable overrides
///
/// - PLEDGE_MICROTASK_BUDGET=<n>
/// - PLEDGE_LOG=<filter directives>
fn apply_env_overrides(config: &mut RuntimeConfig) -> ConfigResult<()> {
    if let Ok(budget) = env::var("PLEDGE_MICROTASK_BUDGET") {
        let parsed = budget
            .trim()
            .parse::<usize>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "PLEDGE_MICROTASK_BUDGET".to_string(),
                reason: format!("'{}' is not a count: {}", budget, e),
            })?;
        config.scheduler.microtask_budget = Some(parsed);
    }

    if let Ok(filter) = env::var("PLEDGE_LOG") {
        if !filter.trim().is_empty() {
            config.diagnostics.log_filter = Some(filter);
        }
    }

    Ok(())
}

impl Config {
    /// Scheduler section of the effective configuration
    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.runtime.scheduler
    }

    /// Diagnostics section of the effective configuration
    pub fn diagnostics(&self) -> &DiagnosticsConfig {
        &self.runtime.diagnostics
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if a pledge.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_CONFIG_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn isolated_loader(home: &TempDir) -> ConfigLoader {
        ConfigLoader::with_global_path(home.path().join("config.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let home = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[scheduler]\nmicrotask_budget = 32\n");

        let mut loader = isolated_loader(&home);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.scheduler().microtask_budget(), 32);
        assert!(config.is_project());
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let home = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[diagnostics]\nlog_filter = \"debug\"\n");

        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let mut loader = isolated_loader(&home);
        let config = loader.load_from_directory(&sub_dir).unwrap();

        assert_eq!(config.diagnostics().log_filter(), "debug");
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_env_override_budget() {
        let home = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[scheduler]\nmicrotask_budget = 32\n");

        env::set_var("PLEDGE_MICROTASK_BUDGET", "7");

        let mut loader = isolated_loader(&home);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        env::remove_var("PLEDGE_MICROTASK_BUDGET");

        assert_eq!(config.scheduler().microtask_budget(), 7);
    }

    #[test]
    #[serial]
    fn test_env_override_budget_not_a_number() {
        let home = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();

        env::set_var("PLEDGE_MICROTASK_BUDGET", "lots");

        let mut loader = isolated_loader(&home);
        let result = loader.load_from_directory(temp_dir.path());

        env::remove_var("PLEDGE_MICROTASK_BUDGET");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
