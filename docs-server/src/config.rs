//! Configuration for the documentation service.
//!
//! Everything can be loaded from one TOML file. Every section is optional
//! and falls back to its defaults:
//!
//! ```toml
//! docs_dirs = ["docs/guidelines", "docs/patterns", "docs/adr"]
//! watch = true
//!
//! [cache]
//! ttl_ms = 3600000
//!
//! [refresh]
//! debounce_ms = 500
//!
//! [breaker]
//! max_failures = 5
//! reset_timeout_secs = 30
//!
//! [[degradation]]
//! component = "cache-refresh"
//! error_threshold = 3
//! time_window_secs = 60
//! level = "major"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use docserve_directory_watcher::RefreshConfig;
use docserve_documents::{CacheConfig, ScannerConfig};
use docserve_resilience::{CircuitBreakerConfig, DegradationLevel, DegradationRule};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Configuration for the documentation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Documentation directories to scan and watch.
    pub docs_dirs: Vec<PathBuf>,

    /// Whether to watch the directories for changes.
    pub watch: bool,

    /// Scanner configuration.
    pub scanner: ScannerConfig,

    /// Cache configuration.
    pub cache: CacheConfig,

    /// Refresh pipeline configuration.
    pub refresh: RefreshConfig,

    /// Circuit breaker settings shared by every breaker.
    pub breaker: BreakerSettings,

    /// Degradation rules, one per component.
    pub degradation: Vec<DegradationRuleConfig>,
}

impl ServiceConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            docs_dirs: Vec::new(),
            watch: true,
            scanner: ScannerConfig::default(),
            cache: CacheConfig::default(),
            refresh: RefreshConfig::default(),
            breaker: BreakerSettings::default(),
            degradation: DegradationRule::defaults()
                .iter()
                .map(DegradationRuleConfig::from)
                .collect(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw).map_err(|e| match e {
            ServiceError::Config(msg) => ServiceError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ServiceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Add a documentation directory.
    pub fn with_docs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.docs_dirs.push(dir.into());
        self
    }

    /// Enable or disable filesystem watching.
    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the refresh configuration.
    pub fn with_refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }

    /// Set the circuit breaker settings.
    pub fn with_breaker(mut self, breaker: BreakerSettings) -> Self {
        self.breaker = breaker;
        self
    }

    /// Replace the rule for one component.
    pub fn with_degradation_rule(mut self, rule: DegradationRuleConfig) -> Self {
        self.degradation.retain(|r| r.component != rule.component);
        self.degradation.push(rule);
        self
    }

    /// Check values that would otherwise fail later.
    pub fn validate(&self) -> Result<()> {
        if self.breaker.max_failures == 0 {
            return Err(ServiceError::Config(
                "breaker.max_failures must be at least 1".to_string(),
            ));
        }
        if self.breaker.success_threshold == 0 {
            return Err(ServiceError::Config(
                "breaker.success_threshold must be at least 1".to_string(),
            ));
        }
        if self.refresh.channel_capacity == 0 {
            return Err(ServiceError::Config(
                "refresh.channel_capacity must be at least 1".to_string(),
            ));
        }
        if let Some(rule) = self.degradation.iter().find(|r| r.error_threshold == 0) {
            return Err(ServiceError::Config(format!(
                "degradation rule for {} needs an error_threshold of at least 1",
                rule.component
            )));
        }
        Ok(())
    }

    /// Degradation rules to register.
    pub fn degradation_rules(&self) -> Vec<DegradationRule> {
        self.degradation.iter().map(DegradationRule::from).collect()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open a breaker.
    pub max_failures: u32,

    /// Cooldown before an open breaker lets a probe through.
    pub reset_timeout_secs: u64,

    /// Half-open successes needed to close again.
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout_secs: 30,
            success_threshold: 1,
        }
    }
}

impl BreakerSettings {
    /// Breaker configuration for `name`.
    pub fn breaker_config(&self, name: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(name)
            .with_max_failures(self.max_failures)
            .with_reset_timeout(Duration::from_secs(self.reset_timeout_secs))
            .with_success_threshold(self.success_threshold)
    }
}

/// Serializable form of a [`DegradationRule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationRuleConfig {
    /// Component id.
    pub component: String,

    /// Errors within the window that trigger degradation.
    pub error_threshold: usize,

    /// Window length.
    pub time_window_secs: u64,

    /// Level entered when the threshold is reached.
    pub level: DegradationLevel,
}

impl From<&DegradationRule> for DegradationRuleConfig {
    fn from(rule: &DegradationRule) -> Self {
        Self {
            component: rule.component.clone(),
            error_threshold: rule.error_threshold,
            time_window_secs: rule.time_window.as_secs(),
            level: rule.level,
        }
    }
}

impl From<&DegradationRuleConfig> for DegradationRule {
    fn from(config: &DegradationRuleConfig) -> Self {
        DegradationRule::new(
            config.component.clone(),
            config.error_threshold,
            Duration::from_secs(config.time_window_secs),
            config.level,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert!(config.watch);
        assert!(config.docs_dirs.is_empty());
        assert_eq!(config.breaker, BreakerSettings::default());
        assert_eq!(config.refresh.debounce_ms, 500);
        assert_eq!(config.degradation_rules().len(), 4);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ServiceConfig::from_toml(
            r#"
docs_dirs = ["/srv/docs/adr"]
watch = false

[cache]
max_entries = 100

[refresh]
debounce_ms = 250

[breaker]
max_failures = 2

[[degradation]]
component = "resource-lookup"
error_threshold = 4
time_window_secs = 30
level = "critical"
"#,
        )
        .unwrap();

        assert_eq!(config.docs_dirs, vec![PathBuf::from("/srv/docs/adr")]);
        assert!(!config.watch);
        assert_eq!(config.cache.max_entries, Some(100));
        assert_eq!(config.refresh.debounce_ms, 250);
        assert_eq!(config.refresh.channel_capacity, 100);
        assert_eq!(config.breaker.max_failures, 2);
        assert_eq!(config.breaker.reset_timeout_secs, 30);

        let rules = config.degradation_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].level, DegradationLevel::Critical);
        assert_eq!(rules[0].time_window, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = ServiceConfig::from_toml("[breaker]\nmax_failures = 0\n").unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));

        let err = ServiceConfig::from_toml("watch = \"sometimes\"\n").unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn test_with_degradation_rule_replaces() {
        let config = ServiceConfig::new().with_degradation_rule(DegradationRuleConfig {
            component: "cache-refresh".to_string(),
            error_threshold: 1,
            time_window_secs: 10,
            level: DegradationLevel::Critical,
        });

        let rules = config.degradation_rules();
        assert_eq!(rules.len(), 4);
        let refresh = rules
            .iter()
            .find(|r| r.component == "cache-refresh")
            .unwrap();
        assert_eq!(refresh.error_threshold, 1);
        assert_eq!(refresh.level, DegradationLevel::Critical);
    }

    #[test]
    fn test_breaker_config() {
        let config = BreakerSettings::default().breaker_config("resource-lookup");
        assert_eq!(config.name, "resource-lookup");
        assert_eq!(config.max_failures, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(30));
    }
}
