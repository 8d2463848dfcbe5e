//! Configuration schema and defaults.

use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;
use std::time::Duration;

use aegis_policy::{DEFAULT_MAX_PENDING, EngineSettings};
use aegis_telemetry::TracingSettings;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Bound on each analysis delegate call.
    pub analysis_timeout_ms: u64,
    /// Maximum concurrent audit sink calls.
    pub audit_concurrency: usize,
    /// Delivery attempts per audit record.
    pub audit_max_attempts: u32,
    /// Pause between audit delivery attempts.
    pub audit_retry_backoff_ms: u64,
    /// Audit records allowed to wait for delivery; further records are dropped.
    pub audit_max_pending: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            analysis_timeout_ms: 5_000,
            audit_concurrency: 16,
            audit_max_attempts: 3,
            audit_retry_backoff_ms: 100,
            audit_max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// Model-backed analysis provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// When `false`, analysis rules fail as "analysis unavailable".
    pub enabled: bool,
    /// Ollama daemon URL.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// HTTP round-trip bound.
    pub request_timeout_ms: u64,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:11434/".to_owned(),
            model: "llama3.2".to_owned(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Audit journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// NDJSON journal location; no journal when unset.
    pub journal_path: Option<PathBuf>,
    /// Replace evaluated content with a marker in journal records.
    pub redact_content: bool,
}

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Engine tunables.
    pub engine: EngineSection,
    /// Analysis provider.
    pub analysis: AnalysisSection,
    /// Audit journal.
    pub audit: AuditSection,
    /// Log output.
    pub telemetry: TracingSettings,
}

impl GovernanceConfig {
    /// Checks ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.analysis_timeout_ms == 0 {
            return Err(ConfigError::invalid("engine.analysis_timeout_ms", "must be > 0"));
        }
        if self.engine.audit_concurrency == 0 {
            return Err(ConfigError::invalid("engine.audit_concurrency", "must be > 0"));
        }
        if self.engine.audit_max_attempts == 0 {
            return Err(ConfigError::invalid("engine.audit_max_attempts", "must be > 0"));
        }
        if self.engine.audit_max_pending < self.engine.audit_concurrency {
            return Err(ConfigError::invalid(
                "engine.audit_max_pending",
                "must be >= engine.audit_concurrency",
            ));
        }
        if self.analysis.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("analysis.request_timeout_ms", "must be > 0"));
        }
        let base_url = self.analysis.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "analysis.base_url",
                format!("`{base_url}` must start with http:// or https://"),
            ));
        }
        if self.analysis.model.trim().is_empty() {
            return Err(ConfigError::invalid("analysis.model", "cannot be empty"));
        }
        if self.telemetry.filter.trim().is_empty() {
            return Err(ConfigError::invalid("telemetry.filter", "cannot be empty"));
        }
        Ok(())
    }

    /// Converts the engine section into engine settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a limit is zero.
    pub fn engine_settings(&self) -> ConfigResult<EngineSettings> {
        let concurrency = NonZeroUsize::new(self.engine.audit_concurrency)
            .ok_or_else(|| ConfigError::invalid("engine.audit_concurrency", "must be > 0"))?;
        let attempts = NonZeroU32::new(self.engine.audit_max_attempts)
            .ok_or_else(|| ConfigError::invalid("engine.audit_max_attempts", "must be > 0"))?;
        let pending = NonZeroUsize::new(self.engine.audit_max_pending)
            .ok_or_else(|| ConfigError::invalid("engine.audit_max_pending", "must be > 0"))?;
        let mut settings = EngineSettings::new(
            Duration::from_millis(self.engine.analysis_timeout_ms),
            concurrency,
            attempts,
            Duration::from_millis(self.engine.audit_retry_backoff_ms),
        );
        settings.dispatch = settings.dispatch.with_max_pending(pending);
        Ok(settings)
    }

    /// Returns the analysis HTTP round-trip bound.
    #[must_use]
    pub const fn analysis_request_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GovernanceConfig::default();
        config.validate().unwrap();

        let settings = config.engine_settings().unwrap();
        assert_eq!(settings.analysis_timeout, Duration::from_secs(5));
        assert_eq!(settings.dispatch.max_concurrency().get(), 16);
        assert_eq!(settings.dispatch.max_attempts().get(), 3);
        assert_eq!(settings.dispatch.max_pending().get(), DEFAULT_MAX_PENDING);
        assert!(!config.analysis.enabled);
        assert_eq!(config.analysis.model, "llama3.2");
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = GovernanceConfig::default();
        config.engine.audit_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "engine.audit_concurrency", .. })
        ));
        assert!(config.engine_settings().is_err());
    }

    #[test]
    fn backlog_must_cover_concurrency() {
        let mut config = GovernanceConfig::default();
        config.engine.audit_concurrency = 8;
        config.engine.audit_max_pending = 4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "engine.audit_max_pending", .. })
        ));

        config.engine.audit_max_pending = 8;
        config.validate().unwrap();
        assert_eq!(config.engine_settings().unwrap().dispatch.max_pending().get(), 8);
    }

    #[test]
    fn base_url_needs_scheme() {
        let mut config = GovernanceConfig::default();
        config.analysis.base_url = "localhost:11434".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "analysis.base_url", .. })
        ));
    }
}
