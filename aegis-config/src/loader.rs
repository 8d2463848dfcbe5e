//! File loading and environment overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::schema::GovernanceConfig;

/// Overrides the analysis timeout in milliseconds.
pub const ENV_ANALYSIS_TIMEOUT_MS: &str = "AEGIS_ANALYSIS_TIMEOUT_MS";
/// Overrides the audit concurrency limit.
pub const ENV_AUDIT_CONCURRENCY: &str = "AEGIS_AUDIT_CONCURRENCY";
/// Overrides the audit attempt limit.
pub const ENV_AUDIT_MAX_ATTEMPTS: &str = "AEGIS_AUDIT_MAX_ATTEMPTS";
/// Enables or disables model analysis.
pub const ENV_ANALYSIS_ENABLED: &str = "AEGIS_ANALYSIS_ENABLED";
/// Overrides the analysis daemon URL.
pub const ENV_ANALYSIS_BASE_URL: &str = "AEGIS_ANALYSIS_BASE_URL";
/// Overrides the analysis model.
pub const ENV_ANALYSIS_MODEL: &str = "AEGIS_ANALYSIS_MODEL";
/// Sets the audit journal path.
pub const ENV_AUDIT_JOURNAL: &str = "AEGIS_AUDIT_JOURNAL";
/// Enables content redaction in the journal.
pub const ENV_AUDIT_REDACT_CONTENT: &str = "AEGIS_AUDIT_REDACT_CONTENT";
/// Overrides the log filter.
pub const ENV_LOG: &str = "AEGIS_LOG";

impl GovernanceConfig {
    /// Loads `path` (defaults when it does not exist), applies `AEGIS_*`
    /// overrides from the process environment, then validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unreadable files, bad TOML, bad overrides,
    /// and out-of-range settings.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` without overrides or validation. A missing file yields
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`].
    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for values that do not parse.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for values that do not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parsed(&lookup, ENV_ANALYSIS_TIMEOUT_MS)? {
            self.engine.analysis_timeout_ms = value;
        }
        if let Some(value) = parsed(&lookup, ENV_AUDIT_CONCURRENCY)? {
            self.engine.audit_concurrency = value;
        }
        if let Some(value) = parsed(&lookup, ENV_AUDIT_MAX_ATTEMPTS)? {
            self.engine.audit_max_attempts = value;
        }
        if let Some(value) = flag(&lookup, ENV_ANALYSIS_ENABLED)? {
            self.analysis.enabled = value;
        }
        if let Some(value) = lookup(ENV_ANALYSIS_BASE_URL) {
            self.analysis.base_url = value;
        }
        if let Some(value) = lookup(ENV_ANALYSIS_MODEL) {
            self.analysis.model = value;
        }
        if let Some(value) = lookup(ENV_AUDIT_JOURNAL) {
            self.audit.journal_path = (!value.trim().is_empty()).then(|| PathBuf::from(value));
        }
        if let Some(value) = flag(&lookup, ENV_AUDIT_REDACT_CONTENT)? {
            self.audit.redact_content = value;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.telemetry.filter = value;
        }
        Ok(())
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse().map_err(|err: T::Err| ConfigError::InvalidEnv {
                key,
                reason: err.to_string(),
                value: raw,
            })
        })
        .transpose()
}

fn flag<F>(lookup: &F, key: &'static str) -> ConfigResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidEnv {
            key,
            value: raw,
            reason: "expected a boolean".to_owned(),
        }),
    }
}
