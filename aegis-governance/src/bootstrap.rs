//! Assembles an [`EnforcementEngine`] from configuration.

use std::sync::Arc;

use aegis_analysis::{AdapterError, ModelAnalysisDelegate, OllamaAdapter, OllamaConfig};
use aegis_audit::{FileAuditJournal, JournalError};
use aegis_config::{ConfigError, GovernanceConfig};
use aegis_policy::{AnalysisDelegate, AuditSink, EnforcementEngine, PolicyStore};
use thiserror::Error;
use tracing::info;

/// Failures raised while wiring the engine.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Settings are out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The analysis client could not be created.
    #[error("analysis provider: {0}")]
    Analysis(#[from] AdapterError),
    /// The audit journal could not be opened.
    #[error("audit journal: {0}")]
    Journal(#[from] JournalError),
}

/// Builds the analysis delegate described by `config`, or `None` when
/// analysis is disabled.
///
/// # Errors
///
/// Returns [`BootstrapError::Analysis`] for an unusable base URL.
pub fn analysis_delegate(
    config: &GovernanceConfig,
) -> Result<Option<Arc<dyn AnalysisDelegate>>, BootstrapError> {
    if !config.analysis.enabled {
        return Ok(None);
    }
    let ollama = OllamaConfig::new(&config.analysis.model)
        .with_base_url(&config.analysis.base_url)?
        .with_request_timeout(config.analysis_request_timeout());
    let adapter = OllamaAdapter::new(ollama)?;
    Ok(Some(Arc::new(ModelAnalysisDelegate::new(Arc::new(adapter)))))
}

/// Opens the audit journal described by `config`, or `None` when no journal
/// path is set.
///
/// # Errors
///
/// Returns [`BootstrapError::Journal`] when the file cannot be opened.
pub async fn audit_sink(
    config: &GovernanceConfig,
) -> Result<Option<Arc<dyn AuditSink>>, BootstrapError> {
    let Some(path) = &config.audit.journal_path else {
        return Ok(None);
    };
    let journal = FileAuditJournal::open(path)
        .await?
        .with_redaction(config.audit.redact_content);
    Ok(Some(Arc::new(journal)))
}

/// Builds an engine over `store` using `config`.
///
/// # Errors
///
/// Returns [`BootstrapError`] when settings are invalid or a collaborator
/// cannot be created.
pub async fn build_engine(
    config: &GovernanceConfig,
    store: Arc<dyn PolicyStore>,
) -> Result<EnforcementEngine, BootstrapError> {
    let mut builder = EnforcementEngine::builder(store).settings(config.engine_settings()?);
    if let Some(analysis) = analysis_delegate(config)? {
        builder = builder.analysis(analysis);
    }
    if let Some(sink) = audit_sink(config).await? {
        builder = builder.audit_sink(sink);
    }

    info!(
        analysis = config.analysis.enabled,
        model = %config.analysis.model,
        journal = ?config.audit.journal_path,
        "enforcement engine assembled"
    );
    Ok(builder.build())
}
