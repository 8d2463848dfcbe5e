//! Newline-delimited JSON audit journal.

use std::path::{Path, PathBuf};

use aegis_policy::{AuditError, AuditSink, EnforcementDecision, EvaluationContext};
use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::JournalResult;
use crate::query::{AuditQuery, AuditSummary};
use crate::record::AuditRecord;

/// Append-only file journal, one [`AuditRecord`] per line.
#[derive(Debug)]
pub struct FileAuditJournal {
    path: PathBuf,
    redact_content: bool,
    file: Mutex<tokio::fs::File>,
}

impl FileAuditJournal {
    /// Opens (or creates) the journal at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors raised while preparing the file.
    pub async fn open(path: impl Into<PathBuf>) -> JournalResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            redact_content: false,
            file: Mutex::new(file),
        })
    }

    /// Replaces evaluated content with a marker in every written record.
    #[must_use]
    pub const fn with_redaction(mut self, redact_content: bool) -> Self {
        self.redact_content = redact_content;
        self
    }

    /// Returns the journal file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Propagates serialization and I/O errors.
    pub async fn append(&self, record: &AuditRecord) -> JournalResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Returns the most recent `limit` records, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors and fails on lines that are not valid records.
    pub async fn tail(&self, limit: usize) -> JournalResult<Vec<AuditRecord>> {
        self.query(&AuditQuery::new().limit(limit)).await
    }

    /// Returns records matching `query`, oldest first. With a limit set only
    /// the most recent matches are kept.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors and fails on lines that are not valid records.
    pub async fn query(&self, query: &AuditQuery) -> JournalResult<Vec<AuditRecord>> {
        if query.max_results() == Some(0) {
            return Ok(Vec::new());
        }

        let mut matches: Vec<AuditRecord> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|record| query.matches(record))
            .collect();
        if let Some(limit) = query.max_results() {
            let skip = matches.len().saturating_sub(limit);
            matches.drain(..skip);
        }
        Ok(matches)
    }

    /// Summarises the records matching `query`.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors and fails on lines that are not valid records.
    pub async fn summary(&self, query: &AuditQuery) -> JournalResult<AuditSummary> {
        let records = self.query(query).await?;
        Ok(records.iter().collect())
    }

    async fn read_all(&self) -> JournalResult<Vec<AuditRecord>> {
        let data = {
            let _writer = self.file.lock().await;
            fs::read(&self.path).await?
        };

        data.split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).map_err(Into::into))
            .collect()
    }

    /// Truncates the journal.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors.
    pub async fn clear(&self) -> JournalResult<()> {
        let mut file = self.file.lock().await;
        file.rewind().await?;
        file.set_len(0).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for FileAuditJournal {
    async fn record(
        &self,
        decision: &EnforcementDecision,
        context: &EvaluationContext,
    ) -> Result<(), AuditError> {
        let record = AuditRecord::new(decision, context, self.redact_content);
        self.append(&record)
            .await
            .map_err(|err| AuditError::new(format!("{}: {err}", self.path.display())))?;
        debug!(log_id = %record.log_id(), path = %self.path.display(), "audit record written");
        Ok(())
    }
}
