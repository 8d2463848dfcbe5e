//! In-memory sink that keeps every record.

use std::sync::Mutex;

use aegis_policy::{AuditError, AuditSink, EnforcementDecision, EvaluationContext};
use async_trait::async_trait;

use crate::record::AuditRecord;

/// Sink that keeps records in memory, mainly for tests and demos.
#[derive(Debug, Default)]
pub struct CollectingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl CollectingAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record received so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Returns how many records were received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or_default()
    }

    /// Returns `true` when nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for CollectingAuditSink {
    async fn record(
        &self,
        decision: &EnforcementDecision,
        context: &EvaluationContext,
    ) -> Result<(), AuditError> {
        let record = AuditRecord::new(decision, context, false);
        self.records
            .lock()
            .map_err(|_| AuditError::new("collecting sink poisoned"))?
            .push(record);
        Ok(())
    }
}
