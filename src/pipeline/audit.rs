//! Run accounting and the audit recorder.
//!
//! `RunLedger` is the per-invocation accumulator: every recipient in a slice
//! passes through exactly one of `record_success`, `record_failure` or
//! `record_skip`, so `processed == successful + failed + skipped` holds by
//! construction. `AuditRecorder` persists the finished run and never
//! propagates storage errors to the caller.

use std::sync::Arc;

use tracing::{debug, error};

use crate::pipeline::types::{
    AuditLog, FailureKind, FailureRecord, RunRecord, RunResult, RunStatus, SkipReason,
};

/// Mutable accumulator owned by a single run.
#[derive(Debug, Default)]
pub struct RunLedger {
    processed: usize,
    successful: usize,
    failed: usize,
    skipped: usize,
    errors: Vec<String>,
    failures: Vec<FailureRecord>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, recipient_id: &str) {
        self.processed += 1;
        self.successful += 1;
        debug!(recipient = %recipient_id, "Recipient delivered");
    }

    /// Terminal failure for a recipient.
    pub fn record_failure(
        &mut self,
        recipient_id: &str,
        kind: FailureKind,
        detail: impl Into<String>,
    ) {
        let detail = detail.into();
        self.processed += 1;
        self.failed += 1;
        self.errors
            .push(format!("[{}] {}: {}", kind.label(), recipient_id, detail));
        self.failures.push(FailureRecord {
            kind,
            recipient_id: Some(recipient_id.to_string()),
            topic: None,
            detail,
        });
    }

    /// Terminal skip for a recipient.
    pub fn record_skip(&mut self, recipient_id: &str, reason: &SkipReason) {
        self.processed += 1;
        self.skipped += 1;
        self.errors
            .push(format!("[skipped:{}] {}: {}", reason.label(), recipient_id, reason));
    }

    /// Non-terminal failure (one topic, or the slice-wide content fetch).
    /// Does not touch the counters.
    pub fn note_failure(&mut self, record: FailureRecord) {
        let scope = match (&record.recipient_id, &record.topic) {
            (Some(r), Some(t)) => format!("{r}/{t}"),
            (Some(r), None) => r.clone(),
            (None, Some(t)) => t.clone(),
            (None, None) => "slice".to_string(),
        };
        self.errors
            .push(format!("[{}] {}: {}", record.kind.label(), scope, record.detail));
        self.failures.push(record);
    }

    /// Freeze the ledger into its immutable result plus granular failures.
    pub fn finish(self) -> (RunResult, Vec<FailureRecord>) {
        let status = RunStatus::from_counts(self.successful, self.failed);
        let result = RunResult {
            processed: self.processed,
            successful: self.successful,
            failed: self.failed,
            skipped: self.skipped,
            errors: self.errors,
            status,
        };
        (result, self.failures)
    }
}

/// Writes run records to the audit log, swallowing storage errors.
#[derive(Clone)]
pub struct AuditRecorder {
    log: Arc<dyn AuditLog>,
}

impl AuditRecorder {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }

    /// Persist one run. Returns whether the write landed, for logging only.
    pub async fn record(&self, run: &RunRecord) -> bool {
        match self.log.append_run(run).await {
            Ok(()) => {
                debug!(
                    run_id = %run.run_id,
                    status = %run.result.status,
                    failures = run.failures.len(),
                    "Run recorded"
                );
                true
            }
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "Failed to record run in audit log");
                false
            }
        }
    }
}
