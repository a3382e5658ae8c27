//! Digest runner: one invocation of the batch dispatcher, end to end.
//!
//! Flow:
//! 1. Slice the population at the cursor
//! 2. Deduplicate topics, skipping paused / topic-less recipients
//! 3. Fetch content once for the slice, then prepare all recipients in parallel
//! 4. Package each prepared recipient
//! 5. Dispatch serially under the provider rate limit
//! 6. Record the run in the audit log
//! 7. Chain the next invocation if the population is not yet covered

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DigestConfig;
use crate::error::DispatchError;
use crate::pipeline::audit::{AuditRecorder, RunLedger};
use crate::pipeline::continuation::{continue_chain, decide};
use crate::pipeline::dedupe::dedupe_topics;
use crate::pipeline::dispatch::RateLimitedDispatcher;
use crate::pipeline::package::package_digest;
use crate::pipeline::prepare::{PreparedOutcome, Preparer, fetch_slice_content};
use crate::pipeline::types::{
    ArchiveStore, AuditLog, ContentProvider, ContinuationTrigger, DeliveryProvider, RecipientStore,
    RunRecord, RunResult, SkipReason, Summarizer,
};

/// Collaborators the runner depends on.
#[derive(Clone)]
pub struct DigestDeps {
    pub recipients: Arc<dyn RecipientStore>,
    pub content: Arc<dyn ContentProvider>,
    pub summarizer: Arc<dyn Summarizer>,
    pub delivery: Arc<dyn DeliveryProvider>,
    pub archive: Arc<dyn ArchiveStore>,
    pub audit: Arc<dyn AuditLog>,
    pub trigger: Arc<dyn ContinuationTrigger>,
}

/// JSON summary returned by the run entry point.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub message: String,
    pub results: RunResult,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_batch_triggered: Option<bool>,
}

/// A run that aborted before processing any recipient. Carries the report
/// that was recorded for it.
#[derive(Debug, thiserror::Error)]
#[error("digest run aborted: {source}")]
pub struct RunAborted {
    pub report: RunReport,
    #[source]
    pub source: DispatchError,
}

/// Orchestrates one invocation. Holds no state across runs; each call to
/// `run` owns its own ledger.
pub struct DigestRunner {
    config: DigestConfig,
    recipients: Arc<dyn RecipientStore>,
    content: Arc<dyn ContentProvider>,
    preparer: Preparer,
    dispatcher: RateLimitedDispatcher,
    audit: AuditRecorder,
    trigger: Arc<dyn ContinuationTrigger>,
}

impl DigestRunner {
    pub fn new(config: DigestConfig, deps: DigestDeps) -> Self {
        let preparer = Preparer::new(deps.summarizer, config.summary_timeout);
        let dispatcher =
            RateLimitedDispatcher::new(deps.delivery, deps.archive, config.send_interval);
        Self {
            config,
            recipients: deps.recipients,
            content: deps.content,
            preparer,
            dispatcher,
            audit: AuditRecorder::new(deps.audit),
            trigger: deps.trigger,
        }
    }

    /// Process the slice starting at `cursor` (0 when absent).
    pub async fn run(&self, cursor: Option<usize>) -> Result<RunReport, RunAborted> {
        let clock = Instant::now();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cursor = cursor.unwrap_or(0);
        let batch_size = self.config.batch_size;

        info!(%run_id, cursor, batch_size, "Digest run starting");

        let total = match self.recipients.total_eligible_count().await {
            Ok(total) => total,
            Err(e) => return Err(self.abort(run_id, cursor, started_at, clock, e.into()).await),
        };

        if total == 0 || cursor >= total {
            let message = if total == 0 {
                "No eligible recipients; nothing to do".to_string()
            } else {
                format!("Cursor {cursor} is past the end of {total} recipients; nothing to do")
            };
            info!(%run_id, cursor, total, "{message}");
            self.record(run_id, cursor, started_at, RunResult::empty(), Vec::new())
                .await;
            return Ok(RunReport {
                run_id,
                message,
                results: RunResult::empty(),
                execution_time_ms: elapsed_ms(clock),
                remaining: None,
                next_batch_triggered: None,
            });
        }

        let slice = match self
            .recipients
            .list_eligible_recipients(cursor, batch_size)
            .await
        {
            Ok(slice) => slice,
            Err(e) => return Err(self.abort(run_id, cursor, started_at, clock, e.into()).await),
        };

        let mut ledger = RunLedger::new();

        // Phase 0: skip before any work is spent.
        let plan = dedupe_topics(&slice, &self.config, &mut ledger);

        // Phase 1: parallel preparation, joined before anything is sent.
        let (content, fetch_failures) =
            fetch_slice_content(self.content.as_ref(), &plan.topics).await;
        for record in fetch_failures {
            ledger.note_failure(record);
        }
        let prepared = self
            .preparer
            .prepare_slice(plan.eligible, Arc::new(content))
            .await;

        let mut digests = Vec::with_capacity(prepared.len());
        for preparation in prepared {
            for record in preparation.topic_failures {
                ledger.note_failure(record);
            }
            let recipient = preparation.recipient;
            match preparation.outcome {
                PreparedOutcome::Ready(summaries) => {
                    let recipient_id = recipient.id.clone();
                    let topics = recipient.topics.clone();
                    match package_digest(recipient, summaries) {
                        Some(digest) => digests.push(digest),
                        None => ledger.record_skip(
                            &recipient_id,
                            &SkipReason::NoSummariesProduced { topics },
                        ),
                    }
                }
                PreparedOutcome::Skipped(reason) => ledger.record_skip(&recipient.id, &reason),
                PreparedOutcome::Failed { kind, detail } => {
                    ledger.record_failure(&recipient.id, kind, detail)
                }
            }
        }

        // Phase 2: serial delivery.
        let dispatched = self.dispatcher.dispatch(digests, &mut ledger).await;

        let (results, failures) = ledger.finish();
        debug_assert_eq!(results.processed, slice.len());
        self.record(run_id, cursor, started_at, results.clone(), failures)
            .await;

        let continuation = continue_chain(self.trigger.as_ref(), decide(cursor, slice.len(), total));

        let message = format!(
            "Processed {} recipients from cursor {}: {} sent, {} failed, {} skipped",
            results.processed, cursor, results.successful, results.failed, results.skipped
        );
        info!(
            %run_id,
            cursor,
            sent = dispatched.sent,
            delivery_failed = dispatched.failed,
            archive_failures = dispatched.archive_failures,
            failed = results.failed,
            skipped = results.skipped,
            status = %results.status,
            "Digest run finished"
        );

        Ok(RunReport {
            run_id,
            message,
            results,
            execution_time_ms: elapsed_ms(clock),
            remaining: continuation.map(|c| c.remaining),
            next_batch_triggered: continuation.map(|c| c.next_batch_triggered),
        })
    }

    /// Record a fatal pre-processing failure. No continuation is fired.
    async fn abort(
        &self,
        run_id: Uuid,
        cursor: usize,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
        source: DispatchError,
    ) -> RunAborted {
        error!(%run_id, cursor, error = %source, "Digest run aborted before processing");
        let results = RunResult::aborted(source.to_string());
        self.record(run_id, cursor, started_at, results.clone(), Vec::new())
            .await;
        RunAborted {
            report: RunReport {
                run_id,
                message: format!("Digest run failed: {source}"),
                results,
                execution_time_ms: elapsed_ms(clock),
                remaining: None,
                next_batch_triggered: None,
            },
            source,
        }
    }

    async fn record(
        &self,
        run_id: Uuid,
        cursor: usize,
        started_at: chrono::DateTime<Utc>,
        result: RunResult,
        failures: Vec<crate::pipeline::types::FailureRecord>,
    ) {
        let record = RunRecord {
            run_id,
            cursor,
            started_at,
            finished_at: Utc::now(),
            result,
            failures,
        };
        if !self.audit.record(&record).await {
            warn!(%run_id, "Run finished without an audit record");
        }
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    clock.elapsed().as_millis() as u64
}
