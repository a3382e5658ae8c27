//! Shared types for the digest pipeline.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ContentError, DatabaseError, DeliveryError, SummaryError, TriggerError};

// ── Recipients ──────────────────────────────────────────────────────

/// Service level of a recipient. Controls verbosity and topic quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Pro => write!(f, "pro"),
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// A digest subscriber, as handed out by the recipient store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    /// Delivery address.
    pub email: String,
    pub name: Option<String>,
    pub tier: Tier,
    /// Subscribed topics in the order the recipient chose them.
    pub topics: Vec<String>,
    pub paused: bool,
}

// ── Content ─────────────────────────────────────────────────────────

/// One raw content item (article, post) for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Raw items fetched for one topic at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSet {
    pub topic: String,
    pub items: Vec<ContentItem>,
    pub fetched_at: DateTime<Utc>,
}

impl ContentSet {
    pub fn new(topic: impl Into<String>, items: Vec<ContentItem>) -> Self {
        Self {
            topic: topic.into(),
            items,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What a content fetch produced. A requested topic that appears in
/// neither `content` nor `failed` simply had nothing new.
#[derive(Debug, Default)]
pub struct ContentFetch {
    pub content: HashMap<String, ContentSet>,
    /// Topics whose upstream request failed, with the cause.
    pub failed: Vec<(String, ContentError)>,
}

impl ContentFetch {
    /// A fetch in which no topic failed.
    pub fn complete(content: HashMap<String, ContentSet>) -> Self {
        Self {
            content,
            failed: Vec::new(),
        }
    }
}

/// A link back to the content a summary was distilled from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLink {
    pub title: String,
    pub url: String,
}

/// Distilled representation of a `ContentSet`, tagged with its tier variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSummary {
    pub topic: String,
    pub tier: Tier,
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceLink>,
}

/// A recipient's assembled digest, ready for delivery.
#[derive(Debug, Clone)]
pub struct PreparedDigest {
    pub recipient: Recipient,
    /// Summaries in the recipient's subscription order.
    pub summaries: Vec<TopicSummary>,
    pub tier: Tier,
    pub subject: String,
    pub body: String,
}

impl PreparedDigest {
    /// Topic names carried by this digest, in order.
    pub fn topics(&self) -> Vec<String> {
        self.summaries.iter().map(|s| s.topic.clone()).collect()
    }
}

/// Provider acknowledgement of a successful send.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    pub provider_id: Option<String>,
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Failure category, kept distinct so systemic outages stand out from
/// recipient-specific problems in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FetchError,
    SummaryError,
    DeliveryError,
    Unknown,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FetchError => "fetch_error",
            Self::SummaryError => "summary_error",
            Self::DeliveryError => "delivery_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch_error" => Ok(Self::FetchError),
            "summary_error" => Ok(Self::SummaryError),
            // Older rows and some providers call it email_error.
            "delivery_error" | "email_error" => Ok(Self::DeliveryError),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown failure kind: {other}")),
        }
    }
}

/// Why a recipient was skipped. Skips are not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    NoTopics,
    /// None of the recipient's topics had any content this run.
    NoContent { topics: Vec<String> },
    /// Every attempted summarization failed or timed out.
    NoSummariesProduced { topics: Vec<String> },
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::NoTopics => "no-topics",
            Self::NoContent { .. } => "no-content",
            Self::NoSummariesProduced { .. } => "no-summaries-produced",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paused => write!(f, "recipient has paused delivery"),
            Self::NoTopics => write!(f, "recipient has no topics"),
            Self::NoContent { topics } => {
                write!(f, "no content found for topics: {}", topics.join(", "))
            }
            Self::NoSummariesProduced { topics } => {
                write!(f, "no summaries produced for topics: {}", topics.join(", "))
            }
        }
    }
}

/// A granular failure row for the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub recipient_id: Option<String>,
    pub topic: Option<String>,
    pub detail: String,
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    /// `Failed` only when nothing was delivered and something failed.
    /// Skips never degrade the status.
    pub fn from_counts(successful: usize, failed: usize) -> Self {
        if successful == 0 && failed > 0 {
            Self::Failed
        } else {
            Self::Success
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Final accounting for one invocation. Built once by `RunLedger::finish`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Failures and skips in the order they happened.
    pub errors: Vec<String>,
    pub status: RunStatus,
}

impl RunResult {
    /// Result for a run that did nothing (empty population or slice).
    pub fn empty() -> Self {
        Self {
            processed: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            status: RunStatus::Success,
        }
    }

    /// Result for a run that aborted before touching any recipient.
    pub fn aborted(detail: impl Into<String>) -> Self {
        Self {
            errors: vec![format!("[fatal] {}", detail.into())],
            status: RunStatus::Failed,
            ..Self::empty()
        }
    }
}

/// Everything the audit log persists for one invocation.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub cursor: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: RunResult,
    pub failures: Vec<FailureRecord>,
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Source of recipients, paged by a stable ordering.
#[async_trait]
pub trait RecipientStore: Send + Sync {
    async fn list_eligible_recipients(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Recipient>, DatabaseError>;

    async fn total_eligible_count(&self) -> Result<usize, DatabaseError>;
}

/// Fetches raw content. Missing keys mean "not found"; per-topic upstream
/// errors are reported in `ContentFetch::failed`. `Err` means the provider
/// as a whole was unreachable.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn fetch_content(&self, topics: &[String]) -> Result<ContentFetch, ContentError>;
}

/// Turns a `ContentSet` into a tier-specific summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        topic: &str,
        content: &ContentSet,
        tier: Tier,
    ) -> Result<TopicSummary, SummaryError>;
}

/// Outbound delivery, subject to an external rate limit.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        address: &str,
        digest: &PreparedDigest,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Best-effort archive of delivered digests.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn record_digest(
        &self,
        recipient_id: &str,
        content: &str,
        topics: &[String],
    ) -> Result<(), DatabaseError>;
}

/// Best-effort run log.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append_run(&self, run: &RunRecord) -> Result<(), DatabaseError>;
}

/// Re-invokes the pipeline with a continuation cursor. Must not wait for
/// the follow-up run to finish.
pub trait ContinuationTrigger: Send + Sync {
    fn fire(&self, cursor: usize) -> Result<(), TriggerError>;
}
