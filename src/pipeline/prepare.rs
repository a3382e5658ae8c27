//! Content & summary preparation.
//!
//! Content is fetched once per slice for the deduplicated topic set. Each
//! recipient is then prepared in its own task, with all of its topic
//! summarizations running concurrently under an independent deadline.
//! Outcomes are collected in completion order; a failing, hanging or
//! panicking unit never takes its siblings down.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::error::SummaryError;
use crate::pipeline::types::{
    ContentProvider, ContentSet, FailureKind, FailureRecord, Recipient, SkipReason, Summarizer,
    TopicSummary,
};

/// Immutable content snapshot shared by every recipient task in a slice.
pub type ContentSnapshot = Arc<HashMap<String, ContentSet>>;

/// Terminal preparation outcome for one recipient.
#[derive(Debug)]
pub enum PreparedOutcome {
    /// At least one summary was produced, in subscription order.
    Ready(Vec<TopicSummary>),
    Skipped(SkipReason),
    Failed { kind: FailureKind, detail: String },
}

/// A recipient together with its outcome and any per-topic failures.
#[derive(Debug)]
pub struct RecipientPreparation {
    pub recipient: Recipient,
    pub outcome: PreparedOutcome,
    pub topic_failures: Vec<FailureRecord>,
}

/// Fetch content for the slice's topic set.
///
/// Nothing here is fatal. A provider-wide error becomes one slice-level
/// `fetch_error` record and the slice continues with no content. Each topic
/// whose upstream request failed gets its own `fetch_error` record, so an
/// outage is never mistaken for a quiet topic.
pub async fn fetch_slice_content(
    provider: &dyn ContentProvider,
    topics: &[String],
) -> (HashMap<String, ContentSet>, Vec<FailureRecord>) {
    if topics.is_empty() {
        return (HashMap::new(), Vec::new());
    }

    match provider.fetch_content(topics).await {
        Ok(fetch) => {
            let missing = topics
                .iter()
                .filter(|t| !fetch.content.contains_key(*t))
                .count();
            info!(
                requested = topics.len(),
                found = fetch.content.len(),
                failed = fetch.failed.len(),
                missing,
                "Fetched slice content"
            );
            let records = fetch
                .failed
                .into_iter()
                .map(|(topic, e)| FailureRecord {
                    kind: FailureKind::FetchError,
                    recipient_id: None,
                    topic: Some(topic),
                    detail: e.to_string(),
                })
                .collect();
            (fetch.content, records)
        }
        Err(e) => {
            warn!(error = %e, topics = topics.len(), "Content fetch failed for slice");
            let record = FailureRecord {
                kind: FailureKind::FetchError,
                recipient_id: None,
                topic: None,
                detail: e.to_string(),
            };
            (HashMap::new(), vec![record])
        }
    }
}

/// Prepares summaries for recipients with a per-call deadline.
#[derive(Clone)]
pub struct Preparer {
    summarizer: Arc<dyn Summarizer>,
    timeout: Duration,
}

impl Preparer {
    pub fn new(summarizer: Arc<dyn Summarizer>, timeout: Duration) -> Self {
        Self {
            summarizer,
            timeout,
        }
    }

    /// Prepare every recipient in parallel and join on all of them.
    ///
    /// Results come back in completion order. A panicking summary call fails
    /// only its topic; a recipient task that dies anyway is reported as an
    /// `unknown` failure for that recipient only.
    pub async fn prepare_slice(
        &self,
        recipients: Vec<Recipient>,
        content: ContentSnapshot,
    ) -> Vec<RecipientPreparation> {
        let mut pending: FuturesUnordered<_> = recipients
            .into_iter()
            .map(|recipient| {
                let fallback = recipient.clone();
                let handle = tokio::spawn(prepare_recipient(
                    Arc::clone(&self.summarizer),
                    self.timeout,
                    recipient,
                    Arc::clone(&content),
                ));
                async move {
                    match handle.await {
                        Ok(prepared) => prepared,
                        Err(e) => {
                            warn!(recipient = %fallback.id, error = %e, "Preparation task aborted");
                            RecipientPreparation {
                                recipient: fallback,
                                outcome: PreparedOutcome::Failed {
                                    kind: FailureKind::Unknown,
                                    detail: format!("preparation task aborted: {e}"),
                                },
                                topic_failures: Vec::new(),
                            }
                        }
                    }
                }
            })
            .collect();

        let mut prepared = Vec::with_capacity(pending.len());
        while let Some(result) = pending.next().await {
            prepared.push(result);
        }
        prepared
    }
}

/// Summarize every topic of one recipient that has content.
pub async fn prepare_recipient(
    summarizer: Arc<dyn Summarizer>,
    timeout: Duration,
    recipient: Recipient,
    content: ContentSnapshot,
) -> RecipientPreparation {
    let attempted: Vec<(&String, &ContentSet)> = recipient
        .topics
        .iter()
        .filter_map(|topic| {
            content
                .get(topic)
                .filter(|set| !set.is_empty())
                .map(|set| (topic, set))
        })
        .collect();

    if attempted.is_empty() {
        debug!(recipient = %recipient.id, "No content for any topic");
        let reason = SkipReason::NoContent {
            topics: recipient.topics.clone(),
        };
        return RecipientPreparation {
            recipient,
            outcome: PreparedOutcome::Skipped(reason),
            topic_failures: Vec::new(),
        };
    }

    let tier = recipient.tier;
    let summarizer = summarizer.as_ref();
    let outcomes = join_all(attempted.iter().map(|(topic, set)| async move {
        let call = tokio::time::timeout(timeout, summarizer.summarize(topic, set, tier));
        // A panicking call fails its own topic only.
        let result = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SummaryError::Timeout {
                topic: topic.to_string(),
                timeout,
            }),
            Err(panic) => Err(SummaryError::Panicked {
                topic: topic.to_string(),
                message: panic_message(panic.as_ref()),
            }),
        };
        ((*topic).clone(), result)
    }))
    .await;

    let mut summaries = Vec::new();
    let mut topic_failures = Vec::new();
    for (topic, result) in outcomes {
        match result {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                warn!(recipient = %recipient.id, topic = %topic, error = %e, "Topic summary dropped");
                topic_failures.push(FailureRecord {
                    kind: FailureKind::SummaryError,
                    recipient_id: Some(recipient.id.clone()),
                    topic: Some(topic),
                    detail: e.to_string(),
                });
            }
        }
    }

    let outcome = if summaries.is_empty() {
        PreparedOutcome::Skipped(SkipReason::NoSummariesProduced {
            topics: attempted.iter().map(|(t, _)| (*t).clone()).collect(),
        })
    } else {
        PreparedOutcome::Ready(summaries)
    };

    RecipientPreparation {
        recipient,
        outcome,
        topic_failures,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContentError;
    use crate::pipeline::types::{ContentFetch, ContentItem, Tier};
    use async_trait::async_trait;

    /// Summarizer with per-topic scripted behaviour.
    struct ScriptedSummarizer {
        delays: HashMap<String, Duration>,
        failing: Vec<String>,
        panicking: Vec<String>,
    }

    impl ScriptedSummarizer {
        fn new() -> Self {
            Self {
                delays: HashMap::new(),
                failing: Vec::new(),
                panicking: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        async fn summarize(
            &self,
            topic: &str,
            content: &ContentSet,
            tier: Tier,
        ) -> Result<TopicSummary, SummaryError> {
            if let Some(delay) = self.delays.get(topic) {
                tokio::time::sleep(*delay).await;
            }
            if self.panicking.iter().any(|t| t == topic) {
                panic!("summarizer blew up on {topic}");
            }
            if self.failing.iter().any(|t| t == topic) {
                return Err(SummaryError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "boom".into(),
                });
            }
            Ok(TopicSummary {
                topic: topic.to_string(),
                tier,
                summary: format!("{} items about {topic}", content.items.len()),
                key_points: vec![],
                sources: vec![],
            })
        }
    }

    fn snapshot(topics: &[&str]) -> ContentSnapshot {
        let map = topics
            .iter()
            .map(|t| {
                let item = ContentItem {
                    title: format!("{t} news"),
                    url: format!("https://news.example.com/{t}"),
                    snippet: String::new(),
                    source: None,
                    published_at: None,
                };
                (t.to_string(), ContentSet::new(*t, vec![item]))
            })
            .collect();
        Arc::new(map)
    }

    fn recipient(id: &str, topics: &[&str]) -> Recipient {
        Recipient {
            id: id.into(),
            email: format!("{id}@example.com"),
            name: None,
            tier: Tier::Free,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            paused: false,
        }
    }

    #[tokio::test]
    async fn topic_order_follows_subscription_not_completion() {
        let mut summarizer = ScriptedSummarizer::new();
        summarizer.delays.insert("a".into(), Duration::from_millis(80));
        summarizer.delays.insert("b".into(), Duration::from_millis(40));
        summarizer.delays.insert("c".into(), Duration::from_millis(1));

        let prepared = prepare_recipient(
            Arc::new(summarizer),
            Duration::from_secs(1),
            recipient("r", &["a", "b", "c"]),
            snapshot(&["a", "b", "c"]),
        )
        .await;

        match prepared.outcome {
            PreparedOutcome::Ready(summaries) => {
                let order: Vec<_> = summaries.iter().map(|s| s.topic.as_str()).collect();
                assert_eq!(order, vec!["a", "b", "c"]);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_failing_topic_does_not_sink_the_digest() {
        let mut summarizer = ScriptedSummarizer::new();
        summarizer.failing.push("b".into());

        let prepared = prepare_recipient(
            Arc::new(summarizer),
            Duration::from_secs(1),
            recipient("r", &["a", "b"]),
            snapshot(&["a", "b"]),
        )
        .await;

        assert!(matches!(prepared.outcome, PreparedOutcome::Ready(ref s) if s.len() == 1));
        assert_eq!(prepared.topic_failures.len(), 1);
        assert_eq!(prepared.topic_failures[0].kind, FailureKind::SummaryError);
        assert_eq!(prepared.topic_failures[0].topic.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn all_topics_timing_out_skips_recipient() {
        let mut summarizer = ScriptedSummarizer::new();
        summarizer.delays.insert("a".into(), Duration::from_secs(5));
        summarizer.delays.insert("b".into(), Duration::from_secs(5));

        let prepared = prepare_recipient(
            Arc::new(summarizer),
            Duration::from_millis(30),
            recipient("r", &["a", "b"]),
            snapshot(&["a", "b"]),
        )
        .await;

        match prepared.outcome {
            PreparedOutcome::Skipped(SkipReason::NoSummariesProduced { topics }) => {
                assert_eq!(topics, vec!["a", "b"]);
            }
            other => panic!("expected NoSummariesProduced, got {other:?}"),
        }
        assert_eq!(prepared.topic_failures.len(), 2);
        assert!(prepared.topic_failures[0].detail.contains("timed out"));
    }

    #[tokio::test]
    async fn topics_without_content_are_not_attempted() {
        let prepared = prepare_recipient(
            Arc::new(ScriptedSummarizer::new()),
            Duration::from_secs(1),
            recipient("r", &["known", "unknown"]),
            snapshot(&["known"]),
        )
        .await;

        assert!(matches!(prepared.outcome, PreparedOutcome::Ready(ref s) if s.len() == 1));
        assert!(prepared.topic_failures.is_empty());

        let empty = prepare_recipient(
            Arc::new(ScriptedSummarizer::new()),
            Duration::from_secs(1),
            recipient("r", &["unknown"]),
            snapshot(&["known"]),
        )
        .await;
        assert!(matches!(
            empty.outcome,
            PreparedOutcome::Skipped(SkipReason::NoContent { .. })
        ));
    }

    #[tokio::test]
    async fn panicking_recipient_is_isolated() {
        let mut summarizer = ScriptedSummarizer::new();
        summarizer.panicking.push("bad".into());
        let preparer = Preparer::new(Arc::new(summarizer), Duration::from_secs(1));

        let prepared = preparer
            .prepare_slice(
                vec![recipient("ok", &["good"]), recipient("boom", &["bad"])],
                snapshot(&["good", "bad"]),
            )
            .await;

        assert_eq!(prepared.len(), 2);
        let boom = prepared.iter().find(|p| p.recipient.id == "boom").unwrap();
        assert!(matches!(
            boom.outcome,
            PreparedOutcome::Skipped(SkipReason::NoSummariesProduced { .. })
        ));
        assert_eq!(boom.topic_failures.len(), 1);
        let ok = prepared.iter().find(|p| p.recipient.id == "ok").unwrap();
        assert!(matches!(ok.outcome, PreparedOutcome::Ready(_)));
    }

    #[tokio::test]
    async fn panicking_topic_keeps_sibling_summaries() {
        let mut summarizer = ScriptedSummarizer::new();
        summarizer.panicking.push("bad".into());
        let preparer = Preparer::new(Arc::new(summarizer), Duration::from_secs(1));

        let prepared = preparer
            .prepare_slice(
                vec![recipient("mixed", &["good", "bad"])],
                snapshot(&["good", "bad"]),
            )
            .await;

        let mixed = &prepared[0];
        match &mixed.outcome {
            PreparedOutcome::Ready(summaries) => {
                let topics: Vec<_> = summaries.iter().map(|s| s.topic.as_str()).collect();
                assert_eq!(topics, vec!["good"]);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(mixed.topic_failures.len(), 1);
        let failure = &mixed.topic_failures[0];
        assert_eq!(failure.kind, FailureKind::SummaryError);
        assert_eq!(failure.topic.as_deref(), Some("bad"));
        assert!(failure.detail.contains("summarizer blew up on bad"));
    }

    #[tokio::test]
    async fn slice_results_arrive_in_completion_order() {
        let mut summarizer = ScriptedSummarizer::new();
        summarizer.delays.insert("slow".into(), Duration::from_millis(100));
        let preparer = Preparer::new(Arc::new(summarizer), Duration::from_secs(1));

        let prepared = preparer
            .prepare_slice(
                vec![recipient("first", &["slow"]), recipient("second", &["fast"])],
                snapshot(&["slow", "fast"]),
            )
            .await;

        let order: Vec<_> = prepared.iter().map(|p| p.recipient.id.as_str()).collect();
        assert_eq!(order, vec!["second", "first"]);
    }

    struct DownProvider;

    #[async_trait]
    impl ContentProvider for DownProvider {
        async fn fetch_content(&self, _topics: &[String]) -> Result<ContentFetch, ContentError> {
            Err(ContentError::Unavailable("503".into()))
        }
    }

    /// Serves "rust", fails "flaky" upstream, has nothing for anything else.
    struct FlakyProvider;

    #[async_trait]
    impl ContentProvider for FlakyProvider {
        async fn fetch_content(&self, topics: &[String]) -> Result<ContentFetch, ContentError> {
            let mut fetch = ContentFetch::default();
            for topic in topics {
                match topic.as_str() {
                    "rust" => {
                        fetch.content.insert(topic.clone(), snapshot(&["rust"])["rust"].clone());
                    }
                    "flaky" => fetch.failed.push((
                        topic.clone(),
                        ContentError::RequestFailed {
                            topic: topic.clone(),
                            reason: "HTTP 502 Bad Gateway".into(),
                        },
                    )),
                    _ => {}
                }
            }
            Ok(fetch)
        }
    }

    #[tokio::test]
    async fn fetch_failure_becomes_one_slice_record() {
        let (content, failures) = fetch_slice_content(&DownProvider, &["rust".to_string()]).await;
        assert!(content.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::FetchError);
        assert_eq!(failures[0].topic, None);
    }

    #[tokio::test]
    async fn failed_topics_get_their_own_records() {
        let topics: Vec<String> = ["rust", "flaky", "quiet"].iter().map(|t| t.to_string()).collect();
        let (content, failures) = fetch_slice_content(&FlakyProvider, &topics).await;

        assert!(content.contains_key("rust"));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::FetchError);
        assert_eq!(failures[0].topic.as_deref(), Some("flaky"));
        assert!(failures[0].detail.contains("502"));
    }

    #[tokio::test]
    async fn fetch_skipped_for_empty_topic_set() {
        let (content, failures) = fetch_slice_content(&DownProvider, &[]).await;
        assert!(content.is_empty());
        assert!(failures.is_empty());
    }
}
