//! Topic deduplication across a slice of recipients.
//!
//! Runs before any content is fetched: paused and topic-less recipients are
//! skipped here so no preparation work is spent on them.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::DigestConfig;
use crate::pipeline::audit::RunLedger;
use crate::pipeline::types::{Recipient, SkipReason, Tier};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Result of deduplicating a slice.
#[derive(Debug, Default)]
pub struct TopicPlan {
    /// Distinct topics in first-seen order.
    pub topics: Vec<String>,
    /// Recipients that go on to preparation, with canonical, quota-trimmed topics.
    pub eligible: Vec<Recipient>,
}

/// Canonical form of a topic name: trimmed, single-spaced, lowercase.
pub fn canonical_topic(raw: &str) -> String {
    WHITESPACE.replace_all(raw.trim(), " ").to_lowercase()
}

/// Topic quota for a tier.
pub fn topic_quota(config: &DigestConfig, tier: Tier) -> usize {
    match tier {
        Tier::Free => config.free_topic_quota,
        Tier::Pro => config.pro_topic_quota,
    }
}

/// Canonicalize a recipient's topics, dropping blanks and repeats while
/// keeping the subscription order, then apply the tier quota.
fn normalize_topics(recipient: &Recipient, quota: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut topics: Vec<String> = recipient
        .topics
        .iter()
        .map(|t| canonical_topic(t))
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect();

    if topics.len() > quota {
        debug!(
            recipient = %recipient.id,
            tier = %recipient.tier,
            dropped = topics.len() - quota,
            "Topics over tier quota dropped"
        );
        topics.truncate(quota);
    }
    topics
}

/// Collapse the slice into the unique set of topics needing content.
///
/// Paused recipients and recipients without topics are recorded as skipped
/// in `ledger` and left out of the plan.
pub fn dedupe_topics(slice: &[Recipient], config: &DigestConfig, ledger: &mut RunLedger) -> TopicPlan {
    let mut plan = TopicPlan::default();
    let mut seen = HashSet::new();

    for recipient in slice {
        if recipient.paused {
            ledger.record_skip(&recipient.id, &SkipReason::Paused);
            continue;
        }

        let topics = normalize_topics(recipient, topic_quota(config, recipient.tier));
        if topics.is_empty() {
            ledger.record_skip(&recipient.id, &SkipReason::NoTopics);
            continue;
        }

        for topic in &topics {
            if seen.insert(topic.clone()) {
                plan.topics.push(topic.clone());
            }
        }

        plan.eligible.push(Recipient {
            topics,
            ..recipient.clone()
        });
    }

    debug!(
        recipients = slice.len(),
        eligible = plan.eligible.len(),
        topics = plan.topics.len(),
        "Deduplicated slice topics"
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RunStatus;

    fn recipient(id: &str, topics: &[&str], paused: bool) -> Recipient {
        Recipient {
            id: id.into(),
            email: format!("{id}@example.com"),
            name: None,
            tier: Tier::Pro,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            paused,
        }
    }

    #[test]
    fn canonicalizes_names() {
        assert_eq!(canonical_topic("  Machine   Learning "), "machine learning");
        assert_eq!(canonical_topic("Rust\t\nLang"), "rust lang");
        assert_eq!(canonical_topic("   "), "");
    }

    #[test]
    fn shared_topics_appear_once() {
        let slice = vec![
            recipient("a", &["Rust", "AI"], false),
            recipient("b", &["ai", "Climate"], false),
        ];
        let mut ledger = RunLedger::new();
        let plan = dedupe_topics(&slice, &DigestConfig::default(), &mut ledger);

        assert_eq!(plan.topics, vec!["rust", "ai", "climate"]);
        assert_eq!(plan.eligible.len(), 2);
        let (result, _) = ledger.finish();
        assert_eq!(result.processed, 0);
    }

    #[test]
    fn paused_and_empty_recipients_are_skipped() {
        let slice = vec![
            recipient("paused", &["rust"], true),
            recipient("empty", &[], false),
            recipient("blank", &["  "], false),
            recipient("ok", &["go"], false),
        ];
        let mut ledger = RunLedger::new();
        let plan = dedupe_topics(&slice, &DigestConfig::default(), &mut ledger);

        assert_eq!(plan.topics, vec!["go"]);
        assert_eq!(plan.eligible.len(), 1);
        assert_eq!(plan.eligible[0].id, "ok");

        let (result, _) = ledger.finish();
        assert_eq!(result.skipped, 3);
        assert!(result.errors[0].contains("paused"));
        assert!(result.errors[1].contains("no-topics"));
        assert_eq!(result.status, RunStatus::Success);
    }

    #[test]
    fn paused_topics_are_not_requested() {
        let slice = vec![recipient("p", &["secret topic"], true)];
        let mut ledger = RunLedger::new();
        let plan = dedupe_topics(&slice, &DigestConfig::default(), &mut ledger);
        assert!(plan.topics.is_empty());
    }

    #[test]
    fn tier_quota_trims_in_subscription_order() {
        let mut free = recipient("f", &["a", "b", "c", "d", "e"], false);
        free.tier = Tier::Free;
        let mut ledger = RunLedger::new();
        let plan = dedupe_topics(&[free], &DigestConfig::default(), &mut ledger);
        assert_eq!(plan.eligible[0].topics, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_topics_within_recipient_collapse() {
        let slice = vec![recipient("a", &["Rust", "rust", " RUST "], false)];
        let mut ledger = RunLedger::new();
        let plan = dedupe_topics(&slice, &DigestConfig::default(), &mut ledger);
        assert_eq!(plan.eligible[0].topics, vec!["rust"]);
    }

    #[test]
    fn empty_slice_yields_empty_plan() {
        let mut ledger = RunLedger::new();
        let plan = dedupe_topics(&[], &DigestConfig::default(), &mut ledger);
        assert!(plan.topics.is_empty());
        assert!(plan.eligible.is_empty());
    }
}
