//! Per-recipient packaging: orders summaries and renders the digest.
//!
//! Pure assembly, no I/O. Summary order always follows the recipient's
//! subscription order; completion order from the parallel preparation
//! phase must never leak into what the recipient reads.

use chrono::Utc;

use crate::pipeline::types::{PreparedDigest, Recipient, Tier, TopicSummary};

/// Topics named in the subject line before "+N more".
const SUBJECT_TOPICS: usize = 3;

/// Assemble a digest. Returns `None` for an empty summary list, which the
/// caller is expected to have filtered out already.
pub fn package_digest(recipient: Recipient, mut summaries: Vec<TopicSummary>) -> Option<PreparedDigest> {
    if summaries.is_empty() {
        return None;
    }

    summaries.sort_by_key(|s| {
        recipient
            .topics
            .iter()
            .position(|t| *t == s.topic)
            .unwrap_or(usize::MAX)
    });

    let tier = recipient.tier;
    let subject = render_subject(&summaries);
    let body = render_body(&recipient, &summaries, tier);

    Some(PreparedDigest {
        recipient,
        summaries,
        tier,
        subject,
        body,
    })
}

fn render_subject(summaries: &[TopicSummary]) -> String {
    let mut names: Vec<String> = summaries
        .iter()
        .take(SUBJECT_TOPICS)
        .map(|s| title_case(&s.topic))
        .collect();
    if summaries.len() > SUBJECT_TOPICS {
        names.push(format!("+{} more", summaries.len() - SUBJECT_TOPICS));
    }
    format!(
        "Your digest for {}: {}",
        Utc::now().format("%b %-d"),
        names.join(", ")
    )
}

fn render_body(recipient: &Recipient, summaries: &[TopicSummary], tier: Tier) -> String {
    let mut body = String::with_capacity(1024);

    match &recipient.name {
        Some(name) => body.push_str(&format!("Hi {name},\n\n")),
        None => body.push_str("Hi,\n\n"),
    }
    body.push_str("Here is what happened in the topics you follow.\n");

    for summary in summaries {
        body.push_str(&format!("\n## {}\n\n{}\n", title_case(&summary.topic), summary.summary.trim()));

        match tier {
            Tier::Pro => {
                if !summary.key_points.is_empty() {
                    body.push('\n');
                    for point in &summary.key_points {
                        body.push_str(&format!("  - {}\n", point.trim()));
                    }
                }
                if !summary.sources.is_empty() {
                    body.push_str("\nSources:\n");
                    for source in &summary.sources {
                        body.push_str(&format!("  {} <{}>\n", source.title, source.url));
                    }
                }
            }
            Tier::Free => {
                if let Some(source) = summary.sources.first() {
                    body.push_str(&format!("\nRead more: {}\n", source.url));
                }
            }
        }
    }

    if tier == Tier::Free {
        body.push_str("\nUpgrade to Pro for key points, full source lists and more topics.\n");
    }
    body
}

fn title_case(topic: &str) -> String {
    topic
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
