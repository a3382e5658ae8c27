//! Tier-aware topic summarizer.
//!
//! Free summaries are two or three sentences. Pro summaries are longer and
//! carry up to five key points. The model is asked for a JSON object; prose
//! around it is tolerated, and a plain-text reply is taken as the summary.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::SummaryError;
use crate::llm::LlmClient;
use crate::pipeline::types::{ContentSet, SourceLink, Summarizer, Tier, TopicSummary};

const MAX_KEY_POINTS: usize = 5;

const FREE_PREAMBLE: &str = "You write short news digests. Summarize the articles you are given \
in two or three plain sentences. Respond with a JSON object: \
{\"summary\": string, \"key_points\": []}. No markdown.";

const PRO_PREAMBLE: &str = "You write detailed news briefings for professionals. Summarize the \
articles you are given in one or two paragraphs, then list up to five key points. Respond with \
a JSON object: {\"summary\": string, \"key_points\": [string]}. No markdown.";

/// Summarizer backed by an `LlmClient`.
pub struct LlmSummarizer {
    client: Arc<dyn LlmClient>,
}

impl LlmSummarizer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
}

fn preamble(tier: Tier) -> &'static str {
    match tier {
        Tier::Free => FREE_PREAMBLE,
        Tier::Pro => PRO_PREAMBLE,
    }
}

fn max_tokens(tier: Tier) -> u64 {
    match tier {
        Tier::Free => 300,
        Tier::Pro => 900,
    }
}

fn build_prompt(topic: &str, content: &ContentSet) -> String {
    let mut prompt = format!("Topic: {topic}\n\nArticles:\n");
    for (i, item) in content.items.iter().enumerate() {
        let _ = write!(prompt, "\n[{}] {}", i + 1, item.title);
        if let Some(source) = &item.source {
            let _ = write!(prompt, " ({source})");
        }
        prompt.push('\n');
        if !item.snippet.is_empty() {
            let _ = writeln!(prompt, "{}", item.snippet.trim());
        }
    }
    prompt
}

/// Extract a JSON object from LLM output (code fences or surrounding prose).
fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner;
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}

/// Turn raw model output into a summary for `topic`.
fn parse_summary_response(
    topic: &str,
    tier: Tier,
    raw: &str,
    content: &ContentSet,
) -> Result<TopicSummary, SummaryError> {
    let (summary, mut key_points) =
        match serde_json::from_str::<SummaryResponse>(extract_json_object(raw)) {
            Ok(parsed) => (parsed.summary.trim().to_string(), parsed.key_points),
            Err(_) => (raw.trim().to_string(), Vec::new()),
        };

    if summary.is_empty() {
        return Err(SummaryError::Empty {
            topic: topic.to_string(),
        });
    }

    let sources: Vec<SourceLink> = content
        .items
        .iter()
        .map(|item| SourceLink {
            title: item.title.clone(),
            url: item.url.clone(),
        })
        .collect();

    match tier {
        Tier::Free => key_points.clear(),
        Tier::Pro => {
            key_points.retain(|p| !p.trim().is_empty());
            key_points.truncate(MAX_KEY_POINTS);
        }
    }

    Ok(TopicSummary {
        topic: topic.to_string(),
        tier,
        summary,
        key_points,
        sources,
    })
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        topic: &str,
        content: &ContentSet,
        tier: Tier,
    ) -> Result<TopicSummary, SummaryError> {
        let prompt = build_prompt(topic, content);
        let raw = self
            .client
            .complete(preamble(tier), &prompt, max_tokens(tier))
            .await?;

        debug!(
            topic = %topic,
            tier = %tier,
            provider = self.client.provider_name(),
            model = self.client.model_name(),
            chars = raw.len(),
            "Summary generated"
        );
        parse_summary_response(topic, tier, &raw, content)
    }
}
